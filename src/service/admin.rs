//! Admin password check. The password is a plaintext shared secret kept in
//! `app/config/admin.json`, falling back to the configured one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::store::{self, paths, DocumentStore, PutOptions};

const MIN_PASSWORD_LEN: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminDocument {
    password: String,
    updated_at: DateTime<Utc>,
}

pub struct AdminService {
    store: Arc<dyn DocumentStore>,
    configured: Option<String>,
}

impl AdminService {
    pub fn new(store: Arc<dyn DocumentStore>, configured: Option<String>) -> Self {
        Self {
            store,
            configured: configured.filter(|p| !p.is_empty()),
        }
    }

    async fn expected(&self) -> ServiceResult<Option<String>> {
        let stored = store::get_json_opt::<AdminDocument>(self.store.as_ref(), paths::ADMIN).await?;
        Ok(stored.map(|doc| doc.password).or_else(|| self.configured.clone()))
    }

    /// `Unauthorized` unless `supplied` matches; with no password set anywhere
    /// every admin request is refused
    pub async fn verify(&self, supplied: Option<&str>) -> ServiceResult<()> {
        match (self.expected().await?, supplied) {
            (Some(expected), Some(given)) if expected == given => Ok(()),
            (None, _) => {
                warn!("Admin request refused: no admin password configured");
                Err(ServiceError::Unauthorized)
            }
            _ => Err(ServiceError::Unauthorized),
        }
    }

    pub async fn set_password(&self, password: &str) -> ServiceResult<()> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(ServiceError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        let doc = AdminDocument {
            password: password.to_string(),
            updated_at: Utc::now(),
        };
        store::put_json(self.store.as_ref(), paths::ADMIN, &doc, PutOptions::OVERWRITE).await?;
        info!("Admin password changed");
        Ok(())
    }
}
