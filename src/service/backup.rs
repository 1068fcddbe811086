//! Backups of users, their latest quest state and the template catalog.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::quest::{DailyQuestState, QuestTemplate, TemplateRegistry};
use crate::store::{self, paths, DocumentStore, PutOptions};

use super::users::{save_record, UserRecord};
use super::UserLocks;

/// Filesystem-safe, sortable backup name
const NAME_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub date: String,
    pub state: DailyQuestState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub created_at: DateTime<Utc>,
    pub templates: Vec<QuestTemplate>,
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub states: Vec<StateSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub name: String,
    pub location: String,
    pub users: usize,
    pub templates: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub name: String,
    pub users: usize,
    pub templates: usize,
}

pub struct BackupService {
    store: Arc<dyn DocumentStore>,
    registry: Arc<TemplateRegistry>,
    locks: Arc<UserLocks>,
}

impl BackupService {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<TemplateRegistry>, locks: Arc<UserLocks>) -> Self {
        Self { store, registry, locks }
    }

    pub async fn create(&self) -> ServiceResult<BackupSummary> {
        let created_at = Utc::now();
        let name = created_at.format(NAME_FORMAT).to_string();

        let mut users = Vec::new();
        let mut states = Vec::new();
        for path in self.store.list(paths::USERS_PREFIX).await? {
            let Some(user_id) = paths::user_id_from_path(&path) else {
                continue;
            };
            let _guard = self.locks.lock(user_id).await;
            let record: UserRecord = match store::get_json(self.store.as_ref(), &path).await {
                Ok(record) => record,
                Err(e) => {
                    warn!("Backup skipping unreadable user document {}: {}", path, e);
                    continue;
                }
            };
            if let Some(date) = record.last_state_date.clone() {
                let state_path = paths::assignment(&date, user_id);
                if let Some(state) = store::get_json_opt(self.store.as_ref(), &state_path).await? {
                    states.push(StateSnapshot { date, state });
                }
            }
            users.push(record);
        }

        let backup = Backup {
            created_at,
            templates: self.registry.snapshot().await.as_ref().clone(),
            users,
            states,
        };

        let location =
            store::put_json(self.store.as_ref(), &paths::backup(&name), &backup, PutOptions::CREATE).await?;
        info!(
            "Backup {} written ({} users, {} templates)",
            name,
            backup.users.len(),
            backup.templates.len()
        );

        Ok(BackupSummary {
            name,
            location,
            users: backup.users.len(),
            templates: backup.templates.len(),
        })
    }

    /// Backup names, newest first
    pub async fn list(&self) -> ServiceResult<Vec<String>> {
        let mut names: Vec<String> = self
            .store
            .list(paths::BACKUPS_PREFIX)
            .await?
            .iter()
            .filter_map(|p| paths::backup_name_from_path(p).map(str::to_string))
            .collect();
        names.reverse();
        Ok(names)
    }

    /// Write every user, state and the catalog from a backup back to the
    /// store. Users created after the backup are left alone.
    pub async fn restore(&self, name: &str) -> ServiceResult<RestoreSummary> {
        if !paths::is_valid_id(name) {
            return Err(ServiceError::Validation(format!("Invalid backup name '{}'", name)));
        }
        let backup: Backup = store::get_json(self.store.as_ref(), &paths::backup(name)).await?;

        let (templates, rejected) = self.registry.replace(backup.templates).await;
        if rejected > 0 {
            warn!("Restore {}: {} templates rejected", name, rejected);
        }
        self.registry.save_to_store(self.store.as_ref()).await?;

        for record in &backup.users {
            let user_id = &record.config.id;
            if !paths::is_valid_id(user_id) {
                warn!("Restore {}: skipping user with invalid id '{}'", name, user_id);
                continue;
            }
            let _guard = self.locks.lock(user_id).await;
            if let Some(snapshot) = backup
                .states
                .iter()
                .find(|s| &s.state.user_id == user_id && Some(&s.date) == record.last_state_date.as_ref())
            {
                store::put_json(
                    self.store.as_ref(),
                    &paths::assignment(&snapshot.date, user_id),
                    &snapshot.state,
                    PutOptions::OVERWRITE,
                )
                .await?;
            }
            save_record(self.store.as_ref(), record).await?;
        }

        info!("Restored backup {} ({} users, {} templates)", name, backup.users.len(), templates);
        Ok(RestoreSummary {
            name: name.to_string(),
            users: backup.users.len(),
            templates,
        })
    }
}
