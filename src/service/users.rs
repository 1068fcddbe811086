//! User administration: one CRUD service over `app/users/{id}.json` plus the
//! assign/replace/remove dispatch for admin-assigned daily quests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult, StoreError};
use crate::progress::PlayerProgress;
use crate::quest::resolver::MAX_QUEST_COUNT;
use crate::quest::{QuestPreferences, TemplateRegistry};
use crate::store::{self, paths, DocumentStore, PutOptions};

use super::UserLocks;

/// Admin-editable user settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    #[serde(default)]
    pub preferences: QuestPreferences,
    /// Template ids forced into the daily bucket
    #[serde(default)]
    pub daily_quests: Vec<String>,
    /// Audit log of assignment changes
    #[serde(default)]
    pub task_assignments: Vec<TaskAssignment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The user document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub config: UserConfig,
    #[serde(default)]
    pub stats: PlayerProgress,
    /// Date of the latest quest state document
    pub last_state_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentKind {
    Assign,
    Replace,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    pub action: AssignmentKind,
    pub template_ids: Vec<String>,
    pub at: DateTime<Utc>,
}

/// Change to a user's assigned daily quests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum AssignmentAction {
    /// Add templates not already assigned
    Assign {
        #[serde(rename = "templateIds")]
        template_ids: Vec<String>,
    },
    /// Replace the whole assignment list
    Replace {
        #[serde(rename = "templateIds")]
        template_ids: Vec<String>,
    },
    /// Drop the listed templates
    Remove {
        #[serde(rename = "templateIds")]
        template_ids: Vec<String>,
    },
}

impl AssignmentAction {
    pub fn kind(&self) -> AssignmentKind {
        match self {
            AssignmentAction::Assign { .. } => AssignmentKind::Assign,
            AssignmentAction::Replace { .. } => AssignmentKind::Replace,
            AssignmentAction::Remove { .. } => AssignmentKind::Remove,
        }
    }

    pub fn template_ids(&self) -> &[String] {
        match self {
            AssignmentAction::Assign { template_ids }
            | AssignmentAction::Replace { template_ids }
            | AssignmentAction::Remove { template_ids } => template_ids,
        }
    }

    /// Apply to an assignment list, keeping it free of duplicates
    pub fn apply(&self, assigned: &mut Vec<String>) {
        match self {
            AssignmentAction::Assign { template_ids } => {
                for id in template_ids {
                    if !assigned.contains(id) {
                        assigned.push(id.clone());
                    }
                }
            }
            AssignmentAction::Replace { template_ids } => {
                assigned.clear();
                for id in template_ids {
                    if !assigned.contains(id) {
                        assigned.push(id.clone());
                    }
                }
            }
            AssignmentAction::Remove { template_ids } => {
                assigned.retain(|id| !template_ids.contains(id));
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    /// Generated when absent
    pub id: Option<String>,
    pub name: String,
    pub avatar: Option<String>,
    #[serde(default)]
    pub preferences: QuestPreferences,
    #[serde(default)]
    pub daily_quests: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub preferences: Option<QuestPreferences>,
    /// Admin override of the stats block
    pub stats: Option<PlayerProgress>,
}

pub(crate) async fn load_record(store: &dyn DocumentStore, user_id: &str) -> ServiceResult<UserRecord> {
    if !paths::is_valid_id(user_id) {
        return Err(ServiceError::UserNotFound(user_id.to_string()));
    }
    store::get_json_opt(store, &paths::user(user_id))
        .await?
        .ok_or_else(|| ServiceError::UserNotFound(user_id.to_string()))
}

pub(crate) async fn save_record(store: &dyn DocumentStore, record: &UserRecord) -> ServiceResult<()> {
    store::put_json(store, &paths::user(&record.config.id), record, PutOptions::OVERWRITE).await?;
    Ok(())
}

fn validate_preferences(prefs: &QuestPreferences) -> ServiceResult<()> {
    if let Some(max) = prefs.max_difficulty {
        if !(1..=5).contains(&max) {
            return Err(ServiceError::Validation(format!("maxDifficulty {} outside 1-5", max)));
        }
    }
    if let Some(count) = prefs.quest_count {
        if !(1..=MAX_QUEST_COUNT).contains(&count) {
            return Err(ServiceError::Validation(format!(
                "questCount {} outside 1-{}",
                count, MAX_QUEST_COUNT
            )));
        }
    }
    Ok(())
}

pub struct UserService {
    store: Arc<dyn DocumentStore>,
    registry: Arc<TemplateRegistry>,
    locks: Arc<UserLocks>,
}

impl UserService {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<TemplateRegistry>, locks: Arc<UserLocks>) -> Self {
        Self { store, registry, locks }
    }

    /// All users, ordered by id
    pub async fn list(&self) -> ServiceResult<Vec<UserRecord>> {
        let mut users = Vec::new();
        for path in self.store.list(paths::USERS_PREFIX).await? {
            match store::get_json::<UserRecord>(self.store.as_ref(), &path).await {
                Ok(record) => users.push(record),
                Err(StoreError::NotFound(_)) => {}
                Err(e) => warn!("Skipping unreadable user document {}: {}", path, e),
            }
        }
        Ok(users)
    }

    pub async fn get(&self, user_id: &str) -> ServiceResult<UserRecord> {
        load_record(self.store.as_ref(), user_id).await
    }

    pub async fn create(&self, req: CreateUser) -> ServiceResult<UserRecord> {
        let id = req.id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        if !paths::is_valid_id(&id) {
            return Err(ServiceError::Validation(format!("Invalid user id '{}'", id)));
        }
        if req.name.trim().is_empty() {
            return Err(ServiceError::Validation("Name must not be empty".to_string()));
        }
        validate_preferences(&req.preferences)?;
        self.check_templates(&req.daily_quests).await?;

        let now = Utc::now();
        let mut daily_quests = Vec::new();
        AssignmentAction::Replace { template_ids: req.daily_quests }.apply(&mut daily_quests);

        let record = UserRecord {
            config: UserConfig {
                id: id.clone(),
                name: req.name.trim().to_string(),
                avatar: req.avatar,
                preferences: req.preferences,
                daily_quests,
                task_assignments: Vec::new(),
                created_at: now,
                updated_at: now,
            },
            stats: PlayerProgress::new(),
            last_state_date: None,
        };

        let _guard = self.locks.lock(&id).await;
        match store::put_json(self.store.as_ref(), &paths::user(&id), &record, PutOptions::CREATE).await {
            Ok(_) => {}
            Err(StoreError::AlreadyExists(_)) => return Err(ServiceError::UserExists(id)),
            Err(e) => return Err(e.into()),
        }

        info!("Created user {} ({})", record.config.name, id);
        Ok(record)
    }

    pub async fn update(&self, user_id: &str, req: UpdateUser) -> ServiceResult<UserRecord> {
        if let Some(ref prefs) = req.preferences {
            validate_preferences(prefs)?;
        }
        if let Some(ref stats) = req.stats {
            stats.validate()?;
        }

        let _guard = self.locks.lock(user_id).await;
        let mut record = load_record(self.store.as_ref(), user_id).await?;

        if let Some(name) = req.name {
            if name.trim().is_empty() {
                return Err(ServiceError::Validation("Name must not be empty".to_string()));
            }
            record.config.name = name.trim().to_string();
        }
        if let Some(avatar) = req.avatar {
            record.config.avatar = Some(avatar);
        }
        if let Some(prefs) = req.preferences {
            record.config.preferences = prefs;
        }
        if let Some(stats) = req.stats {
            record.stats = stats;
        }
        record.config.updated_at = Utc::now();

        save_record(self.store.as_ref(), &record).await?;
        info!("Updated user {}", user_id);
        Ok(record)
    }

    /// Remove the user document, then its quest states on a best-effort basis
    pub async fn delete(&self, user_id: &str) -> ServiceResult<()> {
        let _guard = self.locks.lock(user_id).await;
        load_record(self.store.as_ref(), user_id).await?;
        self.store.delete(&paths::user(user_id)).await?;

        match self.store.list(paths::ASSIGNMENTS_PREFIX).await {
            Ok(all) => {
                for path in all.iter().filter(|p| paths::is_assignment_of(p, user_id)) {
                    if let Err(e) = self.store.delete(path).await {
                        warn!("Failed to delete quest state {}: {}", path, e);
                    }
                }
            }
            Err(e) => warn!("Failed to list quest states of {}: {}", user_id, e),
        }

        info!("Deleted user {}", user_id);
        Ok(())
    }

    /// Change the admin-assigned daily quests; takes effect at the next daily
    /// bucket generation
    pub async fn assign(&self, user_id: &str, action: AssignmentAction) -> ServiceResult<UserRecord> {
        if !matches!(action, AssignmentAction::Remove { .. }) {
            self.check_templates(action.template_ids()).await?;
        }

        let _guard = self.locks.lock(user_id).await;
        let mut record = load_record(self.store.as_ref(), user_id).await?;

        action.apply(&mut record.config.daily_quests);
        let now = Utc::now();
        record.config.task_assignments.push(TaskAssignment {
            action: action.kind(),
            template_ids: action.template_ids().to_vec(),
            at: now,
        });
        record.config.updated_at = now;

        save_record(self.store.as_ref(), &record).await?;
        info!(
            "{:?} {:?} for user {} (now {} assigned)",
            action.kind(),
            action.template_ids(),
            user_id,
            record.config.daily_quests.len()
        );
        Ok(record)
    }

    async fn check_templates(&self, template_ids: &[String]) -> ServiceResult<()> {
        let catalog = self.registry.snapshot().await;
        let unknown: Vec<&str> = template_ids
            .iter()
            .filter(|id| !catalog.iter().any(|t| &t.id == *id))
            .map(String::as_str)
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(format!("Unknown templates: {}", unknown.join(", "))))
        }
    }
}
