//! Quest State Tracking
//!
//! Resolved quest instances grouped per granularity for one user.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

use super::definition::{Category, Granularity};

/// A template resolved for one user and one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestInstance {
    /// `{template_id}:{period_key}`
    pub id: String,
    pub template_id: String,
    pub granularity: Granularity,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    pub xp: i64,
    pub difficulty: u8,
    #[serde(default)]
    pub completed: bool,
    /// Partial progress 0-100 for gradable quests
    pub progress: Option<u8>,
    pub bonus_xp: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QuestInstance {
    pub fn instance_id(template_id: &str, period_key: &str) -> String {
        format!("{}:{}", template_id, period_key)
    }

    /// XP moved by completing or uncompleting this instance
    pub fn reward(&self) -> i64 {
        self.xp.saturating_add(self.bonus_xp.unwrap_or(0))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

/// The instances of one granularity for the period named by `period_key`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestBucket {
    /// None until the bucket is first generated
    pub period_key: Option<String>,
    #[serde(default)]
    pub quests: Vec<QuestInstance>,
}

impl QuestBucket {
    pub fn all_completed(&self) -> bool {
        !self.quests.is_empty() && self.quests.iter().all(|q| q.completed)
    }

    pub fn completed_count(&self) -> usize {
        self.quests.iter().filter(|q| q.completed).count()
    }
}

/// All active quest buckets for a single user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyQuestState {
    pub user_id: String,
    #[serde(default)]
    pub daily_quests: QuestBucket,
    #[serde(default)]
    pub weekly_quests: QuestBucket,
    #[serde(default)]
    pub monthly_quests: QuestBucket,
    #[serde(default)]
    pub special_quests: QuestBucket,
    /// Gate for the one-time "all dailies complete" bonus
    #[serde(default)]
    pub daily_bonus_granted: bool,
}

impl DailyQuestState {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Self::default()
        }
    }

    pub fn bucket(&self, granularity: Granularity) -> &QuestBucket {
        match granularity {
            Granularity::Daily => &self.daily_quests,
            Granularity::Weekly => &self.weekly_quests,
            Granularity::Monthly => &self.monthly_quests,
            Granularity::Special => &self.special_quests,
        }
    }

    pub fn bucket_mut(&mut self, granularity: Granularity) -> &mut QuestBucket {
        match granularity {
            Granularity::Daily => &mut self.daily_quests,
            Granularity::Weekly => &mut self.weekly_quests,
            Granularity::Monthly => &mut self.monthly_quests,
            Granularity::Special => &mut self.special_quests,
        }
    }

    /// Look up a bucket by name
    pub fn bucket_named(&self, name: &str) -> EngineResult<&QuestBucket> {
        Ok(self.bucket(name.parse()?))
    }

    /// Find an instance across all buckets
    #[cfg(test)]
    pub fn find(&self, quest_id: &str) -> Option<&QuestInstance> {
        Granularity::ALL
            .iter()
            .find_map(|g| self.bucket(*g).quests.iter().find(|q| q.id == quest_id))
    }

    pub fn find_mut(&mut self, quest_id: &str) -> Option<&mut QuestInstance> {
        let granularity = Granularity::ALL
            .into_iter()
            .find(|g| self.bucket(*g).quests.iter().any(|q| q.id == quest_id))?;
        self.bucket_mut(granularity)
            .quests
            .iter_mut()
            .find(|q| q.id == quest_id)
    }

    /// Check that instance ids are unique within each bucket
    pub fn validate(&self) -> EngineResult<()> {
        for granularity in Granularity::ALL {
            let mut seen = HashSet::new();
            for quest in &self.bucket(granularity).quests {
                if !seen.insert(quest.id.as_str()) {
                    return Err(EngineError::InconsistentState(format!(
                        "duplicate quest id '{}' in {} bucket",
                        quest.id, granularity
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn total_quests(&self) -> usize {
        Granularity::ALL.iter().map(|g| self.bucket(*g).quests.len()).sum()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn instance(template_id: &str, granularity: Granularity, xp: i64) -> QuestInstance {
        QuestInstance {
            id: QuestInstance::instance_id(template_id, "2024-01-01"),
            template_id: template_id.to_string(),
            granularity,
            title: template_id.to_string(),
            description: String::new(),
            category: Category::Personal,
            xp,
            difficulty: 1,
            completed: false,
            progress: None,
            bonus_xp: None,
            expires_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_find_across_buckets() {
        let mut state = DailyQuestState::new("u1");
        state.daily_quests.quests.push(instance("walk", Granularity::Daily, 10));
        state.weekly_quests.quests.push(instance("clean", Granularity::Weekly, 50));

        assert!(state.find("clean:2024-01-01").is_some());
        assert!(state.find("missing").is_none());

        state.find_mut("clean:2024-01-01").unwrap().completed = true;
        assert_eq!(state.weekly_quests.completed_count(), 1);
        assert_eq!(state.total_quests(), 2);
    }

    #[test]
    fn test_duplicate_ids_detected() {
        let mut state = DailyQuestState::new("u1");
        state.daily_quests.quests.push(instance("walk", Granularity::Daily, 10));
        state.daily_quests.quests.push(instance("walk", Granularity::Daily, 10));
        assert!(matches!(state.validate(), Err(EngineError::InconsistentState(_))));
    }

    #[test]
    fn test_empty_bucket_is_not_complete() {
        let state = DailyQuestState::new("u1");
        assert!(!state.daily_quests.all_completed());
        assert!(state.bucket_named("hourly").is_err());
        assert!(state.bucket_named("daily").is_ok());
    }

    #[test]
    fn test_json_field_names() {
        let state = DailyQuestState::new("u1");
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("dailyQuests").is_some());
        assert_eq!(json["dailyBonusGranted"], false);
    }
}
