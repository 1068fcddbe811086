//! Player Progress
//!
//! Level, XP, streak and badge bookkeeping for a single user.

pub mod achievements;
pub mod level;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

pub use level::{apply_xp, xp_to_next_level, LevelTier};

/// Level and XP state for a user, persisted inside the user document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProgress {
    pub current_level: u32,
    pub current_xp: i64,
    pub xp_to_next_level: i64,
    pub total_xp: i64,
    /// Quests completed in the current day
    #[serde(default)]
    pub quests_completed: u32,
    #[serde(default)]
    pub total_quests_completed: u32,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub longest_streak: u32,
    #[serde(default)]
    pub achievements: BTreeSet<String>,
    /// Net completion count per template id
    #[serde(default)]
    pub completion_history: BTreeMap<String, u32>,
}

impl Default for PlayerProgress {
    fn default() -> Self {
        Self {
            current_level: 1,
            current_xp: 0,
            xp_to_next_level: xp_to_next_level(1),
            total_xp: 0,
            quests_completed: 0,
            total_quests_completed: 0,
            current_streak: 0,
            longest_streak: 0,
            achievements: BTreeSet::new(),
            completion_history: BTreeMap::new(),
        }
    }
}

impl PlayerProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tier(&self) -> LevelTier {
        LevelTier::for_level(self.current_level)
    }

    /// Check the level/XP invariants; never repairs anything
    pub fn validate(&self) -> EngineResult<()> {
        if self.current_level < 1 {
            return Err(EngineError::InconsistentState(format!(
                "level {} is below 1",
                self.current_level
            )));
        }
        if self.xp_to_next_level != xp_to_next_level(self.current_level) {
            return Err(EngineError::InconsistentState(format!(
                "xpToNextLevel {} does not match level {}",
                self.xp_to_next_level, self.current_level
            )));
        }
        if self.current_xp < 0 || self.current_xp >= self.xp_to_next_level {
            return Err(EngineError::InconsistentState(format!(
                "currentXp {} outside [0, {})",
                self.current_xp, self.xp_to_next_level
            )));
        }
        if self.total_xp < 0 {
            return Err(EngineError::InconsistentState(format!(
                "totalXp {} is negative",
                self.total_xp
            )));
        }
        Ok(())
    }

    /// Record a quest completion (or its undo) in the counters and history
    pub fn record_completion(&mut self, template_id: &str, completed: bool) {
        if completed {
            self.quests_completed += 1;
            self.total_quests_completed += 1;
            *self.completion_history.entry(template_id.to_string()).or_insert(0) += 1;
        } else {
            self.quests_completed = self.quests_completed.saturating_sub(1);
            self.total_quests_completed = self.total_quests_completed.saturating_sub(1);
            if let Some(count) = self.completion_history.get_mut(template_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.completion_history.remove(template_id);
                }
            }
        }
    }

    /// Count a finished streak day
    pub fn extend_streak(&mut self) {
        self.current_streak += 1;
        self.longest_streak = self.longest_streak.max(self.current_streak);
    }

    pub fn break_streak(&mut self) {
        self.current_streak = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let p = PlayerProgress::new();
        assert!(p.validate().is_ok());
        assert_eq!(p.tier(), LevelTier::Beginner);
    }

    #[test]
    fn test_validate_detects_bad_xp() {
        let mut p = PlayerProgress::new();
        p.current_xp = -1;
        assert!(matches!(p.validate(), Err(EngineError::InconsistentState(_))));

        p.current_xp = 100;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_completion_history() {
        let mut p = PlayerProgress::new();
        p.record_completion("walk", true);
        p.record_completion("walk", true);
        assert_eq!(p.completion_history.get("walk"), Some(&2));

        p.record_completion("walk", false);
        p.record_completion("walk", false);
        assert!(p.completion_history.is_empty());
        assert_eq!(p.total_quests_completed, 0);
    }

    #[test]
    fn test_streaks() {
        let mut p = PlayerProgress::new();
        p.extend_streak();
        p.extend_streak();
        p.break_streak();
        p.extend_streak();
        assert_eq!(p.current_streak, 1);
        assert_eq!(p.longest_streak, 2);
    }
}
