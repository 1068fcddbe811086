//! Completion Toggler
//!
//! Flips one instance's completion flag and applies the XP delta to the
//! player's progress. Work happens on copies that are committed only when the
//! whole toggle succeeds.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::progress::{achievements, apply_xp, PlayerProgress};

use super::state::DailyQuestState;

/// Flat XP for finishing every daily quest, granted once per day
pub const DAILY_COMPLETION_BONUS: i64 = 100;

/// Result of a completion toggle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleOutcome {
    pub quest_id: String,
    pub completed: bool,
    /// Signed XP change including any daily bonus
    pub xp_gained: i64,
    pub bonus_granted: bool,
    pub leveled_up: bool,
    pub new_level: Option<u32>,
    pub new_achievements: Vec<String>,
    pub progress: PlayerProgress,
}

/// Result of a partial progress update
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub quest_id: String,
    pub progress: u8,
    /// Set when the update crossed the 100% boundary
    pub toggle: Option<ToggleOutcome>,
}

/// Flip the completion flag of `quest_id`.
pub fn toggle_quest(
    state: &mut DailyQuestState,
    progress: &mut PlayerProgress,
    quest_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<ToggleOutcome> {
    state.validate()?;
    progress.validate()?;

    let mut next_state = state.clone();
    let mut next_progress = progress.clone();
    let outcome = apply_toggle(&mut next_state, &mut next_progress, quest_id, now)?;

    *state = next_state;
    *progress = next_progress;
    Ok(outcome)
}

/// Set partial progress; reaching 100 completes the quest and dropping below
/// 100 on a completed quest undoes it.
pub fn record_progress(
    state: &mut DailyQuestState,
    progress: &mut PlayerProgress,
    quest_id: &str,
    percent: u8,
    now: DateTime<Utc>,
) -> EngineResult<ProgressUpdate> {
    state.validate()?;
    progress.validate()?;

    let percent = percent.min(100);
    let mut next_state = state.clone();
    let mut next_progress = progress.clone();

    let quest = next_state
        .find_mut(quest_id)
        .ok_or_else(|| EngineError::QuestNotFound(quest_id.to_string()))?;
    let crosses = (percent == 100) != quest.completed;

    let toggle = if crosses {
        Some(apply_toggle(&mut next_state, &mut next_progress, quest_id, now)?)
    } else {
        None
    };
    // Keep the reported percentage, also when it undid a completion
    if let Some(quest) = next_state.find_mut(quest_id) {
        quest.progress = Some(percent);
    }

    *state = next_state;
    *progress = next_progress;
    Ok(ProgressUpdate {
        quest_id: quest_id.to_string(),
        progress: percent,
        toggle,
    })
}

fn apply_toggle(
    state: &mut DailyQuestState,
    progress: &mut PlayerProgress,
    quest_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<ToggleOutcome> {
    let quest = state
        .find_mut(quest_id)
        .ok_or_else(|| EngineError::QuestNotFound(quest_id.to_string()))?;

    let completing = !quest.completed;
    if completing && quest.is_expired(now) {
        return Err(EngineError::QuestExpired(quest_id.to_string()));
    }

    quest.completed = completing;
    quest.completed_at = completing.then_some(now);
    quest.progress = completing.then_some(100);
    let reward = quest.reward();
    let template_id = quest.template_id.clone();

    let mut xp_gained = if completing { reward } else { -reward };
    progress.record_completion(&template_id, completing);

    let mut bonus_granted = false;
    if completing && !state.daily_bonus_granted && state.daily_quests.all_completed() {
        state.daily_bonus_granted = true;
        xp_gained += DAILY_COMPLETION_BONUS;
        bonus_granted = true;
    }

    let change = apply_xp(progress, xp_gained);
    let new_achievements = if completing {
        achievements::unlock_new(progress, bonus_granted)
    } else {
        achievements::revoke_lost(progress);
        Vec::new()
    };
    progress.validate()?;

    if change.leveled_down {
        info!("{} dropped back to level {}", state.user_id, progress.current_level);
    }
    info!(
        "{} {} quest {} ({:+} XP{})",
        state.user_id,
        if completing { "completed" } else { "uncompleted" },
        quest_id,
        xp_gained,
        if bonus_granted { ", daily bonus" } else { "" }
    );

    Ok(ToggleOutcome {
        quest_id: quest_id.to_string(),
        completed: completing,
        xp_gained,
        bonus_granted,
        leveled_up: change.leveled_up,
        new_level: change.new_level,
        new_achievements,
        progress: progress.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::xp_to_next_level;
    use crate::quest::definition::Granularity;
    use crate::quest::state::tests::instance;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T09:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn state_with(daily: &[(&str, i64)], weekly: &[(&str, i64)]) -> DailyQuestState {
        let mut state = DailyQuestState::new("u1");
        for (id, xp) in daily {
            state.daily_quests.quests.push(instance(id, Granularity::Daily, *xp));
        }
        for (id, xp) in weekly {
            state.weekly_quests.quests.push(instance(id, Granularity::Weekly, *xp));
        }
        state
    }

    fn progress_at(level: u32, xp: i64) -> PlayerProgress {
        PlayerProgress {
            current_level: level,
            current_xp: xp,
            xp_to_next_level: xp_to_next_level(level),
            total_xp: xp,
            ..PlayerProgress::default()
        }
    }

    #[test]
    fn test_level_up_example() {
        let mut state = state_with(&[("a", 5), ("b", 5)], &[("run", 20)]);
        let mut progress = progress_at(1, 90);

        let out = toggle_quest(&mut state, &mut progress, "run:2024-01-01", now()).unwrap();
        assert!(out.completed);
        assert_eq!(out.xp_gained, 20);
        assert!(out.leveled_up);
        assert_eq!(out.new_level, Some(2));
        assert_eq!(progress.current_xp, 10);
        assert_eq!(progress.xp_to_next_level, 200);
    }

    #[test]
    fn test_daily_bonus_example() {
        let mut state = state_with(&[("a", 10), ("b", 10), ("c", 10)], &[]);
        state.daily_quests.quests[0].completed = true;
        state.daily_quests.quests[1].completed = true;
        let mut progress = PlayerProgress::new();

        let out = toggle_quest(&mut state, &mut progress, "c:2024-01-01", now()).unwrap();
        assert_eq!(out.xp_gained, 110);
        assert!(out.bonus_granted);
        assert!(state.daily_bonus_granted);
        assert!(out.new_achievements.contains(&"perfect_day".to_string()));
    }

    #[test]
    fn test_round_trip_restores_progress() {
        let mut state = state_with(&[("a", 20), ("b", 10)], &[]);
        let mut progress = progress_at(1, 90);
        let before = progress.clone();

        toggle_quest(&mut state, &mut progress, "a:2024-01-01", now()).unwrap();
        assert_eq!(progress.current_level, 2);
        let out = toggle_quest(&mut state, &mut progress, "a:2024-01-01", now()).unwrap();
        assert!(!out.completed);
        assert_eq!(out.xp_gained, -20);
        assert_eq!(progress, before);
    }

    #[test]
    fn test_daily_bonus_is_not_reversed() {
        let mut state = state_with(&[("a", 10)], &[]);
        let mut progress = PlayerProgress::new();

        let on = toggle_quest(&mut state, &mut progress, "a:2024-01-01", now()).unwrap();
        assert_eq!(on.xp_gained, 110);
        let off = toggle_quest(&mut state, &mut progress, "a:2024-01-01", now()).unwrap();
        assert_eq!(off.xp_gained, -10);
        assert_eq!(progress.total_xp, 100);
        assert!(state.daily_bonus_granted);

        // Second completion the same day does not pay the bonus again
        let again = toggle_quest(&mut state, &mut progress, "a:2024-01-01", now()).unwrap();
        assert_eq!(again.xp_gained, 10);
        assert!(!again.bonus_granted);
    }

    #[test]
    fn test_instance_bonus_is_symmetric() {
        let mut state = state_with(&[("a", 10), ("b", 10)], &[]);
        state.daily_quests.quests[0].bonus_xp = Some(15);
        let mut progress = PlayerProgress::new();

        let on = toggle_quest(&mut state, &mut progress, "a:2024-01-01", now()).unwrap();
        assert_eq!(on.xp_gained, 25);
        let off = toggle_quest(&mut state, &mut progress, "a:2024-01-01", now()).unwrap();
        assert_eq!(off.xp_gained, -25);
        assert_eq!(progress.total_xp, 0);
    }

    #[test]
    fn test_missing_quest_leaves_state_untouched() {
        let mut state = state_with(&[("a", 10)], &[]);
        let mut progress = PlayerProgress::new();
        let (s0, p0) = (state.clone(), progress.clone());

        let err = toggle_quest(&mut state, &mut progress, "nope", now()).unwrap_err();
        assert_eq!(err, EngineError::QuestNotFound("nope".to_string()));
        assert_eq!(state, s0);
        assert_eq!(progress, p0);
    }

    #[test]
    fn test_inconsistent_progress_is_surfaced() {
        let mut state = state_with(&[("a", 10)], &[]);
        let mut progress = PlayerProgress::new();
        progress.current_xp = -5;

        let err = toggle_quest(&mut state, &mut progress, "a:2024-01-01", now()).unwrap_err();
        assert!(matches!(err, EngineError::InconsistentState(_)));
        assert_eq!(progress.current_xp, -5);
    }

    #[test]
    fn test_xp_stays_in_bounds_over_toggle_sequence() {
        let mut state = state_with(&[("a", 70), ("b", 45), ("c", 130)], &[("w", 260), ("x", 5)]);
        let ids: Vec<String> = Granularity::ALL
            .iter()
            .flat_map(|g| state.bucket(*g).quests.iter().map(|q| q.id.clone()))
            .collect();
        let mut progress = PlayerProgress::new();

        for step in 0..60usize {
            let id = &ids[(step * 7 + step / 3) % ids.len()];
            toggle_quest(&mut state, &mut progress, id, now()).unwrap();
            assert!(progress.current_level >= 1);
            assert!(progress.current_xp >= 0);
            assert!(progress.current_xp < progress.xp_to_next_level);
            assert!(progress.validate().is_ok());
        }
    }

    #[test]
    fn test_expired_quest_cannot_be_completed() {
        let mut state = state_with(&[("a", 10)], &[]);
        state.daily_quests.quests[0].expires_at = Some(now() - chrono::Duration::hours(1));
        let mut progress = PlayerProgress::new();

        let err = toggle_quest(&mut state, &mut progress, "a:2024-01-01", now()).unwrap_err();
        assert_eq!(err, EngineError::QuestExpired("a:2024-01-01".to_string()));
        assert!(!state.daily_quests.quests[0].completed);
    }

    #[test]
    fn test_progress_crossing_100_toggles() {
        let mut state = state_with(&[("a", 10), ("b", 10)], &[]);
        let mut progress = PlayerProgress::new();

        let update = record_progress(&mut state, &mut progress, "a:2024-01-01", 40, now()).unwrap();
        assert!(update.toggle.is_none());
        assert_eq!(state.daily_quests.quests[0].progress, Some(40));

        let update = record_progress(&mut state, &mut progress, "a:2024-01-01", 150, now()).unwrap();
        assert_eq!(update.progress, 100);
        assert!(update.toggle.unwrap().completed);
        assert_eq!(progress.current_xp, 10);

        let update = record_progress(&mut state, &mut progress, "a:2024-01-01", 50, now()).unwrap();
        assert!(!update.toggle.unwrap().completed);
        assert_eq!(progress.current_xp, 0);
        assert_eq!(state.daily_quests.quests[0].progress, Some(50));
    }

    #[test]
    fn test_toggle_keeps_progress_in_step() {
        let mut state = state_with(&[("a", 10), ("b", 10)], &[]);
        let mut progress = PlayerProgress::new();

        record_progress(&mut state, &mut progress, "a:2024-01-01", 40, now()).unwrap();
        toggle_quest(&mut state, &mut progress, "a:2024-01-01", now()).unwrap();
        assert_eq!(state.daily_quests.quests[0].progress, Some(100));

        toggle_quest(&mut state, &mut progress, "a:2024-01-01", now()).unwrap();
        assert_eq!(state.daily_quests.quests[0].progress, None);
        assert!(state.daily_quests.quests[0].completed_at.is_none());
    }
}
