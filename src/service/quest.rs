//! Quest Service
//!
//! Load user snapshot, roll it over, apply the player's action, write it back.
//! All of it happens under the user's lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{EngineError, ServiceResult};
use crate::progress::PlayerProgress;
use crate::quest::state::DailyQuestState;
use crate::quest::{rollover, toggle, ProgressUpdate, TemplateRegistry, ToggleOutcome};
use crate::store::{self, paths, DocumentStore, PutOptions};

use super::users::{load_record, save_record, UserRecord};
use super::UserLocks;

/// Source of the current time
pub type Clock = fn() -> DateTime<Utc>;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A user's documents loaded and rolled over to the current day
struct Session {
    record: UserRecord,
    state: DailyQuestState,
    /// Date the state document is stored under
    date: String,
    rolled: bool,
}

pub struct QuestService {
    store: Arc<dyn DocumentStore>,
    registry: Arc<TemplateRegistry>,
    locks: Arc<UserLocks>,
    clock: Clock,
}

impl QuestService {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<TemplateRegistry>, locks: Arc<UserLocks>) -> Self {
        Self {
            store,
            registry,
            locks,
            clock: Utc::now,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Current quest buckets, regenerated first if stale
    pub async fn state(&self, user_id: &str) -> ServiceResult<DailyQuestState> {
        let now = (self.clock)();
        let _guard = self.locks.lock(user_id).await;
        let mut session = self.open(user_id, now).await?;
        if session.rolled {
            self.persist(&mut session).await?;
        }
        debug!(
            "{} has {} active quests, {} of {} dailies done",
            user_id,
            session.state.total_quests(),
            session.state.daily_quests.completed_count(),
            session.state.daily_quests.quests.len()
        );
        Ok(session.state)
    }

    /// Current level, XP and streak
    pub async fn progress(&self, user_id: &str) -> ServiceResult<PlayerProgress> {
        let now = (self.clock)();
        let _guard = self.locks.lock(user_id).await;
        let mut session = self.open(user_id, now).await?;
        if session.rolled {
            self.persist(&mut session).await?;
        }
        Ok(session.record.stats)
    }

    pub async fn toggle(&self, user_id: &str, quest_id: &str) -> ServiceResult<ToggleOutcome> {
        let now = (self.clock)();
        let _guard = self.locks.lock(user_id).await;
        let mut session = self.open(user_id, now).await?;

        let result = toggle::toggle_quest(&mut session.state, &mut session.record.stats, quest_id, now);
        if result.is_ok() || session.rolled {
            self.persist(&mut session).await?;
        }
        Ok(result?)
    }

    pub async fn record_progress(&self, user_id: &str, quest_id: &str, percent: u8) -> ServiceResult<ProgressUpdate> {
        let now = (self.clock)();
        let _guard = self.locks.lock(user_id).await;
        let mut session = self.open(user_id, now).await?;

        let result = toggle::record_progress(&mut session.state, &mut session.record.stats, quest_id, percent, now);
        if result.is_ok() || session.rolled {
            self.persist(&mut session).await?;
        }
        Ok(result?)
    }

    /// Roll every user over to the current day. Returns how many changed.
    pub async fn rollover_all(&self) -> ServiceResult<usize> {
        let now = (self.clock)();
        let user_paths = self.store.list(paths::USERS_PREFIX).await?;
        let mut rolled = 0;

        for path in &user_paths {
            let Some(user_id) = paths::user_id_from_path(path) else {
                continue;
            };
            let _guard = self.locks.lock(user_id).await;
            let outcome = match self.open(user_id, now).await {
                Ok(mut session) if session.rolled => self.persist(&mut session).await.map(|_| true),
                Ok(_) => Ok(false),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(true) => rolled += 1,
                Ok(false) => {}
                Err(e) => warn!("Rollover failed for {}: {}", user_id, e),
            }
        }

        debug!("Rollover pass: {} of {} users regenerated", rolled, user_paths.len());
        Ok(rolled)
    }

    async fn open(&self, user_id: &str, now: DateTime<Utc>) -> ServiceResult<Session> {
        let mut record = load_record(self.store.as_ref(), user_id).await?;
        let today = now.date_naive();

        let mut state = match record.last_state_date.as_deref() {
            Some(date) => {
                let path = paths::assignment(date, user_id);
                match store::get_json_opt::<DailyQuestState>(self.store.as_ref(), &path).await? {
                    Some(state) => state,
                    None => {
                        warn!("Quest state {} missing, starting fresh", path);
                        DailyQuestState::new(user_id)
                    }
                }
            }
            None => DailyQuestState::new(user_id),
        };

        if state.user_id != user_id {
            return Err(EngineError::InconsistentState(format!(
                "quest state of '{}' stored for '{}'",
                state.user_id, user_id
            ))
            .into());
        }

        let catalog = self.registry.snapshot().await;
        let report = rollover::run(
            &mut state,
            &mut record.stats,
            &catalog,
            &record.config.preferences,
            &record.config.daily_quests,
            today,
        );

        let rolled = !report.is_noop();
        let date = match record.last_state_date.clone() {
            Some(date) if !rolled => date,
            _ => today.format(DATE_FORMAT).to_string(),
        };
        if rolled && (report.streak_extended || report.streak_broken) {
            info!(
                "{} streak {} (now {})",
                user_id,
                if report.streak_extended { "extended" } else { "broken" },
                record.stats.current_streak
            );
        }

        Ok(Session { record, state, date, rolled })
    }

    /// Write the state first so the record never points at a missing document
    async fn persist(&self, session: &mut Session) -> ServiceResult<()> {
        let user_id = session.record.config.id.clone();
        store::put_json(
            self.store.as_ref(),
            &paths::assignment(&session.date, &user_id),
            &session.state,
            PutOptions::OVERWRITE,
        )
        .await?;

        session.record.last_state_date = Some(session.date.clone());
        save_record(self.store.as_ref(), &session.record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::service::users::tests::{new_user, setup};
    use crate::service::UserService;
    use chrono::TimeZone;

    fn day1() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    fn day2() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap()
    }

    async fn services(clock: Clock) -> (Arc<dyn DocumentStore>, QuestService, UserService) {
        let (store, registry, locks) = setup().await;
        let quests = QuestService::new(store.clone(), registry.clone(), locks.clone()).with_clock(clock);
        let users = UserService::new(store.clone(), registry, locks);
        users.create(new_user("alice")).await.unwrap();
        (store, quests, users)
    }

    #[tokio::test]
    async fn test_first_read_generates_and_persists() {
        let (store, quests, users) = services(day1).await;

        let state = quests.state("alice").await.unwrap();
        assert_eq!(state.daily_quests.period_key.as_deref(), Some("2024-01-01"));
        assert_eq!(state.daily_quests.quests.len(), 2);
        assert_eq!(state.weekly_quests.quests.len(), 1);

        let record = users.get("alice").await.unwrap();
        assert_eq!(record.last_state_date.as_deref(), Some("2024-01-01"));
        assert!(store.get(&paths::assignment("2024-01-01", "alice")).await.is_ok());

        // Same day read is stable
        assert_eq!(quests.state("alice").await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_toggle_persists_progress() {
        let (_store, quests, _users) = services(day1).await;

        let out = quests.toggle("alice", "read:2024-01-01").await.unwrap();
        assert!(out.completed);
        assert_eq!(out.xp_gained, 20);

        let progress = quests.progress("alice").await.unwrap();
        assert_eq!(progress.current_xp, 20);
        assert!(quests.state("alice").await.unwrap().find("read:2024-01-01").unwrap().completed);
    }

    #[tokio::test]
    async fn test_errors_surface() {
        let (_store, quests, _users) = services(day1).await;

        let err = quests.toggle("alice", "nope").await.unwrap_err();
        assert!(matches!(err, ServiceError::Engine(EngineError::QuestNotFound(_))));

        let err = quests.state("bob").await.unwrap_err();
        assert!(matches!(err, ServiceError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn test_next_day_extends_streak() {
        let (store, quests, _users) = services(day1).await;
        quests.toggle("alice", "walk:2024-01-01").await.unwrap();
        let out = quests.toggle("alice", "read:2024-01-01").await.unwrap();
        assert!(out.bonus_granted);

        let tomorrow = QuestService::new(store.clone(), quests.registry.clone(), quests.locks.clone())
            .with_clock(day2);

        let progress = tomorrow.progress("alice").await.unwrap();
        assert_eq!(progress.current_streak, 1);
        assert_eq!(progress.quests_completed, 0);

        let state = tomorrow.state("alice").await.unwrap();
        assert_eq!(state.daily_quests.period_key.as_deref(), Some("2024-01-02"));
        assert!(!state.daily_bonus_granted);
        // Weekly bucket belongs to the same ISO week and survives
        assert_eq!(state.weekly_quests.period_key.as_deref(), Some("2024-W01"));

        // Yesterday's document is kept
        assert!(store.get(&paths::assignment("2024-01-01", "alice")).await.is_ok());
        assert!(store.get(&paths::assignment("2024-01-02", "alice")).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_users_leave_no_lock_entries() {
        let (_store, quests, _users) = services(day1).await;

        for i in 0..1000 {
            let err = quests.state(&format!("ghost{}", i)).await.unwrap_err();
            assert!(matches!(err, ServiceError::UserNotFound(_)));
        }
        quests.state("alice").await.unwrap();
        assert_eq!(quests.locks.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_rollover_all() {
        let (_store, quests, users) = services(day1).await;
        users.create(new_user("bob")).await.unwrap();

        assert_eq!(quests.rollover_all().await.unwrap(), 2);
        assert_eq!(quests.rollover_all().await.unwrap(), 0);
    }
}
