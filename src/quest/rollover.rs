//! Rollover Scheduler
//!
//! Each bucket is CURRENT while its stored period key matches the key derived
//! from today, and STALE otherwise. Stale buckets are regenerated through the
//! resolver; the daily rollover also settles the streak for the expired day.
//!
//! The special bucket has no period. Its key records the day it was resolved,
//! and it stays current until every quest in it is completed or expired. An
//! exhausted special bucket is re-resolved at most once per day.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::progress::{achievements, PlayerProgress};

use super::definition::{Granularity, QuestTemplate};
use super::resolver::{resolve, QuestPreferences, ResolveContext};
use super::state::{DailyQuestState, QuestBucket};

const DAILY_KEY_FORMAT: &str = "%Y-%m-%d";

/// Key of the period containing `date`
pub fn period_key(granularity: Granularity, date: NaiveDate) -> String {
    match granularity {
        Granularity::Daily => date.format(DAILY_KEY_FORMAT).to_string(),
        Granularity::Weekly => {
            let week = date.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
        Granularity::Monthly => date.format("%Y-%m").to_string(),
        Granularity::Special => format!("special-{}", date.format(DAILY_KEY_FORMAT)),
    }
}

/// First day of the period containing `date`
pub fn period_start(granularity: Granularity, date: NaiveDate) -> NaiveDate {
    match granularity {
        Granularity::Daily | Granularity::Special => date,
        Granularity::Weekly => date - Duration::days(date.weekday().num_days_from_monday() as i64),
        Granularity::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    Current,
    Stale,
}

pub fn bucket_status(bucket: &QuestBucket, granularity: Granularity, today: NaiveDate) -> BucketStatus {
    let Some(key) = &bucket.period_key else {
        return BucketStatus::Stale;
    };
    let current = *key == period_key(granularity, today)
        || (granularity == Granularity::Special && !is_exhausted(bucket, today));
    if current { BucketStatus::Current } else { BucketStatus::Stale }
}

/// Nothing left to do: every quest is completed or expired before `today`
fn is_exhausted(bucket: &QuestBucket, today: NaiveDate) -> bool {
    let start = today.and_time(NaiveTime::MIN).and_utc();
    bucket.quests.iter().all(|q| q.completed || q.is_expired(start))
}

/// What a rollover pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloverReport {
    pub regenerated: Vec<Granularity>,
    pub streak_extended: bool,
    pub streak_broken: bool,
    pub new_achievements: Vec<String>,
}

impl RolloverReport {
    pub fn is_noop(&self) -> bool {
        self.regenerated.is_empty()
    }
}

/// Regenerate every stale bucket. Running twice for the same day is a no-op.
pub fn run(
    state: &mut DailyQuestState,
    progress: &mut PlayerProgress,
    catalog: &[QuestTemplate],
    preferences: &QuestPreferences,
    assigned: &[String],
    today: NaiveDate,
) -> RolloverReport {
    let mut report = RolloverReport::default();

    let stale: Vec<Granularity> = Granularity::ALL
        .into_iter()
        .filter(|g| bucket_status(state.bucket(*g), *g, today) == BucketStatus::Stale)
        .collect();

    if stale.is_empty() {
        return report;
    }

    if stale.contains(&Granularity::Daily) {
        settle_daily(state, progress, today, &mut report);
        report.new_achievements = achievements::unlock_new(progress, false);
    }

    let ctx = ResolveContext {
        user_id: &state.user_id,
        level: progress.current_level,
        preferences,
        history: &progress.completion_history,
        assigned,
    };

    let mut regenerated = Vec::with_capacity(stale.len());
    for granularity in &stale {
        let key = period_key(*granularity, today);
        let start = period_start(*granularity, today);
        let quests = resolve(catalog, &ctx, *granularity, &key, start);
        debug!("Rolled {} bucket for {} to {} ({} quests)", granularity, ctx.user_id, key, quests.len());
        regenerated.push((*granularity, QuestBucket { period_key: Some(key), quests }));
    }

    for (granularity, bucket) in regenerated {
        *state.bucket_mut(granularity) = bucket;
        report.regenerated.push(granularity);
    }

    info!("Rollover for {}: regenerated {:?}", state.user_id, report.regenerated);
    report
}

/// Settle the streak for the expired daily bucket and reset per-day counters
fn settle_daily(
    state: &mut DailyQuestState,
    progress: &mut PlayerProgress,
    today: NaiveDate,
    report: &mut RolloverReport,
) {
    if let Some(prev_key) = state.daily_quests.period_key.as_deref() {
        if state.daily_quests.all_completed() {
            progress.extend_streak();
            report.streak_extended = true;
        } else if progress.current_streak > 0 {
            progress.break_streak();
            report.streak_broken = true;
        }

        // Whole days with no generated bucket count as missed
        match NaiveDate::parse_from_str(prev_key, DAILY_KEY_FORMAT) {
            Ok(prev) if (today - prev).num_days() > 1 && progress.current_streak > 0 => {
                progress.break_streak();
                report.streak_broken = true;
            }
            Ok(_) => {}
            Err(e) => warn!("Unreadable daily period key '{}': {}", prev_key, e),
        }
    }

    progress.quests_completed = 0;
    state.daily_bonus_granted = false;
}
