//! Badge unlocks derived from player progress.
//!
//! Count and level badges follow the progress they depend on, so undoing a
//! quest can take them back. Streak and perfect-day badges are permanent.

use super::PlayerProgress;

enum Rule {
    TotalQuests(u32),
    Level(u32),
    Streak(u32),
    PerfectDay,
}

const RULES: &[(&str, Rule)] = &[
    ("first_quest", Rule::TotalQuests(1)),
    ("quests_10", Rule::TotalQuests(10)),
    ("quests_50", Rule::TotalQuests(50)),
    ("quests_100", Rule::TotalQuests(100)),
    ("level_5", Rule::Level(5)),
    ("level_10", Rule::Level(10)),
    ("level_25", Rule::Level(25)),
    ("streak_3", Rule::Streak(3)),
    ("streak_7", Rule::Streak(7)),
    ("streak_30", Rule::Streak(30)),
    ("perfect_day", Rule::PerfectDay),
];

impl Rule {
    fn reversible(&self) -> bool {
        matches!(self, Rule::TotalQuests(_) | Rule::Level(_))
    }

    fn earned(&self, progress: &PlayerProgress, perfect_day: bool) -> bool {
        match self {
            Rule::TotalQuests(n) => progress.total_quests_completed >= *n,
            Rule::Level(n) => progress.current_level >= *n,
            Rule::Streak(n) => progress.longest_streak >= *n,
            Rule::PerfectDay => perfect_day,
        }
    }
}

/// Add every badge the progress now qualifies for and return the new ones.
pub fn unlock_new(progress: &mut PlayerProgress, perfect_day: bool) -> Vec<String> {
    let mut unlocked = Vec::new();

    for (id, rule) in RULES {
        if progress.achievements.contains(*id) {
            continue;
        }
        if rule.earned(progress, perfect_day) {
            progress.achievements.insert(id.to_string());
            unlocked.push(id.to_string());
        }
    }

    if !unlocked.is_empty() {
        tracing::info!("Unlocked achievements: {:?}", unlocked);
    }
    unlocked
}

/// Remove count and level badges the progress no longer qualifies for.
pub fn revoke_lost(progress: &mut PlayerProgress) -> Vec<String> {
    let mut revoked = Vec::new();

    for (id, rule) in RULES {
        if rule.reversible() && progress.achievements.contains(*id) && !rule.earned(progress, false) {
            progress.achievements.remove(*id);
            revoked.push(id.to_string());
        }
    }

    revoked
}
