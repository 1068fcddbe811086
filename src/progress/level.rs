//! XP and level math.
//!
//! Each level costs `level * 100` XP. Gains can cross several levels at once
//! and losses walk back down symmetrically, never below level 1.

use serde::{Deserialize, Serialize};

use crate::quest::definition::Granularity;

use super::PlayerProgress;

/// XP per level step
pub const XP_PER_LEVEL: i64 = 100;

/// XP needed to advance from `level` to `level + 1`.
pub fn xp_to_next_level(level: u32) -> i64 {
    level.max(1) as i64 * XP_PER_LEVEL
}

/// Result of applying an XP delta to a player's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LevelChange {
    pub leveled_up: bool,
    pub leveled_down: bool,
    /// Set when the level changed
    pub new_level: Option<u32>,
}

/// Apply a signed XP delta, walking levels up or down as needed.
///
/// `total_xp` tracks the delta as well and is floored at zero. At level 1
/// a negative balance is clamped to zero XP.
pub fn apply_xp(progress: &mut PlayerProgress, delta: i64) -> LevelChange {
    let start_level = progress.current_level.max(1);
    let mut level = start_level;
    let mut xp_to_next = xp_to_next_level(level);
    let mut xp = progress.current_xp.saturating_add(delta);

    while xp >= xp_to_next {
        xp -= xp_to_next;
        level += 1;
        xp_to_next = xp_to_next_level(level);
    }

    while xp < 0 && level > 1 {
        level -= 1;
        xp_to_next = xp_to_next_level(level);
        xp += xp_to_next;
    }

    if xp < 0 {
        xp = 0;
    }

    progress.current_level = level;
    progress.current_xp = xp;
    progress.xp_to_next_level = xp_to_next;
    progress.total_xp = progress.total_xp.saturating_add(delta).max(0);

    if level > start_level {
        tracing::info!(
            "Leveled up {} -> {} ({})",
            start_level,
            level,
            LevelTier::for_level(level).as_str()
        );
    }

    LevelChange {
        leveled_up: level > start_level,
        leveled_down: level < start_level,
        new_level: (level != start_level).then_some(level),
    }
}

/// Level band that sets quest quotas and difficulty caps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelTier {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl LevelTier {
    pub fn for_level(level: u32) -> Self {
        match level {
            0..=4 => LevelTier::Beginner,
            5..=14 => LevelTier::Intermediate,
            15..=29 => LevelTier::Advanced,
            _ => LevelTier::Expert,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LevelTier::Beginner => "beginner",
            LevelTier::Intermediate => "intermediate",
            LevelTier::Advanced => "advanced",
            LevelTier::Expert => "expert",
        }
    }

    /// Maximum number of quests generated per period for a granularity
    pub fn quota(&self, granularity: Granularity) -> usize {
        let quotas: [usize; 4] = match granularity {
            Granularity::Daily => [3, 4, 5, 6],
            Granularity::Weekly => [2, 3, 3, 4],
            Granularity::Monthly => [1, 2, 2, 3],
            Granularity::Special => [1, 1, 2, 2],
        };
        quotas[self.index()]
    }

    /// Hardest template difficulty offered at this tier
    pub fn max_difficulty(&self) -> u8 {
        match self {
            LevelTier::Beginner => 2,
            LevelTier::Intermediate => 3,
            LevelTier::Advanced => 4,
            LevelTier::Expert => 5,
        }
    }

    fn index(&self) -> usize {
        match self {
            LevelTier::Beginner => 0,
            LevelTier::Intermediate => 1,
            LevelTier::Advanced => 2,
            LevelTier::Expert => 3,
        }
    }
}
