//! Quest Catalog Resolver
//!
//! Picks the active quest instances for a (user, granularity, period) triple.
//! Selection is weighted random sampling seeded from the triple, so resolving
//! the same period twice yields the same quests.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveTime};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::progress::LevelTier;

use super::definition::{Category, Granularity, QuestTemplate, QuestVariation, Season, MAX_TEMPLATE_XP};
use super::placeholder::TitleTemplate;
use super::state::QuestInstance;

/// Upper bound for the per-user daily quest count override
pub const MAX_QUEST_COUNT: usize = 10;

/// Weight multiplier for templates in a preferred category
const PREFERRED_WEIGHT_BOOST: f64 = 2.0;

fn default_true() -> bool {
    true
}

/// Per-user selection preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestPreferences {
    /// Preferred categories
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub excluded_categories: Vec<Category>,
    pub max_difficulty: Option<u8>,
    /// Overrides the tier's daily quota
    pub quest_count: Option<usize>,
    /// When false, only preferred categories are offered
    #[serde(default = "default_true")]
    pub allow_common_quests: bool,
    /// Values for `{{field}}` placeholders
    #[serde(default)]
    pub personalized_fields: BTreeMap<String, String>,
}

impl Default for QuestPreferences {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            excluded_categories: Vec::new(),
            max_difficulty: None,
            quest_count: None,
            allow_common_quests: true,
            personalized_fields: BTreeMap::new(),
        }
    }
}

/// Everything about the user that selection depends on
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub user_id: &'a str,
    pub level: u32,
    pub preferences: &'a QuestPreferences,
    /// Template id -> net completion count
    pub history: &'a BTreeMap<String, u32>,
    /// Admin-assigned template ids, forced into the daily bucket
    pub assigned: &'a [String],
}

impl ResolveContext<'_> {
    pub fn tier(&self) -> LevelTier {
        LevelTier::for_level(self.level)
    }

    /// Number of quests to generate for a granularity
    pub fn quota(&self, granularity: Granularity) -> usize {
        match (granularity, self.preferences.quest_count) {
            (Granularity::Daily, Some(count)) => count.clamp(1, MAX_QUEST_COUNT),
            _ => self.tier().quota(granularity),
        }
    }

    fn max_difficulty(&self) -> u8 {
        let tier_max = self.tier().max_difficulty();
        match self.preferences.max_difficulty {
            Some(max) => tier_max.min(max),
            None => tier_max,
        }
    }

    fn completions(&self, template_id: &str) -> u32 {
        self.history.get(template_id).copied().unwrap_or(0)
    }
}

/// Whether a template may be offered to this user for this period
pub fn is_eligible(
    template: &QuestTemplate,
    ctx: &ResolveContext<'_>,
    granularity: Granularity,
    period_start: NaiveDate,
) -> bool {
    let prefs = ctx.preferences;

    if !template.allows(granularity) || !template.is_selectable() {
        return false;
    }
    if template.level_requirement > ctx.level {
        return false;
    }
    if !template.prerequisites.iter().all(|id| ctx.completions(id) > 0) {
        return false;
    }
    if prefs.excluded_categories.contains(&template.category) {
        return false;
    }
    if !prefs.allow_common_quests
        && !prefs.categories.is_empty()
        && !prefs.categories.contains(&template.category)
    {
        return false;
    }
    if template.difficulty > ctx.max_difficulty() {
        return false;
    }
    if let Some(max) = template.max_completions {
        if ctx.completions(&template.id) >= max {
            return false;
        }
    }
    if let Some(season) = template.season {
        if Season::of(period_start) != season {
            return false;
        }
    }
    true
}

/// Produce the active instances for one bucket. An empty result is valid.
pub fn resolve(
    templates: &[QuestTemplate],
    ctx: &ResolveContext<'_>,
    granularity: Granularity,
    period_key: &str,
    period_start: NaiveDate,
) -> Vec<QuestInstance> {
    let quota = ctx.quota(granularity);

    let mut chosen: Vec<&QuestTemplate> = Vec::new();
    if granularity == Granularity::Daily {
        for id in ctx.assigned {
            if chosen.len() >= quota {
                break;
            }
            match templates.iter().find(|t| &t.id == id) {
                Some(t) if t.allows(granularity) && !chosen.iter().any(|c| c.id == t.id) => {
                    chosen.push(t);
                }
                Some(_) => {}
                None => warn!("Assigned template '{}' not in catalog", id),
            }
        }
    }
    let assigned_count = chosen.len();

    let mut pool: Vec<&QuestTemplate> = templates
        .iter()
        .filter(|t| !chosen.iter().any(|c| c.id == t.id))
        .filter(|t| is_eligible(t, ctx, granularity, period_start))
        .collect();
    pool.sort_by(|a, b| a.id.cmp(&b.id));

    let remaining = quota.saturating_sub(assigned_count);
    let mut rng = StdRng::seed_from_u64(selection_seed(ctx.user_id, granularity, period_key));
    let mut sampled: Vec<&QuestTemplate> = match pool.choose_multiple_weighted(&mut rng, remaining, |t| {
        effective_weight(t, ctx.preferences)
    }) {
        Ok(iter) => iter.copied().collect(),
        Err(e) => {
            warn!("Weighted sampling failed ({}), taking first {} templates", e, remaining);
            pool.iter().take(remaining).copied().collect()
        }
    };
    sampled.sort_by(|a, b| a.id.cmp(&b.id));
    chosen.extend(sampled);

    debug!(
        "Resolved {} {} quests for {} ({} eligible, {} assigned)",
        chosen.len(),
        granularity,
        ctx.user_id,
        pool.len(),
        assigned_count
    );

    chosen
        .into_iter()
        .map(|t| instantiate(t, ctx, granularity, period_key, period_start))
        .collect()
}

/// Resolve one template into a concrete instance
pub fn instantiate(
    template: &QuestTemplate,
    ctx: &ResolveContext<'_>,
    granularity: Granularity,
    period_key: &str,
    period_start: NaiveDate,
) -> QuestInstance {
    let variation = choose_variation(template, ctx.level);

    let (xp, difficulty, title, bonus_xp) = match variation {
        Some(v) => (
            scale_xp(template.base_xp, v.xp_modifier),
            shift_difficulty(template.difficulty, v.difficulty_modifier),
            v.title.as_deref().unwrap_or(&template.title),
            v.bonus_xp.or(template.bonus_xp),
        ),
        None => (template.base_xp.clamp(1, MAX_TEMPLATE_XP), template.difficulty, template.title.as_str(), template.bonus_xp),
    };

    let title = TitleTemplate::parse(title)
        .render(&ctx.preferences.personalized_fields, &template.placeholder_defaults);

    let expires_at = template.time_limit_hours.and_then(|hours| {
        let start = period_start.and_time(NaiveTime::MIN).and_utc();
        let expiry = Duration::try_hours(i64::from(hours))
            .and_then(|limit| start.checked_add_signed(limit));
        if expiry.is_none() {
            warn!(
                "Template '{}' time limit of {} hours is out of range, instance will not expire",
                template.id, hours
            );
        }
        expiry
    });

    QuestInstance {
        id: QuestInstance::instance_id(&template.id, period_key),
        template_id: template.id.clone(),
        granularity,
        title,
        description: template.description.clone(),
        category: template.category,
        xp,
        difficulty,
        completed: false,
        progress: None,
        bonus_xp,
        expires_at,
        completed_at: None,
    }
}

/// First variation whose conditions match, else the first one
fn choose_variation(template: &QuestTemplate, level: u32) -> Option<&QuestVariation> {
    template
        .variations
        .iter()
        .find(|v| v.conditions.matches(level))
        .or_else(|| template.variations.first())
}

fn scale_xp(base_xp: i64, modifier: f64) -> i64 {
    let scaled = (base_xp as f64 * modifier).round();
    if scaled.is_finite() { (scaled as i64).clamp(1, MAX_TEMPLATE_XP) } else { 1 }
}

fn shift_difficulty(base: u8, modifier: i32) -> u8 {
    (base as i32 + modifier).clamp(1, 5) as u8
}

fn effective_weight(template: &QuestTemplate, prefs: &QuestPreferences) -> f64 {
    if prefs.categories.contains(&template.category) {
        template.weight * PREFERRED_WEIGHT_BOOST
    } else {
        template.weight
    }
}

/// Stable RNG seed for one user's bucket in one period
fn selection_seed(user_id: &str, granularity: Granularity, period_key: &str) -> u64 {
    let digest = Sha256::digest(format!("{}|{}|{}", user_id, granularity, period_key).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::quest::definition::VariationConditions;

    pub(crate) fn template(id: &str, granularity: Granularity, base_xp: i64) -> QuestTemplate {
        QuestTemplate {
            id: id.to_string(),
            title: format!("Do {}", id),
            description: String::new(),
            category: Category::Personal,
            difficulty: 1,
            base_xp,
            granularities: vec![granularity],
            weight: 1.0,
            variations: Vec::new(),
            level_requirement: 1,
            prerequisites: Vec::new(),
            max_completions: None,
            time_limit_hours: None,
            season: None,
            bonus_xp: None,
            placeholder_defaults: BTreeMap::new(),
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ctx<'a>(
        level: u32,
        prefs: &'a QuestPreferences,
        history: &'a BTreeMap<String, u32>,
    ) -> ResolveContext<'a> {
        ResolveContext { user_id: "u1", level, preferences: prefs, history, assigned: &[] }
    }

    #[test]
    fn test_single_template_is_stable() {
        let pool = vec![template("walk", Granularity::Daily, 10)];
        let prefs = QuestPreferences::default();
        let history = BTreeMap::new();
        let c = ctx(1, &prefs, &history);

        let first = resolve(&pool, &c, Granularity::Daily, "2024-01-01", date("2024-01-01"));
        let second = resolve(&pool, &c, Granularity::Daily, "2024-01-01", date("2024-01-01"));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, "walk:2024-01-01");
        assert!(!first[0].completed);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_pool_is_empty_result() {
        let pool = vec![template("clean", Granularity::Weekly, 50)];
        let prefs = QuestPreferences::default();
        let history = BTreeMap::new();
        let out = resolve(&pool, &ctx(1, &prefs, &history), Granularity::Daily, "2024-01-01", date("2024-01-01"));
        assert!(out.is_empty());
    }

    #[test]
    fn test_quota_by_tier_and_override() {
        let pool: Vec<_> = (0..10).map(|i| template(&format!("t{}", i), Granularity::Daily, 10)).collect();
        let history = BTreeMap::new();

        let prefs = QuestPreferences::default();
        let out = resolve(&pool, &ctx(1, &prefs, &history), Granularity::Daily, "2024-01-01", date("2024-01-01"));
        assert_eq!(out.len(), LevelTier::Beginner.quota(Granularity::Daily));

        let prefs = QuestPreferences { quest_count: Some(7), ..QuestPreferences::default() };
        let out = resolve(&pool, &ctx(1, &prefs, &history), Granularity::Daily, "2024-01-01", date("2024-01-01"));
        assert_eq!(out.len(), 7);

        let mut ids: Vec<_> = out.iter().map(|q| q.id.clone()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 7);
    }

    #[test]
    fn test_eligibility_filters() {
        let prefs = QuestPreferences {
            excluded_categories: vec![Category::Work],
            ..QuestPreferences::default()
        };
        let mut history = BTreeMap::new();
        let day = date("2024-01-01");
        let c = ctx(1, &prefs, &history);

        let mut t = template("a", Granularity::Daily, 10);
        assert!(is_eligible(&t, &c, Granularity::Daily, day));
        assert!(!is_eligible(&t, &c, Granularity::Weekly, day));

        t.level_requirement = 2;
        assert!(!is_eligible(&t, &c, Granularity::Daily, day));
        t.level_requirement = 1;

        t.category = Category::Work;
        assert!(!is_eligible(&t, &c, Granularity::Daily, day));
        t.category = Category::Personal;

        t.difficulty = 3;
        assert!(!is_eligible(&t, &c, Granularity::Daily, day), "beginners only get easy quests");
        t.difficulty = 1;

        t.season = Some(Season::Summer);
        assert!(!is_eligible(&t, &c, Granularity::Daily, day));
        t.season = Some(Season::Winter);
        assert!(is_eligible(&t, &c, Granularity::Daily, day));

        t.weight = 0.0;
        assert!(!is_eligible(&t, &c, Granularity::Daily, day));
        t.weight = 1.0;

        t.prerequisites = vec!["intro".to_string()];
        t.max_completions = Some(1);
        assert!(!is_eligible(&t, &c, Granularity::Daily, day));

        history.insert("intro".to_string(), 1);
        let c = ctx(1, &prefs, &history);
        assert!(is_eligible(&t, &c, Granularity::Daily, day));

        history.insert("a".to_string(), 1);
        let c = ctx(1, &prefs, &history);
        assert!(!is_eligible(&t, &c, Granularity::Daily, day), "max completions reached");
    }

    #[test]
    fn test_preferred_only_when_common_disallowed() {
        let prefs = QuestPreferences {
            categories: vec![Category::Fitness],
            allow_common_quests: false,
            ..QuestPreferences::default()
        };
        let history = BTreeMap::new();
        let c = ctx(1, &prefs, &history);
        let day = date("2024-01-01");

        let mut t = template("run", Granularity::Daily, 10);
        assert!(!is_eligible(&t, &c, Granularity::Daily, day));
        t.category = Category::Fitness;
        assert!(is_eligible(&t, &c, Granularity::Daily, day));
    }

    #[test]
    fn test_variation_and_placeholders() {
        let mut t = template("read", Granularity::Daily, 15);
        t.title = "Read {{pages}} pages".to_string();
        t.placeholder_defaults.insert("pages".to_string(), "10".to_string());
        t.time_limit_hours = Some(12);
        t.variations = vec![
            QuestVariation {
                title: Some("Read {{pages}} pages aloud".to_string()),
                xp_modifier: 3.0,
                difficulty_modifier: 9,
                bonus_xp: None,
                conditions: VariationConditions {
                    tiers: vec![LevelTier::Expert],
                    ..VariationConditions::default()
                },
            },
            QuestVariation {
                title: None,
                xp_modifier: 1.5,
                difficulty_modifier: -3,
                bonus_xp: Some(5),
                conditions: VariationConditions {
                    tiers: vec![LevelTier::Beginner],
                    ..VariationConditions::default()
                },
            },
        ];

        let mut prefs = QuestPreferences::default();
        let history = BTreeMap::new();
        let q = instantiate(&t, &ctx(1, &prefs, &history), Granularity::Daily, "2024-01-01", date("2024-01-01"));
        assert_eq!(q.xp, 23);
        assert_eq!(q.difficulty, 1);
        assert_eq!(q.bonus_xp, Some(5));
        assert_eq!(q.title, "Read 10 pages");
        assert_eq!(q.expires_at.unwrap().to_rfc3339(), "2024-01-01T12:00:00+00:00");

        prefs.personalized_fields.insert("pages".to_string(), "40".to_string());
        let q = instantiate(&t, &ctx(30, &prefs, &history), Granularity::Daily, "2024-01-01", date("2024-01-01"));
        assert_eq!(q.xp, 45);
        assert_eq!(q.difficulty, 5);
        assert_eq!(q.title, "Read 40 pages aloud");
    }

    #[test]
    fn test_out_of_range_limits_do_not_panic() {
        let mut t = template("endless", Granularity::Special, 10);
        t.time_limit_hours = Some(u32::MAX);
        t.variations = vec![QuestVariation {
            title: None,
            xp_modifier: 1e30,
            difficulty_modifier: 0,
            bonus_xp: None,
            conditions: VariationConditions::default(),
        }];
        let prefs = QuestPreferences::default();
        let history = BTreeMap::new();

        let out = resolve(&[t], &ctx(1, &prefs, &history), Granularity::Special, "special-2024-01-01", date("2024-01-01"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].expires_at, None);
        assert_eq!(out[0].xp, MAX_TEMPLATE_XP);
    }

    #[test]
    fn test_assigned_templates_come_first() {
        let pool: Vec<_> = (0..5).map(|i| template(&format!("t{}", i), Granularity::Daily, 10)).collect();
        let prefs = QuestPreferences::default();
        let history = BTreeMap::new();
        let assigned = vec!["t4".to_string(), "missing".to_string()];
        let c = ResolveContext { user_id: "u1", level: 1, preferences: &prefs, history: &history, assigned: &assigned };

        let out = resolve(&pool, &c, Granularity::Daily, "2024-01-01", date("2024-01-01"));
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].template_id, "t4");
        assert_eq!(out.iter().filter(|q| q.template_id == "t4").count(), 1);
    }

    #[test]
    fn test_seed_differs_by_period() {
        assert_ne!(
            selection_seed("u1", Granularity::Daily, "2024-01-01"),
            selection_seed("u1", Granularity::Daily, "2024-01-02")
        );
        assert_eq!(
            selection_seed("u1", Granularity::Daily, "2024-01-01"),
            selection_seed("u1", Granularity::Daily, "2024-01-01")
        );
    }
}
