//! Quest Template Structures
//!
//! Templates are authored in TOML files (raw form) or stored in the JSON
//! catalog document (resolved form). They are never mutated at runtime.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::progress::LevelTier;

use super::placeholder::TitleTemplate;

/// A TOML template file holds one or more `[[template]]` tables
#[derive(Debug, Clone, Deserialize)]
pub struct RawTemplateFile {
    #[serde(default, rename = "template")]
    pub templates: Vec<RawQuestTemplate>,
}

/// Raw template data as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuestTemplate {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
    pub base_xp: i64,
    /// Granularity names ("daily", "weekly", ...)
    pub granularities: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub variations: Vec<QuestVariation>,
    #[serde(default = "default_level")]
    pub level_requirement: u32,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    pub max_completions: Option<u32>,
    pub time_limit_hours: Option<u32>,
    pub season: Option<String>,
    pub bonus_xp: Option<i64>,
    #[serde(default)]
    pub placeholder_defaults: BTreeMap<String, String>,
}

/// Upper bound for base and bonus XP of a template
pub const MAX_TEMPLATE_XP: i64 = 100_000;

/// Upper bound for a template's time limit (one leap year)
pub const MAX_TIME_LIMIT_HOURS: u32 = 366 * 24;

fn default_difficulty() -> u8 {
    1
}

fn default_weight() -> f64 {
    1.0
}

fn default_level() -> u32 {
    1
}

fn default_xp_modifier() -> f64 {
    1.0
}

// ============================================================================
// Resolved Template Structures
// ============================================================================

/// Refresh period of a quest bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
    /// Non-periodic
    Special,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Daily,
        Granularity::Weekly,
        Granularity::Monthly,
        Granularity::Special,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
            Granularity::Special => "special",
        }
    }
}

impl FromStr for Granularity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" | "day" => Ok(Granularity::Daily),
            "weekly" | "week" => Ok(Granularity::Weekly),
            "monthly" | "month" => Ok(Granularity::Monthly),
            "special" => Ok(Granularity::Special),
            _ => Err(EngineError::InvalidGranularity(s.to_string())),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quest categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Health,
    Fitness,
    Work,
    Personal,
    Social,
    Learning,
    Creativity,
    Mindfulness,
}

impl Category {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "health" => Some(Category::Health),
            "fitness" => Some(Category::Fitness),
            "work" => Some(Category::Work),
            "personal" => Some(Category::Personal),
            "social" => Some(Category::Social),
            "learning" => Some(Category::Learning),
            "creativity" => Some(Category::Creativity),
            "mindfulness" => Some(Category::Mindfulness),
            _ => None,
        }
    }
}

/// Seasonal availability tag (northern-hemisphere months)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Season {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "spring" => Some(Season::Spring),
            "summer" => Some(Season::Summer),
            "autumn" | "fall" => Some(Season::Autumn),
            "winter" => Some(Season::Winter),
            _ => None,
        }
    }

    pub fn of(date: NaiveDate) -> Self {
        match date.month() {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Autumn,
            _ => Season::Winter,
        }
    }
}

/// When a variation applies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationConditions {
    /// Empty means any tier
    #[serde(default)]
    pub tiers: Vec<LevelTier>,
    #[serde(alias = "min_level")]
    pub min_level: Option<u32>,
    #[serde(alias = "max_level")]
    pub max_level: Option<u32>,
}

impl VariationConditions {
    pub fn matches(&self, level: u32) -> bool {
        let tier = LevelTier::for_level(level);
        (self.tiers.is_empty() || self.tiers.contains(&tier))
            && self.min_level.is_none_or(|min| level >= min)
            && self.max_level.is_none_or(|max| level <= max)
    }
}

/// Alternate form of a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestVariation {
    pub title: Option<String>,
    #[serde(default = "default_xp_modifier", alias = "xp_modifier")]
    pub xp_modifier: f64,
    #[serde(default, alias = "difficulty_modifier")]
    pub difficulty_modifier: i32,
    #[serde(alias = "bonus_xp")]
    pub bonus_xp: Option<i64>,
    #[serde(default)]
    pub conditions: VariationConditions,
}

/// A catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestTemplate {
    pub id: String,
    /// May contain `{{field}}` placeholders
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    pub difficulty: u8,
    pub base_xp: i64,
    pub granularities: Vec<Granularity>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub variations: Vec<QuestVariation>,
    #[serde(default = "default_level")]
    pub level_requirement: u32,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    pub max_completions: Option<u32>,
    pub time_limit_hours: Option<u32>,
    pub season: Option<Season>,
    pub bonus_xp: Option<i64>,
    #[serde(default)]
    pub placeholder_defaults: BTreeMap<String, String>,
}

impl QuestTemplate {
    /// Create a template from raw TOML data
    pub fn from_raw(raw: &RawQuestTemplate) -> Result<Self, String> {
        let category = Category::parse(&raw.category)
            .ok_or_else(|| format!("Invalid category '{}' in template '{}'", raw.category, raw.id))?;

        let granularities = raw
            .granularities
            .iter()
            .map(|g| g.parse::<Granularity>().map_err(|e| format!("{} in template '{}'", e, raw.id)))
            .collect::<Result<Vec<_>, _>>()?;

        let season = match raw.season.as_deref() {
            Some(s) => Some(
                Season::parse(s).ok_or_else(|| format!("Invalid season '{}' in template '{}'", s, raw.id))?,
            ),
            None => None,
        };

        let template = Self {
            id: raw.id.clone(),
            title: raw.title.clone(),
            description: raw.description.clone(),
            category,
            difficulty: raw.difficulty,
            base_xp: raw.base_xp,
            granularities,
            weight: raw.weight,
            variations: raw.variations.clone(),
            level_requirement: raw.level_requirement,
            prerequisites: raw.prerequisites.clone(),
            max_completions: raw.max_completions,
            time_limit_hours: raw.time_limit_hours,
            season,
            bonus_xp: raw.bonus_xp,
            placeholder_defaults: raw.placeholder_defaults.clone(),
        };
        template.validate()?;
        Ok(template)
    }

    /// Check authoring constraints
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Template has an empty id".to_string());
        }
        if !(1..=5).contains(&self.difficulty) {
            return Err(format!("Template '{}' difficulty {} outside 1-5", self.id, self.difficulty));
        }
        if self.base_xp <= 0 || self.base_xp > MAX_TEMPLATE_XP {
            return Err(format!(
                "Template '{}' baseXp {} outside 1-{}",
                self.id, self.base_xp, MAX_TEMPLATE_XP
            ));
        }
        let bonuses = std::iter::once(self.bonus_xp).chain(self.variations.iter().map(|v| v.bonus_xp));
        for bonus in bonuses.flatten() {
            if !(0..=MAX_TEMPLATE_XP).contains(&bonus) {
                return Err(format!(
                    "Template '{}' bonusXp {} outside 0-{}",
                    self.id, bonus, MAX_TEMPLATE_XP
                ));
            }
        }
        if let Some(hours) = self.time_limit_hours {
            if hours == 0 || hours > MAX_TIME_LIMIT_HOURS {
                return Err(format!(
                    "Template '{}' timeLimitHours {} outside 1-{}",
                    self.id, hours, MAX_TIME_LIMIT_HOURS
                ));
            }
        }
        if self.granularities.is_empty() {
            return Err(format!("Template '{}' has no granularities", self.id));
        }
        Ok(())
    }

    pub fn allows(&self, granularity: Granularity) -> bool {
        self.granularities.contains(&granularity)
    }

    /// Whether this template can take part in weighted sampling
    pub fn is_selectable(&self) -> bool {
        self.weight.is_finite() && self.weight > 0.0
    }
}

/// Validate a whole catalog: drops invalid and duplicate templates, warns on
/// dangling prerequisites. Returns the kept templates and the rejection count.
pub fn validate_catalog(templates: Vec<QuestTemplate>) -> (Vec<QuestTemplate>, usize) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(templates.len());
    let mut rejected = 0;

    for template in templates {
        if let Err(e) = template.validate() {
            tracing::warn!("Skipping template: {}", e);
            rejected += 1;
            continue;
        }
        if !seen.insert(template.id.clone()) {
            tracing::warn!("Duplicate template id '{}', skipping", template.id);
            rejected += 1;
            continue;
        }
        kept.push(template);
    }

    for template in &kept {
        for field in TitleTemplate::parse(&template.title).fields() {
            if !template.placeholder_defaults.contains_key(field) {
                tracing::debug!(
                    "Template '{}' placeholder '{}' has no default and is stripped when unset",
                    template.id, field
                );
            }
        }
        for prereq in &template.prerequisites {
            if !seen.contains(prereq) {
                tracing::warn!(
                    "Template '{}' references non-existent prerequisite '{}'",
                    template.id, prereq
                );
            }
        }
    }

    (kept, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granularity_parsing() {
        assert_eq!("daily".parse::<Granularity>(), Ok(Granularity::Daily));
        assert_eq!("Weekly".parse::<Granularity>(), Ok(Granularity::Weekly));
        assert_eq!("special".parse::<Granularity>(), Ok(Granularity::Special));
        assert_eq!(
            "hourly".parse::<Granularity>(),
            Err(EngineError::InvalidGranularity("hourly".to_string()))
        );
    }

    #[test]
    fn test_template_from_toml() {
        let file: RawTemplateFile = toml::from_str(
            r#"
[[template]]
id = "morning_walk"
title = "Walk {{steps}} steps"
category = "fitness"
difficulty = 2
base_xp = 20
granularities = ["daily", "weekly"]
season = "summer"

[template.placeholder_defaults]
steps = "5000"

[[template.variations]]
title = "Walk {{steps}} steps briskly"
xp_modifier = 1.5
conditions = { tiers = ["expert"] }
"#,
        )
        .unwrap();

        let template = QuestTemplate::from_raw(&file.templates[0]).unwrap();
        assert_eq!(template.category, Category::Fitness);
        assert_eq!(template.granularities, vec![Granularity::Daily, Granularity::Weekly]);
        assert_eq!(template.season, Some(Season::Summer));
        assert_eq!(template.weight, 1.0);
        assert_eq!(template.variations[0].xp_modifier, 1.5);
        assert_eq!(template.variations[0].conditions.tiers, vec![LevelTier::Expert]);
    }

    #[test]
    fn test_invalid_category_rejected() {
        let raw = RawQuestTemplate {
            id: "x".to_string(),
            title: "X".to_string(),
            description: String::new(),
            category: "cooking".to_string(),
            difficulty: 1,
            base_xp: 10,
            granularities: vec!["daily".to_string()],
            weight: 1.0,
            variations: vec![],
            level_requirement: 1,
            prerequisites: vec![],
            max_completions: None,
            time_limit_hours: None,
            season: None,
            bonus_xp: None,
            placeholder_defaults: BTreeMap::new(),
        };
        assert!(QuestTemplate::from_raw(&raw).is_err());
    }

    #[test]
    fn test_xp_and_time_limit_bounds() {
        use crate::quest::resolver::tests::template;

        let mut t = template("long", Granularity::Special, 10);
        t.time_limit_hours = Some(u32::MAX);
        assert!(t.validate().is_err());
        t.time_limit_hours = Some(0);
        assert!(t.validate().is_err());
        t.time_limit_hours = Some(MAX_TIME_LIMIT_HOURS);
        assert!(t.validate().is_ok());

        let mut t = template("rich", Granularity::Daily, MAX_TEMPLATE_XP + 1);
        assert!(t.validate().is_err());
        t.base_xp = MAX_TEMPLATE_XP;
        t.bonus_xp = Some(i64::MAX);
        assert!(t.validate().is_err());
        t.bonus_xp = Some(50);
        assert!(t.validate().is_ok());

        let (kept, rejected) = validate_catalog(vec![template("huge", Granularity::Daily, i64::MAX)]);
        assert!(kept.is_empty());
        assert_eq!(rejected, 1);
    }

    #[test]
    fn test_variation_conditions() {
        let cond = VariationConditions {
            tiers: vec![LevelTier::Intermediate],
            min_level: Some(6),
            max_level: None,
        };
        assert!(!cond.matches(5));
        assert!(cond.matches(6));
        assert!(!cond.matches(20));
        assert!(VariationConditions::default().matches(1));
    }

    #[test]
    fn test_season_of() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(Season::of(date), Season::Winter);
        let date = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        assert_eq!(Season::of(date), Season::Summer);
    }
}
