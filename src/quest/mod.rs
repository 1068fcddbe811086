//! Quest Engine
//!
//! Template catalog, per-user quest buckets, catalog resolution, rollover and
//! completion toggling. Everything below `registry` is pure and synchronous.

pub mod definition;
pub mod placeholder;
pub mod registry;
pub mod resolver;
pub mod rollover;
pub mod state;
pub mod toggle;

pub use definition::QuestTemplate;
pub use registry::{HotReloadEvent, TemplateRegistry};
pub use resolver::QuestPreferences;
pub use state::DailyQuestState;
pub use toggle::{ProgressUpdate, ToggleOutcome};
