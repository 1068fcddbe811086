//! Server configuration.
//!
//! Loaded from `questlog.toml` (or the file named by `QUESTLOG_CONFIG`), with
//! `QUESTLOG_*` environment variables taking precedence.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Configuration file name.
const CONFIG_FILE: &str = "questlog.toml";

/// Document store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Sqlite,
}

impl StoreKind {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Some(StoreKind::Memory),
            "sqlite" => Some(StoreKind::Sqlite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: SocketAddr,
    /// Root of on-disk data; templates live in `<data_dir>/templates`
    pub data_dir: PathBuf,
    pub store: StoreKind,
    /// Used when `store = "sqlite"`
    pub database_url: String,
    /// Fallback admin password when none is stored
    pub admin_password: Option<String>,
    /// Background rollover period in seconds (0 = disabled)
    pub rollover_interval_secs: u64,
    /// Watch the template directory for changes
    pub hot_reload: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 2567)),
            data_dir: PathBuf::from("data"),
            store: StoreKind::Memory,
            database_url: "sqlite:questlog.db?mode=rwc".to_string(),
            admin_password: None,
            rollover_interval_secs: 300,
            hot_reload: cfg!(debug_assertions),
        }
    }
}

impl ServerConfig {
    /// Load from the config file, then apply environment overrides.
    pub fn load() -> Self {
        let path = std::env::var("QUESTLOG_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE));
        let mut config = Self::load_from(&path);
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load configuration from a specific path.
    /// Returns default config if the file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read config file: {e}");
                return Self::default();
            }
        };

        match toml::from_str(&contents) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Failed to parse config file: {e}");
                Self::default()
            }
        }
    }

    /// Apply `QUESTLOG_*` overrides; unparsable values are ignored with a warning
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("QUESTLOG_BIND") {
            match v.parse() {
                Ok(addr) => self.bind_addr = addr,
                Err(e) => warn!("Ignoring QUESTLOG_BIND={}: {}", v, e),
            }
        }
        if let Some(v) = lookup("QUESTLOG_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("QUESTLOG_STORE") {
            match StoreKind::parse(&v) {
                Some(kind) => self.store = kind,
                None => warn!("Ignoring QUESTLOG_STORE={}: expected memory or sqlite", v),
            }
        }
        if let Some(v) = lookup("QUESTLOG_DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = lookup("QUESTLOG_ADMIN_PASSWORD") {
            self.admin_password = Some(v);
        }
        if let Some(v) = lookup("QUESTLOG_ROLLOVER_SECS") {
            match v.parse() {
                Ok(secs) => self.rollover_interval_secs = secs,
                Err(e) => warn!("Ignoring QUESTLOG_ROLLOVER_SECS={}: {}", v, e),
            }
        }
    }
}
