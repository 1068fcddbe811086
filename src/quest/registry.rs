//! Template Registry
//!
//! Loads and caches the quest template catalog, either from TOML files under
//! `<data_dir>/templates` or from the JSON catalog document in the store.
//! Supports hot-reloading the TOML directory during development.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::store::{self, paths, DocumentStore, PutOptions};

use super::definition::{validate_catalog, QuestTemplate, RawTemplateFile};

/// Registry for the quest template catalog
pub struct TemplateRegistry {
    /// Current catalog, swapped whole on reload
    templates: RwLock<Arc<Vec<QuestTemplate>>>,
    /// Directory holding `*.toml` template files
    templates_dir: PathBuf,
}

impl TemplateRegistry {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            templates: RwLock::new(Arc::new(Vec::new())),
            templates_dir: data_dir.join("templates"),
        }
    }

    pub fn templates_dir(&self) -> &Path {
        &self.templates_dir
    }

    /// Load all template files from the templates directory.
    /// Returns the number of templates now in the catalog.
    pub async fn load_all(&self) -> Result<usize, String> {
        info!("Loading quest templates from {:?}", self.templates_dir);

        if !self.templates_dir.exists() {
            warn!("Template directory does not exist: {:?}", self.templates_dir);
            return Ok(self.count().await);
        }

        let mut paths = Vec::new();
        Self::collect_files(&self.templates_dir, &mut paths)?;
        paths.sort();

        let mut loaded = Vec::new();
        for path in paths {
            match Self::load_template_file(&path) {
                Ok(templates) => loaded.extend(templates),
                Err(e) => warn!("Failed to load template file {:?}: {}", path, e),
            }
        }

        let (count, rejected) = self.replace(loaded).await;
        info!("Loaded {} quest templates ({} rejected)", count, rejected);
        Ok(count)
    }

    /// Recursively collect TOML files (non-async to avoid boxing)
    fn collect_files(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<(), String> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| format!("Failed to read directory {:?}: {}", dir, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| format!("Failed to read entry: {}", e))?;
            let path = entry.path();

            if path.is_dir() {
                Self::collect_files(&path, paths)?;
            } else if path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }

        Ok(())
    }

    /// Parse one file; a bad entry rejects the whole file
    fn load_template_file(path: &Path) -> Result<Vec<QuestTemplate>, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;

        let raw: RawTemplateFile = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse {:?}: {}", path, e))?;

        raw.templates.iter().map(QuestTemplate::from_raw).collect()
    }

    /// Load the catalog document from the store.
    /// Returns `None` when the store holds no catalog yet.
    pub async fn load_from_store(&self, store: &dyn DocumentStore) -> Result<Option<usize>, StoreError> {
        let Some(templates) = store::get_json_opt::<Vec<QuestTemplate>>(store, paths::TEMPLATES).await? else {
            return Ok(None);
        };
        let (count, rejected) = self.replace(templates).await;
        info!("Loaded {} quest templates from store ({} rejected)", count, rejected);
        Ok(Some(count))
    }

    /// Write the current catalog to the store
    pub async fn save_to_store(&self, store: &dyn DocumentStore) -> Result<String, StoreError> {
        let snapshot = self.snapshot().await;
        store::put_json(store, paths::TEMPLATES, snapshot.as_ref(), PutOptions::OVERWRITE).await
    }

    /// Validate and atomically swap in a new catalog.
    /// Returns (kept, rejected) counts.
    pub async fn replace(&self, templates: Vec<QuestTemplate>) -> (usize, usize) {
        let (mut kept, rejected) = validate_catalog(templates);
        kept.sort_by(|a, b| a.id.cmp(&b.id));
        let count = kept.len();
        *self.templates.write().await = Arc::new(kept);
        (count, rejected)
    }

    /// Current catalog; later reloads do not affect the returned snapshot
    pub async fn snapshot(&self) -> Arc<Vec<QuestTemplate>> {
        Arc::clone(&*self.templates.read().await)
    }

    /// Get a template by ID
    #[cfg(test)]
    pub async fn get(&self, template_id: &str) -> Option<QuestTemplate> {
        let templates = self.templates.read().await;
        templates.iter().find(|t| t.id == template_id).cloned()
    }

    /// Get count of loaded templates
    pub async fn count(&self) -> usize {
        self.templates.read().await.len()
    }

    /// Start file watcher for hot-reload
    /// Returns a channel receiver that signals when reloads occur
    pub fn start_file_watcher(
        self: &Arc<Self>,
    ) -> Result<tokio::sync::mpsc::Receiver<HotReloadEvent>, String> {
        use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
        use std::time::Duration;

        if !self.templates_dir.exists() {
            return Err(format!("Template directory does not exist: {:?}", self.templates_dir));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let registry = Arc::clone(self);
        let templates_dir = self.templates_dir.clone();
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|e| format!("File watcher needs a tokio runtime: {}", e))?;

        // notify is sync, so the watcher lives on its own thread
        std::thread::spawn(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = match RecommendedWatcher::new(
                move |res: Result<notify::Event, notify::Error>| {
                    if let Ok(event) = res {
                        let _ = notify_tx.send(event);
                    }
                },
                Config::default().with_poll_interval(Duration::from_secs(1)),
            ) {
                Ok(w) => w,
                Err(e) => {
                    error!("Failed to create file watcher: {}", e);
                    return;
                }
            };

            if let Err(e) = watcher.watch(&templates_dir, RecursiveMode::Recursive) {
                error!("Failed to watch template directory: {}", e);
                return;
            }

            info!("Template hot-reload watcher started for {:?}", templates_dir);

            // Exits when the notify channel closes
            while let Ok(event) = notify_rx.recv() {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)) {
                    continue;
                }
                let Some(path) = event
                    .paths
                    .iter()
                    .find(|p| p.extension().is_some_and(|ext| ext == "toml"))
                else {
                    continue;
                };

                info!("Detected change in {:?}, triggering reload", path);
                let reg = Arc::clone(&registry);
                let tx = tx.clone();
                let changed = path.to_string_lossy().to_string();

                rt.spawn(async move {
                    match reg.load_all().await {
                        Ok(count) => {
                            info!("Hot-reload completed successfully ({} templates)", count);
                            let _ = tx.send(HotReloadEvent::Reloaded(changed)).await;
                        }
                        Err(e) => {
                            error!("Hot-reload failed: {}", e);
                            let _ = tx.send(HotReloadEvent::Error(e)).await;
                        }
                    }
                });
            }
        });

        Ok(rx)
    }
}

/// Events from the hot-reload watcher
#[derive(Debug, Clone)]
pub enum HotReloadEvent {
    /// A file change was picked up and the catalog reloaded
    Reloaded(String),
    /// An error occurred during reload
    Error(String),
}
