use std::{sync::Arc, time::Duration};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod http;
mod progress;
mod quest;
mod service;
mod store;

use config::{ServerConfig, StoreKind};
use http::AppState;
use quest::{HotReloadEvent, TemplateRegistry};
use store::{DocumentStore, MemoryStore, SqliteStore};

async fn open_store(config: &ServerConfig) -> Result<Arc<dyn DocumentStore>, String> {
    match config.store {
        StoreKind::Memory => {
            warn!("Using in-memory document store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Sqlite => {
            let store = SqliteStore::new(&config.database_url)
                .await
                .map_err(|e| format!("Failed to open {}: {}", config.database_url, e))?;
            info!("Using SQLite document store at {}", config.database_url);
            Ok(Arc::new(store))
        }
    }
}

/// The stored catalog wins; the TOML directory seeds an empty store
async fn load_catalog(registry: &TemplateRegistry, store: &dyn DocumentStore) -> Result<(), String> {
    match registry.load_from_store(store).await {
        Ok(Some(_)) => return Ok(()),
        Ok(None) => {}
        Err(e) => return Err(format!("Failed to read template catalog: {}", e)),
    }

    let count = registry.load_all().await?;
    if count > 0 {
        registry
            .save_to_store(store)
            .await
            .map_err(|e| format!("Failed to save template catalog: {}", e))?;
    } else {
        warn!(
            "Template catalog is empty; add TOML files under {:?}",
            registry.templates_dir()
        );
    }
    Ok(())
}

/// Persist the catalog after every successful hot reload
fn spawn_hot_reload(state: &AppState) {
    match state.registry.start_file_watcher() {
        Ok(mut rx) => {
            let registry = state.registry.clone();
            let store = state.store.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match event {
                        HotReloadEvent::Reloaded(path) => {
                            info!("Template hot-reload: {}", path);
                            if let Err(e) = registry.save_to_store(store.as_ref()).await {
                                error!("Failed to save reloaded catalog: {}", e);
                            }
                        }
                        HotReloadEvent::Error(e) => {
                            error!("Template hot-reload error: {}", e);
                        }
                    }
                }
            });
            info!("Template hot-reload enabled");
        }
        Err(e) => {
            warn!("Failed to start template hot-reload: {}", e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    // Initialize logging
    let filter = EnvFilter::from_default_env();
    let filter = match "questlog_server=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::load();

    let store = match open_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let registry = Arc::new(TemplateRegistry::new(&config.data_dir));
    if let Err(e) = load_catalog(&registry, store.as_ref()).await {
        error!("{}", e);
        std::process::exit(1);
    }

    if config.admin_password.is_none() {
        warn!("No admin password configured; admin endpoints stay locked until one is stored");
    }
    let state = AppState::new(store, registry, config.admin_password.clone());

    if config.hot_reload {
        spawn_hot_reload(&state);
    }

    // Spawn rollover loop
    if config.rollover_interval_secs > 0 {
        let quests = state.quests.clone();
        let period = Duration::from_secs(config.rollover_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match quests.rollover_all().await {
                    Ok(0) => {}
                    Ok(count) => info!("Rolled over quests for {} user(s)", count),
                    Err(e) => error!("Rollover pass failed: {}", e),
                }
            }
        });
    }

    let app = http::router(state);

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind_addr, e);
            std::process::exit(1);
        }
    };
    info!("Quest server listening on http://{}", config.bind_addr);

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
