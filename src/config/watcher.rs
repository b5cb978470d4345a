//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::loader::load_config;
use crate::config::schema::ServiceConfig;

/// A watcher that reloads the configuration file and swaps the live config.
pub struct ConfigWatcher {
    path: PathBuf,
    live: Arc<ArcSwap<ServiceConfig>>,
}

impl ConfigWatcher {
    pub fn new(path: &Path, live: Arc<ArcSwap<ServiceConfig>>) -> Self {
        Self {
            path: path.to_path_buf(),
            live,
        }
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let live = self.live.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, reloading...");
                        match load_config(&path) {
                            Ok(new_config) => {
                                live.store(Arc::new(new_config));
                                tracing::info!("Configuration reloaded");
                            }
                            Err(e) => {
                                tracing::error!(
                                    error = %e,
                                    "Failed to reload config. Keeping current configuration."
                                );
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}
