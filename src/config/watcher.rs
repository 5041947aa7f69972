//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;

use crate::config::store::SafeConfig;

/// Reloads a `SafeConfig` whenever its backing file changes.
pub struct ConfigWatcher {
    path: PathBuf,
    store: Arc<SafeConfig>,
    notify: Option<broadcast::Sender<u64>>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher for `path`, reloading into `store`.
    pub fn new(path: &Path, store: Arc<SafeConfig>) -> Self {
        Self {
            path: path.to_path_buf(),
            store,
            notify: None,
        }
    }

    /// Send the new generation number to `tx` after every successful reload.
    pub fn with_notify(mut self, tx: broadcast::Sender<u64>) -> Self {
        self.notify = Some(tx);
        self
    }

    /// Start watching the file. The watcher stops when the returned handle is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let store = self.store;
        let notify = self.notify;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(path = %path.display(), "Config file change detected, reloading");
                        // Failures are logged by the store; the old config stays active.
                        let _ = store.reload_config(&path, notify.as_ref());
                    }
                }
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            NotifyConfig::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}
