//! The active configuration, swappable under concurrent readers.
//!
//! # Responsibilities
//! - Hold the current validated `Config` behind an atomic pointer
//! - Replace it wholesale on a successful reload
//! - Leave the previous config untouched when a reload fails
//! - Record reload outcome for diagnostics
//!
//! # Design Decisions
//! - Readers get an `Arc<Config>` snapshot; nothing is held across probe I/O
//! - Reloads are serialized by a mutex so generation numbers stay ordered
//! - The store starts empty; the first successful reload populates it

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tokio::sync::broadcast;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::{Config, Module};
use crate::observability::metrics;

/// Concurrency-safe holder of the active configuration.
pub struct SafeConfig {
    current: ArcSwap<Config>,
    generation: AtomicU64,
    reload_lock: Mutex<()>,
}

impl SafeConfig {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Config::default()),
            generation: AtomicU64::new(0),
            reload_lock: Mutex::new(()),
        }
    }

    /// Snapshot of the whole active configuration.
    pub fn get(&self) -> Arc<Config> {
        self.current.load_full()
    }

    /// Copy of a single module, if it exists in the active configuration.
    pub fn module(&self, name: &str) -> Option<Module> {
        self.current.load().modules.get(name).cloned()
    }

    /// Number of successful reloads so far. Zero means still empty.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Load, validate and activate the configuration at `path`.
    ///
    /// On success the new generation number is returned and, if given, sent
    /// to `notify`. On failure the active configuration is left as it was.
    pub fn reload_config(
        &self,
        path: &Path,
        notify: Option<&broadcast::Sender<u64>>,
    ) -> Result<u64, ConfigError> {
        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match load_config(path) {
            Ok(config) => {
                let modules = config.modules.len();
                let generation = self.install(config);
                metrics::record_config_reload(true, generation);
                tracing::info!(path = %path.display(), modules, generation, "Loaded configuration");
                if let Some(tx) = notify {
                    let _ = tx.send(generation);
                }
                Ok(generation)
            }
            Err(e) => {
                metrics::record_config_reload(false, self.generation());
                tracing::error!(path = %path.display(), error = %e, "Failed to load configuration, keeping current one");
                Err(e)
            }
        }
    }

    /// Activate an already validated configuration.
    fn install(&self, config: Config) -> u64 {
        self.current.store(Arc::new(config));
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for SafeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_starts_empty() {
        let store = SafeConfig::new();
        assert_eq!(store.generation(), 0);
        assert!(store.get().modules.is_empty());
        assert!(store.module("http_2xx").is_none());
    }

    #[test]
    fn test_failed_reload_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_config(&dir, "good.yml", "modules:\n  tcp_connect:\n    prober: tcp\n");
        let bad = write_config(&dir, "bad.yml", "modules:\n  icmp:\n    prober: icmp\n    icmp:\n      ttl: 256\n");

        let store = SafeConfig::new();
        assert_eq!(store.reload_config(&good, None).unwrap(), 1);
        let before = store.get();

        assert!(store.reload_config(&bad, None).is_err());
        assert_eq!(store.generation(), 1);
        assert_eq!(*store.get(), *before);
        assert!(store.module("tcp_connect").is_some());
    }

    #[test]
    fn test_reload_only_activates_validated_documents() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write_config(
            &dir,
            "lower.yml",
            "modules:\n  d:\n    prober: dns\n    dns:\n      query_name: example.com\n      query_class: in\n",
        );

        let store = SafeConfig::new();
        let err = store.reload_config(&bad, None).unwrap_err();
        assert!(err.to_string().contains("query class 'in' is not valid"), "{}", err);
        assert_eq!(store.generation(), 0);
        assert!(store.get().modules.is_empty());
    }

    #[test]
    fn test_reload_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_config(&dir, "good.yml", "modules:\n  tcp_connect:\n    prober: tcp\n");

        let (tx, mut rx) = broadcast::channel(4);
        let store = SafeConfig::new();
        store.reload_config(&good, Some(&tx)).unwrap();
        store.reload_config(&good, Some(&tx)).unwrap();
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
    }

    #[test]
    fn test_snapshot_survives_swap() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_config(&dir, "a.yml", "modules:\n  a:\n    prober: tcp\n");
        let second = write_config(&dir, "b.yml", "modules:\n  b:\n    prober: tcp\n");

        let store = SafeConfig::new();
        store.reload_config(&first, None).unwrap();
        let snapshot = store.get();
        store.reload_config(&second, None).unwrap();

        assert!(snapshot.modules.contains_key("a"));
        assert!(store.get().modules.contains_key("b"));
        assert!(!store.get().modules.contains_key("a"));
    }
}
