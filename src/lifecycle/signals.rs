//! OS signal handling.
//!
//! # Responsibilities
//! - SIGTERM / Ctrl-C trigger graceful shutdown
//! - SIGHUP reloads the configuration file
//!
//! # Design Decisions
//! - A failed reload keeps the previous configuration and only logs
//! - Handlers stop when shutdown is triggered

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::SafeConfig;
use crate::lifecycle::Shutdown;

/// Trigger `shutdown` on Ctrl-C or SIGTERM.
pub fn spawn_shutdown_listener(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        tracing::info!("Shutdown signal received");
        shutdown.trigger();
    })
}

/// Reload `path` into `config` on every SIGHUP until shutdown.
#[cfg(unix)]
pub fn spawn_reload_listener(
    config: Arc<SafeConfig>,
    path: PathBuf,
    notify: Option<broadcast::Sender<u64>>,
    shutdown: Shutdown,
) -> tokio::task::JoinHandle<()> {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler");
                return;
            }
        };
        let mut stop = shutdown.subscribe();

        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    tracing::info!(path = %path.display(), "SIGHUP received, reloading configuration");
                    if let Err(e) = config.reload_config(&path, notify.as_ref()) {
                        tracing::error!(error = %e, "Error reloading config");
                    }
                }
                _ = stop.recv() => break,
            }
        }
    })
}

#[cfg(not(unix))]
pub fn spawn_reload_listener(
    _config: Arc<SafeConfig>,
    _path: PathBuf,
    _notify: Option<broadcast::Sender<u64>>,
    _shutdown: Shutdown,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async {})
}
