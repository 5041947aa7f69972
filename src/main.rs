//! probe-exporter
//!
//! Runs HTTP, TCP, DNS and ICMP probes on demand against a hot-reloadable
//! set of named modules.
//!
//! # Architecture Overview
//!
//! ```text
//!     Scrape                ┌────────────────────────────────────────────────┐
//!     ──────────────────────┼─▶ http::server ──▶ http::handlers              │
//!                           │                        │                       │
//!                           │          config::SafeConfig (module snapshot)  │
//!                           │                        │                       │
//!                           │                        ▼                       │
//!                           │                prober::ProbeEngine             │
//!                           │        ┌────────┬──────┴─┬─────────┐           │
//!                           │        ▼        ▼        ▼         ▼           │
//!                           │      http      tcp      dns      icmp ─────────┼──▶ Targets
//!                           │        └────────┴───┬────┴─────────┘           │
//!                           │                     ▼                          │
//!     ◀─────────────────────┼── observability::exposition (text format)      │
//!                           │                                                │
//!                           │  Reload: SIGHUP | POST /-/reload | watcher     │
//!                           └────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use probe_exporter::config::watcher::ConfigWatcher;
use probe_exporter::config::{load_config, SafeConfig};
use probe_exporter::http::{AppState, HttpServer};
use probe_exporter::lifecycle::{signals, Shutdown};
use probe_exporter::observability::logging::{self, LogFormat};
use probe_exporter::observability::metrics;

#[derive(Parser, Debug)]
#[command(name = "probe-exporter", version, about = "Multi-protocol blackbox probing exporter")]
struct Args {
    /// Configuration file.
    #[arg(long = "config.file", default_value = "probe.yml")]
    config_file: PathBuf,

    /// Address to listen on.
    #[arg(long = "web.listen-address", default_value = "0.0.0.0:9115")]
    listen_address: String,

    /// Subtracted from the scrape timeout to leave time for the response.
    #[arg(long = "timeout-offset", default_value = "500ms", value_parser = humantime::parse_duration)]
    timeout_offset: Duration,

    /// Validate the configuration file and exit.
    #[arg(long = "config.check")]
    config_check: bool,

    /// Reload the configuration when the file changes.
    #[arg(long = "config.watch")]
    config_watch: bool,

    #[arg(long = "log.level", default_value = "info")]
    log_level: String,

    #[arg(long = "log.format", value_enum, default_value_t = LogFormat::Logfmt)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init(&args.log_level, args.log_format)?;

    if args.config_check {
        let config = load_config(&args.config_file)?;
        tracing::info!(
            path = %args.config_file.display(),
            modules = config.modules.len(),
            "Config file is ok, exiting"
        );
        return Ok(());
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting probe-exporter");

    let handle = metrics::handle();
    let store = Arc::new(SafeConfig::new());
    let (reload_tx, _) = broadcast::channel(16);
    store.reload_config(&args.config_file, Some(&reload_tx))?;

    let shutdown = Shutdown::new();
    signals::spawn_shutdown_listener(shutdown.clone());
    signals::spawn_reload_listener(
        store.clone(),
        args.config_file.clone(),
        Some(reload_tx.clone()),
        shutdown.clone(),
    );

    let _watcher = if args.config_watch {
        Some(
            ConfigWatcher::new(&args.config_file, store.clone())
                .with_notify(reload_tx.clone())
                .run()?,
        )
    } else {
        None
    };

    let state = AppState::new(store, args.config_file.clone(), handle)
        .with_timeout_offset(args.timeout_offset)
        .with_reload_notify(reload_tx);

    let listener = TcpListener::bind(&args.listen_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    HttpServer::new(state).run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
