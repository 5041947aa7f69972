//! Multi-protocol blackbox probing exporter.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod prober;

pub use config::{Config, SafeConfig};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use prober::{ProbeEngine, ProbeReport};
