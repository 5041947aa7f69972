//! HTTP surface of the exporter.
//!
//! # Data Flow
//! ```text
//! Scrape request
//!     → server.rs (Axum setup, tracing, timeout)
//!     → handlers.rs (module lookup, probe deadline)
//!     → prober::ProbeEngine
//!     → observability::exposition (response body)
//! ```

pub mod handlers;
pub mod server;

pub use server::{AppState, HttpServer, ServerError};
