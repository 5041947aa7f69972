//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, one span per probe)
//!     → metrics.rs (process counters, gauges, histograms)
//!
//! Probe results:
//!     → exposition.rs (per-request Prometheus text)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → /metrics (process metrics)
//!     → /probe (probe metrics)
//! ```
//!
//! # Design Decisions
//! - Probers never touch metrics; they return structured reports
//! - Every probe span carries a probe id, module and target

pub mod exposition;
pub mod logging;
pub mod metrics;
