//! Probing subsystem.
//!
//! # Data Flow
//! ```text
//! /probe request
//!     → engine.rs (module lookup result, span, timing)
//!     → http.rs | tcp.rs | dns.rs | icmp.rs
//!         → resolver.rs (address family decision)
//!         → matcher.rs (regexp rules)
//!         → tls.rs (client TLS, certificate expiry)
//!     → result.rs (ProbeReport)
//!     → observability::exposition (text format)
//! ```
//!
//! # Design Decisions
//! - Every probe is bounded by a single deadline in [`ProbeContext`]
//! - Probers classify failures into [`ProbeFailure`] and never panic
//! - Only the ICMP sequence counter is shared between probes

pub mod dns;
pub mod engine;
pub mod http;
pub mod icmp;
pub mod matcher;
pub mod resolver;
pub mod result;
pub mod tcp;
pub mod tls;

pub use engine::ProbeEngine;
pub use icmp::IcmpSequence;
pub use result::{Measurements, ProbeContext, ProbeFailure, ProbeOutcome, ProbeReport};
