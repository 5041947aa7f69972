//! Structured probe results.
//!
//! Probers return a [`ProbeOutcome`]; the engine wraps it into a
//! [`ProbeReport`] with timing. Rendering to any wire format happens
//! elsewhere (see `observability::exposition`).

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ProberKind;

/// Deadline shared by every step of a single probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeContext {
    deadline: Instant,
}

impl ProbeContext {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// DNS record sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RrSection {
    Answer,
    Authority,
    Additional,
}

impl fmt::Display for RrSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RrSection::Answer => f.write_str("answer"),
            RrSection::Authority => f.write_str("authority"),
            RrSection::Additional => f.write_str("additional"),
        }
    }
}

/// Why a probe failed. Every failure path maps to exactly one variant.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProbeFailure {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("error resolving address {target}: {reason}")]
    Resolution { target: String, reason: String },

    #[error("socket setup failed: {0}")]
    Socket(String),

    #[error("request error: {0}")]
    Transport(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("invalid HTTP response status code {0}")]
    StatusCode(u16),

    #[error("invalid HTTP version {0}")]
    HttpVersion(String),

    #[error("SSL failed: final request was not over TLS")]
    TlsRequired,

    #[error("SSL failed: final request was over TLS")]
    TlsForbidden,

    #[error("error reading HTTP body: {0}")]
    Body(String),

    #[error("body matched regular expression {0:?}")]
    BodyMatched(String),

    #[error("body did not match regular expression {0:?}")]
    BodyNotMatched(String),

    #[error("header {header} matched regular expression {regexp:?}")]
    HeaderMatched { header: String, regexp: String },

    #[error("header {header} did not match regular expression {regexp:?}")]
    HeaderNotMatched { header: String, regexp: String },

    #[error("missing required header {0}")]
    HeaderMissing(String),

    #[error("content encoding {actual:?} does not match expected {expected:?}")]
    ContentEncoding { expected: String, actual: String },

    #[error("rcode {0} is not one of the valid rcodes")]
    Rcode(String),

    #[error("{0} RRs validation failed")]
    RrValidation(RrSection),

    #[error("line did not match expected regular expression {0:?}")]
    ExpectNotMatched(String),
}

impl ProbeFailure {
    /// Short stable label, used for metric labels and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeFailure::Config(_) => "config",
            ProbeFailure::InvalidTarget { .. } => "invalid_target",
            ProbeFailure::Resolution { .. } => "resolution",
            ProbeFailure::Socket(_) => "socket",
            ProbeFailure::Transport(_) => "transport",
            ProbeFailure::Timeout(_) => "timeout",
            ProbeFailure::StatusCode(_) => "status_code",
            ProbeFailure::HttpVersion(_) => "http_version",
            ProbeFailure::TlsRequired | ProbeFailure::TlsForbidden => "tls",
            ProbeFailure::Body(_) => "body",
            ProbeFailure::BodyMatched(_) | ProbeFailure::BodyNotMatched(_) => "body_regexp",
            ProbeFailure::HeaderMatched { .. }
            | ProbeFailure::HeaderNotMatched { .. }
            | ProbeFailure::HeaderMissing(_) => "header",
            ProbeFailure::ContentEncoding { .. } => "content_encoding",
            ProbeFailure::Rcode(_) => "rcode",
            ProbeFailure::RrValidation(_) => "rr_validation",
            ProbeFailure::ExpectNotMatched(_) => "query_response",
        }
    }

    /// Failures caused by a regular expression rule.
    pub fn is_regexp(&self) -> bool {
        matches!(
            self,
            ProbeFailure::BodyMatched(_)
                | ProbeFailure::BodyNotMatched(_)
                | ProbeFailure::HeaderMatched { .. }
                | ProbeFailure::HeaderNotMatched { .. }
                | ProbeFailure::ExpectNotMatched(_)
        )
    }
}

/// HTTP specific measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpMeasurements {
    /// Final status code, 0 when no response arrived.
    pub status_code: u16,
    /// `Content-Length` of the final response, -1 when unknown.
    pub content_length: i64,
    pub redirects: usize,
    pub ssl: bool,
    /// Unix timestamp (seconds) of the earliest peer certificate expiry.
    pub ssl_earliest_cert_expiry: Option<f64>,
    /// e.g. 1.1 or 2.0
    pub version: Option<f64>,
}

impl Default for HttpMeasurements {
    fn default() -> Self {
        Self {
            status_code: 0,
            content_length: -1,
            redirects: 0,
            ssl: false,
            ssl_earliest_cert_expiry: None,
            version: None,
        }
    }
}

/// DNS record counts, exported even when the probe fails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DnsMeasurements {
    pub answer_rrs: usize,
    pub authority_rrs: usize,
    pub additional_rrs: usize,
}

/// Side measurements gathered while probing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    /// 4 or 6, once the target address is known.
    pub ip_protocol: Option<u8>,
    pub dns_lookup_time: Option<Duration>,
    /// Present when the module has regexp rules.
    pub failed_due_to_regex: Option<bool>,
    pub http: Option<HttpMeasurements>,
    pub dns: Option<DnsMeasurements>,
}

/// What a prober hands back to the engine.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub result: Result<(), ProbeFailure>,
    pub measurements: Measurements,
}

impl ProbeOutcome {
    pub fn new(result: Result<(), ProbeFailure>, measurements: Measurements) -> Self {
        Self {
            result,
            measurements,
        }
    }

    pub fn failure(failure: ProbeFailure) -> Self {
        Self::new(Err(failure), Measurements::default())
    }
}

/// The complete result of one probe invocation.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub module: String,
    pub prober: ProberKind,
    pub target: String,
    pub success: bool,
    pub duration: Duration,
    pub failure: Option<ProbeFailure>,
    pub measurements: Measurements,
}
