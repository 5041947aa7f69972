//! Request handlers.
//!
//! # Endpoints
//! - `GET /probe?target=..&module=..[&debug=true]`
//! - `POST /-/reload`
//! - `GET /config`
//! - `GET /-/healthy`
//! - `GET /metrics`

use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::http::server::AppState;
use crate::observability::exposition::{render_report, CONTENT_TYPE};
use crate::prober::ProbeContext;

/// Module used when the request names none.
pub const DEFAULT_MODULE: &str = "http_2xx";

/// Header Prometheus sets with the scrape timeout in seconds.
pub const SCRAPE_TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";

/// Scrape timeout assumed when the header is absent.
const DEFAULT_SCRAPE_TIMEOUT: f64 = 120.0;

/// Effective probe timeout: the module timeout, capped by the scrape
/// timeout minus `offset`.
pub fn probe_timeout(
    module_timeout: Duration,
    scrape_timeout: Option<&str>,
    offset: Duration,
) -> Result<Duration, String> {
    let scrape = match scrape_timeout {
        Some(value) => value
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("Failed to parse timeout from Prometheus header: {}", e))?,
        None => DEFAULT_SCRAPE_TIMEOUT,
    };

    let available = scrape - offset.as_secs_f64();
    if !available.is_finite() || available <= 0.0 {
        return Err(format!(
            "Timeout offset ({}) should be lower than prometheus scrape timeout ({})",
            offset.as_secs_f64(),
            scrape
        ));
    }
    let available = Duration::from_secs_f64(available);

    if module_timeout.is_zero() || module_timeout > available {
        Ok(available)
    } else {
        Ok(module_timeout)
    }
}

fn text(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

pub async fn probe(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let module_name = params
        .get("module")
        .map(String::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MODULE);

    let Some(module) = state.config.module(module_name) else {
        tracing::debug!(module = module_name, "Unknown module");
        return text(
            StatusCode::BAD_REQUEST,
            format!("Unknown module {:?}", module_name),
        );
    };

    let Some(target) = params.get("target").filter(|t| !t.is_empty()) else {
        return text(StatusCode::BAD_REQUEST, "Target parameter is missing".to_string());
    };

    let scrape_timeout = headers
        .get(SCRAPE_TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok());
    let timeout = match probe_timeout(module.timeout, scrape_timeout, state.timeout_offset) {
        Ok(timeout) => timeout,
        Err(message) => return text(StatusCode::BAD_REQUEST, message),
    };

    let report = state
        .engine
        .probe(module_name, &module, target, ProbeContext::new(timeout))
        .await;
    let rendered = render_report(&report);

    if params.get("debug").map(String::as_str) == Some("true") {
        let mut body = String::new();
        let _ = writeln!(body, "Module: {}", module_name);
        let _ = writeln!(body, "Target: {}", target);
        let _ = writeln!(body, "Timeout: {:?}", timeout);
        let _ = writeln!(body, "Duration: {:?}", report.duration);
        match &report.failure {
            None => {
                let _ = writeln!(body, "Result: success");
            }
            Some(failure) => {
                let _ = writeln!(body, "Result: failure ({}): {}", failure.kind(), failure);
            }
        }
        let _ = writeln!(body, "\n\nMetrics that would have been returned:\n{}", rendered);
        let module_yaml = serde_yaml::to_string(&module)
            .unwrap_or_else(|e| format!("error marshalling module: {}\n", e));
        let _ = writeln!(body, "\nModule configuration:\n{}", module_yaml);
        return text(StatusCode::OK, body);
    }

    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], rendered).into_response()
}

pub async fn reload(State(state): State<AppState>) -> Response {
    match state
        .config
        .reload_config(&state.config_path, state.reload_notify.as_ref())
    {
        Ok(generation) => text(
            StatusCode::OK,
            format!("Reloaded configuration (generation {})\n", generation),
        ),
        Err(e) => text(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to reload config: {}\n", e),
        ),
    }
}

pub async fn config(State(state): State<AppState>) -> Response {
    match serde_yaml::to_string(&*state.config.get()) {
        Ok(yaml) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/yaml; charset=utf-8")],
            yaml,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Error marshalling configuration");
            text(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("error marshalling configuration: {}", e),
            )
        }
    }
}

pub async fn healthy() -> &'static str {
    "Healthy"
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        state.metrics.render(),
    )
        .into_response()
}
