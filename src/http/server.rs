//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (tracing, request timeout)
//! - Serve on a bound listener until shutdown is triggered

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::SafeConfig;
use crate::http::handlers;
use crate::lifecycle::Shutdown;
use crate::prober::ProbeEngine;

/// Upper bound on any request, probes included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(130);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to serve: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SafeConfig>,
    pub engine: ProbeEngine,
    pub metrics: PrometheusHandle,
    pub config_path: PathBuf,
    pub timeout_offset: Duration,
    pub reload_notify: Option<broadcast::Sender<u64>>,
}

impl AppState {
    pub fn new(config: Arc<SafeConfig>, config_path: PathBuf, metrics: PrometheusHandle) -> Self {
        Self {
            config,
            engine: ProbeEngine::new(),
            metrics,
            config_path,
            timeout_offset: Duration::from_millis(500),
            reload_notify: None,
        }
    }

    pub fn with_timeout_offset(mut self, offset: Duration) -> Self {
        self.timeout_offset = offset;
        self
    }

    pub fn with_reload_notify(mut self, tx: broadcast::Sender<u64>) -> Self {
        self.reload_notify = Some(tx);
        self
    }
}

/// HTTP front end of the exporter.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            router: Self::build_router(state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/probe", get(handlers::probe))
            .route("/-/reload", post(handlers::reload))
            .route("/-/healthy", get(handlers::healthy))
            .route("/config", get(handlers::config))
            .route("/metrics", get(handlers::metrics))
            .with_state(state)
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` is triggered, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        let state = AppState::new(
            Arc::new(SafeConfig::new()),
            PathBuf::from("missing.yml"),
            crate::observability::metrics::handle(),
        );
        HttpServer::new(state).router()
    }

    #[tokio::test]
    async fn test_healthy() {
        let res = router()
            .oneshot(Request::get("/-/healthy").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reload_requires_post() {
        let res = router()
            .oneshot(Request::get("/-/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_probe_with_empty_config_is_unknown_module() {
        let res = router()
            .oneshot(
                Request::get("/probe?target=example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
