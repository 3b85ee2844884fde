//! Health endpoints for K8s probes.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Health status of the worker.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub broker_connected: bool,
    pub pipelines_healthy: bool,
}

/// Shared health state, updated by the worker and the broker watchdog.
#[derive(Clone)]
pub struct HealthState {
    inner: Arc<RwLock<HealthStateInner>>,
}

struct HealthStateInner {
    broker_connected: bool,
    pipelines_healthy: bool,
    last_error: Option<String>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HealthStateInner {
                broker_connected: true,
                pipelines_healthy: true,
                last_error: None,
            })),
        }
    }

    pub async fn set_broker_connected(&self, connected: bool) {
        self.inner.write().await.broker_connected = connected;
    }

    pub async fn set_pipelines_healthy(&self, healthy: bool) {
        self.inner.write().await.pipelines_healthy = healthy;
    }

    pub async fn set_error(&self, error: Option<String>) {
        self.inner.write().await.last_error = error;
    }

    /// Liveness: pipeline health only. A broker blip must not restart
    /// the pod; the reconnect loop handles it.
    pub async fn is_alive(&self) -> bool {
        self.inner.read().await.pipelines_healthy
    }

    /// Readiness: broker connected and pipelines healthy.
    pub async fn is_ready(&self) -> bool {
        let inner = self.inner.read().await;
        inner.broker_connected && inner.pipelines_healthy
    }

    pub async fn status(&self) -> HealthStatus {
        let inner = self.inner.read().await;
        let healthy = inner.broker_connected && inner.pipelines_healthy;
        HealthStatus {
            status: if healthy {
                "healthy".to_string()
            } else {
                format!(
                    "unhealthy: {}",
                    inner.last_error.as_deref().unwrap_or("unknown")
                )
            },
            broker_connected: inner.broker_connected,
            pipelines_healthy: inner.pipelines_healthy,
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Health server for K8s probes plus the Prometheus scrape endpoint.
pub struct HealthServer {
    port: u16,
    state: HealthState,
    metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl HealthServer {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            state: HealthState::new(),
            metrics_handle: None,
        }
    }

    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Clone of the shared state, for the worker to update.
    pub fn state(&self) -> HealthState {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let metrics_handle = self.metrics_handle.clone();

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .with_state(state);

        if let Some(handle) = metrics_handle {
            router = router.route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            );
        }

        router
    }

    pub async fn run(self) -> Result<(), std::io::Error> {
        let router = self.router();
        let addr = format!("0.0.0.0:{}", self.port);

        info!(addr = %addr, "Starting health server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let status = state.status().await;
    if state.is_alive().await {
        (StatusCode::OK, Json(status))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(status))
    }
}

async fn ready_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let status = state.status().await;
    if state.is_ready().await {
        (StatusCode::OK, Json(status))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(status))
    }
}
