//! Health check endpoints and Prometheus metrics server
//!
//! Probes, Prometheus scraping and two read-only views of live state:
//! `/queues` shows every format's pool and ready check, `/vetos` shows every
//! open veto session.

use crate::metrics::collector::MetricsCollector;
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "scrim-room";

const ENDPOINTS: [&str; 7] = [
    "/health", "/ready", "/alive", "/metrics", "/stats", "/queues", "/vetos",
];

/// Where the health server listens
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    /// "0.0.0.0" listens on every interface
    pub host: String,
}

impl HealthServerConfig {
    pub fn for_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the health server
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub app_state: Option<Arc<AppState>>,
}

impl HealthServerState {
    fn app(&self) -> std::result::Result<&Arc<AppState>, Response> {
        self.app_state.as_ref().ok_or_else(not_initialized)
    }
}

/// HTTP server for probes, metrics and live state views
pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                app_state: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the running service so probes and views can inspect it
    pub fn with_app_state(mut self, app_state: Arc<AppState>) -> Self {
        self.state.app_state = Some(app_state);
        self
    }

    /// Bind and serve until [`HealthServer::stop`] is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind health server to {}", addr))?;
        info!("Health server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, self.create_router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                debug!("Health server received shutdown");
            })
            .await?;

        info!("Health server stopped");
        Ok(())
    }

    fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .route("/queues", get(queues_handler))
            .route("/vetos", get(vetos_handler))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        if self.shutdown_tx.send(()).is_err() {
            warn!("Health server was not running");
        }
        Ok(())
    }
}

fn not_initialized() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "service": SERVICE_NAME,
            "status": "unhealthy",
            "error": "Service not initialized"
        })),
    )
        .into_response()
}

/// HTTP status for a probe result. Degraded still serves traffic.
fn probe_status(result: &Result<HealthStatus>) -> StatusCode {
    match result {
        Ok(HealthStatus::Healthy) | Ok(HealthStatus::Degraded) => StatusCode::OK,
        Ok(HealthStatus::Unhealthy) => StatusCode::SERVICE_UNAVAILABLE,
        Err(e) => {
            error!("Health probe failed: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn probe_label(result: &Result<HealthStatus>) -> &'static str {
    match result {
        Ok(HealthStatus::Healthy) => "healthy",
        Ok(HealthStatus::Degraded) => "degraded",
        _ => "unhealthy",
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ENDPOINTS,
    }))
}

async fn health_handler(State(state): State<HealthServerState>) -> Response {
    let app = match state.app() {
        Ok(app) => app,
        Err(response) => return response,
    };

    let result = HealthCheck::liveness_check(app.clone()).await;
    let body = Json(json!({
        "service": SERVICE_NAME,
        "status": probe_label(&result),
        "version": env!("CARGO_PKG_VERSION"),
    }));
    (probe_status(&result), body).into_response()
}

async fn ready_handler(State(state): State<HealthServerState>) -> Response {
    let app = match state.app() {
        Ok(app) => app,
        Err(response) => return response,
    };

    let result = HealthCheck::readiness_check(app.clone()).await;
    (probe_status(&result), probe_label(&result)).into_response()
}

/// Alive only when fully healthy
async fn alive_handler(State(state): State<HealthServerState>) -> Response {
    let app = match state.app() {
        Ok(app) => app,
        Err(response) => return response,
    };

    match HealthCheck::liveness_check(app.clone()).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "alive").into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "not alive").into_response(),
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    match HealthEndpoints::get_metrics_text(state.metrics_collector.clone()).await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

/// Queue and veto counters in one page
async fn stats_handler(State(state): State<HealthServerState>) -> Response {
    let app = match state.app() {
        Ok(app) => app,
        Err(response) => return response,
    };

    match HealthCheck::check(app.clone()).await {
        Ok(health) => Json(json!({
            "service": {
                "name": health.service,
                "version": health.version,
                "status": health.status,
                "uptime": health.stats.uptime_info,
            },
            "queue": {
                "waiting": health.stats.players_waiting,
                "ready_checks_issued": health.stats.ready_checks_issued,
                "players_evicted": health.stats.players_evicted,
                "matches_formed": health.stats.matches_formed,
            },
            "veto": {
                "active": health.stats.active_vetos,
            },
            "components": health.checks,
            "timestamp": health.timestamp,
        }))
        .into_response(),
        Err(e) => {
            error!("Failed to collect stats: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "service": SERVICE_NAME, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn queues_handler(State(state): State<HealthServerState>) -> Response {
    let app = match state.app() {
        Ok(app) => app,
        Err(response) => return response,
    };

    match HealthEndpoints::queue_snapshots(app) {
        Ok(queues) => Json(queues).into_response(),
        Err(e) => {
            error!("Failed to snapshot queues: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn vetos_handler(State(state): State<HealthServerState>) -> Response {
    let app = match state.app() {
        Ok(app) => app,
        Err(response) => return response,
    };

    match HealthEndpoints::veto_summaries(app) {
        Ok(vetos) => Json(vetos).into_response(),
        Err(e) => {
            error!("Failed to summarize vetos: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Programmatic access to the same data the endpoints serve
pub struct HealthEndpoints;

impl HealthEndpoints {
    /// Liveness as JSON, `unhealthy` when no service is attached
    pub async fn get_health_status(app_state: Option<Arc<AppState>>) -> Result<Value> {
        let Some(app) = app_state else {
            return Ok(json!({
                "service": SERVICE_NAME,
                "status": "unhealthy",
                "error": "Service not initialized"
            }));
        };

        let result = HealthCheck::liveness_check(app).await;
        Ok(json!({
            "service": SERVICE_NAME,
            "status": probe_label(&result),
        }))
    }

    /// Metrics in Prometheus text format
    pub async fn get_metrics_text(metrics_collector: Arc<MetricsCollector>) -> Result<String> {
        let families = metrics_collector.registry().gather();
        debug!("Encoding {} metric families", families.len());

        TextEncoder::new()
            .encode_to_string(&families)
            .context("Failed to encode metrics")
    }

    /// Every format's pool and active ready check, keyed by format name
    pub fn queue_snapshots(app: &AppState) -> Result<Value> {
        let coordinator = app.coordinator();
        let mut queues = serde_json::Map::new();

        for best_of in coordinator.formats() {
            let snapshot = coordinator.pool_snapshot(best_of)?;
            queues.insert(best_of.to_string(), serde_json::to_value(snapshot)?);
        }

        Ok(Value::Object(queues))
    }

    /// Summaries of every open veto session
    pub fn veto_summaries(app: &AppState) -> Result<Value> {
        let registry = app.veto_registry();
        let mut summaries = Vec::new();

        for match_id in registry.match_ids()? {
            // a session may close between listing and reading it
            if let Ok(summary) = registry.summary(match_id) {
                summaries.push(summary);
            }
        }

        Ok(serde_json::to_value(summaries)?)
    }
}
