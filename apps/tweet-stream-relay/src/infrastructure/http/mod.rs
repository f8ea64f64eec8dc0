//! HTTP Server
//!
//! One axum router serving the browser page, the SSE push channel, health
//! probes and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /` - Client page
//! - `GET /stream` - SSE push channel, one `tweet` event per record
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks the relay)
//! - `GET /metrics` - Prometheus metrics in text format

pub mod page;
pub mod push;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::response::Html;
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use page::ClientPage;
pub use push::{SubscriberRegistry, TWEET_EVENT};

use crate::application::services::{BootstrapPhase, SessionBootstrap};
use crate::domain::streaming::{RelayPhase, RelayState};
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::config::ReconcileMode;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream stream status.
    pub relay: RelayInfo,
    /// Rule reconciliation status.
    pub bootstrap: BootstrapInfo,
    /// Push channel status.
    pub subscribers: SubscriberInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming normally.
    Healthy,
    /// Not streaming yet, or reconnecting.
    Degraded,
    /// Relay stopped or reconciliation failed.
    Unhealthy,
}

/// Upstream stream status.
#[derive(Debug, Clone, Serialize)]
pub struct RelayInfo {
    /// Connection phase.
    pub phase: RelayPhase,
    /// Records received since start.
    pub records_received: u64,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
    /// Last successful connection.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last disconnect reason.
    pub last_error: Option<String>,
}

/// Rule reconciliation status.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapInfo {
    /// Reconciliation phase.
    pub phase: BootstrapPhase,
    /// `connection` or `startup`.
    pub mode: &'static str,
}

/// Push channel status.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    /// Connected SSE subscribers.
    pub connected: usize,
    /// Records broadcast since start.
    pub records_sent: u64,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the HTTP server.
pub struct AppState {
    version: String,
    started_at: Instant,
    broadcast_hub: SharedBroadcastHub,
    relay_state: Arc<RelayState>,
    bootstrap: Arc<SessionBootstrap>,
    client_page: ClientPage,
    subscribers: SubscriberRegistry,
    shutdown: CancellationToken,
}

impl AppState {
    /// Create new server state.
    #[must_use]
    pub fn new(
        version: String,
        broadcast_hub: SharedBroadcastHub,
        relay_state: Arc<RelayState>,
        bootstrap: Arc<SessionBootstrap>,
        client_page: ClientPage,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            broadcast_hub,
            relay_state,
            bootstrap,
            client_page,
            subscribers: SubscriberRegistry::new(),
            shutdown,
        }
    }

    /// Connected subscriber registry.
    #[must_use]
    pub const fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }
}

// =============================================================================
// HTTP Server
// =============================================================================

/// Build the router with every endpoint.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(page_handler))
        .route("/stream", get(push::stream_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// HTTP server for the page, push channel and probes.
pub struct HttpServer {
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new HTTP server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind the configured port on all interfaces and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError::ServerFailed` if the server stops with an error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HttpServerError> {
        let local = listener.local_addr().ok();
        tracing::info!(addr = ?local, "HTTP server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn page_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Html(state.client_page.html())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if is_ready(
        state.relay_state.phase(),
        state.bootstrap.phase(),
        state.bootstrap.mode(),
    ) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let relay_phase = state.relay_state.phase();
    let bootstrap_phase = state.bootstrap.phase();

    HealthResponse {
        status: determine_health_status(relay_phase, bootstrap_phase),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        relay: RelayInfo {
            phase: relay_phase,
            records_received: state.relay_state.records_received(),
            reconnect_attempts: state.relay_state.reconnect_attempts(),
            last_connected_at: state.relay_state.last_connected_at(),
            last_error: state.relay_state.error_message(),
        },
        bootstrap: BootstrapInfo {
            phase: bootstrap_phase,
            mode: state.bootstrap.mode().as_str(),
        },
        subscribers: SubscriberInfo {
            connected: state.subscribers.count(),
            records_sent: state.broadcast_hub.stats().records_sent,
        },
    }
}

const fn determine_health_status(relay: RelayPhase, bootstrap: BootstrapPhase) -> HealthStatus {
    match (relay, bootstrap) {
        (RelayPhase::Stopped, _) | (_, BootstrapPhase::Fatal) => HealthStatus::Unhealthy,
        (RelayPhase::Streaming, _) => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

/// Ready once streaming. In per-connection mode the relay only starts when
/// the first subscriber arrives, so an untouched relay is ready as well.
const fn is_ready(relay: RelayPhase, bootstrap: BootstrapPhase, mode: ReconcileMode) -> bool {
    match (relay, bootstrap, mode) {
        (_, BootstrapPhase::Fatal, _) => false,
        (RelayPhase::Streaming, _, _)
        | (RelayPhase::Idle, BootstrapPhase::Idle, ReconcileMode::PerConnection) => true,
        _ => false,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
