//! Operator HTTP endpoints.
//!
//! Serves orchestrators and humans on a port beside the pipeline. Routes:
//! `GET /health` returns a JSON snapshot of feed, fan-out and overall
//! status, `GET /healthz` answers while the process runs, `GET /readyz`
//! answers only with a connected feed, `GET /metrics` renders Prometheus
//! exposition text, and `GET /reconciliation/failed` lists entries that
//! exhausted their retries.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::ReconciliationRepository;
use crate::domain::ReconciliationEntry;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::config::Environment;
use crate::infrastructure::feed::{FeedConnectionState, FeedStatus};
use crate::infrastructure::metrics::recorder_handle;

// =============================================================================
// Snapshot Payloads
// =============================================================================

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// Overall verdict for the whole pipeline.
    pub status: HealthStatus,
    /// Engine version.
    pub version: String,
    /// Platform environment.
    pub environment: String,
    /// Seconds since the server came up.
    pub uptime_secs: u64,
    /// Wall-clock time the snapshot was taken.
    pub server_time: DateTime<Utc>,
    /// Market data feed status.
    pub feed: FeedSection,
    /// Fan-out delivery statistics.
    pub broadcast: BroadcastSection,
}

/// Overall health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed connected, pipeline flowing.
    Healthy,
    /// Feed errored but mid-backoff; recovery is in progress.
    Degraded,
    /// Feed down with no recovery underway.
    Unhealthy,
}

impl HealthStatus {
    /// HTTP status code this verdict maps to. Degraded still answers 200 so
    /// load balancers keep the instance in rotation during reconnects.
    #[must_use]
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::Healthy | Self::Degraded => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Feed section of the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct FeedSection {
    /// Connection state label.
    pub connection: String,
    /// Whether the feed is connected right now.
    pub connected: bool,
    /// Messages decoded and forwarded.
    pub messages_received: u64,
    /// Malformed frames skipped.
    pub malformed_frames: u64,
    /// Reconnect attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Time of the last successful connect.
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// Fan-out section of the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastSection {
    /// Registered consumers.
    pub consumers: Vec<ConsumerCounters>,
    /// Messages dropped across all consumers.
    pub total_dropped: u64,
}

/// One consumer's delivery counters.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerCounters {
    /// Consumer name.
    pub name: String,
    /// Queue capacity.
    pub capacity: usize,
    /// Messages delivered.
    pub delivered: u64,
    /// Messages dropped because the queue was full.
    pub dropped: u64,
}

/// Body of `GET /reconciliation/failed`.
#[derive(Debug, Clone, Serialize)]
pub struct FailedEntriesView {
    /// Number of failed entries.
    pub count: usize,
    /// The entries, oldest first.
    pub entries: Vec<FailedEntryView>,
}

/// One entry that exhausted its retries.
#[derive(Debug, Clone, Serialize)]
pub struct FailedEntryView {
    /// Entry id.
    pub id: Uuid,
    /// The order whose provider outcome is unknown.
    pub order_id: Uuid,
    /// Provider the order was sent to.
    pub provider: String,
    /// Status-lookup attempts made.
    pub attempts: u32,
    /// What made the outcome indeterminate.
    pub detail: String,
    /// Time of the last attempt.
    pub last_attempt_at: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<&ReconciliationEntry> for FailedEntryView {
    fn from(entry: &ReconciliationEntry) -> Self {
        Self {
            id: entry.id,
            order_id: entry.order_id,
            provider: entry.provider.clone(),
            attempts: entry.attempts,
            detail: entry.detail.clone(),
            last_attempt_at: entry.last_attempt_at,
            created_at: entry.created_at,
        }
    }
}

// =============================================================================
// Shared Handler State
// =============================================================================

/// Everything the handlers read, shared behind one `Arc`.
pub struct HealthServerState {
    version: String,
    environment: Environment,
    started_at: Instant,
    feed_status: Arc<FeedStatus>,
    broadcast_hub: SharedBroadcastHub,
    reconciliation: Arc<dyn ReconciliationRepository>,
}

impl HealthServerState {
    /// Bundle the handler inputs; uptime counts from this call.
    #[must_use]
    pub fn new(
        version: String,
        environment: Environment,
        feed_status: Arc<FeedStatus>,
        broadcast_hub: SharedBroadcastHub,
        reconciliation: Arc<dyn ReconciliationRepository>,
    ) -> Self {
        Self {
            version,
            environment,
            started_at: Instant::now(),
            feed_status,
            broadcast_hub,
            reconciliation,
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Operator HTTP server, bound to its own port beside the pipeline.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a server that will bind `port` once run.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind the port and serve until the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns [`HealthServerError`] when the port cannot be bound or the
    /// HTTP server fails while serving.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                return Err(HealthServerError::Bind {
                    port: self.port,
                    detail: e.to_string(),
                });
            }
        };

        tracing::info!(port = self.port, "health endpoints listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::Serve {
                detail: e.to_string(),
            })?;

        tracing::info!("health endpoints stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/reconciliation/failed", get(failed_entries_handler))
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let snapshot = build_snapshot(&state);
    (snapshot.status.status_code(), Json(snapshot))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "alive")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed_status.is_connected() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "feed not connected")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    match recorder_handle() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain")],
            "metrics recorder not installed".to_string(),
        ),
    }
}

async fn failed_entries_handler(
    State(state): State<Arc<HealthServerState>>,
) -> Result<Json<FailedEntriesView>, (StatusCode, String)> {
    let entries = state
        .reconciliation
        .failed_entries()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(FailedEntriesView {
        count: entries.len(),
        entries: entries.iter().map(FailedEntryView::from).collect(),
    }))
}

fn build_snapshot(state: &HealthServerState) -> HealthSnapshot {
    let connection = state.feed_status.state();
    let hub_stats = state.broadcast_hub.stats();

    HealthSnapshot {
        status: overall_status(connection),
        version: state.version.clone(),
        environment: state.environment.as_str().to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        server_time: Utc::now(),
        feed: feed_section(connection, &state.feed_status),
        broadcast: BroadcastSection {
            total_dropped: hub_stats.total_dropped(),
            consumers: hub_stats
                .consumers
                .iter()
                .map(|c| ConsumerCounters {
                    name: c.name.clone(),
                    capacity: c.capacity,
                    delivered: c.delivered,
                    dropped: c.dropped,
                })
                .collect(),
        },
    }
}

fn feed_section(connection: FeedConnectionState, status: &FeedStatus) -> FeedSection {
    FeedSection {
        connection: connection_state_label(connection).to_string(),
        connected: connection == FeedConnectionState::Connected,
        messages_received: status.messages_received(),
        malformed_frames: status.malformed_frames(),
        reconnect_attempts: status.reconnect_attempts(),
        last_connected_at: status.last_connected_at(),
    }
}

const fn connection_state_label(state: FeedConnectionState) -> &'static str {
    match state {
        FeedConnectionState::Disconnected => "disconnected",
        FeedConnectionState::Connected => "connected",
        FeedConnectionState::Error => "error",
    }
}

/// An errored feed is degraded, not unhealthy: the client is mid-backoff
/// and will dial again.
const fn overall_status(connection: FeedConnectionState) -> HealthStatus {
    match connection {
        FeedConnectionState::Connected => HealthStatus::Healthy,
        FeedConnectionState::Error => HealthStatus::Degraded,
        FeedConnectionState::Disconnected => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Failure Modes
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The configured port could not be bound.
    #[error("failed to bind health port {port}: {detail}")]
    Bind {
        /// Port the bind was attempted on.
        port: u16,
        /// Underlying I/O error text.
        detail: String,
    },

    /// The HTTP server failed while serving.
    #[error("health server error: {detail}")]
    Serve {
        /// Underlying server error text.
        detail: String,
    },
}
