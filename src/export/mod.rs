//! HTTP serving layer: the analysis API, health check and Prometheus
//! metrics on one listener.

pub mod health;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::{AnalysisSnapshot, Engine, EventRecord, StructuralFilter, TextFilter};
use crate::event::RawEvent;
use crate::ingest::Batch;
use health::HealthMetrics;

/// The agent's HTTP server.
///
/// Reads go straight to the engine under its lock; pushed event batches go
/// through the delivery channel so ingestion stays single-writer and
/// ordered with the other sources.
pub struct ApiServer {
    state: Arc<AppState>,
    shutdown: Mutex<Option<CancellationToken>>,
}

/// Shared state for axum handlers.
struct AppState {
    engine: Arc<Mutex<Engine>>,
    metrics: Arc<HealthMetrics>,
    tx: mpsc::Sender<Batch>,
}

impl ApiServer {
    /// Creates the server. `tx` is the delivery channel for pushed batches.
    pub fn new(
        engine: Arc<Mutex<Engine>>,
        metrics: Arc<HealthMetrics>,
        tx: mpsc::Sender<Batch>,
    ) -> Self {
        Self {
            state: Arc::new(AppState {
                engine,
                metrics,
                tx,
            }),
            shutdown: Mutex::new(None),
        }
    }

    /// Starts serving on the configured address.
    pub async fn start(&self) -> Result<()> {
        let addr = self.state.metrics.addr();
        let addr = if addr.is_empty() { ":8088" } else { addr };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app = Router::new()
            .route("/healthz", get(healthz_handler))
            .route("/metrics", get(metrics_handler))
            .route("/api/counts", get(counts_handler))
            .route("/api/keys", get(keys_handler))
            .route("/api/snapshot", get(snapshot_handler))
            .route("/api/events", get(events_handler))
            .route("/api/reanalyze", post(reanalyze_handler))
            .route("/api/ingest", post(ingest_handler))
            .route("/api/clear", post(clear_handler))
            .with_state(self.state.clone());

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "api server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "api server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Filter parameters for a re-analysis request.
#[derive(Debug, Default, Deserialize)]
struct ReanalyzeRequest {
    #[serde(flatten)]
    structural: StructuralFilter,
    #[serde(default)]
    text: String,
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "encoding metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "encoding error".to_string(),
        );
    }

    match String::from_utf8(buffer) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "converting metrics to string");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /api/counts - incremental ingest counters.
async fn counts_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let counts = state.engine.lock().current_counts().clone();
    Json(counts)
}

/// GET /api/keys - ordered key index for filter selectors.
async fn keys_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let keys = state.engine.lock().key_index_snapshot();
    Json(keys)
}

/// GET /api/snapshot - the last computed analysis snapshot.
async fn snapshot_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state
        .engine
        .lock()
        .last_snapshot()
        .cloned()
        .unwrap_or_else(AnalysisSnapshot::empty);
    Json(snapshot)
}

/// GET /api/events - the surfaced events with annotations.
async fn events_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let events: Vec<EventRecord> = state.engine.lock().surfaced_events().cloned().collect();
    Json(events)
}

/// POST /api/reanalyze - recompute the snapshot under new filters.
async fn reanalyze_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReanalyzeRequest>,
) -> impl IntoResponse {
    let start = Instant::now();
    let snapshot = state
        .engine
        .lock()
        .reanalyze(req.structural, TextFilter::new(&req.text));
    state
        .metrics
        .reanalyze_duration
        .observe(start.elapsed().as_secs_f64());

    Json(snapshot)
}

/// POST /api/ingest - push one event batch through the delivery channel.
async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<Vec<RawEvent>>,
) -> impl IntoResponse {
    let size = batch.len();
    if state.tx.send(batch).await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "delivery channel closed");
    }

    tracing::debug!(size, "push batch accepted");
    (StatusCode::ACCEPTED, "accepted")
}

/// POST /api/clear - session reset.
async fn clear_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.engine.lock().clear();
    state.metrics.buffered_events.set(0.0);
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reanalyze_request_parsing() {
        let req: ReanalyzeRequest =
            serde_json::from_str(r#"{"linkId": 3, "endpointId": 7, "text": "alarm"}"#)
                .expect("valid request");
        assert_eq!(req.structural.link_id, Some(3));
        assert_eq!(req.structural.endpoint_id, Some(7));
        assert_eq!(req.text, "alarm");
    }

    #[test]
    fn test_reanalyze_request_defaults() {
        let req: ReanalyzeRequest = serde_json::from_str("{}").expect("valid request");
        assert!(req.structural.is_unset());
        assert!(req.text.is_empty());
    }
}
