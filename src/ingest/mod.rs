//! Event delivery into the engine.
//!
//! Every source (capture replay, collector polling, API push) produces
//! batches on one mpsc channel; a single consumer task feeds them to the
//! engine. The channel is what serializes ingestion: batches are processed
//! to completion, in delivery order, by one writer.

pub mod poll;
pub mod replay;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::Engine;
use crate::event::RawEvent;
use crate::export::health::HealthMetrics;

/// One delivered batch of raw events, in arrival order.
pub type Batch = Vec<RawEvent>;

/// Consumes batches from the delivery channel and ingests them, one batch
/// at a time, until the channel closes or shutdown is requested.
pub async fn run_engine(
    engine: Arc<Mutex<Engine>>,
    mut rx: mpsc::Receiver<Batch>,
    metrics: Arc<HealthMetrics>,
    cancel: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            batch = rx.recv() => match batch {
                Some(batch) => batch,
                None => {
                    debug!("delivery channel closed");
                    break;
                }
            },
            _ = cancel.cancelled() => break,
        };

        if batch.is_empty() {
            continue;
        }

        let delivered = batch.len();
        let (accepted, buffered) = {
            let mut engine = engine.lock();
            let accepted = engine.ingest(batch);
            (accepted, engine.buffered())
        };

        metrics.batches_received.inc();
        metrics.events_ingested.inc_by(accepted as f64);
        metrics
            .events_malformed
            .inc_by((delivered - accepted) as f64);
        metrics.buffered_events.set(buffered as f64);
    }

    info!("engine ingest task stopped");
}
