use chrono::{DateTime, Utc};
use serde::Serialize;

use super::correlate::Transaction;
use super::sequence::SkippedRange;
use crate::event::TransactionKey;

/// Largest response latency in a batch and where it occurred.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxLatency {
    /// 1-based batch position of the event that supplied the response.
    pub index: usize,
    pub millis: f64,
}

/// Point-in-time analytics over one analyzed batch. Recomputed in full on
/// every analysis pass; superseded by the next one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSnapshot {
    pub analyzed_events: u64,
    pub total_transactions: u64,
    pub missing: u64,
    pub missing_keys: Vec<TransactionKey>,
    pub skipped: u64,
    pub skipped_ranges: Vec<SkippedRange>,
    pub swapped_roles: u64,
    pub reordered: u64,
    pub out_of_order: u64,
    /// None when the batch spans zero time (undefined rate).
    pub messages_per_second: Option<f64>,
    /// Mean latency over complete transactions only.
    pub mean_latency_ms: Option<f64>,
    pub max_latency: Option<MaxLatency>,
}

impl AnalysisSnapshot {
    /// The all-zero snapshot returned for an empty analysis set.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Latency aggregation over the complete transactions of a batch.
#[derive(Debug, Default)]
pub struct LatencyStats {
    sum_ms: f64,
    complete: u64,
    max: Option<MaxLatency>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one complete transaction. Returns the latency so the caller
    /// can apply high-latency annotation.
    pub fn record(&mut self, txn: &Transaction) -> Option<f64> {
        let millis = txn.latency_ms()?;
        self.sum_ms += millis;
        self.complete += 1;

        let index = txn.response_seq.unwrap_or(txn.sequence_index);
        if self.max.map_or(true, |m| millis > m.millis) {
            self.max = Some(MaxLatency { index, millis });
        }

        Some(millis)
    }

    pub fn mean_ms(&self) -> Option<f64> {
        (self.complete > 0).then(|| self.sum_ms / self.complete as f64)
    }

    pub fn max(&self) -> Option<MaxLatency> {
        self.max
    }
}

/// Messages per second over a batch, first and last timestamp taken by
/// arrival order. A zero or negative span is undefined, never a panic.
pub fn messages_per_second(
    count: usize,
    first: DateTime<Utc>,
    last: DateTime<Utc>,
) -> Option<f64> {
    let span_ns = (last - first).num_nanoseconds()?;
    if span_ns <= 0 {
        return None;
    }
    Some(count as f64 / (span_ns as f64 / 1_000_000_000.0))
}
