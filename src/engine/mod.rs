//! The correlation and sequence-integrity engine.
//!
//! Single-writer: one ingestion-and-analysis pass runs at a time, so the
//! order-sensitive checks never observe interleaved arrival order.
//! Callers serialize access externally (the agent holds it behind a mutex).

use std::time::Duration;

use tracing::{debug, warn};

pub mod classify;
pub mod correlate;
pub mod filter;
pub mod index;
pub mod missing;
pub mod sequence;
pub mod stats;

pub use classify::IngestCounters;
pub use filter::{StructuralFilter, TextFilter};
pub use index::KeyIndexEntry;
pub use stats::AnalysisSnapshot;

use crate::event::{Annotations, Event, RawEvent};
use classify::{classify, Classifier};
use correlate::CorrelationPass;
use index::KeyIndex;
use missing::MissingTracker;
use sequence::{reordered_transactions, skipped_ranges, timestamp_inversions};
use stats::{messages_per_second, LatencyStats};

/// One buffered event with its annotation flags and surfacing decision.
///
/// `surfaced` reflects the active filters: the structural filter narrows
/// analysis, the free-text filter affects surfacing only.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(flatten)]
    pub event: Event,
    pub annotations: Annotations,
    #[serde(skip)]
    pub surfaced: bool,
}

/// Owns the full analysis state: the append-only event log, the ingest
/// counters, the key index, the pending-missing list and the last computed
/// snapshot. Created at session start, reset only by [`Engine::clear`].
pub struct Engine {
    events: Vec<EventRecord>,
    classifier: Classifier,
    key_index: KeyIndex,
    missing: MissingTracker,
    structural: StructuralFilter,
    text: TextFilter,
    snapshot: Option<AnalysisSnapshot>,
    high_latency_ms: f64,
}

impl Engine {
    /// Creates an empty engine. Complete transactions slower than the given
    /// threshold get the high-latency annotation.
    pub fn new(high_latency_threshold: Duration) -> Self {
        Self {
            events: Vec::new(),
            classifier: Classifier::new(),
            key_index: KeyIndex::new(),
            missing: MissingTracker::new(),
            structural: StructuralFilter::default(),
            text: TextFilter::default(),
            snapshot: None,
            high_latency_ms: high_latency_threshold.as_secs_f64() * 1000.0,
        }
    }

    /// Ingests one delivered batch, in arrival order.
    ///
    /// Malformed events are skipped and counted, never fatal to the batch.
    /// Returns the number of events accepted into the buffer.
    pub fn ingest(&mut self, batch: Vec<RawEvent>) -> usize {
        let mut accepted = 0;

        for raw in batch {
            let (event, ambiguous) = match Event::from_raw(raw) {
                Ok(parsed) => parsed,
                Err(err) => {
                    self.classifier.note_malformed();
                    warn!(error = %err, "skipping malformed event");
                    continue;
                }
            };
            if ambiguous {
                self.classifier.note_ambiguous_timestamp();
            }

            let cls = classify(&event.message_kind);
            let annotations = self.classifier.observe(&event, &cls);

            self.key_index.observe(event.link_id, event.endpoint_id);

            // Per-event reconciliation of previously flagged incomplete
            // transactions, independent of the next analysis pass.
            if let Some(record) = self.missing.reconcile(&event, &cls) {
                if let Some(origin) = self.events.get_mut(record.origin) {
                    origin.annotations.missing_counterpart = false;
                }
            }

            let surfaced = self.structural.passes(&event) && self.text.passes(&event);
            self.events.push(EventRecord {
                event,
                annotations,
                surfaced,
            });
            accepted += 1;
        }

        debug!(
            accepted,
            buffered = self.events.len(),
            "batch ingested"
        );
        accepted
    }

    /// Recomputes correlation, integrity and stats over the buffered set.
    ///
    /// The structural filter narrows which events are analyzed; the
    /// free-text filter only re-marks which events are surfaced. The full
    /// pass is O(n) over the buffer, superseding any prior snapshot.
    pub fn reanalyze(&mut self, structural: StructuralFilter, text: TextFilter) -> AnalysisSnapshot {
        self.structural = structural;
        self.text = text;

        for record in &mut self.events {
            record.surfaced =
                self.structural.passes(&record.event) && self.text.passes(&record.event);
            record.annotations.reset_analysis();
        }

        let analyzed: Vec<usize> = (0..self.events.len())
            .filter(|&i| self.structural.passes(&self.events[i].event))
            .collect();

        if analyzed.is_empty() {
            self.missing.reset();
            let snapshot = AnalysisSnapshot::empty();
            self.snapshot = Some(snapshot.clone());
            return snapshot;
        }

        // Correlation pass, in arrival order over the analyzed subset.
        let mut pass = CorrelationPass::new();
        for (pos, &idx) in analyzed.iter().enumerate() {
            let record = &self.events[idx];
            let cls = classify(&record.event.message_kind);
            pass.observe(pos + 1, idx, &record.event, &cls);
        }
        for &idx in &pass.swap_flagged {
            self.events[idx].annotations.role_swap = true;
        }

        // Arrival-order monotonicity, global across keys.
        let stamps: Vec<_> = analyzed
            .iter()
            .map(|&idx| (idx, self.events[idx].event.timestamp))
            .collect();
        let inversions = timestamp_inversions(&stamps);
        for &idx in &inversions.flagged {
            self.events[idx].annotations.out_of_order = true;
        }

        // Missing transactions and latency over the fresh transaction set.
        self.missing.reset();
        let mut missing_keys = Vec::new();
        let mut latency = LatencyStats::new();

        for txn in pass.transactions() {
            if txn.is_complete() {
                if let Some(millis) = latency.record(txn) {
                    if millis > self.high_latency_ms {
                        let idx = txn.response_origin.unwrap_or(txn.origin);
                        self.events[idx].annotations.high_latency = true;
                    }
                }
            } else {
                self.missing.record(txn);
                self.events[txn.origin].annotations.missing_counterpart = true;
                missing_keys.push(txn.key);
            }
        }

        let reordered = reordered_transactions(pass.transactions());
        for &idx in &reordered.flagged {
            self.events[idx].annotations.reordered = true;
        }

        let ranges = skipped_ranges(pass.transactions());

        let first = self.events[analyzed[0]].event.timestamp;
        let last = self.events[*analyzed.last().expect("non-empty")]
            .event
            .timestamp;

        let snapshot = AnalysisSnapshot {
            analyzed_events: analyzed.len() as u64,
            total_transactions: pass.transactions().len() as u64,
            missing: missing_keys.len() as u64,
            missing_keys,
            skipped: ranges.len() as u64,
            skipped_ranges: ranges,
            swapped_roles: pass.swapped_roles,
            reordered: reordered.count,
            out_of_order: inversions.count,
            messages_per_second: messages_per_second(analyzed.len(), first, last),
            mean_latency_ms: latency.mean_ms(),
            max_latency: latency.max(),
        };

        self.snapshot = Some(snapshot.clone());
        snapshot
    }

    /// The cheap incremental ingest counters, independent of analysis.
    pub fn current_counts(&self) -> &IngestCounters {
        self.classifier.counts()
    }

    /// Ordered key index entries for building filter selectors.
    pub fn key_index_snapshot(&self) -> Vec<KeyIndexEntry> {
        self.key_index.snapshot()
    }

    /// The full buffered event log with annotations.
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// The events passing the active filters.
    pub fn surfaced_events(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.iter().filter(|r| r.surfaced)
    }

    /// The last computed snapshot, if any analysis pass has run.
    pub fn last_snapshot(&self) -> Option<&AnalysisSnapshot> {
        self.snapshot.as_ref()
    }

    /// Number of events in the buffer.
    pub fn buffered(&self) -> usize {
        self.events.len()
    }

    /// Session clear: drops the event log, counters, key index, pending
    /// list, filters and last snapshot. The only eviction mechanism.
    pub fn clear(&mut self) {
        self.events.clear();
        self.classifier.reset();
        self.key_index.reset();
        self.missing.reset();
        self.structural = StructuralFilter::default();
        self.text = TextFilter::default();
        self.snapshot = None;
    }
}
