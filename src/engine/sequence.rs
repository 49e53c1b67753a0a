use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::correlate::Transaction;

/// A gap between consecutive transaction identifiers on one
/// (link, endpoint) pair. Displays as "prev-next", e.g. "3-5".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRange {
    pub link_id: u32,
    pub endpoint_id: u32,
    pub from: u16,
    pub to: u16,
}

impl fmt::Display for SkippedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// Result of the arrival-order timestamp check.
#[derive(Debug, Default)]
pub struct InversionReport {
    pub count: u64,
    /// Buffer indices of flagged events (both sides of each inversion).
    pub flagged: Vec<usize>,
}

/// Scans events in arrival order and flags every timestamp strictly earlier
/// than its immediate predecessor. Global across all keys; comparison keeps
/// the sub-millisecond fraction.
pub fn timestamp_inversions(timestamps: &[(usize, DateTime<Utc>)]) -> InversionReport {
    let mut report = InversionReport::default();

    for window in timestamps.windows(2) {
        let (prev_idx, prev_ts) = window[0];
        let (cur_idx, cur_ts) = window[1];
        if cur_ts < prev_ts {
            report.count += 1;
            report.flagged.push(prev_idx);
            report.flagged.push(cur_idx);
        }
    }

    report
}

/// Walks the transaction set sorted by (link, endpoint, tid) and records a
/// skipped range wherever consecutive same-pair identifiers (both > 1)
/// differ by more than 1. A pair change or a reserved identifier (≤ 1)
/// breaks the continuity chain without flagging a gap.
pub fn skipped_ranges(transactions: &[Transaction]) -> Vec<SkippedRange> {
    let mut sorted: Vec<&Transaction> = transactions.iter().collect();
    sorted.sort_by_key(|t| t.key);

    let mut ranges = Vec::new();
    let mut previous: Option<&Transaction> = None;

    for txn in sorted {
        match previous {
            Some(prev)
                if prev.key.link_id == txn.key.link_id
                    && prev.key.endpoint_id == txn.key.endpoint_id
                    && prev.key.transaction_id > 1
                    && txn.key.transaction_id > 1 =>
            {
                if txn.key.transaction_id - prev.key.transaction_id > 1 {
                    ranges.push(SkippedRange {
                        link_id: txn.key.link_id,
                        endpoint_id: txn.key.endpoint_id,
                        from: prev.key.transaction_id,
                        to: txn.key.transaction_id,
                    });
                }
            }
            _ => {}
        }
        previous = Some(txn);
    }

    ranges
}

/// Result of the per-key arrival-order identifier check.
#[derive(Debug, Default)]
pub struct ReorderReport {
    pub count: u64,
    /// Buffer indices of flagged events (both sides of each reorder).
    pub flagged: Vec<usize>,
}

/// Walks transactions in creation order and, per (link, endpoint) pair,
/// flags every identifier lower than the previously observed one.
/// Reserved identifiers (≤ 1) are excluded.
pub fn reordered_transactions(transactions: &[Transaction]) -> ReorderReport {
    let mut report = ReorderReport::default();
    // (link, endpoint) -> (last tid, buffer index of that event).
    let mut last_seen: Vec<((u32, u32), (u16, usize))> = Vec::new();

    for txn in transactions {
        if txn.key.transaction_id <= 1 {
            continue;
        }
        let pair = (txn.key.link_id, txn.key.endpoint_id);

        match last_seen.iter_mut().find(|(p, _)| *p == pair) {
            None => last_seen.push((pair, (txn.key.transaction_id, txn.origin))),
            Some((_, (last_tid, last_origin))) => {
                if *last_tid > txn.key.transaction_id {
                    report.count += 1;
                    report.flagged.push(*last_origin);
                    report.flagged.push(txn.origin);
                }
                *last_tid = txn.key.transaction_id;
                *last_origin = txn.origin;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TransactionKey;

    fn txn(link: u32, endpoint: u32, tid: u16, origin: usize) -> Transaction {
        Transaction {
            key: TransactionKey {
                link_id: link,
                endpoint_id: endpoint,
                transaction_id: tid,
            },
            request_time: None,
            response_time: None,
            sequence_index: origin + 1,
            origin,
            response_seq: None,
            response_origin: None,
        }
    }

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn test_monotonic_timestamps_pass() {
        let stamps = vec![
            (0, ts("2025-01-01T00:00:00+00:00")),
            (1, ts("2025-01-01T00:00:01+00:00")),
            (2, ts("2025-01-01T00:00:01+00:00")), // equal is fine
        ];
        let report = timestamp_inversions(&stamps);
        assert_eq!(report.count, 0);
        assert!(report.flagged.is_empty());
    }

    #[test]
    fn test_inversion_flags_both_events() {
        let stamps = vec![
            (0, ts("2025-01-01T00:00:02+00:00")),
            (1, ts("2025-01-01T00:00:01+00:00")),
            (2, ts("2025-01-01T00:00:03+00:00")),
        ];
        let report = timestamp_inversions(&stamps);
        assert_eq!(report.count, 1);
        assert_eq!(report.flagged, vec![0, 1]);
    }

    #[test]
    fn test_submillisecond_inversion_detected() {
        let stamps = vec![
            (0, ts("2025-01-01T00:00:00.000200+00:00")),
            (1, ts("2025-01-01T00:00:00.000100+00:00")),
        ];
        let report = timestamp_inversions(&stamps);
        assert_eq!(report.count, 1);
    }

    #[test]
    fn test_skipped_range_2_3_5() {
        let txns = vec![txn(1, 1, 2, 0), txn(1, 1, 3, 1), txn(1, 1, 5, 2)];
        let ranges = skipped_ranges(&txns);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].to_string(), "3-5");
    }

    #[test]
    fn test_contiguous_identifiers_yield_no_gap() {
        let txns = vec![txn(1, 1, 2, 0), txn(1, 1, 3, 1), txn(1, 1, 4, 2)];
        assert!(skipped_ranges(&txns).is_empty());
    }

    #[test]
    fn test_reserved_identifiers_break_chain_silently() {
        // 1 is reserved: the 1 -> 5 step must not flag a gap.
        let txns = vec![txn(1, 1, 1, 0), txn(1, 1, 5, 1), txn(1, 1, 6, 2)];
        assert!(skipped_ranges(&txns).is_empty());
    }

    #[test]
    fn test_pair_boundary_breaks_chain() {
        let txns = vec![txn(1, 1, 2, 0), txn(1, 2, 9, 1)];
        assert!(skipped_ranges(&txns).is_empty());
    }

    #[test]
    fn test_gap_detected_after_sorting_unordered_input() {
        let txns = vec![txn(1, 1, 5, 0), txn(1, 1, 2, 1), txn(1, 1, 3, 2)];
        let ranges = skipped_ranges(&txns);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].from, 3);
        assert_eq!(ranges[0].to, 5);
    }

    #[test]
    fn test_reordered_transactions_counted_per_pair() {
        // Pair (1,1) sees 4 then 2: one reorder. Pair (1,2) is monotonic.
        let txns = vec![txn(1, 1, 4, 0), txn(1, 2, 2, 1), txn(1, 1, 2, 2)];
        let report = reordered_transactions(&txns);
        assert_eq!(report.count, 1);
        assert_eq!(report.flagged, vec![0, 2]);
    }

    #[test]
    fn test_reordered_ignores_reserved_identifiers() {
        let txns = vec![txn(1, 1, 4, 0), txn(1, 1, 1, 1), txn(1, 1, 5, 2)];
        let report = reordered_transactions(&txns);
        assert_eq!(report.count, 0);
    }
}
