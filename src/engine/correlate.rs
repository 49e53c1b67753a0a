use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::classify::Classification;
use crate::event::{Event, TransactionKey};

/// Correlation record for one request/response pair (or self-terminating
/// alarm). Created the first time either role of a key is seen; mutated in
/// place as counterparts arrive; never deleted during a session.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub key: TransactionKey,
    pub request_time: Option<DateTime<Utc>>,
    pub response_time: Option<DateTime<Utc>>,
    /// 1-based position in the analyzed batch at record creation.
    pub sequence_index: usize,
    /// Buffer index of the creating event, for annotation.
    pub origin: usize,
    /// Batch position of the event that last supplied the response time.
    pub response_seq: Option<usize>,
    /// Buffer index of that event, for annotation.
    pub response_origin: Option<usize>,
}

impl Transaction {
    /// A transaction is complete once both roles carry a timestamp.
    pub fn is_complete(&self) -> bool {
        self.request_time.is_some() && self.response_time.is_some()
    }

    /// Response latency in milliseconds, for complete transactions.
    pub fn latency_ms(&self) -> Option<f64> {
        let request = self.request_time?;
        let response = self.response_time?;
        let nanos = (response - request).num_nanoseconds()?;
        Some(nanos as f64 / 1_000_000.0)
    }
}

/// One full correlation pass over an ordered analysis batch.
///
/// Lookup is by hashed composite key rather than the linear scan of older
/// analyzers, preserving first-exact-match and last-write-wins semantics.
#[derive(Debug, Default)]
pub struct CorrelationPass {
    transactions: Vec<Transaction>,
    by_key: HashMap<TransactionKey, usize>,
    /// Count of responses observed before their request.
    pub swapped_roles: u64,
    /// Buffer indices of the earlier response events of swapped pairs.
    pub swap_flagged: Vec<usize>,
}

impl CorrelationPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one event, in arrival order.
    ///
    /// `batch_pos` is the 1-based position within the analyzed batch;
    /// `buffer_idx` is the event's index in the session buffer.
    pub fn observe(
        &mut self,
        batch_pos: usize,
        buffer_idx: usize,
        event: &Event,
        cls: &Classification,
    ) {
        let key = event.key();

        match self.by_key.get(&key) {
            None => {
                let txn = Transaction {
                    key,
                    request_time: cls.is_request.then_some(event.timestamp),
                    response_time: cls.is_response.then_some(event.timestamp),
                    sequence_index: batch_pos,
                    origin: buffer_idx,
                    response_seq: cls.is_response.then_some(batch_pos),
                    response_origin: cls.is_response.then_some(buffer_idx),
                };
                self.by_key.insert(key, self.transactions.len());
                self.transactions.push(txn);
            }
            Some(&idx) => {
                let txn = &mut self.transactions[idx];

                if cls.is_request {
                    // A request arriving for a record that already holds a
                    // response but no request: the pair arrived swapped.
                    if txn.request_time.is_none() && txn.response_time.is_some() {
                        self.swapped_roles += 1;
                        if let Some(earlier) = txn.response_origin {
                            self.swap_flagged.push(earlier);
                        }
                    }
                    txn.request_time = Some(event.timestamp);
                }

                if cls.is_response {
                    txn.response_time = Some(event.timestamp);
                    txn.response_seq = Some(batch_pos);
                    txn.response_origin = Some(buffer_idx);
                }
            }
        }
    }

    /// The full transaction set in creation order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Looks up a transaction by exact key.
    #[cfg(test)]
    pub fn get(&self, key: &TransactionKey) -> Option<&Transaction> {
        self.by_key.get(key).map(|&idx| &self.transactions[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::classify::classify;
    use crate::event::RawEvent;

    fn event(tid: u16, kind: &str, ts: &str) -> Event {
        let (event, _) = Event::from_raw(RawEvent {
            link_id: Some(1),
            endpoint_id: Some(1),
            transaction_id: Some(tid),
            message_kind: Some(kind.to_string()),
            timestamp: Some(ts.to_string()),
            ..Default::default()
        })
        .expect("valid event");
        event
    }

    fn feed(pass: &mut CorrelationPass, pos: usize, event: &Event) {
        let cls = classify(&event.message_kind);
        pass.observe(pos, pos - 1, event, &cls);
    }

    #[test]
    fn test_request_then_response_pairs() {
        let mut pass = CorrelationPass::new();
        let a = event(2, "Get Request", "2025-01-01T00:00:00+00:00");
        let b = event(2, "Get Response", "2025-01-01T00:00:00.150+00:00");
        feed(&mut pass, 1, &a);
        feed(&mut pass, 2, &b);

        assert_eq!(pass.transactions().len(), 1);
        let txn = pass.get(&a.key()).expect("transaction exists");
        assert!(txn.is_complete());
        assert_eq!(txn.sequence_index, 1);
        assert_eq!(txn.response_seq, Some(2));
        assert_eq!(txn.latency_ms(), Some(150.0));
        assert_eq!(pass.swapped_roles, 0);
    }

    #[test]
    fn test_role_swap_detected_and_flags_earlier_event() {
        let mut pass = CorrelationPass::new();
        let response = event(5, "Get Response", "2025-01-01T00:00:00+00:00");
        let request = event(5, "Get Request", "2025-01-01T00:00:01+00:00");
        feed(&mut pass, 1, &response);
        feed(&mut pass, 2, &request);

        assert_eq!(pass.swapped_roles, 1);
        assert_eq!(pass.swap_flagged, vec![0]);
        let txn = pass.get(&response.key()).expect("transaction exists");
        assert!(txn.is_complete());
    }

    #[test]
    fn test_same_role_duplicate_is_not_a_swap() {
        let mut pass = CorrelationPass::new();
        let first = event(5, "Get Request", "2025-01-01T00:00:00+00:00");
        let second = event(5, "Get Request", "2025-01-01T00:00:01+00:00");
        feed(&mut pass, 1, &first);
        feed(&mut pass, 2, &second);

        assert_eq!(pass.swapped_roles, 0);
        let txn = pass.get(&first.key()).expect("transaction exists");
        // Last write wins.
        assert_eq!(txn.request_time, Some(second.timestamp));
        assert!(txn.response_time.is_none());
    }

    #[test]
    fn test_alarm_self_terminates() {
        let mut pass = CorrelationPass::new();
        let alarm = event(0, "Alarm Notification", "2025-01-01T00:00:00+00:00");
        feed(&mut pass, 1, &alarm);

        let txn = pass.get(&alarm.key()).expect("transaction exists");
        assert!(txn.is_complete());
        assert_eq!(txn.latency_ms(), Some(0.0));
    }

    #[test]
    fn test_keys_are_unique_in_transaction_set() {
        let mut pass = CorrelationPass::new();
        for pos in 1..=4 {
            let e = event(9, "Get Request", "2025-01-01T00:00:00+00:00");
            feed(&mut pass, pos, &e);
        }
        assert_eq!(pass.transactions().len(), 1);
    }

    #[test]
    fn test_distinct_keys_create_distinct_transactions() {
        let mut pass = CorrelationPass::new();
        let a = event(2, "Get Request", "2025-01-01T00:00:00+00:00");
        let mut b = event(2, "Get Request", "2025-01-01T00:00:00+00:00");
        b.endpoint_id = 7;
        feed(&mut pass, 1, &a);
        let cls = classify(&b.message_kind);
        pass.observe(2, 1, &b, &cls);

        assert_eq!(pass.transactions().len(), 2);
    }
}
