use std::collections::HashMap;

use super::classify::Classification;
use super::correlate::Transaction;
use crate::event::{Event, TransactionKey};

/// State of one role of a pending transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleState {
    Pending,
    /// Satisfied by a timestamp, or by the alarm self-terminating case
    /// where no separate counterpart exists.
    Satisfied,
}

/// A transaction flagged as missing a counterpart after an analysis pass,
/// awaiting reconciliation by later ingested events.
#[derive(Debug, Clone, Copy)]
pub struct MissingRecord {
    pub key: TransactionKey,
    /// Buffer index of the originating (annotated) event.
    pub origin: usize,
    pub request: RoleState,
    pub response: RoleState,
}

impl MissingRecord {
    fn is_reconciled(&self) -> bool {
        self.request == RoleState::Satisfied && self.response == RoleState::Satisfied
    }
}

/// Tracks incomplete transactions between analysis passes and reconciles
/// them as counterpart events stream in.
#[derive(Debug, Default)]
pub struct MissingTracker {
    pending: HashMap<TransactionKey, MissingRecord>,
}

impl MissingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an incomplete transaction from an analysis pass.
    pub fn record(&mut self, txn: &Transaction) {
        let record = MissingRecord {
            key: txn.key,
            origin: txn.origin,
            request: if txn.request_time.is_some() {
                RoleState::Satisfied
            } else {
                RoleState::Pending
            },
            response: if txn.response_time.is_some() {
                RoleState::Satisfied
            } else {
                RoleState::Pending
            },
        };
        self.pending.insert(txn.key, record);
    }

    /// Checks one newly ingested event against the pending list.
    ///
    /// A matching event satisfies its role(s); once both roles are
    /// satisfied the record is reconciled and returned so the caller can
    /// clear the originating event's annotation.
    pub fn reconcile(&mut self, event: &Event, cls: &Classification) -> Option<MissingRecord> {
        let key = event.key();
        let record = self.pending.get_mut(&key)?;

        if cls.is_request {
            record.request = RoleState::Satisfied;
        }
        if cls.is_response {
            record.response = RoleState::Satisfied;
        }

        if record.is_reconciled() {
            return self.pending.remove(&key);
        }

        None
    }

    /// Number of transactions still pending a counterpart.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops all pending records, ahead of a fresh analysis pass or on
    /// session clear.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
