use serde::Serialize;

use crate::event::{Annotations, Direction, Event};

/// Role flags derived from an event's message kind.
///
/// An alarm is simultaneously request-like and response-like: it has no
/// separate counterpart, so it self-terminates its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub is_request: bool,
    pub is_response: bool,
    pub is_alarm: bool,
    pub direction: Direction,
}

/// Classifies a message kind tag into role flags and direction.
///
/// The direction test uses only the "Request" substring (not "Alarm"), so
/// alarm notifications classify as upstream. This is a naming heuristic,
/// not a protocol guarantee.
pub fn classify(message_kind: &str) -> Classification {
    let is_alarm = message_kind.contains("Alarm");
    let is_request = message_kind.contains("Request") || is_alarm;
    let is_response = message_kind.contains("Response") || is_alarm;

    let direction = if message_kind.contains("Request") {
        Direction::Downstream
    } else {
        Direction::Upstream
    };

    Classification {
        is_request,
        is_response,
        is_alarm,
        direction,
    }
}

/// Incremental counters maintained during ingest, independent of the
/// analysis passes. Cheap to read at any time.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestCounters {
    pub total_events: u64,
    pub total_alarms: u64,
    pub total_operations: u64,
    pub failed_operations: u64,
    pub decoding_errors: u64,
    pub suspicious_origins: u64,
    pub malformed_events: u64,
    pub ambiguous_timestamps: u64,
    /// Inferred controller address, latched from the first upstream event's
    /// destination. Best-effort, not an authenticated identity.
    pub controller_address: Option<String>,
}

/// Per-event classifier: maintains the ingest counters and the
/// controller-address latch, and derives the ingest-time annotations.
#[derive(Debug, Default)]
pub struct Classifier {
    counters: IngestCounters,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts for one validated event and returns its ingest-time
    /// annotation flags.
    pub fn observe(&mut self, event: &Event, cls: &Classification) -> Annotations {
        let mut annotations = Annotations::default();

        self.counters.total_events += 1;

        if cls.is_alarm {
            self.counters.total_alarms += 1;
        }

        // An event carrying a result code reports an operation outcome;
        // non-zero codes are failures.
        if let Some(code) = event.result_code {
            self.counters.total_operations += 1;
            if code != 0 {
                self.counters.failed_operations += 1;
                annotations.failure = true;
            }
        }

        if event.decoding_error.is_some() {
            self.counters.decoding_errors += 1;
            annotations.decoding_error = true;
        }

        // Controller-address heuristic: the controller is the destination of
        // upstream traffic. Latch it once, then treat downstream traffic
        // from any other source as suspicious.
        if self.counters.controller_address.is_none()
            && cls.direction == Direction::Upstream
            && !event.destination.is_empty()
        {
            self.counters.controller_address = Some(event.destination.clone());
        }

        if let Some(controller) = &self.counters.controller_address {
            if cls.direction == Direction::Downstream && event.source != *controller {
                self.counters.suspicious_origins += 1;
                annotations.suspicious = true;
            }
        }

        annotations
    }

    /// Counts an event dropped during validation.
    pub fn note_malformed(&mut self) {
        self.counters.malformed_events += 1;
    }

    /// Counts a timestamp whose fraction degraded to whole seconds.
    pub fn note_ambiguous_timestamp(&mut self) {
        self.counters.ambiguous_timestamps += 1;
    }

    /// Returns the current counter values.
    pub fn counts(&self) -> &IngestCounters {
        &self.counters
    }

    /// Resets all counters and the controller latch (session clear).
    pub fn reset(&mut self) {
        self.counters = IngestCounters::default();
    }
}
