use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while validating a raw decoded event.
///
/// None of these abort a batch: malformed events are skipped and counted,
/// ambiguous timestamps degrade to whole-second precision.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unparsable timestamp `{0}`")]
    MalformedTimestamp(String),
}

/// Traffic direction inferred from the message kind.
/// "Downstream" means controller to device, "Upstream" the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Downstream,
    Upstream,
}

impl Direction {
    /// Returns the canonical label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Downstream => "downstream",
            Self::Upstream => "upstream",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite key correlating a request to its response:
/// the physical line, the subordinate device on it, and the
/// per-exchange transaction identifier.
///
/// Transaction identifiers 0 and 1 are reserved by the protocol and are
/// excluded from sequence-continuity analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionKey {
    pub link_id: u32,
    pub endpoint_id: u32,
    pub transaction_id: u16,
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.link_id, self.endpoint_id, self.transaction_id
        )
    }
}

/// A decoded attribute value carried in an event's nested attribute map.
///
/// The free-text filter walks this tree depth-first instead of poking at a
/// dynamically typed structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
    Null,
}

impl AttrValue {
    /// Renders a scalar value for "field: value" text matching.
    /// Maps and lists are traversed, not rendered.
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Bool(b) => Some(b.to_string()),
            Self::Integer(n) => Some(n.to_string()),
            Self::Float(n) => Some(n.to_string()),
            Self::String(s) => Some(s.clone()),
            Self::Null => Some("null".to_string()),
            Self::List(_) | Self::Map(_) => None,
        }
    }
}

/// Per-event annotation flags derived by the analysis passes.
///
/// A presentation layer maps these to its own styling; the engine never
/// touches a visual representation. `failure`, `decoding_error` and
/// `suspicious` are assigned once at ingest; the rest are recomputed on
/// every analysis pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotations {
    pub failure: bool,
    pub decoding_error: bool,
    pub suspicious: bool,
    pub missing_counterpart: bool,
    pub out_of_order: bool,
    pub role_swap: bool,
    pub reordered: bool,
    pub high_latency: bool,
}

impl Annotations {
    /// Clears the flags owned by the analysis passes, keeping the
    /// ingest-time flags intact.
    pub fn reset_analysis(&mut self) {
        self.missing_counterpart = false;
        self.out_of_order = false;
        self.role_swap = false;
        self.reordered = false;
        self.high_latency = false;
    }
}

/// One decoded protocol event as delivered on the wire.
///
/// All fields are optional at this stage; validation into [`Event`] decides
/// what is malformed. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawEvent {
    pub link_id: Option<u32>,
    pub endpoint_id: Option<u32>,
    pub transaction_id: Option<u16>,
    pub message_kind: Option<String>,
    pub timestamp: Option<String>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub result_code: Option<u8>,
    pub decoding_error: Option<String>,
    pub attributes: BTreeMap<String, AttrValue>,
}

/// One validated decoded protocol event. Immutable once created; owned by
/// the engine's append-only event log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub link_id: u32,
    pub endpoint_id: u32,
    pub transaction_id: u16,
    pub message_kind: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoding_error: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttrValue>,
}

impl Event {
    /// Validates a raw wire event.
    ///
    /// Returns the event plus a flag indicating the timestamp fraction was
    /// unparsable and got truncated to whole seconds.
    pub fn from_raw(raw: RawEvent) -> Result<(Self, bool), EventError> {
        let link_id = raw.link_id.ok_or(EventError::MissingField("linkId"))?;
        let endpoint_id = raw
            .endpoint_id
            .ok_or(EventError::MissingField("endpointId"))?;
        let transaction_id = raw
            .transaction_id
            .ok_or(EventError::MissingField("transactionId"))?;
        let message_kind = raw
            .message_kind
            .ok_or(EventError::MissingField("messageKind"))?;
        let ts_raw = raw.timestamp.ok_or(EventError::MissingField("timestamp"))?;

        let (timestamp, ambiguous) = parse_timestamp(&ts_raw)?;

        Ok((
            Self {
                link_id,
                endpoint_id,
                transaction_id,
                message_kind,
                timestamp,
                source: raw.source.unwrap_or_default(),
                destination: raw.destination.unwrap_or_default(),
                result_code: raw.result_code,
                decoding_error: raw.decoding_error,
                attributes: raw.attributes,
            },
            ambiguous,
        ))
    }

    /// Returns the composite correlation key.
    pub fn key(&self) -> TransactionKey {
        TransactionKey {
            link_id: self.link_id,
            endpoint_id: self.endpoint_id,
            transaction_id: self.transaction_id,
        }
    }
}

/// Parses an RFC 3339 timestamp, keeping the full sub-second fraction.
///
/// If the fraction is unparsable the timestamp degrades to whole-second
/// precision and the second return value is true, so the caller can count
/// the ambiguity without aborting the batch.
fn parse_timestamp(raw: &str) -> Result<(DateTime<Utc>, bool), EventError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok((ts.with_timezone(&Utc), false));
    }

    // Retry with the fractional part stripped: everything between the first
    // '.' and the timezone designator.
    if let Some(dot) = raw.find('.') {
        if let Some(tz) = raw[dot..]
            .find(|c| c == '+' || c == '-' || c == 'Z' || c == 'z')
            .map(|i| dot + i)
        {
            let stripped = format!("{}{}", &raw[..dot], &raw[tz..]);
            if let Ok(ts) = DateTime::parse_from_rfc3339(&stripped) {
                return Ok((ts.with_timezone(&Utc), true));
            }
        }
    }

    Err(EventError::MalformedTimestamp(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: &str, ts: &str) -> RawEvent {
        RawEvent {
            link_id: Some(1),
            endpoint_id: Some(2),
            transaction_id: Some(40),
            message_kind: Some(kind.to_string()),
            timestamp: Some(ts.to_string()),
            source: Some("10.0.0.5:9191".to_string()),
            destination: Some("10.0.0.1:50000".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_raw_valid() {
        let (event, ambiguous) =
            Event::from_raw(raw("Get Request", "2025-01-01T00:00:00.123456+00:00"))
                .expect("valid event");
        assert!(!ambiguous);
        assert_eq!(event.link_id, 1);
        assert_eq!(event.transaction_id, 40);
        assert_eq!(
            event.key(),
            TransactionKey {
                link_id: 1,
                endpoint_id: 2,
                transaction_id: 40,
            }
        );
    }

    #[test]
    fn test_from_raw_missing_timestamp() {
        let mut r = raw("Get Request", "x");
        r.timestamp = None;
        let err = Event::from_raw(r).expect_err("should fail");
        assert!(err.to_string().contains("timestamp"));
    }

    #[test]
    fn test_from_raw_missing_transaction_id() {
        let mut r = raw("Get Request", "2025-01-01T00:00:00+00:00");
        r.transaction_id = None;
        let err = Event::from_raw(r).expect_err("should fail");
        assert!(err.to_string().contains("transactionId"));
    }

    #[test]
    fn test_timestamp_keeps_submillisecond_fraction() {
        let (a, _) = parse_timestamp("2025-01-01T00:00:00.000100+00:00").expect("valid");
        let (b, _) = parse_timestamp("2025-01-01T00:00:00.000200+00:00").expect("valid");
        assert!(a < b);
    }

    #[test]
    fn test_ambiguous_fraction_degrades_to_seconds() {
        let (ts, ambiguous) = parse_timestamp("2025-01-01T00:00:05.12x9+00:00").expect("valid");
        assert!(ambiguous);
        let (whole, _) = parse_timestamp("2025-01-01T00:00:05+00:00").expect("valid");
        assert_eq!(ts, whole);
    }

    #[test]
    fn test_fully_unparsable_timestamp_is_malformed() {
        assert!(parse_timestamp("not a timestamp").is_err());
    }

    #[test]
    fn test_raw_event_wire_format() {
        let json = r#"{
            "linkId": 3,
            "endpointId": 7,
            "transactionId": 1201,
            "messageKind": "Set Response",
            "timestamp": "2025-01-01T12:00:00.5+00:00",
            "source": "a:1",
            "destination": "b:2",
            "resultCode": 0,
            "attributes": {"Version": "v1.2", "Window": 16}
        }"#;
        let raw: RawEvent = serde_json::from_str(json).expect("valid json");
        let (event, _) = Event::from_raw(raw).expect("valid event");
        assert_eq!(event.result_code, Some(0));
        assert_eq!(
            event.attributes.get("Window"),
            Some(&AttrValue::Integer(16))
        );
    }

    #[test]
    fn test_attr_value_render() {
        assert_eq!(AttrValue::Integer(5).render(), Some("5".to_string()));
        assert_eq!(AttrValue::Null.render(), Some("null".to_string()));
        assert_eq!(AttrValue::Map(BTreeMap::new()).render(), None);
    }

    #[test]
    fn test_annotations_reset_keeps_ingest_flags() {
        let mut a = Annotations {
            failure: true,
            suspicious: true,
            missing_counterpart: true,
            out_of_order: true,
            role_swap: true,
            ..Default::default()
        };
        a.reset_analysis();
        assert!(a.failure);
        assert!(a.suspicious);
        assert!(!a.missing_counterpart);
        assert!(!a.out_of_order);
        assert!(!a.role_swap);
    }
}
