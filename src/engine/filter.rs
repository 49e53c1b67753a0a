use serde::Deserialize;

use crate::event::{AttrValue, Event};

/// Exact-match filter on the correlation key. An unset link passes every
/// event; the endpoint is only checked when set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StructuralFilter {
    pub link_id: Option<u32>,
    pub endpoint_id: Option<u32>,
}

impl StructuralFilter {
    pub fn passes(&self, event: &Event) -> bool {
        let Some(link_id) = self.link_id else {
            return true;
        };
        if event.link_id != link_id {
            return false;
        }
        match self.endpoint_id {
            Some(endpoint_id) => event.endpoint_id == endpoint_id,
            None => true,
        }
    }

    pub fn is_unset(&self) -> bool {
        self.link_id.is_none()
    }
}

/// Case-insensitive free-text filter. Every field of the event, including
/// nested attribute values, is rendered as `"field: value"` and tested for
/// the needle as a substring.
#[derive(Debug, Clone, Default)]
pub struct TextFilter {
    needle: String,
}

impl TextFilter {
    pub fn new(needle: &str) -> Self {
        Self {
            needle: needle.to_lowercase(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.needle.is_empty()
    }

    /// True if any field at any depth matches. Short-circuits on the first
    /// hit; an empty needle passes everything.
    pub fn passes(&self, event: &Event) -> bool {
        if self.needle.is_empty() {
            return true;
        }

        let scalars = [
            ("linkId", event.link_id.to_string()),
            ("endpointId", event.endpoint_id.to_string()),
            ("transactionId", event.transaction_id.to_string()),
            ("messageKind", event.message_kind.clone()),
            ("timestamp", event.timestamp.to_rfc3339()),
            ("source", event.source.clone()),
            ("destination", event.destination.clone()),
        ];
        if scalars.iter().any(|(field, value)| self.hits(field, value)) {
            return true;
        }

        if let Some(code) = event.result_code {
            if self.hits("resultCode", &code.to_string()) {
                return true;
            }
        }
        if let Some(error) = &event.decoding_error {
            if self.hits("decodingError", error) {
                return true;
            }
        }

        event
            .attributes
            .iter()
            .any(|(field, value)| self.visit(field, value))
    }

    fn hits(&self, field: &str, value: &str) -> bool {
        format!("{field}: {value}")
            .to_lowercase()
            .contains(&self.needle)
    }

    /// Depth-first walk over one attribute value. List elements take their
    /// index as the field name.
    fn visit(&self, field: &str, value: &AttrValue) -> bool {
        if let Some(rendered) = value.render() {
            return self.hits(field, &rendered);
        }
        match value {
            AttrValue::List(items) => items
                .iter()
                .enumerate()
                .any(|(i, item)| self.visit(&i.to_string(), item)),
            AttrValue::Map(entries) => entries.iter().any(|(k, v)| self.visit(k, v)),
            _ => false,
        }
    }
}
