use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::schema::SchemaDescriptor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Schema,
    Records,
    Change,
    Event,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvelopeKind::Schema => "schema",
            EnvelopeKind::Records => "records",
            EnvelopeKind::Change => "change",
            EnvelopeKind::Event => "event",
        };
        f.write_str(s)
    }
}

/// Unit of output delivered to sink plugins.
///
/// `name` is the object name for `schema`/`records`/`change` envelopes and
/// the topic name for `event` envelopes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub name: String,
    pub content: Value,
}

impl Envelope {
    pub fn schema(name: impl Into<String>, schema: &SchemaDescriptor) -> crate::Result<Self> {
        Ok(Self {
            kind: EnvelopeKind::Schema,
            name: name.into(),
            content: serde_json::to_value(schema)?,
        })
    }

    pub fn records(name: impl Into<String>, records: Value) -> Self {
        Self {
            kind: EnvelopeKind::Records,
            name: name.into(),
            content: records,
        }
    }

    /// Wrap a live-stream message. Messages carrying a change-event header
    /// become `change` envelopes named after the entity; anything else is an
    /// `event` named after the topic it arrived on.
    pub fn from_stream_message(topic: &str, message: Value) -> Self {
        match change_entity_name(&message) {
            Some(entity) => Self {
                kind: EnvelopeKind::Change,
                name: entity.to_string(),
                content: message,
            },
            None => Self {
                kind: EnvelopeKind::Event,
                name: topic.to_string(),
                content: message,
            },
        }
    }

    /// Number of records carried by a `records` envelope.
    pub fn record_count(&self) -> usize {
        match (&self.kind, &self.content) {
            (EnvelopeKind::Records, Value::Array(items)) => items.len(),
            _ => 0,
        }
    }
}

/// `payload.ChangeEventHeader.entityName`, when present and non-empty.
pub fn change_entity_name(message: &Value) -> Option<&str> {
    message
        .get("payload")
        .and_then(|p| p.get("ChangeEventHeader"))
        .and_then(|h| h.get("entityName"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
}

/// `event.replayId` of a live-stream message.
pub fn replay_id_of(message: &Value) -> Option<i64> {
    message
        .get("event")
        .and_then(|e| e.get("replayId"))
        .and_then(Value::as_i64)
}
