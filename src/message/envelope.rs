//! The JSON structure placed on the wire

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::EntityIdentity;
use crate::message::types;

/// An outgoing wire envelope. Immutable once built; server-side processing
/// options never appear among its fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    pub content: Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<EntityIdentity>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    /// Caller-supplied custom fields, merged into the envelope root.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// An envelope carrying only a type and content, for fixed replies such
    /// as the heartbeat `pong`.
    pub fn bare(kind: impl Into<String>, content: Value) -> Self {
        Self {
            kind: kind.into(),
            channel: None,
            content: normalize_content(&content),
            timestamp: None,
            client: None,
            metadata: None,
            priority: None,
            expires_at: None,
            extra: Map::new(),
        }
    }
}

/// Caller-supplied input to the message pipeline: a type tag, an optional
/// channel, and an open-ended content value.
#[derive(Debug, Clone)]
pub struct Payload {
    pub kind: String,
    pub channel: Option<String>,
    pub content: Value,
}

impl Payload {
    pub fn new(kind: impl Into<String>, content: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            channel: None,
            content: content.into(),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::new(types::MESSAGE, Value::String(text.to_string()))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::new(types::MESSAGE, Value::String(text))
    }
}

/// Coerce an arbitrary content value into an envelope content map: strings
/// wrap as `{"message": s}`, objects copy through, anything else is empty.
pub(crate) fn normalize_content(value: &Value) -> Map<String, Value> {
    match value {
        Value::String(text) => {
            let mut content = Map::new();
            content.insert("message".to_string(), Value::String(text.clone()));
            content
        }
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}
