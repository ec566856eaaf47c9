//! Envelope construction from payloads and server-side options
//!
//! Options steer how an envelope is built and routed; none of them are ever
//! copied into the serialized output.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::identity::EntityIdentity;
use crate::message::envelope::{normalize_content, Envelope, Payload};

/// Channel value used when neither the payload nor the options name one.
pub const UNROUTED_CHANNEL: &str = "N/A";

/// Post-build mapper. Runs last and replaces the envelope wholesale; it may
/// return any JSON-compatible value.
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Which channel metadata a broadcast attaches to the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataSelection {
    /// Attach the channel's full metadata map.
    All,
    /// Attach only the listed keys that are present.
    Keys(Vec<String>),
}

/// Server-only processing options recognized by the pipeline.
#[derive(Clone, Default)]
pub struct MessageOptions {
    /// Merged into the content map when it is an object; otherwise placed
    /// under `content.data`.
    pub data: Option<Value>,

    /// Sender attribution added to the envelope (skipped when the id is
    /// empty; an empty name becomes "Unknown").
    pub client: Option<EntityIdentity>,

    /// Literal metadata to attach. A broadcaster resolving
    /// `include_metadata` overwrites this.
    pub metadata: Option<BTreeMap<String, String>>,

    /// Channel metadata selection, resolved by the broadcasting channel.
    pub include_metadata: Option<MetadataSelection>,

    /// Recipient filter: members listed here are skipped and the broadcast
    /// takes the per-recipient path instead of the topic publish.
    pub exclude_clients: Vec<String>,

    /// Channel override when the payload carries none.
    pub channel: Option<String>,

    /// Defaults to true; false omits the timestamp field.
    pub include_timestamp: Option<bool>,

    /// Shallow-merged into the envelope root.
    pub custom_fields: Map<String, Value>,

    /// 0, 1 or 2.
    pub priority: Option<u8>,

    /// Milliseconds since the epoch.
    pub expires_at: Option<i64>,

    pub transform: Option<Transform>,
}

impl std::fmt::Debug for MessageOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageOptions")
            .field("data", &self.data)
            .field("client", &self.client)
            .field("metadata", &self.metadata)
            .field("include_metadata", &self.include_metadata)
            .field("exclude_clients", &self.exclude_clients)
            .field("channel", &self.channel)
            .field("include_timestamp", &self.include_timestamp)
            .field("custom_fields", &self.custom_fields)
            .field("priority", &self.priority)
            .field("expires_at", &self.expires_at)
            .field("transform", &self.transform.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Builds immutable wire envelopes from a payload and options, then
/// serializes them.
pub struct MessageBuilder;

impl MessageBuilder {
    /// Produce an envelope, applying options in a fixed order: data, client,
    /// metadata, timestamp, priority/expiry, custom fields.
    pub fn build(payload: &Payload, options: &MessageOptions) -> Envelope {
        let mut content = normalize_content(&payload.content);

        if let Some(data) = &options.data {
            match data {
                Value::Object(map) => {
                    for (key, value) in map {
                        content.insert(key.clone(), value.clone());
                    }
                }
                other => {
                    content.insert("data".to_string(), other.clone());
                }
            }
        }

        let client = options.client.as_ref().filter(|c| !c.id.is_empty()).map(|c| {
            EntityIdentity::new(
                c.id.clone(),
                if c.name.is_empty() {
                    "Unknown".to_string()
                } else {
                    c.name.clone()
                },
            )
        });

        let timestamp = if options.include_timestamp.unwrap_or(true) {
            Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
        } else {
            None
        };

        let channel = payload
            .channel
            .clone()
            .or_else(|| options.channel.clone())
            .unwrap_or_else(|| UNROUTED_CHANNEL.to_string());

        Envelope {
            kind: payload.kind.clone(),
            channel: Some(channel),
            content,
            timestamp,
            client,
            metadata: options.metadata.clone(),
            priority: options.priority,
            expires_at: options.expires_at,
            extra: options.custom_fields.clone(),
        }
    }

    /// Serialize an envelope, applying the transform last. The transform
    /// replaces the envelope wholesale and its result is emitted verbatim.
    pub fn serialize(envelope: &Envelope, transform: Option<&Transform>) -> Result<Vec<u8>> {
        let bytes = match transform {
            Some(transform) => {
                let replaced = transform(serde_json::to_value(envelope)?);
                serde_json::to_vec(&replaced)?
            }
            None => serde_json::to_vec(envelope)?,
        };
        Ok(bytes)
    }

    /// Build and serialize in one step, honoring `options.transform`.
    pub fn build_bytes(payload: &Payload, options: &MessageOptions) -> Result<Vec<u8>> {
        let envelope = Self::build(payload, options);
        Self::serialize(&envelope, options.transform.as_ref())
    }
}
