//! Connected clients and their state machine
//!
//! A client adapts one transport connection: it gates outbound sends on its
//! connection state, attributes outgoing envelopes with its identity, and
//! keeps the client side of the client/channel membership coordination.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, warn};

use crate::channel::{AddMemberOptions, AddMemberOutcome, ChannelOps, RemoveMemberOptions};
use crate::error::Result;
use crate::identity::EntityIdentity;
use crate::message::{types, MessageBuilder, MessageOptions, Payload};
use crate::transport::{Transport, TransportError};

/// Connection lifecycle. Transitions are monotonic; a client never revives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl ConnectionState {
    /// Outbound sends are admissible only while connected or draining.
    pub fn can_receive(self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Disconnecting
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Snapshot of a client's connection, with uptime and channel count.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub identity: EntityIdentity,
    pub state: ConnectionState,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub uptime: Option<Duration>,
    pub channel_count: usize,
}

/// The capability set the hub and channels depend on. Variants supplied via
/// `HubOptions::client_factory` implement this trait.
pub trait ClientOps: Send + Sync {
    fn id(&self) -> &str;
    fn whoami(&self) -> EntityIdentity;
    fn state(&self) -> ConnectionState;
    fn can_receive(&self) -> bool;

    /// Build, attribute, serialize, and write an envelope to the transport.
    /// Dropped with a warning outside a sendable state; transport failures
    /// are confined here, with a closed connection marking the client
    /// disconnected.
    fn send(&self, payload: Payload, options: MessageOptions) -> Result<()>;

    /// Write pre-serialized bytes straight to the transport. Used by the
    /// per-recipient broadcast path, which shares one serialization across
    /// recipients.
    fn send_bytes(&self, bytes: &[u8]) -> std::result::Result<(), TransportError>;

    fn subscribe(&self, topic: &str) -> std::result::Result<(), TransportError>;
    fn unsubscribe(&self, topic: &str) -> std::result::Result<(), TransportError>;

    /// Membership coordination; called only by channels.
    fn track_channel(&self, channel: Arc<dyn ChannelOps>);
    fn untrack_channel(&self, channel_id: &str);
    fn tracks_channel(&self, channel_id: &str) -> bool;
    fn channel_ids(&self) -> Vec<String>;
    fn channels(&self) -> Vec<Arc<dyn ChannelOps>>;

    fn mark_connected(&self);
    fn mark_disconnecting(&self);
    fn mark_disconnected(&self);

    fn connection_info(&self) -> ConnectionInfo;
    fn close(&self, code: Option<u16>, reason: Option<&str>);
}

struct ClientInner {
    state: ConnectionState,
    channels: HashMap<String, Arc<dyn ChannelOps>>,
    connected_at: Option<DateTime<Utc>>,
    disconnected_at: Option<DateTime<Utc>>,
}

/// One live connection. Construction starts in `Connecting`; the hub marks
/// it connected once registered.
pub struct Client {
    identity: EntityIdentity,
    transport: Arc<dyn Transport>,
    inner: Mutex<ClientInner>,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            identity: transport.identity(),
            transport,
            inner: Mutex::new(ClientInner {
                state: ConnectionState::Connecting,
                channels: HashMap::new(),
                connected_at: None,
                disconnected_at: None,
            }),
        })
    }

    /// Join a channel. Thin delegate: the channel is the membership
    /// authority; an already-tracked channel short-circuits.
    pub fn join_channel(
        self: &Arc<Self>,
        channel: &Arc<dyn ChannelOps>,
        notify: bool,
    ) -> AddMemberOutcome {
        if self.tracks_channel(channel.id()) {
            return AddMemberOutcome::AlreadyMember;
        }
        channel.add_member(
            self.clone(),
            AddMemberOptions {
                notify,
                ..Default::default()
            },
        )
    }

    /// Leave a channel. No-op when the channel is not tracked.
    pub fn leave_channel(
        &self,
        channel: &Arc<dyn ChannelOps>,
        notify: bool,
    ) -> Option<Arc<dyn ClientOps>> {
        if !self.tracks_channel(channel.id()) {
            return None;
        }
        channel.remove_member(self.id(), RemoveMemberOptions { notify })
    }

    /// Join several channels, notifying once in aggregate instead of per
    /// channel.
    pub fn join_channels(
        self: &Arc<Self>,
        channels: &[Arc<dyn ChannelOps>],
        notify: bool,
    ) -> Vec<AddMemberOutcome> {
        let outcomes: Vec<AddMemberOutcome> = channels
            .iter()
            .map(|channel| self.join_channel(channel, false))
            .collect();
        if notify {
            let joined: Vec<String> = channels
                .iter()
                .zip(&outcomes)
                .filter(|(_, outcome)| outcome.is_added())
                .map(|(channel, _)| channel.id().to_string())
                .collect();
            if !joined.is_empty() {
                let payload = Payload::new(
                    types::CLIENT_JOIN_CHANNELS,
                    json!({
                        "message": format!("Joined {} channels", joined.len()),
                        "channels": joined,
                    }),
                );
                let _ = self.send(payload, MessageOptions::default());
            }
        }
        outcomes
    }

    /// Leave the given channels, or every tracked channel when `None`.
    pub fn leave_channels(&self, channels: Option<&[Arc<dyn ChannelOps>]>, notify: bool) {
        let targets: Vec<Arc<dyn ChannelOps>> = match channels {
            Some(list) => list.to_vec(),
            None => self.channels(),
        };
        let mut left: Vec<String> = Vec::new();
        for channel in &targets {
            if self.leave_channel(channel, false).is_some() {
                left.push(channel.id().to_string());
            }
        }
        if notify && !left.is_empty() {
            let payload = Payload::new(
                types::CLIENT_LEAVE_CHANNELS,
                json!({
                    "message": format!("Left {} channels", left.len()),
                    "channels": left,
                }),
            );
            let _ = self.send(payload, MessageOptions::default());
        }
    }
}

impl ClientOps for Client {
    fn id(&self) -> &str {
        &self.identity.id
    }

    fn whoami(&self) -> EntityIdentity {
        self.identity.clone()
    }

    fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    fn can_receive(&self) -> bool {
        self.state().can_receive()
    }

    fn send(&self, payload: Payload, mut options: MessageOptions) -> Result<()> {
        let state = self.state();
        if !state.can_receive() {
            warn!(
                "Dropping \"{}\" send to {}: client is {}",
                payload.kind, self.identity.id, state
            );
            return Ok(());
        }
        options.client = Some(self.whoami());
        let bytes = MessageBuilder::build_bytes(&payload, &options)?;
        if let Err(err) = self.transport.send(&bytes) {
            if err.is_closed() {
                debug!("Transport for {} is closed, disconnecting", self.identity.id);
                self.mark_disconnected();
            } else {
                warn!("Transport send to {} failed: {}", self.identity.id, err);
            }
        }
        Ok(())
    }

    fn send_bytes(&self, bytes: &[u8]) -> std::result::Result<(), TransportError> {
        match self.transport.send(bytes) {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.is_closed() {
                    self.mark_disconnected();
                }
                Err(err)
            }
        }
    }

    fn subscribe(&self, topic: &str) -> std::result::Result<(), TransportError> {
        self.transport.subscribe(topic)
    }

    fn unsubscribe(&self, topic: &str) -> std::result::Result<(), TransportError> {
        self.transport.unsubscribe(topic)
    }

    fn track_channel(&self, channel: Arc<dyn ChannelOps>) {
        self.inner
            .lock()
            .channels
            .insert(channel.id().to_string(), channel);
    }

    fn untrack_channel(&self, channel_id: &str) {
        self.inner.lock().channels.remove(channel_id);
    }

    fn tracks_channel(&self, channel_id: &str) -> bool {
        self.inner.lock().channels.contains_key(channel_id)
    }

    fn channel_ids(&self) -> Vec<String> {
        self.inner.lock().channels.keys().cloned().collect()
    }

    fn channels(&self) -> Vec<Arc<dyn ChannelOps>> {
        self.inner.lock().channels.values().cloned().collect()
    }

    fn mark_connected(&self) {
        let mut inner = self.inner.lock();
        if inner.state < ConnectionState::Connected {
            inner.state = ConnectionState::Connected;
            inner.connected_at = Some(Utc::now());
        }
    }

    fn mark_disconnecting(&self) {
        let mut inner = self.inner.lock();
        if inner.state < ConnectionState::Disconnecting {
            inner.state = ConnectionState::Disconnecting;
        }
    }

    fn mark_disconnected(&self) {
        let mut inner = self.inner.lock();
        if inner.state < ConnectionState::Disconnected {
            inner.state = ConnectionState::Disconnected;
            inner.disconnected_at = Some(Utc::now());
        }
    }

    fn connection_info(&self) -> ConnectionInfo {
        let inner = self.inner.lock();
        let uptime = inner.connected_at.map(|connected_at| {
            let end = inner.disconnected_at.unwrap_or_else(Utc::now);
            end - connected_at
        });
        ConnectionInfo {
            identity: self.identity.clone(),
            state: inner.state,
            connected_at: inner.connected_at,
            disconnected_at: inner.disconnected_at,
            uptime,
            channel_count: inner.channels.len(),
        }
    }

    fn close(&self, code: Option<u16>, reason: Option<&str>) {
        self.transport.close(code, reason);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Client")
            .field("id", &self.identity.id)
            .field("name", &self.identity.name)
            .field("state", &inner.state)
            .field("channels", &inner.channels.len())
            .finish()
    }
}
