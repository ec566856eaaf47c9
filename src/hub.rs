//! Process-wide registry and lifecycle orchestration
//!
//! The hub owns the client and channel registries, bootstraps the global
//! channel, and exposes the lifecycle handlers the transport layer drives on
//! connect, message, and close. User hooks compose with the default
//! handlers: `open` runs after the default open work, `message` replaces the
//! default message handling, `close` runs before the default cleanup.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, warn};

use crate::channel::{
    AddMemberOptions, AddMemberOutcome, Channel, ChannelOps, RemoveMemberOptions,
    DEFAULT_CHANNEL_LIMIT,
};
use crate::client::{Client, ClientOps};
use crate::error::{Error, Result};
use crate::message::{types, Envelope, MessageBuilder, MessageOptions, Payload};
use crate::transport::{PubSubServer, ServerHandle, Transport};

/// Channel every client joins on connect.
pub const GLOBAL_CHANNEL_ID: &str = "global";
pub const GLOBAL_CHANNEL_LIMIT: usize = 1000;

pub type OpenHook = Arc<dyn Fn(&Arc<dyn ClientOps>) + Send + Sync>;
pub type MessageHook = Arc<dyn Fn(&Arc<dyn ClientOps>, &str) + Send + Sync>;
pub type CloseHook = Arc<dyn Fn(&str, u16, &str) + Send + Sync>;

/// Per-event callbacks composed with the default lifecycle handlers.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Runs after the default open work (welcome + global join).
    pub open: Option<OpenHook>,
    /// Replaces the default handling for non-heartbeat frames.
    pub message: Option<MessageHook>,
    /// Runs before the default close cleanup, with the close code and
    /// reason as observed on the wire.
    pub close: Option<CloseHook>,
}

/// Everything a channel factory needs to construct a variant.
#[derive(Clone)]
pub struct ChannelSettings {
    pub id: String,
    pub name: String,
    pub limit: usize,
    pub server: ServerHandle,
}

pub type ClientFactory = Arc<dyn Fn(Arc<dyn Transport>) -> Arc<dyn ClientOps> + Send + Sync>;
pub type ChannelFactory = Arc<dyn Fn(ChannelSettings) -> Arc<dyn ChannelOps> + Send + Sync>;

/// A channel to construct at hub creation, in lieu of the defaults.
#[derive(Debug, Clone)]
pub struct ChannelSeed {
    pub id: String,
    pub name: String,
    pub limit: usize,
}

#[derive(Clone, Default)]
pub struct HubOptions {
    pub hooks: Hooks,
    /// Constructs client variants; defaults to [`Client::new`].
    pub client_factory: Option<ClientFactory>,
    /// Constructs channel variants; defaults to [`Channel::new`].
    pub channel_factory: Option<ChannelFactory>,
    /// Replaces the default channel bootstrap (including `global`) when set.
    pub channels_seed: Option<Vec<ChannelSeed>>,
    /// Limit used by `create_channel` when the caller passes none.
    pub default_channel_limit: Option<usize>,
    /// Limit applied to the auto-created `global` channel.
    pub global_channel_limit: Option<usize>,
    /// Verbose lifecycle logging.
    pub debug: bool,
}

/// Registry of all clients and channels, plus the lifecycle facade the
/// transport layer drives. Construct one per process and share it by
/// reference; tests build fresh hubs.
pub struct Hub {
    channels: RwLock<HashMap<String, Arc<dyn ChannelOps>>>,
    clients: RwLock<HashMap<String, Arc<dyn ClientOps>>>,
    server: ServerHandle,
    hooks: Hooks,
    client_factory: ClientFactory,
    channel_factory: ChannelFactory,
    default_channel_limit: usize,
    debug: bool,
}

impl Hub {
    pub fn new(options: HubOptions) -> Self {
        let client_factory = options.client_factory.unwrap_or_else(|| {
            Arc::new(|transport: Arc<dyn Transport>| -> Arc<dyn ClientOps> {
                Client::new(transport)
            })
        });
        let channel_factory = options.channel_factory.unwrap_or_else(|| {
            Arc::new(|settings: ChannelSettings| -> Arc<dyn ChannelOps> {
                Channel::new(settings.id, settings.name, settings.limit, settings.server)
            })
        });

        let hub = Self {
            channels: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
            server: ServerHandle::new(),
            hooks: options.hooks,
            client_factory,
            channel_factory,
            default_channel_limit: options
                .default_channel_limit
                .unwrap_or(DEFAULT_CHANNEL_LIMIT),
            debug: options.debug,
        };

        match options.channels_seed {
            Some(seed) => {
                for entry in seed {
                    hub.create_channel(&entry.id, &entry.name, Some(entry.limit));
                }
            }
            None => {
                hub.create_channel(
                    GLOBAL_CHANNEL_ID,
                    "Global",
                    Some(options.global_channel_limit.unwrap_or(GLOBAL_CHANNEL_LIMIT)),
                );
            }
        }

        hub
    }

    /// Late-bind the shared pub/sub server. Required before any broadcast.
    pub fn set_transport_server(&self, server: Arc<dyn PubSubServer>) {
        self.server.bind(server);
    }

    pub fn server_handle(&self) -> ServerHandle {
        self.server.clone()
    }

    /// Get or create a channel. Idempotent: an existing id is returned
    /// untouched.
    pub fn create_channel(
        &self,
        id: &str,
        name: &str,
        limit: Option<usize>,
    ) -> Arc<dyn ChannelOps> {
        if let Some(existing) = self.channels.read().get(id) {
            return existing.clone();
        }
        let mut channels = self.channels.write();
        if let Some(existing) = channels.get(id) {
            return existing.clone();
        }
        let channel = (self.channel_factory)(ChannelSettings {
            id: id.to_string(),
            name: name.to_string(),
            limit: limit.unwrap_or(self.default_channel_limit),
            server: self.server.clone(),
        });
        channels.insert(id.to_string(), channel.clone());
        if self.debug {
            debug!("Created channel \"{}\" (limit {})", id, channel.limit());
        }
        channel
    }

    /// Remove a channel, evacuating its members first.
    pub fn remove_channel(&self, id: &str) -> Option<Arc<dyn ChannelOps>> {
        let channel = self.channels.write().remove(id)?;
        channel.delete();
        Some(channel)
    }

    pub fn get_channel(&self, id: &str) -> Option<Arc<dyn ChannelOps>> {
        self.channels.read().get(id).cloned()
    }

    pub fn get_channels(&self) -> Vec<Arc<dyn ChannelOps>> {
        self.channels.read().values().cloned().collect()
    }

    pub fn get_client(&self, id: &str) -> Option<Arc<dyn ClientOps>> {
        self.clients.read().get(id).cloned()
    }

    /// Like [`get_client`](Self::get_client) but an absent id is an error.
    pub fn require_client(&self, id: &str) -> Result<Arc<dyn ClientOps>> {
        self.get_client(id)
            .ok_or_else(|| Error::ClientNotFound(id.to_string()))
    }

    pub fn get_clients(&self) -> Vec<Arc<dyn ClientOps>> {
        self.clients.read().values().cloned().collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Publish a payload to a topic through the shared server. The bytes on
    /// the wire are the serialized envelope, the same shape
    /// [`ChannelOps::broadcast`] publishes.
    pub fn broadcast(&self, channel_id: &str, payload: impl Into<Payload>) -> Result<()> {
        let mut payload = payload.into();
        payload.channel = Some(channel_id.to_string());
        let envelope = MessageBuilder::build(&payload, &MessageOptions::default());
        let bytes = MessageBuilder::serialize(&envelope, None)?;
        self.server.publish(channel_id, &bytes)
    }

    /// Publish a payload to every channel.
    pub fn broadcast_all(&self, payload: impl Into<Payload>) -> Result<()> {
        if !self.server.is_bound() {
            return Err(Error::TransportNotSet);
        }
        let payload = payload.into();
        let channel_ids: Vec<String> = self.channels.read().keys().cloned().collect();
        for channel_id in channel_ids {
            if let Err(err) = self.broadcast(&channel_id, payload.clone()) {
                warn!("Broadcast to channel \"{}\" failed: {}", channel_id, err);
            }
        }
        Ok(())
    }

    /// Resolve a tracked client and delegate the join to the channel.
    pub fn join(&self, channel_id: &str, client_id: &str) -> Result<AddMemberOutcome> {
        let channel = self
            .get_channel(channel_id)
            .ok_or_else(|| Error::ChannelNotFound(channel_id.to_string()))?;
        let client = self.require_client(client_id)?;
        Ok(channel.add_member(client, AddMemberOptions::default()))
    }

    /// Resolve a tracked client and delegate the leave to the channel.
    /// Returns whether the client was a member.
    pub fn leave(&self, channel_id: &str, client_id: &str) -> Result<bool> {
        let channel = self
            .get_channel(channel_id)
            .ok_or_else(|| Error::ChannelNotFound(channel_id.to_string()))?;
        let client = self.require_client(client_id)?;
        Ok(channel
            .remove_member(client.id(), RemoveMemberOptions::default())
            .is_some())
    }

    /// Connection established: construct and register the client, send the
    /// welcome envelope, join `global`, then run the open hook.
    pub fn on_open(&self, transport: Arc<dyn Transport>) -> Result<Arc<dyn ClientOps>> {
        let identity = transport.identity();
        if self.debug {
            debug!("Connection opened: {}", identity);
        }

        let global = self
            .get_channel(GLOBAL_CHANNEL_ID)
            .ok_or(Error::GlobalChannelMissing)?;

        let client = (self.client_factory)(transport);
        client.mark_connected();
        self.clients
            .write()
            .insert(client.id().to_string(), client.clone());

        let welcome = Payload::new(
            types::CLIENT_CONNECTED,
            json!({
                "message": "Welcome to the server",
                "client": identity,
            }),
        );
        let _ = client.send(welcome, MessageOptions::default());

        let outcome = global.add_member(client.clone(), AddMemberOptions::default());
        if !outcome.is_added() {
            warn!(
                "Could not add {} to \"{}\": {:?}",
                client.id(),
                GLOBAL_CHANNEL_ID,
                outcome
            );
        }

        if let Some(hook) = &self.hooks.open {
            hook(&client);
        }

        Ok(client)
    }

    /// Inbound frame. The bare text `"ping"` is answered with the fixed
    /// pong envelope; everything else goes to the message hook when set, or
    /// to the default echo + broadcast-all.
    pub fn on_message(&self, client_id: &str, message: &str) {
        let Some(client) = self.get_client(client_id) else {
            warn!("Message from unknown client {}", client_id);
            return;
        };

        if message == types::PING {
            let pong = Envelope::bare(types::PONG, json!({ "message": "pong" }));
            if let Ok(bytes) = serde_json::to_vec(&pong) {
                if let Err(err) = client.send_bytes(&bytes) {
                    debug!("Pong to {} failed: {}", client_id, err);
                }
            }
            return;
        }

        if let Some(hook) = &self.hooks.message {
            hook(&client, message);
            return;
        }

        let payload = Payload::new(
            types::CLIENT_MESSAGE_RECEIVED,
            json!({ "message": message }),
        );
        let _ = client.send(payload.clone(), MessageOptions::default());
        if let Err(err) = self.broadcast_all(payload) {
            debug!("Broadcast of received message skipped: {}", err);
        }
    }

    /// Connection closed: run the close hook, evacuate the client from
    /// every channel, then drop it from the registry.
    pub fn on_close(&self, client_id: &str, code: u16, reason: &str) {
        if self.debug {
            debug!(
                "Connection closed: {} (code {}, reason {:?})",
                client_id, code, reason
            );
        }

        if let Some(hook) = &self.hooks.close {
            hook(client_id, code, reason);
        }

        let Some(client) = self.get_client(client_id) else {
            return;
        };
        client.mark_disconnecting();

        // Evacuation before registry removal; remove_member is idempotent
        // on channels the client never joined.
        let channels = self.get_channels();
        for channel in channels {
            let _ = channel.remove_member(client_id, RemoveMemberOptions { notify: false });
        }

        self.clients.write().remove(client_id);
        client.mark_disconnected();
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubOptions::default())
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("channels", &self.channel_count())
            .field("clients", &self.client_count())
            .field("server_bound", &self.server.is_bound())
            .finish()
    }
}
