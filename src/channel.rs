//! Named channels: membership authority and broadcast fan-out
//!
//! A channel owns a bounded member set. The capacity check and the insertion
//! share one critical section, and every step after the insertion can roll
//! the join back, so membership and transport subscriptions never drift
//! apart.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, warn};

use crate::client::ClientOps;
use crate::error::{Error, Result};
use crate::message::{types, MessageBuilder, MessageOptions, MetadataSelection, Payload};
use crate::transport::ServerHandle;

/// Member limit applied when a channel is created without one.
pub const DEFAULT_CHANNEL_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct AddMemberOptions {
    /// Send the joining client a join notification.
    pub notify: bool,
    /// Send the requester a one-shot `error` envelope when the channel is
    /// full.
    pub notify_when_full: bool,
}

impl Default for AddMemberOptions {
    fn default() -> Self {
        Self {
            notify: true,
            notify_when_full: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RemoveMemberOptions {
    /// Send the removed client a leave notification.
    pub notify: bool,
}

impl Default for RemoveMemberOptions {
    fn default() -> Self {
        Self { notify: true }
    }
}

/// Outcome of a join attempt. Expected failures are variants, not errors.
pub enum AddMemberOutcome {
    Added(Arc<dyn ClientOps>),
    AlreadyMember,
    Full,
    Failed(Error),
}

impl AddMemberOutcome {
    pub fn is_added(&self) -> bool {
        matches!(self, AddMemberOutcome::Added(_))
    }

    /// Stable reason tag for non-added outcomes.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            AddMemberOutcome::Added(_) => None,
            AddMemberOutcome::AlreadyMember => Some("already_member"),
            AddMemberOutcome::Full => Some("full"),
            AddMemberOutcome::Failed(_) => Some("error"),
        }
    }
}

impl std::fmt::Debug for AddMemberOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddMemberOutcome::Added(client) => f.debug_tuple("Added").field(&client.id()).finish(),
            AddMemberOutcome::AlreadyMember => f.write_str("AlreadyMember"),
            AddMemberOutcome::Full => f.write_str("Full"),
            AddMemberOutcome::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

/// The capability set the hub and clients depend on. Variants supplied via
/// `HubOptions::channel_factory` implement this trait.
pub trait ChannelOps: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn limit(&self) -> usize;
    fn created_at(&self) -> DateTime<Utc>;

    fn size(&self) -> usize;
    fn can_add_member(&self) -> bool;
    fn has_member(&self, client_id: &str) -> bool;
    fn get_member(&self, client_id: &str) -> Option<Arc<dyn ClientOps>>;
    fn members(&self) -> Vec<Arc<dyn ClientOps>>;

    fn add_member(&self, client: Arc<dyn ClientOps>, options: AddMemberOptions)
        -> AddMemberOutcome;
    fn remove_member(
        &self,
        client_id: &str,
        options: RemoveMemberOptions,
    ) -> Option<Arc<dyn ClientOps>>;

    /// Deliver a payload to the channel: one topic publish on the fast path,
    /// or per-recipient writes when `options.exclude_clients` filters.
    fn broadcast(&self, payload: Payload, options: MessageOptions) -> Result<()>;

    fn metadata(&self) -> BTreeMap<String, String>;
    fn get_metadata(&self, key: &str) -> Option<String>;
    fn set_metadata(&self, key: &str, value: &str);

    /// Evacuate every member with notification, then clear.
    fn delete(&self);
}

struct ChannelInner {
    members: HashMap<String, Arc<dyn ClientOps>>,
    metadata: BTreeMap<String, String>,
}

/// A named pub/sub topic with a bounded member set. The id doubles as the
/// transport topic and is stable for the channel's lifetime.
pub struct Channel {
    id: String,
    name: String,
    limit: usize,
    created_at: DateTime<Utc>,
    server: ServerHandle,
    weak: Weak<Channel>,
    inner: Mutex<ChannelInner>,
}

impl Channel {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        limit: usize,
        server: ServerHandle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id: id.into(),
            name: name.into(),
            limit,
            created_at: Utc::now(),
            server,
            weak: weak.clone(),
            inner: Mutex::new(ChannelInner {
                members: HashMap::new(),
                metadata: BTreeMap::new(),
            }),
        })
    }

    /// Members passing the filter.
    pub fn members_where<F>(&self, filter: F) -> Vec<Arc<dyn ClientOps>>
    where
        F: Fn(&Arc<dyn ClientOps>) -> bool,
    {
        self.inner
            .lock()
            .members
            .values()
            .filter(|member| filter(member))
            .cloned()
            .collect()
    }

    fn notify_full(&self, client: &Arc<dyn ClientOps>) {
        let payload = Payload::new(
            types::ERROR,
            json!({
                "code": "CHANNEL_FULL",
                "channel": self.id,
                "message": format!("Channel \"{}\" is full ({} members)", self.id, self.limit),
            }),
        )
        .with_channel(self.id.clone());
        let _ = client.send(payload, MessageOptions::default());
    }

    /// Undo a partially-completed join: membership, subscription, and the
    /// client-side back-reference.
    fn evict(&self, client: &Arc<dyn ClientOps>) {
        let _ = self.inner.lock().members.remove(client.id());
        if let Err(err) = client.unsubscribe(&self.id) {
            debug!(
                "Rollback unsubscribe of {} from \"{}\" failed: {}",
                client.id(),
                self.id,
                err
            );
        }
        client.untrack_channel(&self.id);
    }
}

impl ChannelOps for Channel {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn limit(&self) -> usize {
        self.limit
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn size(&self) -> usize {
        self.inner.lock().members.len()
    }

    fn can_add_member(&self) -> bool {
        self.size() < self.limit
    }

    fn has_member(&self, client_id: &str) -> bool {
        self.inner.lock().members.contains_key(client_id)
    }

    fn get_member(&self, client_id: &str) -> Option<Arc<dyn ClientOps>> {
        self.inner.lock().members.get(client_id).cloned()
    }

    fn members(&self) -> Vec<Arc<dyn ClientOps>> {
        self.inner.lock().members.values().cloned().collect()
    }

    fn add_member(
        &self,
        client: Arc<dyn ClientOps>,
        options: AddMemberOptions,
    ) -> AddMemberOutcome {
        {
            // Capacity check and insertion form one critical section; two
            // concurrent joins cannot both pass the check.
            let mut inner = self.inner.lock();
            if inner.members.contains_key(client.id()) {
                return AddMemberOutcome::AlreadyMember;
            }
            if inner.members.len() >= self.limit {
                drop(inner);
                if options.notify_when_full {
                    self.notify_full(&client);
                }
                return AddMemberOutcome::Full;
            }
            inner.members.insert(client.id().to_string(), client.clone());
        }

        // Without the subscription the member would never see topic
        // publishes, so a failure here rolls the insertion back.
        if let Err(err) = client.subscribe(&self.id) {
            warn!(
                "Subscribe of {} to \"{}\" failed, rolling back join: {}",
                client.id(),
                self.id,
                err
            );
            self.evict(&client);
            return AddMemberOutcome::Failed(err.into());
        }

        if let Some(this) = self.weak.upgrade() {
            client.track_channel(this);
        }

        if options.notify {
            let payload = Payload::new(
                types::CLIENT_JOIN_CHANNEL,
                json!({
                    "message": format!("Joined channel \"{}\"", self.name),
                    "channel": self.id,
                }),
            )
            .with_channel(self.id.clone());
            if let Err(err) = client.send(payload, MessageOptions::default()) {
                self.evict(&client);
                return AddMemberOutcome::Failed(err);
            }
        }

        AddMemberOutcome::Added(client)
    }

    fn remove_member(
        &self,
        client_id: &str,
        options: RemoveMemberOptions,
    ) -> Option<Arc<dyn ClientOps>> {
        let removed = self.inner.lock().members.remove(client_id)?;
        if let Err(err) = removed.unsubscribe(&self.id) {
            debug!(
                "Unsubscribe of {} from \"{}\" failed: {}",
                client_id, self.id, err
            );
        }
        removed.untrack_channel(&self.id);
        if options.notify {
            let payload = Payload::new(
                types::CLIENT_LEAVE_CHANNEL,
                json!({
                    "message": format!("Left channel \"{}\"", self.name),
                    "channel": self.id,
                }),
            )
            .with_channel(self.id.clone());
            let _ = removed.send(payload, MessageOptions::default());
        }
        Some(removed)
    }

    fn broadcast(&self, payload: Payload, options: MessageOptions) -> Result<()> {
        let mut payload = payload;
        payload.channel = Some(self.id.clone());

        let mut envelope = MessageBuilder::build(&payload, &options);
        if let Some(selection) = &options.include_metadata {
            let metadata = self.metadata();
            envelope.metadata = Some(match selection {
                MetadataSelection::All => metadata,
                MetadataSelection::Keys(keys) => keys
                    .iter()
                    .filter_map(|key| metadata.get(key).map(|value| (key.clone(), value.clone())))
                    .collect(),
            });
        }
        let bytes = MessageBuilder::serialize(&envelope, options.transform.as_ref())?;

        if options.exclude_clients.is_empty() {
            // Fast path: one topic publish reaches every subscribed member.
            return self.server.publish(&self.id, &bytes);
        }

        let excluded: HashSet<&str> = options.exclude_clients.iter().map(String::as_str).collect();
        let members = self.members();
        for member in &members {
            if excluded.contains(member.id()) {
                continue;
            }
            if let Err(err) = member.send_bytes(&bytes) {
                warn!(
                    "Broadcast on \"{}\" failed for {}: {}",
                    self.id,
                    member.id(),
                    err
                );
            }
        }
        Ok(())
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.inner.lock().metadata.clone()
    }

    fn get_metadata(&self, key: &str) -> Option<String> {
        self.inner.lock().metadata.get(key).cloned()
    }

    fn set_metadata(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .metadata
            .insert(key.to_string(), value.to_string());
    }

    fn delete(&self) {
        let member_ids: Vec<String> = self.inner.lock().members.keys().cloned().collect();
        for member_id in member_ids {
            let _ = self.remove_member(&member_id, RemoveMemberOptions { notify: true });
        }
        self.inner.lock().metadata.clear();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("limit", &self.limit)
            .field("size", &self.size())
            .finish()
    }
}
