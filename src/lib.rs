//! wshub - WebSocket pub/sub hub
//!
//! A connection-oriented messaging runtime: connected clients are grouped
//! into bounded named channels and receive structured JSON envelopes via
//! topic publishes or per-recipient filtered writes. The core is transport
//! abstracted; the `api` module binds it to real WebSockets.

pub mod api;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod identity;
pub mod message;
pub mod transport;

pub use channel::{
    AddMemberOptions, AddMemberOutcome, Channel, ChannelOps, RemoveMemberOptions,
    DEFAULT_CHANNEL_LIMIT,
};
pub use client::{Client, ClientOps, ConnectionInfo, ConnectionState};
pub use config::Config;
pub use error::{Error, Result};
pub use hub::{
    ChannelSeed, ChannelSettings, Hooks, Hub, HubOptions, GLOBAL_CHANNEL_ID, GLOBAL_CHANNEL_LIMIT,
};
pub use identity::EntityIdentity;
pub use message::{Envelope, MessageBuilder, MessageOptions, MetadataSelection, Payload};
pub use transport::{PubSubServer, ServerHandle, Transport, TransportError};
