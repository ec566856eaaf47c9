//! Reserved message types
//!
//! Stable string identifiers carried in the `type` field of wire envelopes.

pub const CLIENT_CONNECTED: &str = "client.connected";
pub const CLIENT_DISCONNECTED: &str = "client.disconnected";
pub const CLIENT_JOIN_CHANNEL: &str = "client.join.channel";
pub const CLIENT_LEAVE_CHANNEL: &str = "client.leave.channel";
pub const CLIENT_JOIN_CHANNELS: &str = "client.join.channels";
pub const CLIENT_LEAVE_CHANNELS: &str = "client.leave.channels";
pub const CLIENT_MESSAGE_RECEIVED: &str = "client.message.received";
pub const PING: &str = "ping";
pub const PONG: &str = "pong";
pub const MESSAGE: &str = "message";
pub const WHISPER: &str = "whisper";
pub const BROADCAST: &str = "broadcast";
pub const PROMPT: &str = "prompt";
pub const ERROR: &str = "error";
pub const SYSTEM: &str = "system";
