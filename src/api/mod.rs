//! WebSocket server surface
//!
//! Binds the hub core to real sockets: an axum upgrade endpoint, a
//! per-connection transport over a bounded outbound queue, and an in-process
//! pub/sub router implementing the shared publish side.

pub mod server;
pub mod ws;

pub use server::{run_server, AppState, SharedState};
pub use ws::{Frame, WsRouter, WsTransport};
