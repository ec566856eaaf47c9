//! WebSocket transport binding
//!
//! Each connection gets a bounded outbound queue drained by a writer task;
//! the hub side only ever enqueues, so no lock is ever held across socket
//! I/O. Topic fan-out walks a subscriber map with non-blocking sends and
//! drops frames for connections that cannot keep up.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::identity::EntityIdentity;
use crate::transport::{PubSubServer, Transport, TransportError};

use super::server::SharedState;

/// Outbound frames queued per connection.
const OUTBOUND_QUEUE: usize = 64;

/// Normal-closure code used when the peer closes without one.
const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, Clone)]
pub enum Frame {
    Data(Vec<u8>),
    Close(Option<u16>, Option<String>),
}

/// In-process pub/sub router: topic → subscribed connection queues.
#[derive(Default)]
pub struct WsRouter {
    topics: RwLock<HashMap<String, HashMap<String, mpsc::Sender<Frame>>>>,
}

impl WsRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, topic: &str, client_id: &str, tx: mpsc::Sender<Frame>) {
        self.topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .insert(client_id.to_string(), tx);
    }

    pub fn deregister(&self, topic: &str, client_id: &str) {
        let mut topics = self.topics.write();
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.remove(client_id);
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Remove a connection from every topic.
    pub fn drop_client(&self, client_id: &str) {
        let mut topics = self.topics.write();
        for subscribers in topics.values_mut() {
            subscribers.remove(client_id);
        }
        topics.retain(|_, subscribers| !subscribers.is_empty());
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    fn fan_out(&self, topic: &str, bytes: &[u8]) {
        let targets: Vec<(String, mpsc::Sender<Frame>)> = {
            let topics = self.topics.read();
            match topics.get(topic) {
                Some(subscribers) => subscribers
                    .iter()
                    .map(|(id, tx)| (id.clone(), tx.clone()))
                    .collect(),
                None => return,
            }
        };
        let mut closed: Vec<String> = Vec::new();
        for (client_id, tx) in targets {
            match tx.try_send(Frame::Data(bytes.to_vec())) {
                Ok(()) => {}
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        "Pruning closed subscriber {} from \"{}\"",
                        client_id, topic
                    );
                    closed.push(client_id);
                }
                Err(TrySendError::Full(_)) => {
                    debug!(
                        "Dropping publish on \"{}\" for {}: queue full",
                        topic, client_id
                    );
                }
            }
        }
        for client_id in closed {
            self.deregister(topic, &client_id);
        }
    }
}

impl PubSubServer for WsRouter {
    fn publish(&self, topic: &str, bytes: &[u8]) -> Result<(), TransportError> {
        self.fan_out(topic, bytes);
        Ok(())
    }
}

/// Per-connection transport handle: writes enqueue into the connection's
/// outbound queue, topic membership registers against the shared router.
pub struct WsTransport {
    identity: EntityIdentity,
    tx: mpsc::Sender<Frame>,
    router: Arc<WsRouter>,
}

impl WsTransport {
    pub fn new(identity: EntityIdentity, tx: mpsc::Sender<Frame>, router: Arc<WsRouter>) -> Self {
        Self {
            identity,
            tx,
            router,
        }
    }
}

impl Transport for WsTransport {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.tx
            .try_send(Frame::Data(bytes.to_vec()))
            .map_err(|err| match err {
                TrySendError::Closed(_) => TransportError::Closed,
                TrySendError::Full(_) => TransportError::Backpressure,
            })
    }

    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.router
            .register(topic, &self.identity.id, self.tx.clone());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.router.deregister(topic, &self.identity.id);
        Ok(())
    }

    fn publish(&self, topic: &str, bytes: &[u8]) -> Result<(), TransportError> {
        self.router.fan_out(topic, bytes);
        Ok(())
    }

    fn close(&self, code: Option<u16>, reason: Option<&str>) {
        let _ = self
            .tx
            .try_send(Frame::Close(code, reason.map(str::to_string)));
    }

    fn identity(&self) -> EntityIdentity {
        self.identity.clone()
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    id: Option<String>,
    name: Option<String>,
}

/// Handle WebSocket upgrade requests. Identity comes from the `id`/`name`
/// query parameters, with a generated id for anonymous connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let identity = EntityIdentity::new(
        query.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        query.name.unwrap_or_else(|| "Anonymous".to_string()),
    );
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

async fn handle_socket(socket: WebSocket, state: SharedState, identity: EntityIdentity) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);

    let transport = Arc::new(WsTransport::new(
        identity.clone(),
        tx,
        state.router.clone(),
    ));
    if let Err(err) = state.hub.on_open(transport) {
        error!("Failed to open connection for {}: {}", identity, err);
        return;
    }
    info!("Client {} connected", identity);

    // Writer task: the only owner of the socket sink.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                Frame::Data(bytes) => {
                    let text = match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(err) => {
                            debug!("Skipping non-UTF-8 outbound frame: {}", err);
                            continue;
                        }
                    };
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Frame::Close(code, reason) => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: code.unwrap_or(CLOSE_NORMAL),
                            reason: reason.unwrap_or_default().into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let mut close_code = CLOSE_NORMAL;
    let mut close_reason = String::new();
    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Text(text) => state.hub.on_message(&identity.id, &text),
            Message::Binary(_) => debug!("Ignoring binary frame from {}", identity.id),
            Message::Close(frame) => {
                if let Some(frame) = frame {
                    close_code = frame.code;
                    close_reason = frame.reason.to_string();
                }
                break;
            }
            _ => {}
        }
    }

    info!("Client {} closed (code {})", identity, close_code);
    state.hub.on_close(&identity.id, close_code, &close_reason);
    state.router.drop_client(&identity.id);
    writer.abort();
}
