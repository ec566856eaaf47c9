//! Shared test doubles: a recording per-connection transport and a
//! recording pub/sub server.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use wshub::{ClientOps, EntityIdentity, Hub, PubSubServer, Transport, TransportError};

/// Records every frame and topic operation; failure modes are switchable
/// per test.
pub struct RecordingTransport {
    identity: EntityIdentity,
    pub frames: Mutex<Vec<Vec<u8>>>,
    pub topics: Mutex<Vec<String>>,
    pub closed: AtomicBool,
    pub fail_sends: AtomicBool,
    pub fail_subscribe: AtomicBool,
}

impl RecordingTransport {
    pub fn new(id: &str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            identity: EntityIdentity::new(id, name),
            frames: Mutex::new(Vec::new()),
            topics: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn frames_json(&self) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).expect("frame is not valid JSON"))
            .collect()
    }

    pub fn last_json(&self) -> Option<Value> {
        self.frames
            .lock()
            .last()
            .map(|bytes| serde_json::from_slice(bytes).expect("frame is not valid JSON"))
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.topics.lock().clone()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Other("send refused".to_string()));
        }
        self.frames.lock().push(bytes.to_vec());
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::Other("subscribe refused".to_string()));
        }
        self.topics.lock().push(topic.to_string());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.topics.lock().retain(|t| t != topic);
        Ok(())
    }

    fn publish(&self, _topic: &str, _bytes: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    fn close(&self, _code: Option<u16>, _reason: Option<&str>) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn identity(&self) -> EntityIdentity {
        self.identity.clone()
    }
}

/// Records every topic publish.
#[derive(Default)]
pub struct RecordingServer {
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().len()
    }

    pub fn published_json(&self) -> Vec<(String, Value)> {
        self.published
            .lock()
            .iter()
            .map(|(topic, bytes)| {
                (
                    topic.clone(),
                    serde_json::from_slice(bytes).expect("publish is not valid JSON"),
                )
            })
            .collect()
    }
}

impl PubSubServer for RecordingServer {
    fn publish(&self, topic: &str, bytes: &[u8]) -> Result<(), TransportError> {
        self.published.lock().push((topic.to_string(), bytes.to_vec()));
        Ok(())
    }
}

/// Open a connection on the hub, returning both the raw transport (for
/// frame assertions) and the registered client.
pub fn connect(hub: &Hub, id: &str, name: &str) -> (Arc<RecordingTransport>, Arc<dyn ClientOps>) {
    let transport = RecordingTransport::new(id, name);
    let client = hub.on_open(transport.clone()).expect("on_open failed");
    (transport, client)
}
