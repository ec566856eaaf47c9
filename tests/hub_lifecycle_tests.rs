//! Hub lifecycle tests
//! Connect, heartbeat, message handling, and disconnect evacuation

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use common::{connect, RecordingServer};
use wshub::{
    Channel, ChannelOps, ChannelSettings, Client, ClientOps, ConnectionState, Hooks, Hub,
    HubOptions, MessageOptions, Payload, Transport, GLOBAL_CHANNEL_ID,
};

#[test]
fn test_connect_sends_welcome_and_joins_global() {
    let hub = Hub::default();
    let (transport, client) = connect(&hub, "u1", "A");

    let frames = transport.frames_json();
    assert_eq!(frames.len(), 2, "expected welcome + join notification");
    assert_eq!(frames[0]["type"], json!("client.connected"));
    assert_eq!(frames[0]["content"]["message"], json!("Welcome to the server"));
    assert_eq!(
        frames[0]["content"]["client"],
        json!({ "id": "u1", "name": "A" })
    );
    assert_eq!(frames[1]["type"], json!("client.join.channel"));

    let global = hub.get_channel(GLOBAL_CHANNEL_ID).unwrap();
    assert!(global.has_member("u1"));
    assert!(client.tracks_channel(GLOBAL_CHANNEL_ID));
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(hub.client_count(), 1);
    assert_eq!(transport.subscribed_topics(), [GLOBAL_CHANNEL_ID]);
}

#[test]
fn test_heartbeat_answers_with_exact_pong_bytes() {
    let hub = Hub::default();
    let (transport, _client) = connect(&hub, "u1", "A");
    transport.frames.lock().clear();

    hub.on_message("u1", "ping");

    let frames = transport.frames.lock();
    assert_eq!(frames.len(), 1);
    assert_eq!(
        frames[0].as_slice(),
        br#"{"type":"pong","content":{"message":"pong"}}"#
    );
}

#[test]
fn test_default_message_handler_echoes_and_broadcasts() {
    let hub = Hub::default();
    let server = RecordingServer::new();
    hub.set_transport_server(server.clone());
    let (transport, _client) = connect(&hub, "u1", "A");
    transport.frames.lock().clear();

    hub.on_message("u1", "hello everyone");

    let frames = transport.frames_json();
    assert_eq!(frames.len(), 1, "expected the echo frame");
    assert_eq!(frames[0]["type"], json!("client.message.received"));
    assert_eq!(frames[0]["content"]["message"], json!("hello everyone"));

    let published = server.published_json();
    assert_eq!(published.len(), 1, "expected one publish per channel");
    assert_eq!(published[0].0, GLOBAL_CHANNEL_ID);
    assert_eq!(published[0].1["type"], json!("client.message.received"));
}

#[test]
fn test_message_hook_replaces_default_handling() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let hub = Hub::new(HubOptions {
        hooks: Hooks {
            message: Some(Arc::new(move |client, message| {
                recorder.lock().push(format!("{}:{}", client.id(), message));
            })),
            ..Default::default()
        },
        ..Default::default()
    });
    let (transport, _client) = connect(&hub, "u1", "A");
    transport.frames.lock().clear();

    hub.on_message("u1", "custom");

    assert_eq!(seen.lock().as_slice(), ["u1:custom"]);
    assert_eq!(transport.frame_count(), 0, "default echo must not run");
}

#[test]
fn test_message_hook_does_not_intercept_heartbeat() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let hub = Hub::new(HubOptions {
        hooks: Hooks {
            message: Some(Arc::new(move |_client, message| {
                recorder.lock().push(message.to_string());
            })),
            ..Default::default()
        },
        ..Default::default()
    });
    let (transport, _client) = connect(&hub, "u1", "A");
    transport.frames.lock().clear();

    hub.on_message("u1", "ping");

    assert!(seen.lock().is_empty());
    assert_eq!(transport.frame_count(), 1);
}

#[test]
fn test_open_hook_runs_after_default_open_work() {
    // By the time the hook runs, the welcome and global join are done, so
    // the client it observes already tracks the global channel.
    let joined: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = joined.clone();
    let hub = Hub::new(HubOptions {
        hooks: Hooks {
            open: Some(Arc::new(move |client| {
                recorder.lock().push(client.tracks_channel(GLOBAL_CHANNEL_ID));
            })),
            ..Default::default()
        },
        ..Default::default()
    });

    let (_transport, _client) = connect(&hub, "u1", "A");

    assert_eq!(joined.lock().as_slice(), [true]);
}

#[test]
fn test_close_hook_receives_code_and_reason() {
    let seen: Arc<Mutex<Vec<(String, u16, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let hub = Hub::new(HubOptions {
        hooks: Hooks {
            close: Some(Arc::new(move |client_id, code, reason| {
                recorder
                    .lock()
                    .push((client_id.to_string(), code, reason.to_string()));
            })),
            ..Default::default()
        },
        ..Default::default()
    });
    let (_transport, _client) = connect(&hub, "u1", "A");

    hub.on_close("u1", 4001, "kicked");

    assert_eq!(
        seen.lock().as_slice(),
        [("u1".to_string(), 4001, "kicked".to_string())]
    );
}

#[test]
fn test_disconnect_evacuates_all_channels() {
    let hub = Hub::default();
    hub.create_channel("c1", "One", Some(5));
    hub.create_channel("c2", "Two", Some(5));
    let (transport, client) = connect(&hub, "u1", "A");
    assert!(hub.join("c1", "u1").unwrap().is_added());
    assert!(hub.join("c2", "u1").unwrap().is_added());

    hub.on_close("u1", 1000, "");

    assert!(!hub.get_channel("c1").unwrap().has_member("u1"));
    assert!(!hub.get_channel("c2").unwrap().has_member("u1"));
    assert!(!hub.get_channel(GLOBAL_CHANNEL_ID).unwrap().has_member("u1"));
    assert!(hub.get_client("u1").is_none());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.channel_ids().is_empty());
    assert!(transport.subscribed_topics().is_empty());

    // A later filtered broadcast must not reach the departed client.
    let before = transport.frame_count();
    let channel = hub.get_channel("c1").unwrap();
    channel
        .broadcast(
            Payload::new("message", json!({ "message": "after" })),
            MessageOptions {
                exclude_clients: vec!["nobody".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(transport.frame_count(), before);
}

#[test]
fn test_sends_after_disconnect_are_noops() {
    let hub = Hub::default();
    let (transport, client) = connect(&hub, "u1", "A");
    hub.on_close("u1", 1000, "");

    let before = transport.frame_count();
    client
        .send(
            Payload::new("message", json!({ "message": "ghost" })),
            MessageOptions::default(),
        )
        .unwrap();
    assert_eq!(transport.frame_count(), before);
}

#[test]
fn test_close_for_unknown_client_is_harmless() {
    let hub = Hub::default();
    hub.on_close("stranger", 1006, "gone");
    assert_eq!(hub.client_count(), 0);
}

#[test]
fn test_hub_broadcast_publishes_envelope_shape() {
    let hub = Hub::default();
    let server = RecordingServer::new();
    hub.set_transport_server(server.clone());

    hub.broadcast(GLOBAL_CHANNEL_ID, "hello").unwrap();

    let published = server.published_json();
    assert_eq!(published.len(), 1);
    let (topic, envelope) = &published[0];
    assert_eq!(topic, GLOBAL_CHANNEL_ID);
    assert_eq!(envelope["type"], json!("message"));
    assert_eq!(envelope["channel"], json!(GLOBAL_CHANNEL_ID));
    assert_eq!(envelope["content"]["message"], json!("hello"));
}

#[test]
fn test_broadcast_all_reaches_every_channel() {
    let hub = Hub::default();
    let server = RecordingServer::new();
    hub.set_transport_server(server.clone());
    hub.create_channel("c1", "One", None);
    hub.create_channel("c2", "Two", None);

    hub.broadcast_all("fanout").unwrap();

    let mut topics: Vec<String> = server
        .published_json()
        .into_iter()
        .map(|(topic, _)| topic)
        .collect();
    topics.sort();
    assert_eq!(topics, ["c1", "c2", GLOBAL_CHANNEL_ID]);
}

#[test]
fn test_channel_factory_constructs_variants() {
    let created: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = created.clone();
    let hub = Hub::new(HubOptions {
        channel_factory: Some(Arc::new(
            move |settings: ChannelSettings| -> Arc<dyn ChannelOps> {
                recorder.lock().push(settings.id.clone());
                Channel::new(settings.id, settings.name, settings.limit, settings.server)
            },
        )),
        ..Default::default()
    });

    hub.create_channel("room", "Room", None);

    assert_eq!(
        created.lock().as_slice(),
        [GLOBAL_CHANNEL_ID.to_string(), "room".to_string()]
    );
}

#[test]
fn test_client_factory_constructs_variants() {
    let created: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = created.clone();
    let hub = Hub::new(HubOptions {
        client_factory: Some(Arc::new(
            move |transport: Arc<dyn Transport>| -> Arc<dyn ClientOps> {
                recorder.lock().push(transport.identity().id);
                Client::new(transport)
            },
        )),
        ..Default::default()
    });

    let (_transport, _client) = connect(&hub, "u1", "A");

    assert_eq!(created.lock().as_slice(), ["u1"]);
}

#[test]
fn test_remove_channel_evacuates_members() {
    let hub = Hub::default();
    hub.create_channel("room", "Room", Some(5));
    let (_transport, client) = connect(&hub, "u1", "A");
    assert!(hub.join("room", "u1").unwrap().is_added());

    let removed = hub.remove_channel("room");
    assert!(removed.is_some());
    assert!(hub.get_channel("room").is_none());
    assert!(!client.tracks_channel("room"));
}
