use super::{Router, Transition};
use crate::bridge::{Bridge, MemoryBus, PubSubBus};
use crate::config::{BusSettings, JobSettings};
use crate::connection::Session;
use crate::files::UploadDir;
use crate::hub::Hub;
use crate::jobs::{JobOutcome, JobRunner};
use crate::llm::{ChatBackend, ChatMessage};
use crate::transport::message::{Envelope, Frame};
use crate::utils::error::LlmError;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::Receiver;

#[derive(Default)]
struct RecordingBackend {
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

#[async_trait]
impl ChatBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, messages: &[ChatMessage], _: Option<&str>) -> Result<String, LlmError> {
        self.prompts.lock().push(messages.to_vec());
        Ok("hi there".to_string())
    }
}

struct Fixture {
    hub: Arc<Hub>,
    router: Router,
    bus: Arc<MemoryBus>,
    backend: Arc<RecordingBackend>,
    _uploads: TempDir,
}

fn fixture() -> Fixture {
    let uploads = tempfile::tempdir().unwrap();
    std::fs::write(uploads.path().join("sales.csv"), "year,total\n2024,12\n").unwrap();
    std::fs::write(uploads.path().join("other.csv"), "a,b\n").unwrap();

    let bus = Arc::new(MemoryBus::default());
    let bridge = Arc::new(Bridge::new(bus.clone(), &BusSettings::default()));
    let hub = Arc::new(Hub::with_capacity(16).with_bridge(bridge));
    let backend = Arc::new(RecordingBackend::default());
    let files = Arc::new(UploadDir::new(uploads.path()));
    let jobs = JobRunner::new(hub.clone(), backend.clone(), files.clone(), JobSettings::default());

    Fixture {
        router: Router::new(hub.clone(), jobs, files),
        hub,
        bus,
        backend,
        _uploads: uploads,
    }
}

fn connect(hub: &Hub, user: &str) -> (Session, Receiver<Frame>) {
    let (id, rx) = hub.register(Some(user.to_string())).unwrap();
    (Session::new(id, Some(user.to_string())), rx)
}

fn drain(rx: &mut Receiver<Frame>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(serde_json::from_str(&frame).unwrap());
    }
    frames
}

fn types(frames: &[Value]) -> Vec<&str> {
    frames.iter().map(|f| f["type"].as_str().unwrap()).collect()
}

async fn send(router: &Router, session: &mut Session, frame: Value) -> Transition {
    router.route_text(session, &frame.to_string()).await
}

#[tokio::test]
async fn test_ping_answers_only_the_sender() {
    let f = fixture();
    let (mut a, mut rx_a) = connect(&f.hub, "alice");
    let (_b, mut rx_b) = connect(&f.hub, "bob");

    let transition = send(&f.router, &mut a, json!({"type": "ping"})).await;
    assert!(matches!(transition, Transition::Pong));

    let frames = drain(&mut rx_a);
    assert_eq!(types(&frames), ["pong"]);
    assert!(frames[0]["timestamp"].is_string());
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test]
async fn test_subscribe_and_unsubscribe() {
    let f = fixture();
    let (mut a, mut rx_a) = connect(&f.hub, "alice");

    let t = send(&f.router, &mut a, json!({"type": "subscribe", "channel": "room1"})).await;
    assert!(matches!(t, Transition::Subscribed(ref c) if c == "room1"));
    let t = send(
        &f.router,
        &mut a,
        json!({"type": "subscribe", "payload": {"channel": "room2"}}),
    )
    .await;
    assert!(matches!(t, Transition::Subscribed(ref c) if c == "room2"));
    assert_eq!(f.hub.subscribers("room1"), vec![a.id.clone()]);
    assert_eq!(f.hub.subscribers("room2"), vec![a.id.clone()]);

    send(&f.router, &mut a, json!({"type": "unsubscribe", "channel": "room1"})).await;
    assert!(!f.hub.topic_exists("room1"));

    // subscription changes are silent
    assert!(drain(&mut rx_a).is_empty());
}

#[tokio::test]
async fn test_subscribe_without_channel_is_rejected() {
    let f = fixture();
    let (mut a, mut rx_a) = connect(&f.hub, "alice");

    let t = send(&f.router, &mut a, json!({"type": "subscribe"})).await;
    assert!(matches!(t, Transition::Rejected(_)));

    let frames = drain(&mut rx_a);
    assert_eq!(types(&frames), ["error"]);
    assert_eq!(frames[0]["payload"]["error"], "channel is required");
    assert_eq!(frames[0]["payload"]["request_type"], "subscribe");
}

#[tokio::test]
async fn test_chat_without_content_is_rejected_without_job() {
    let f = fixture();
    let (mut a, mut rx_a) = connect(&f.hub, "alice");
    let (mut b, mut rx_b) = connect(&f.hub, "bob");
    send(&f.router, &mut a, json!({"type": "subscribe", "channel": "room1"})).await;
    send(&f.router, &mut b, json!({"type": "subscribe", "channel": "room1"})).await;

    let t = send(&f.router, &mut a, json!({"type": "chat_message", "payload": {}})).await;
    assert!(matches!(t, Transition::Rejected(_)));

    let frames = drain(&mut rx_a);
    assert_eq!(types(&frames), ["chat_error"]);
    assert_eq!(frames[0]["payload"]["error"], "content is required");
    assert!(drain(&mut rx_b).is_empty());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(f.backend.prompts.lock().is_empty());
    assert!(drain(&mut rx_a).is_empty());
}

#[tokio::test]
async fn test_load_dataset_without_filename_is_rejected() {
    let f = fixture();
    let (mut a, mut rx_a) = connect(&f.hub, "alice");

    let t = send(&f.router, &mut a, json!({"type": "load_dataset", "payload": {}})).await;
    assert!(matches!(t, Transition::Rejected(_)));
    assert_eq!(types(&drain(&mut rx_a)), ["load_dataset_error"]);
    assert_eq!(a.selected_dataset(), None);
}

#[tokio::test]
async fn test_load_missing_dataset_keeps_previous_selection() {
    let f = fixture();
    let (mut a, mut rx_a) = connect(&f.hub, "alice");

    let t = send(
        &f.router,
        &mut a,
        json!({"type": "load_dataset", "payload": {"filename": "sales.csv"}}),
    )
    .await;
    assert!(matches!(t, Transition::DatasetLoaded(_)));

    let t = send(
        &f.router,
        &mut a,
        json!({"type": "load_dataset", "payload": {"filename": "foo.csv"}}),
    )
    .await;
    assert!(matches!(t, Transition::DatasetRejected(ref name) if name == "foo.csv"));
    assert_eq!(a.selected_dataset(), Some("sales.csv"));

    let frames = drain(&mut rx_a);
    assert_eq!(types(&frames), ["load_dataset_success", "load_dataset_error"]);
    assert!(frames[0]["payload"]["message"]
        .as_str()
        .unwrap()
        .contains("Loaded dataset: sales.csv"));
    assert_eq!(frames[1]["payload"]["filename"], "foo.csv");
}

#[tokio::test]
async fn test_messages_are_handled_in_order() {
    let f = fixture();
    let (mut a, mut rx_a) = connect(&f.hub, "alice");

    send(&f.router, &mut a, json!({"type": "ping"})).await;
    send(
        &f.router,
        &mut a,
        json!({"type": "load_dataset", "payload": {"filename": "sales.csv"}}),
    )
    .await;
    send(&f.router, &mut a, json!({"type": "load_dataset", "payload": {}})).await;
    send(
        &f.router,
        &mut a,
        json!({"type": "load_dataset", "payload": {"filename": "other.csv"}}),
    )
    .await;
    send(&f.router, &mut a, json!({"type": "ping"})).await;

    assert_eq!(
        types(&drain(&mut rx_a)),
        [
            "pong",
            "load_dataset_success",
            "load_dataset_error",
            "load_dataset_success",
            "pong"
        ]
    );
    assert_eq!(a.selected_dataset(), Some("other.csv"));
}

#[tokio::test]
async fn test_chat_job_sees_selected_dataset() {
    let f = fixture();
    let (mut a, mut rx_a) = connect(&f.hub, "alice");
    send(
        &f.router,
        &mut a,
        json!({"type": "load_dataset", "payload": {"filename": "sales.csv"}}),
    )
    .await;

    let t = send(
        &f.router,
        &mut a,
        json!({"type": "chat_message", "payload": {"content": "what is the total?"}}),
    )
    .await;
    let Transition::JobSpawned(handle) = t else {
        panic!("expected a job, got {t:?}");
    };
    assert_eq!(handle.await.unwrap(), JobOutcome::Completed);

    let frames = drain(&mut rx_a);
    assert_eq!(
        types(&frames),
        ["load_dataset_success", "chat_typing", "chat_response", "chat_typing"]
    );
    let prompts = f.backend.prompts.lock();
    assert!(prompts[0][1].content.contains("File: sales.csv"));
}

#[tokio::test]
async fn test_unknown_type_is_republished_with_server_identity() {
    let f = fixture();
    let (mut a, mut rx_a) = connect(&f.hub, "alice");
    let mut bus_rx = f
        .bus
        .subscribe(&["websocket:*".to_string()])
        .await
        .unwrap();

    let t = send(
        &f.router,
        &mut a,
        json!({
            "type": "typing",
            "channel": "room1",
            "user_id": "mallory",
            "payload": {"is_typing": true}
        }),
    )
    .await;
    assert!(matches!(t, Transition::Forwarded { ref topic } if topic == "typing:room1"));

    let message = tokio::time::timeout(Duration::from_secs(1), bus_rx.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.channel, "websocket:typing:room1");
    let envelope: Envelope = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(envelope.kind, "typing");
    assert_eq!(envelope.user_id.as_deref(), Some("alice"));
    assert_eq!(envelope.payload["is_typing"], true);

    // nothing is echoed locally by the router itself
    assert!(drain(&mut rx_a).is_empty());
}

#[tokio::test]
async fn test_unknown_type_without_bus_is_reported() {
    let f = fixture();
    f.bus.set_available(false);
    let (mut a, _rx_a) = connect(&f.hub, "alice");

    let t = send(&f.router, &mut a, json!({"type": "custom_event"})).await;
    assert!(matches!(t, Transition::ForwardFailed { ref topic } if topic == "custom_event"));
}

#[tokio::test]
async fn test_undecodable_frame_is_discarded() {
    let f = fixture();
    let (mut a, mut rx_a) = connect(&f.hub, "alice");

    let t = f.router.route_text(&mut a, "{not json").await;
    assert!(matches!(t, Transition::Discarded));
    assert!(drain(&mut rx_a).is_empty());
    assert!(f.hub.is_registered(&a.id));
}
