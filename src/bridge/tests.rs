use super::bus::build_globset;
use super::{Bridge, MemoryBus, PubSubBus};
use crate::config::{BusBackend, BusSettings};
use crate::hub::Hub;
use crate::transport::message::Envelope;
use crate::utils::error::{BridgeError, BusError};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn bridge_over(bus: Arc<MemoryBus>) -> Arc<Bridge> {
    Arc::new(Bridge::new(bus, &BusSettings::default()))
}

fn glob_matches(pattern: &str, channel: &str) -> bool {
    build_globset(&[pattern.to_string()]).unwrap().is_match(channel)
}

#[test]
fn test_pattern_matching() {
    assert!(glob_matches("websocket:chat:*", "websocket:chat:room1"));
    assert!(glob_matches("websocket:chat:*", "websocket:chat:"));
    assert!(glob_matches("websocket:chat:*", "websocket:chat:user:alice"));
    assert!(!glob_matches("websocket:chat:*", "websocket:presence:online"));
    assert!(glob_matches("typing:user:?", "typing:user:7"));
    assert!(!glob_matches("typing:user:?", "typing:user:42"));
    assert!(glob_matches("*", "anything"));
    assert!(glob_matches("a*b*c", "aXXbYYc"));
    assert!(!glob_matches("a*b*c", "aXXbYY"));

    let set = build_globset(&["chat:*".to_string(), "presence:*".to_string()]).unwrap();
    assert!(set.is_match("presence:online"));
    assert!(!set.is_match("system:alert"));
}

#[test]
fn test_invalid_pattern_is_a_backend_error() {
    let err = build_globset(&["chat:[".to_string()]).unwrap_err();
    assert!(matches!(err, BusError::Backend(_)));
}

#[test]
fn test_channel_namespacing() {
    let bridge = bridge_over(Arc::new(MemoryBus::default()));
    assert_eq!(bridge.bus_channel("chat:room1"), "websocket:chat:room1");
    assert_eq!(bridge.topic_for("websocket:chat:room1"), Some("chat:room1"));
    assert_eq!(bridge.topic_for("websocketchat:room1"), None);
    assert_eq!(bridge.topic_for("other:chat:room1"), None);
    assert_eq!(bridge.topic_for("websocket:"), None);
}

#[test]
fn test_disabled_backend_builds_no_bridge() {
    let settings = BusSettings {
        backend: BusBackend::Disabled,
        ..BusSettings::default()
    };
    assert!(Bridge::from_settings(&settings).is_none());
    assert!(Bridge::from_settings(&BusSettings::default()).is_some());
}

#[tokio::test]
async fn test_memory_bus_filters_by_pattern() {
    let bus = MemoryBus::default();
    let mut sub = bus.subscribe(&["chat:*".to_string()]).await.unwrap();

    bus.publish("presence:online", b"skip".to_vec()).await.unwrap();
    bus.publish("chat:room1", b"keep".to_vec()).await.unwrap();

    let message = tokio::time::timeout(Duration::from_secs(1), sub.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.channel, "chat:room1");
    assert_eq!(message.payload, b"keep".to_vec());
}

#[tokio::test]
async fn test_publish_during_outage_reports_error() {
    let bus = Arc::new(MemoryBus::default());
    let hub = Hub::with_capacity(4).with_bridge(bridge_over(bus.clone()));

    bus.set_available(false);
    let err = hub
        .publish_external("chat:room1", Envelope::new("chat"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Bus(BusError::Unavailable(_))));

    // local traffic keeps flowing while the bus is down
    let (id, mut rx) = hub.register(None).unwrap();
    hub.subscribe(&id, "chat:room1");
    assert_eq!(hub.broadcast_to_topic("chat:room1", Envelope::new("local")).queued, 1);
    assert!(rx.try_recv().is_ok());

    bus.set_available(true);
    assert!(hub
        .publish_external("chat:room1", Envelope::new("chat"))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_publish_reaches_subscribers_on_another_hub() {
    let bus = Arc::new(MemoryBus::default());
    let bridge_a = bridge_over(bus.clone());
    let bridge_b = bridge_over(bus.clone());
    let hub_a = Arc::new(Hub::with_capacity(16).with_bridge(bridge_a));
    let hub_b = Arc::new(Hub::with_capacity(16).with_bridge(bridge_b.clone()));

    let (id, mut rx) = hub_b.register(Some("bob".into())).unwrap();
    hub_b.subscribe(&id, "chat:room1");

    let shutdown = CancellationToken::new();
    let receive_loop = tokio::spawn(bridge_b.run(hub_b.clone(), shutdown.clone()));

    // the receive loop subscribes asynchronously; publish until it is listening
    let received = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let message = Envelope::new("chat")
                .with_channel("room1")
                .with_field("text", "hello");
            hub_a.publish_external("chat:room1", message).await.unwrap();
            if let Ok(Some(frame)) =
                tokio::time::timeout(Duration::from_millis(50), rx.recv()).await
            {
                return frame;
            }
        }
    })
    .await
    .expect("message crossed the bus");

    let envelope: Envelope = serde_json::from_str(&received).unwrap();
    assert_eq!(envelope.kind, "chat");
    assert_eq!(envelope.payload["text"], "hello");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), receive_loop)
        .await
        .expect("receive loop exits on shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_receive_loop_ignores_channels_outside_namespace() {
    let bus = Arc::new(MemoryBus::default());
    let bridge = bridge_over(bus.clone());
    let hub = Arc::new(Hub::with_capacity(16));
    let (id, mut rx) = hub.register(None).unwrap();
    hub.subscribe(&id, "chat:room1");

    let shutdown = CancellationToken::new();
    let receive_loop = tokio::spawn(bridge.clone().run(hub.clone(), shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let payload = serde_json::to_vec(&Envelope::new("chat")).unwrap();
    bus.publish("chat:room1", payload.clone()).await.unwrap();
    bus.publish("websocket:chat:room1", b"not json".to_vec()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    shutdown.cancel();
    receive_loop.await.unwrap();
}

#[tokio::test]
async fn test_receive_loop_stops_while_backing_off() {
    let bus = Arc::new(MemoryBus::default());
    bus.set_available(false);
    let bridge = bridge_over(bus);
    let hub = Arc::new(Hub::with_capacity(4));

    let shutdown = CancellationToken::new();
    let receive_loop = tokio::spawn(bridge.run(hub, shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();

    tokio::time::timeout(Duration::from_millis(500), receive_loop)
        .await
        .expect("backoff observes shutdown")
        .unwrap();
}
