//! Hub engine
//!
//! The hub is the single owner of "who is connected" and "who listens to
//! what". It keeps:
//! - the live connection set (id → [`ConnectionHandle`])
//! - the topic index (name → [`Topic`]), mirrored on each handle
//!
//! Concurrency and usage notes:
//! - Both maps live behind one `parking_lot::Mutex`. Every operation takes
//!   the lock only to read or mutate the maps; frames are offered to queues
//!   after the lock is released.
//! - Sends never wait: a full outbound queue drops the frame and logs a
//!   warning, so a stalled client cannot stall the hub or other clients.
//! - Lookups on a connection that disappeared are quiet no-ops. Connections
//!   may legitimately close between the decision to send and the send.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::topic::Topic;
use crate::bridge::Bridge;
use crate::config::HubSettings;
use crate::connection::handle::{offer, offer_within};
use crate::connection::{ConnectionHandle, ConnectionId, Delivery};
use crate::transport::message::{Envelope, Frame};
use crate::utils::error::{BridgeError, HubError};

#[derive(Debug, Default)]
struct Registry {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    topics: HashMap<String, Topic>,
}

/// Outcome of a topic broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub queued: usize,
    pub dropped: usize,
}

/// Point-in-time membership counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub total_connections: usize,
    pub total_topics: usize,
    pub topics: BTreeMap<String, usize>,
}

/// Connection registry, topic index and fan-out.
///
/// Shared as `Arc<Hub>` by the accept loop, every connection, the job
/// runner and the bridge receive loop.
pub struct Hub {
    registry: Mutex<Registry>,
    bridge: Option<Arc<Bridge>>,
    accepting: AtomicBool,
    queue_capacity: usize,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("queue_capacity", &self.queue_capacity)
            .field("bridge", &self.bridge.is_some())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

impl Hub {
    /// A hub sized from the `[hub]` configuration section.
    pub fn new(settings: &HubSettings) -> Self {
        Self::with_capacity(settings.queue_capacity)
    }

    /// A hub whose connections each get an outbound queue of `queue_capacity`.
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            bridge: None,
            accepting: AtomicBool::new(true),
            queue_capacity,
            shutdown: CancellationToken::new(),
        }
    }

    /// Attach the cross-process bridge used by [`Hub::publish_external`].
    pub fn with_bridge(mut self, bridge: Arc<Bridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Whether new connections may still register. Turns `false` for good
    /// once [`Hub::shutdown`] starts.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Token cancelled when the hub shuts down. Read paths, jobs and the
    /// bridge receive loop all watch it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Add a connection to the live set with an empty subscription set.
    ///
    /// Returns the new connection id and the receiving end of its outbound
    /// queue; the caller starts the read and write paths with them.
    pub fn register(
        &self,
        user_id: Option<String>,
    ) -> Result<(ConnectionId, Receiver<Frame>), HubError> {
        if !self.is_accepting() {
            return Err(HubError::ShuttingDown);
        }

        let (handle, receiver) = ConnectionHandle::new(user_id, self.queue_capacity);
        let id = handle.id.clone();
        let user = handle.user_id.clone();

        let total = {
            let mut registry = self.registry.lock();
            registry.connections.insert(id.clone(), handle);
            registry.connections.len()
        };

        info!(client_id = %id, user_id = ?user, total_clients = total, "client registered");
        Ok((id, receiver))
    }

    /// Remove a connection from every topic and from the live set.
    ///
    /// Dropping the removed handle closes the outbound queue; the write path
    /// drains what is left and exits. Returns `false` when the connection was
    /// already gone, making repeated calls harmless.
    pub fn unregister(&self, id: &str) -> bool {
        let (handle, total) = {
            let mut registry = self.registry.lock();
            let Some(handle) = registry.connections.remove(id) else {
                return false;
            };
            for name in &handle.topics {
                let now_empty = registry
                    .topics
                    .get_mut(name)
                    .map(|topic| {
                        topic.unsubscribe(id);
                        topic.is_empty()
                    })
                    .unwrap_or(false);
                if now_empty {
                    registry.topics.remove(name);
                }
            }
            (handle, registry.connections.len())
        };

        info!(
            client_id = %handle.id,
            user_id = ?handle.user_id,
            topics = handle.topics.len(),
            total_clients = total,
            "client unregistered"
        );
        drop(handle);
        true
    }

    /// Whether the connection is still in the live set. Jobs check this
    /// before emitting so results for departed clients are discarded.
    pub fn is_registered(&self, id: &str) -> bool {
        self.registry.lock().connections.contains_key(id)
    }

    /// Subscribe a connection to a topic. Returns `true` if this added a new
    /// membership; duplicates and unknown connections change nothing.
    pub fn subscribe(&self, id: &str, topic: &str) -> bool {
        let mut registry = self.registry.lock();
        let Some(handle) = registry.connections.get_mut(id) else {
            debug!(client_id = %id, topic = %topic, "subscribe for unknown client ignored");
            return false;
        };
        if !handle.topics.insert(topic.to_string()) {
            return false;
        }
        registry
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(id.to_string());

        debug!(client_id = %id, topic = %topic, "client subscribed to topic");
        true
    }

    /// Unsubscribe a connection from a topic, dropping the topic once empty.
    pub fn unsubscribe(&self, id: &str, topic: &str) -> bool {
        let mut registry = self.registry.lock();
        let removed = registry
            .connections
            .get_mut(id)
            .map(|handle| handle.topics.remove(topic))
            .unwrap_or(false);
        if !removed {
            return false;
        }
        let now_empty = registry
            .topics
            .get_mut(topic)
            .map(|t| {
                t.unsubscribe(id);
                t.is_empty()
            })
            .unwrap_or(false);
        if now_empty {
            registry.topics.remove(topic);
        }

        debug!(client_id = %id, topic = %topic, "client unsubscribed from topic");
        true
    }

    /// Subscriber ids of a topic, empty when the topic does not exist.
    pub fn subscribers(&self, topic: &str) -> Vec<ConnectionId> {
        self.registry
            .lock()
            .topics
            .get(topic)
            .map(|t| t.subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the topic has at least one subscriber.
    pub fn topic_exists(&self, topic: &str) -> bool {
        self.registry.lock().topics.contains_key(topic)
    }

    /// Best-effort delivery to one connection.
    pub fn send_to_connection(&self, id: &str, message: impl Into<Envelope>) -> Delivery {
        let Some(frame) = encode(message.into()) else {
            return Delivery::Dropped;
        };
        self.send_frame(id, frame)
    }

    /// Offer an already serialized frame to one connection.
    pub fn send_frame(&self, id: &str, frame: Frame) -> Delivery {
        let sender = self
            .registry
            .lock()
            .connections
            .get(id)
            .map(ConnectionHandle::sender);
        let Some(sender) = sender else {
            debug!(client_id = %id, "send to unknown client skipped");
            return Delivery::NotFound;
        };

        let delivery = offer(&sender, frame);
        if delivery == Delivery::Dropped {
            warn!(client_id = %id, "outbound queue full, message dropped");
        }
        delivery
    }

    /// Delivery to one connection that waits up to `wait` for queue space.
    ///
    /// For frames a client must not miss, such as the terminal frame of a
    /// job. The wait is bounded, so a stalled client still cannot hold the
    /// caller for long; on timeout the frame is dropped like any other.
    pub async fn send_to_connection_within(
        &self,
        id: &str,
        message: impl Into<Envelope>,
        wait: Duration,
    ) -> Delivery {
        let Some(frame) = encode(message.into()) else {
            return Delivery::Dropped;
        };
        let sender = self
            .registry
            .lock()
            .connections
            .get(id)
            .map(ConnectionHandle::sender);
        let Some(sender) = sender else {
            debug!(client_id = %id, "send to unknown client skipped");
            return Delivery::NotFound;
        };

        let delivery = offer_within(&sender, frame, wait).await;
        if delivery == Delivery::Dropped {
            warn!(client_id = %id, wait_ms = wait.as_millis() as u64, "outbound queue stayed full, message dropped");
        }
        delivery
    }

    /// Deliver to every subscriber of `topic` as of the moment of the call.
    pub fn broadcast_to_topic(&self, topic: &str, message: impl Into<Envelope>) -> BroadcastReport {
        let targets: Vec<(ConnectionId, Sender<Frame>)> = {
            let registry = self.registry.lock();
            let Some(t) = registry.topics.get(topic) else {
                return BroadcastReport::default();
            };
            t.subscribers
                .iter()
                .filter_map(|id| {
                    registry
                        .connections
                        .get(id)
                        .map(|handle| (id.clone(), handle.sender()))
                })
                .collect()
        };
        self.fan_out(topic, message.into(), targets)
    }

    /// Deliver to every live connection of `user_id`. Returns how many
    /// connections the frame was queued for.
    pub fn send_to_user(&self, user_id: &str, message: impl Into<Envelope>) -> usize {
        let targets: Vec<(ConnectionId, Sender<Frame>)> = self
            .registry
            .lock()
            .connections
            .values()
            .filter(|handle| handle.user_id.as_deref() == Some(user_id))
            .map(|handle| (handle.id.clone(), handle.sender()))
            .collect();

        let report = self.fan_out(user_id, message.into(), targets);
        if report.queued == 0 {
            warn!(user_id = %user_id, "no active clients found for user");
        }
        report.queued
    }

    fn fan_out(
        &self,
        target: &str,
        message: Envelope,
        targets: Vec<(ConnectionId, Sender<Frame>)>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        if targets.is_empty() {
            return report;
        }
        let Some(frame) = encode(message) else {
            report.dropped = targets.len();
            return report;
        };

        for (id, sender) in targets {
            match offer(&sender, frame.clone()) {
                Delivery::Queued => report.queued += 1,
                Delivery::Dropped => {
                    report.dropped += 1;
                    warn!(client_id = %id, target = %target, "outbound queue full, broadcast dropped");
                }
                Delivery::NotFound => report.dropped += 1,
            }
        }
        report
    }

    /// Hand a message to the pub/sub bridge for cross-process fan-out.
    pub async fn publish_external(&self, topic: &str, message: Envelope) -> Result<(), BridgeError> {
        let bridge = self.bridge.as_ref().ok_or(BridgeError::NotConfigured)?;
        bridge.publish(topic, message).await
    }

    /// Connection and topic counts, with subscribers per topic.
    pub fn stats(&self) -> HubStats {
        let registry = self.registry.lock();
        HubStats {
            total_connections: registry.connections.len(),
            total_topics: registry.topics.len(),
            topics: registry
                .topics
                .iter()
                .map(|(name, t)| (name.clone(), t.subscribers.len()))
                .collect(),
        }
    }

    /// Stop accepting registrations, signal every read path, job and bridge
    /// loop to stop, and give in-flight writes `grace` to drain before any
    /// remaining connection is unregistered.
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        info!(stats = ?self.stats(), "hub shutting down");

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if self.registry.lock().connections.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let remaining: Vec<ConnectionId> =
            self.registry.lock().connections.keys().cloned().collect();
        for id in remaining {
            self.unregister(&id);
        }
    }
}

fn encode(message: Envelope) -> Option<Frame> {
    match message.into_frame() {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!("failed to serialize message: {e}");
            None
        }
    }
}
