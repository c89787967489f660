//! Pub/Sub bridge
//!
//! The bridge turns hub-local publishes into bus messages and bus messages
//! back into local topic broadcasts, so several hub instances sharing one
//! bus stay consistent. Bus channels are namespaced: topic `chat:room1`
//! travels as `{prefix}:chat:room1`.
//!
//! Failure policy: a failed publish is reported to the caller. A lost
//! subscription is retried with a fixed backoff; while the bus is down the
//! hub keeps serving local traffic.

pub mod bus;
#[cfg(feature = "redis")]
pub mod redis_bus;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BusBackend, BusSettings};
use crate::hub::Hub;
use crate::transport::message::Envelope;
use crate::utils::error::{BridgeError, BusError};

pub use bus::{BusMessage, BusSubscription, MemoryBus, PubSubBus};

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

pub struct Bridge {
    bus: Arc<dyn PubSubBus>,
    prefix: String,
    patterns: Vec<String>,
    publish_timeout: Duration,
}

impl Bridge {
    pub fn new(bus: Arc<dyn PubSubBus>, settings: &BusSettings) -> Self {
        Self {
            bus,
            prefix: settings.prefix.clone(),
            patterns: settings.patterns.clone(),
            publish_timeout: settings.publish_timeout(),
        }
    }

    /// Build the bridge named by the configuration, or `None` when the bus
    /// is disabled or cannot be created (the hub then runs single-process).
    pub fn from_settings(settings: &BusSettings) -> Option<Arc<Self>> {
        let bus: Arc<dyn PubSubBus> = match settings.backend {
            BusBackend::Disabled => return None,
            BusBackend::Memory => Arc::new(MemoryBus::new(settings.memory_capacity)),
            BusBackend::Redis => open_redis(&settings.url)?,
        };
        Some(Arc::new(Self::new(bus, settings)))
    }

    pub fn bus_channel(&self, topic: &str) -> String {
        format!("{}:{}", self.prefix, topic)
    }

    /// Local topic for a bus channel, `None` when outside our namespace.
    pub fn topic_for<'a>(&self, channel: &'a str) -> Option<&'a str> {
        channel
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .filter(|topic| !topic.is_empty())
    }

    pub async fn publish(&self, topic: &str, message: Envelope) -> Result<(), BridgeError> {
        let channel = self.bus_channel(topic);
        let payload = serde_json::to_vec(&message)?;

        match tokio::time::timeout(self.publish_timeout, self.bus.publish(&channel, payload)).await {
            Ok(Ok(())) => {
                debug!(channel = %channel, "message published to bus");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(BridgeError::Timeout(self.publish_timeout)),
        }
    }

    /// Receive loop: forward every bus message in our namespace to the
    /// local subscribers of its topic until `shutdown` fires.
    pub async fn run(self: Arc<Self>, hub: Arc<Hub>, shutdown: CancellationToken) {
        let patterns: Vec<String> = self.patterns.iter().map(|p| self.bus_channel(p)).collect();

        loop {
            let mut subscription = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.bus.subscribe(&patterns) => match result {
                    Ok(subscription) => subscription,
                    Err(e) => {
                        warn!(bus = self.bus.name(), "bus subscription failed, running single-process: {e}");
                        if self.backoff(&shutdown).await {
                            break;
                        }
                        continue;
                    }
                },
            };
            info!(bus = self.bus.name(), channels = ?patterns, "bus subscriber started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("bus subscriber shutting down");
                        return;
                    }
                    next = subscription.next() => match next {
                        Some(message) => self.forward(&hub, message),
                        None => {
                            warn!(bus = self.bus.name(), "bus subscription lost, resubscribing");
                            break;
                        }
                    },
                }
            }

            if self.backoff(&shutdown).await {
                break;
            }
        }
        info!("bus subscriber shutting down");
    }

    /// Sleep before resubscribing. Returns `true` if shutdown fired instead.
    async fn backoff(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(RESUBSCRIBE_BACKOFF) => false,
        }
    }

    fn forward(&self, hub: &Hub, message: BusMessage) {
        let Some(topic) = self.topic_for(&message.channel) else {
            debug!(channel = %message.channel, "bus message outside namespace ignored");
            return;
        };
        let envelope: Envelope = match serde_json::from_slice(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(channel = %message.channel, "undecodable bus message dropped: {e}");
                return;
            }
        };
        let report = hub.broadcast_to_topic(topic, envelope);
        debug!(topic = %topic, queued = report.queued, dropped = report.dropped, "bus message forwarded");
    }
}

#[cfg(feature = "redis")]
fn open_redis(url: &str) -> Option<Arc<dyn PubSubBus>> {
    match redis_bus::RedisBus::open(url) {
        Ok(bus) => Some(Arc::new(bus)),
        Err(e) => {
            warn!("redis bus unavailable, running single-process: {e}");
            None
        }
    }
}

#[cfg(not(feature = "redis"))]
fn open_redis(_url: &str) -> Option<Arc<dyn PubSubBus>> {
    let err = BusError::Unavailable("built without the `redis` feature".to_string());
    warn!("redis bus unavailable, running single-process: {err}");
    None
}

#[cfg(test)]
mod tests;
