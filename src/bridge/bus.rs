//! Publish/subscribe bus abstraction.
//!
//! Only the [`Bridge`](super::Bridge) talks to a bus. Subscriptions take
//! glob patterns (`*`, `?` and `[...]`) in the style of Redis `PSUBSCRIBE`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::broadcast;
use tracing::warn;

use crate::utils::error::BusError;

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

pub type BusSubscription = BoxStream<'static, BusMessage>;

#[async_trait]
pub trait PubSubBus: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Subscribe to every channel matching one of `patterns`. The stream ends
    /// when the underlying subscription is lost.
    async fn subscribe(&self, patterns: &[String]) -> Result<BusSubscription, BusError>;
}

/// In-process bus: every hub sharing one `MemoryBus` sees every publish,
/// including its own.
#[derive(Debug)]
pub struct MemoryBus {
    sender: broadcast::Sender<BusMessage>,
    available: AtomicBool,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), BusError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Unavailable("memory bus is offline".to_string()))
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl PubSubBus for MemoryBus {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.check_available()?;
        // no receivers is not an error: nobody is listening yet
        let _ = self.sender.send(BusMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, patterns: &[String]) -> Result<BusSubscription, BusError> {
        self.check_available()?;
        let filter = build_globset(patterns)?;
        let receiver = self.sender.subscribe();

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => return Some((message, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "memory bus subscriber lagged, messages skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |message| futures::future::ready(filter.is_match(&message.channel)));

        Ok(stream.boxed())
    }
}

/// Compile subscription patterns into one matcher. Channels are matched as
/// plain strings, so `*` also spans `:` segments.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet, BusError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| BusError::Backend(format!("invalid pattern {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder.build().map_err(|e| BusError::Backend(e.to_string()))
}
