//! Redis-backed bus for fan-out across hub processes.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;

use super::bus::{BusMessage, BusSubscription, PubSubBus};
use crate::utils::error::BusError;

// reconnect attempts per failed command: 100ms, then 200ms
const RECONNECT_EXPONENT_BASE: u64 = 2;
const RECONNECT_FACTOR_MS: u64 = 100;
const RECONNECT_RETRIES: usize = 2;

pub struct RedisBus {
    client: redis::Client,
    /// Publishing connection. The manager reconnects on its own after the
    /// server restarts; a failed first connect leaves the cell empty so the
    /// next publish tries again.
    publisher: OnceCell<ConnectionManager>,
}

impl RedisBus {
    pub fn open(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url).map_err(backend)?;
        Ok(Self {
            client,
            publisher: OnceCell::new(),
        })
    }

    async fn publisher(&self) -> Result<ConnectionManager, BusError> {
        self.publisher
            .get_or_try_init(|| async {
                self.client
                    .get_connection_manager_with_backoff(
                        RECONNECT_EXPONENT_BASE,
                        RECONNECT_FACTOR_MS,
                        RECONNECT_RETRIES,
                    )
                    .await
                    .map_err(unavailable)
            })
            .await
            .cloned()
    }
}

fn backend(e: redis::RedisError) -> BusError {
    BusError::Backend(e.to_string())
}

fn unavailable(e: redis::RedisError) -> BusError {
    BusError::Unavailable(e.to_string())
}

/// Connection-level failures mean the bus is down; anything else is a
/// command the server refused.
fn classify(e: redis::RedisError) -> BusError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        unavailable(e)
    } else {
        backend(e)
    }
}

#[async_trait]
impl PubSubBus for RedisBus {
    fn name(&self) -> &str {
        "redis"
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut conn = self.publisher().await?;
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(classify)
    }

    async fn subscribe(&self, patterns: &[String]) -> Result<BusSubscription, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(unavailable)?;
        for pattern in patterns {
            pubsub.psubscribe(pattern).await.map_err(classify)?;
        }

        let stream = pubsub.into_on_message().map(|msg| BusMessage {
            channel: msg.get_channel_name().to_string(),
            payload: msg.get_payload_bytes().to_vec(),
        });
        Ok(stream.boxed())
    }
}
