use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Every section falls back to its defaults, so a configuration file only
/// needs to name the values it overrides.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub hub: HubSettings,
    pub jobs: JobSettings,
    pub bus: BusSettings,
    pub llm: LlmSettings,
    pub files: FileSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the server will bind to.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    /// Interface to bind, e.g. `127.0.0.1` or `0.0.0.0`.
    pub host: String,
    /// TCP port for WebSocket connections.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Connection and hub tuning.
///
/// `queue_capacity` bounds every connection's outbound queue; sends beyond
/// it are dropped. The read path treats `pong_wait_secs` without any inbound
/// frame as a dead peer, so `ping_period_secs` must stay below it.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HubSettings {
    /// Outbound frames buffered per connection.
    pub queue_capacity: usize,
    /// Interval between heartbeat pings, independent of other traffic.
    pub ping_period_secs: u64,
    /// Longest silence from a peer before it is considered dead.
    pub pong_wait_secs: u64,
    /// Deadline for a single socket write.
    pub write_wait_secs: u64,
    /// Largest inbound message, in bytes. Larger ones close the connection.
    pub max_message_size: usize,
    /// Most queued frames joined into one write.
    pub max_coalesce: usize,
    /// Time connections get to drain on shutdown.
    pub shutdown_grace_ms: u64,
}

impl HubSettings {
    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.ping_period_secs)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            ping_period_secs: 54,
            pong_wait_secs: 60,
            write_wait_secs: 10,
            max_message_size: 64 * 1024,
            max_coalesce: 64,
            shutdown_grace_ms: 2000,
        }
    }
}

/// Background job deadlines, default models and prompt budgets.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JobSettings {
    /// Deadline for chat and raw chat completions.
    pub chat_timeout_secs: u64,
    /// Deadline for a file analysis, file read included.
    pub analysis_timeout_secs: u64,
    /// Models used when a request names none.
    pub chat_model: String,
    pub raw_model: String,
    pub analysis_model: String,
    /// Bytes of the selected dataset quoted in data questions.
    pub dataset_preview_bytes: usize,
    /// Bytes of the file quoted in an analysis prompt.
    pub analysis_preview_bytes: usize,
    /// How long a finished job waits for room in a full outbound queue
    /// before its terminal frame is dropped.
    pub delivery_wait_ms: u64,
}

impl JobSettings {
    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_timeout_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn delivery_wait(&self) -> Duration {
        Duration::from_millis(self.delivery_wait_ms)
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            chat_timeout_secs: 30,
            analysis_timeout_secs: 60,
            chat_model: "llama".to_string(),
            raw_model: "gpt-4o-mini".to_string(),
            analysis_model: "llama".to_string(),
            dataset_preview_bytes: 2000,
            analysis_preview_bytes: 1000,
            delivery_wait_ms: 1000,
        }
    }
}

/// Which publish/subscribe bus backs the bridge.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    Memory,
    Redis,
    Disabled,
}

/// Cross-process bus configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BusSettings {
    pub backend: BusBackend,
    /// Redis URL, used only by the `redis` backend.
    pub url: String,
    /// Namespace prepended to every topic on the bus.
    pub prefix: String,
    /// Topic patterns the bridge forwards from the bus, without the prefix.
    pub patterns: Vec<String>,
    pub publish_timeout_secs: u64,
    /// Messages buffered per subscriber by the in-process bus.
    pub memory_capacity: usize,
}

impl BusSettings {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            backend: BusBackend::Memory,
            url: "redis://localhost:6379/0".to_string(),
            prefix: "websocket".to_string(),
            patterns: ["chat:*", "ai:*", "typing:*", "presence:*", "system:*"]
                .into_iter()
                .map(String::from)
                .collect(),
            publish_timeout_secs: 5,
            memory_capacity: 1024,
        }
    }
}

/// Language-model backend (Ollama) location.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmSettings {
    /// When `false` every job fails with "AI service is not available".
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 11434,
            request_timeout_secs: 120,
        }
    }
}

/// Where uploaded datasets live.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FileSettings {
    pub upload_dir: String,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            upload_dir: "uploads".to_string(),
        }
    }
}

/// Log verbosity, as a `tracing` level name.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
