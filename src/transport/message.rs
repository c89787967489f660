//! Wire protocol.
//!
//! Every frame is an [`Envelope`]: a `type` discriminator, an optional
//! `channel`, an open `payload` object, a server-assigned `timestamp` and a
//! server-assigned `user_id`. Inbound envelopes are classified into the
//! closed [`ClientMessage`] set; anything unrecognized is kept verbatim as
//! [`ClientMessage::Passthrough`]. Outbound frames are built from
//! [`ServerMessage`] variants.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::error::ProtocolError;

/// One serialized, immutable frame ready for a connection's outbound queue.
pub type Frame = std::sync::Arc<str>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            channel: None,
            payload: Map::new(),
            timestamp: None,
            user_id: None,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Stamp the emission time and serialize. Consumes the envelope so a
    /// message can never be mutated after it has been turned into a frame.
    pub fn into_frame(mut self) -> Result<Frame, serde_json::Error> {
        self.timestamp = Some(Utc::now());
        serde_json::to_string(&self).map(Frame::from)
    }

    /// Topic used when an unrecognized message is republished on the bus.
    pub fn passthrough_topic(&self) -> String {
        match self.channel.as_deref() {
            Some(channel) if !channel.is_empty() => format!("{}:{}", self.kind, channel),
            _ => self.kind.clone(),
        }
    }

    fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Subscription requests may carry the topic on the envelope or in the
    /// payload. An empty name is no topic at all.
    fn channel_field(&self) -> Option<String> {
        self.channel
            .as_deref()
            .filter(|c| !c.is_empty())
            .or_else(|| self.payload_str("channel").filter(|c| !c.is_empty()))
            .map(str::to_string)
    }

    /// A required field must be present and a string; an empty string counts.
    fn require(&self, field: &'static str) -> Result<(), ProtocolError> {
        match self.payload_str(field) {
            Some(_) => Ok(()),
            None => Err(ProtocolError::MissingField {
                request_type: self.kind.clone(),
                field,
            }),
        }
    }

    fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(Value::Object(self.payload.clone())).map_err(|e| {
            ProtocolError::InvalidPayload {
                request_type: self.kind.clone(),
                reason: e.to_string(),
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatRequest {
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoadDatasetRequest {
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileAnalysisRequest {
    pub file_id: String,
    pub query: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// Inbound messages, one variant per recognized `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Ping,
    LoadDataset(LoadDatasetRequest),
    ChatMessage(ChatRequest),
    RawAiMessage(ChatRequest),
    FileAnalysis(FileAnalysisRequest),
    Passthrough(Envelope),
}

impl ClientMessage {
    /// Classify an inbound envelope. Recognized types with missing or
    /// ill-typed required fields are rejected; unknown types pass through.
    pub fn classify(envelope: Envelope) -> Result<Self, ProtocolError> {
        let missing_channel = |env: &Envelope| ProtocolError::MissingField {
            request_type: env.kind.clone(),
            field: "channel",
        };

        match envelope.kind.as_str() {
            "subscribe" => envelope
                .channel_field()
                .map(|channel| ClientMessage::Subscribe { channel })
                .ok_or_else(|| missing_channel(&envelope)),
            "unsubscribe" => envelope
                .channel_field()
                .map(|channel| ClientMessage::Unsubscribe { channel })
                .ok_or_else(|| missing_channel(&envelope)),
            "ping" => Ok(ClientMessage::Ping),
            "load_dataset" => {
                envelope.require("filename")?;
                envelope.decode_payload().map(ClientMessage::LoadDataset)
            }
            "chat_message" => {
                envelope.require("content")?;
                envelope.decode_payload().map(ClientMessage::ChatMessage)
            }
            "raw_ai_message" => {
                envelope.require("content")?;
                envelope.decode_payload().map(ClientMessage::RawAiMessage)
            }
            "file_analysis" => {
                envelope.require("file_id")?;
                envelope.require("query")?;
                envelope.decode_payload().map(ClientMessage::FileAnalysis)
            }
            _ => Ok(ClientMessage::Passthrough(envelope)),
        }
    }
}

/// Outbound messages. Serialized adjacently tagged so the variant name lands
/// in `type` and its fields in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong,
    ChatTyping {
        is_typing: bool,
    },
    ChatResponse {
        content: String,
        model: String,
    },
    ChatError {
        error: String,
        model: String,
    },
    RawAiResponse {
        content: String,
        model: String,
    },
    RawAiError {
        error: String,
        model: String,
    },
    LoadDatasetSuccess {
        filename: String,
        message: String,
    },
    LoadDatasetError {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    FileAnalysisStarted {
        file_id: String,
        query: String,
        model: String,
    },
    FileAnalysisComplete {
        file_id: String,
        query: String,
        model: String,
        analysis: String,
        insights: Vec<String>,
        suggestions: Vec<String>,
    },
    FileAnalysisError {
        #[serde(skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        error: String,
    },
    FileAnalysisFinished {
        file_id: String,
    },
    Error {
        error: String,
        request_type: String,
    },
}

impl ServerMessage {
    /// The error frame scoped to the request type that failed.
    pub fn rejection(err: &ProtocolError) -> Self {
        let error = err.to_string();
        match err.request_type().unwrap_or_default() {
            "chat_message" => ServerMessage::ChatError {
                error,
                model: String::new(),
            },
            "raw_ai_message" => ServerMessage::RawAiError {
                error,
                model: String::new(),
            },
            "load_dataset" => ServerMessage::LoadDatasetError {
                error,
                filename: None,
            },
            "file_analysis" => ServerMessage::FileAnalysisError {
                file_id: None,
                error,
            },
            other => ServerMessage::Error {
                error,
                request_type: other.to_string(),
            },
        }
    }

    pub fn into_envelope(self) -> Envelope {
        let mut value = match serde_json::to_value(&self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let kind = match value.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => String::new(),
        };
        let payload = match value.remove("payload") {
            Some(Value::Object(payload)) => payload,
            _ => Map::new(),
        };
        Envelope {
            kind,
            payload,
            ..Envelope::new("")
        }
    }
}

impl From<ServerMessage> for Envelope {
    fn from(message: ServerMessage) -> Self {
        message.into_envelope()
    }
}

/// Join frames for a single physical write, newline separated.
pub fn coalesce(frames: &[Frame]) -> String {
    let len = frames.iter().map(|f| f.len() + 1).sum();
    let mut out = String::with_capacity(len);
    for (i, frame) in frames.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(frame);
    }
    out
}

/// Split a received buffer into the individual frames it carries.
pub fn split_frames(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
}
