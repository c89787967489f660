//! The `error` module defines the error types used across `air-hub`.
//!
//! Every failure boundary in the messaging core has its own enum so callers
//! can decide precisely what to do: protocol errors become scoped error
//! frames, bus errors degrade the hub to single-process mode, job errors
//! become terminal job frames.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by hub membership operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("hub is shutting down and no longer accepts connections")]
    ShuttingDown,
}

/// A recognized inbound message that cannot be acted on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{field} is required")]
    MissingField {
        request_type: String,
        field: &'static str,
    },
    #[error("invalid {request_type} payload: {reason}")]
    InvalidPayload {
        request_type: String,
        reason: String,
    },
    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl ProtocolError {
    /// The `type` of the inbound message the error belongs to, if known.
    pub fn request_type(&self) -> Option<&str> {
        match self {
            ProtocolError::MissingField { request_type, .. }
            | ProtocolError::InvalidPayload { request_type, .. } => Some(request_type),
            ProtocolError::Malformed(_) => None,
        }
    }
}

/// Errors raised by a publish/subscribe bus implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),
    #[error("bus backend error: {0}")]
    Backend(String),
}

/// Errors raised when handing a message to the cross-process bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no pub/sub bridge is configured")]
    NotConfigured,
    #[error("failed to encode message for the bus: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("bus publish timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Errors from the language-model collaborator.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("AI service is not available")]
    Disabled,
    #[error("AI request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("AI backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected AI response: {0}")]
    Decode(String),
}

/// Errors from the uploaded-file store.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("invalid file id: {0}")]
    InvalidId(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a background job ended without a result.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Llm(#[from] LlmError),
    #[error("{0}")]
    File(#[from] FileError),
    #[error("timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
    #[error("internal error: {0}")]
    Panicked(String),
    #[error("cancelled: server is shutting down")]
    Cancelled,
}
