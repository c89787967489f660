//! Language-model collaborator
//!
//! The messaging core only needs one capability from a model provider:
//! given role/content messages, return a completion string. [`ChatBackend`]
//! is that seam; [`OllamaBackend`](ollama::OllamaBackend) is the production
//! implementation and tests plug in their own.

pub mod ollama;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmSettings;
use crate::utils::error::LlmError;

pub use ollama::OllamaBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Complete a conversation. `model` is a provider model name; `None`
    /// leaves the choice to the backend.
    async fn complete(&self, messages: &[ChatMessage], model: Option<&str>)
        -> Result<String, LlmError>;
}

/// Stand-in used when no model provider is configured. Every request fails
/// with [`LlmError::Disabled`], which jobs turn into error frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledBackend;

#[async_trait]
impl ChatBackend for DisabledBackend {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _: &[ChatMessage], _: Option<&str>) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }
}

/// Map the short names clients send to provider model names. Unknown names
/// are passed through unchanged.
pub fn resolve_model_alias(model: &str) -> &str {
    match model {
        "openai" => "gpt-4o-mini",
        "llama" => "llama3:latest",
        "sqlcoder" => "sqlcoder:7b",
        other => other,
    }
}

/// Build the configured backend, falling back to [`DisabledBackend`].
pub fn from_settings(settings: &LlmSettings) -> Arc<dyn ChatBackend> {
    if !settings.enabled {
        return Arc::new(DisabledBackend);
    }
    match OllamaBackend::new(settings) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            tracing::warn!("AI backend unavailable, chat requests will fail: {e}");
            Arc::new(DisabledBackend)
        }
    }
}
