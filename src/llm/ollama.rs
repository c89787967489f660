//! Ollama backend over the non-streaming `/api/chat` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatBackend, ChatMessage};
use crate::config::LlmSettings;
use crate::utils::error::LlmError;

const DEFAULT_MODEL: &str = "llama3:latest";

#[derive(Clone)]
pub struct OllamaBackend {
    host: String,
    port: u16,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OllamaBackend {
    pub fn new(settings: &LlmSettings) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self {
            host: settings.host.clone(),
            port: settings.port,
            http_client,
        })
    }

    fn chat_url(&self) -> String {
        format!("http://{}:{}/api/chat", self.host, self.port)
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
    ) -> Result<String, LlmError> {
        let model = model.unwrap_or(DEFAULT_MODEL);
        debug!(model = %model, messages = messages.len(), "sending chat completion");

        let response = self
            .http_client
            .post(self.chat_url())
            .json(&ChatRequest {
                model,
                messages,
                stream: false,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;
        if let Some(error) = body.error {
            return Err(LlmError::Decode(error));
        }
        body.message
            .map(|m| m.content)
            .ok_or_else(|| LlmError::Decode("response has no message".to_string()))
    }
}
