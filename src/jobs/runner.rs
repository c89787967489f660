use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::prompt;
use crate::config::JobSettings;
use crate::connection::{ConnectionId, Delivery};
use crate::files::FileStore;
use crate::hub::Hub;
use crate::llm::{ChatBackend, resolve_model_alias};
use crate::transport::message::ServerMessage;
use crate::utils::error::JobError;

/// What a job does. An empty `model` means the configured default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    Chat {
        content: String,
        model: String,
        /// Dataset selected on the connection when the job was dispatched.
        dataset: Option<String>,
    },
    RawChat {
        content: String,
        model: String,
    },
    FileAnalysis {
        file_id: String,
        query: String,
        model: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub connection_id: ConnectionId,
    pub kind: JobKind,
}

/// How a job ended, as seen by whoever awaits its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    /// The connection left before the job finished; nothing was emitted.
    Abandoned,
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Chat { .. } => "chat",
            JobKind::RawChat { .. } => "raw_chat",
            JobKind::FileAnalysis { .. } => "file_analysis",
        }
    }

    fn model(&self) -> &str {
        match self {
            JobKind::Chat { model, .. }
            | JobKind::RawChat { model, .. }
            | JobKind::FileAnalysis { model, .. } => model,
        }
    }

    fn with_default_model(mut self, settings: &JobSettings) -> Self {
        let (model, default) = match &mut self {
            JobKind::Chat { model, .. } => (model, &settings.chat_model),
            JobKind::RawChat { model, .. } => (model, &settings.raw_model),
            JobKind::FileAnalysis { model, .. } => (model, &settings.analysis_model),
        };
        if model.is_empty() {
            *model = default.clone();
        }
        self
    }

    fn deadline(&self, settings: &JobSettings) -> Duration {
        match self {
            JobKind::Chat { .. } | JobKind::RawChat { .. } => settings.chat_timeout(),
            JobKind::FileAnalysis { .. } => settings.analysis_timeout(),
        }
    }

    fn started_frame(&self) -> ServerMessage {
        match self {
            JobKind::Chat { .. } | JobKind::RawChat { .. } => {
                ServerMessage::ChatTyping { is_typing: true }
            }
            JobKind::FileAnalysis {
                file_id,
                query,
                model,
            } => ServerMessage::FileAnalysisStarted {
                file_id: file_id.clone(),
                query: query.clone(),
                model: model.clone(),
            },
        }
    }

    fn error_frame(&self, err: &JobError) -> ServerMessage {
        let error = err.to_string();
        match self {
            JobKind::Chat { model, .. } => ServerMessage::ChatError {
                error,
                model: model.clone(),
            },
            JobKind::RawChat { model, .. } => ServerMessage::RawAiError {
                error,
                model: model.clone(),
            },
            JobKind::FileAnalysis { file_id, .. } => ServerMessage::FileAnalysisError {
                file_id: Some(file_id.clone()),
                error: format!("Analysis failed: {error}"),
            },
        }
    }

    /// The progress-cleared signal that follows every terminal frame.
    fn cleared_frame(&self) -> ServerMessage {
        match self {
            JobKind::Chat { .. } | JobKind::RawChat { .. } => {
                ServerMessage::ChatTyping { is_typing: false }
            }
            JobKind::FileAnalysis { file_id, .. } => ServerMessage::FileAnalysisFinished {
                file_id: file_id.clone(),
            },
        }
    }
}

/// Runs jobs off the connection read path and reports back through the hub.
#[derive(Clone)]
pub struct JobRunner {
    hub: Arc<Hub>,
    llm: Arc<dyn ChatBackend>,
    files: Arc<dyn FileStore>,
    settings: JobSettings,
}

impl JobRunner {
    pub fn new(
        hub: Arc<Hub>,
        llm: Arc<dyn ChatBackend>,
        files: Arc<dyn FileStore>,
        settings: JobSettings,
    ) -> Self {
        Self {
            hub,
            llm,
            files,
            settings,
        }
    }

    /// Emit the job's start frame to its connection, then run it on its own
    /// task. The started frame is queued before this returns, so it precedes
    /// anything the connection sends afterwards.
    pub fn dispatch(&self, job: Job) -> JoinHandle<JobOutcome> {
        let Job {
            connection_id,
            kind,
        } = job;
        let kind = kind.with_default_model(&self.settings);

        self.hub
            .send_to_connection(&connection_id, kind.started_frame());
        info!(client_id = %connection_id, job = kind.name(), model = %kind.model(), "job dispatched");

        let runner = self.clone();
        tokio::spawn(async move { runner.run(connection_id, kind).await })
    }

    async fn run(self, connection_id: ConnectionId, kind: JobKind) -> JobOutcome {
        let deadline = kind.deadline(&self.settings);
        let shutdown = self.hub.shutdown_token();
        let work = AssertUnwindSafe(self.execute(&kind)).catch_unwind();

        let result = tokio::select! {
            _ = shutdown.cancelled() => Err(JobError::Cancelled),
            finished = tokio::time::timeout(deadline, work) => match finished {
                Err(_) => Err(JobError::Timeout(deadline)),
                Ok(Err(panic)) => Err(JobError::Panicked(panic_message(panic))),
                Ok(Ok(result)) => result,
            },
        };

        if !self.hub.is_registered(&connection_id) {
            debug!(client_id = %connection_id, job = kind.name(), "client gone, job result discarded");
            return JobOutcome::Abandoned;
        }

        let (terminal, outcome) = match result {
            Ok(frame) => (frame, JobOutcome::Completed),
            Err(e) => {
                warn!(client_id = %connection_id, job = kind.name(), "job failed: {e}");
                (kind.error_frame(&e), JobOutcome::Failed)
            }
        };
        // the connection may be briefly backed up; wait a little rather
        // than leave the client without a terminal frame
        let wait = self.settings.delivery_wait();
        if self
            .hub
            .send_to_connection_within(&connection_id, terminal, wait)
            .await
            != Delivery::Queued
        {
            warn!(client_id = %connection_id, job = kind.name(), "terminal frame not delivered");
        }
        self.hub
            .send_to_connection_within(&connection_id, kind.cleared_frame(), wait)
            .await;
        outcome
    }

    /// The job body. Returns the success frame.
    async fn execute(&self, kind: &JobKind) -> Result<ServerMessage, JobError> {
        match kind {
            JobKind::Chat {
                content,
                model,
                dataset,
            } => {
                let preview = match dataset {
                    Some(file_id) if prompt::is_data_question(content) => {
                        self.dataset_preview(file_id).await
                    }
                    _ => None,
                };
                let messages = prompt::chat_messages(content, preview.as_deref());
                let reply = self
                    .llm
                    .complete(&messages, Some(resolve_model_alias(model)))
                    .await?;
                Ok(ServerMessage::ChatResponse {
                    content: reply,
                    model: model.clone(),
                })
            }
            JobKind::RawChat { content, model } => {
                let reply = self
                    .llm
                    .complete(&prompt::raw_messages(content), Some(resolve_model_alias(model)))
                    .await?;
                Ok(ServerMessage::RawAiResponse {
                    content: reply,
                    model: model.clone(),
                })
            }
            JobKind::FileAnalysis {
                file_id,
                query,
                model,
            } => {
                let head = self
                    .files
                    .read_bytes(file_id, self.settings.analysis_preview_bytes)
                    .await?;
                let analysis = self
                    .llm
                    .complete(
                        &prompt::analysis_messages(&head, query),
                        Some(resolve_model_alias(model)),
                    )
                    .await?;
                let (insights, suggestions) = prompt::insights_and_suggestions(&analysis);
                info!(
                    file_id = %file_id,
                    insights = insights.len(),
                    suggestions = suggestions.len(),
                    "file analysis completed"
                );
                Ok(ServerMessage::FileAnalysisComplete {
                    file_id: file_id.clone(),
                    query: query.clone(),
                    model: model.clone(),
                    analysis,
                    insights,
                    suggestions,
                })
            }
        }
    }

    /// Preview of the selected dataset, or `None` to fall back to a plain
    /// chat prompt.
    async fn dataset_preview(&self, file_id: &str) -> Option<String> {
        let read = async {
            let info = self.files.stat(file_id).await?;
            let head = self
                .files
                .read_bytes(file_id, self.settings.dataset_preview_bytes)
                .await?;
            Ok::<_, JobError>(prompt::dataset_preview(file_id, info.size, &head))
        };
        match read.await {
            Ok(preview) => Some(preview),
            Err(e) => {
                warn!(file_id = %file_id, "dataset preview unavailable: {e}");
                None
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}
