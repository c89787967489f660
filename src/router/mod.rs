//! Message router
//!
//! Classifies every inbound envelope of one connection and performs the
//! matching transition. The router is called from the connection's read path
//! only, one message at a time, so a connection's messages are handled in
//! the order they arrived.
//!
//! | inbound          | transition                      | frames to the sender              |
//! |------------------|---------------------------------|-----------------------------------|
//! | `subscribe`      | join topic                      | none                              |
//! | `unsubscribe`    | leave topic                     | none                              |
//! | `ping`           |                                 | `pong`                            |
//! | `load_dataset`   | select dataset if it exists     | `load_dataset_success` / `_error` |
//! | `chat_message`   | chat job                        | see [`crate::jobs`]               |
//! | `raw_ai_message` | raw chat job                    | see [`crate::jobs`]               |
//! | `file_analysis`  | analysis job                    | see [`crate::jobs`]               |
//! | anything else    | republish on the bus            | none                              |

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::Session;
use crate::files::FileStore;
use crate::hub::Hub;
use crate::jobs::{Job, JobKind, JobOutcome, JobRunner};
use crate::transport::message::{ClientMessage, Envelope, ServerMessage};
use crate::utils::error::ProtocolError;

/// What the router did with one inbound message.
#[derive(Debug)]
pub enum Transition {
    Subscribed(String),
    Unsubscribed(String),
    Pong,
    DatasetLoaded(String),
    DatasetRejected(String),
    JobSpawned(JoinHandle<JobOutcome>),
    Forwarded { topic: String },
    ForwardFailed { topic: String },
    /// A recognized type missing what it needs; the sender got an error frame.
    Rejected(ProtocolError),
    /// Not a decodable envelope; logged and dropped.
    Discarded,
}

#[derive(Clone)]
pub struct Router {
    hub: Arc<Hub>,
    jobs: JobRunner,
    files: Arc<dyn FileStore>,
}

impl Router {
    pub fn new(hub: Arc<Hub>, jobs: JobRunner, files: Arc<dyn FileStore>) -> Self {
        Self { hub, jobs, files }
    }

    /// Decode one text frame and route it.
    pub async fn route_text(&self, session: &mut Session, text: &str) -> Transition {
        match Envelope::parse(text) {
            Ok(envelope) => self.route(session, envelope).await,
            Err(e) => {
                warn!(client_id = %session.id, "dropping undecodable frame: {e}");
                Transition::Discarded
            }
        }
    }

    pub async fn route(&self, session: &mut Session, mut envelope: Envelope) -> Transition {
        // identity comes from the handshake, never from the client
        envelope.user_id = session.user_id.clone();
        debug!(client_id = %session.id, kind = %envelope.kind, "routing message");

        let message = match ClientMessage::classify(envelope) {
            Ok(message) => message,
            Err(e) => {
                warn!(client_id = %session.id, "rejecting message: {e}");
                self.hub
                    .send_to_connection(&session.id, ServerMessage::rejection(&e));
                return Transition::Rejected(e);
            }
        };

        match message {
            ClientMessage::Subscribe { channel } => {
                self.hub.subscribe(&session.id, &channel);
                Transition::Subscribed(channel)
            }
            ClientMessage::Unsubscribe { channel } => {
                self.hub.unsubscribe(&session.id, &channel);
                Transition::Unsubscribed(channel)
            }
            ClientMessage::Ping => {
                self.hub.send_to_connection(&session.id, ServerMessage::Pong);
                Transition::Pong
            }
            ClientMessage::LoadDataset(request) => self.load_dataset(session, request.filename).await,
            ClientMessage::ChatMessage(request) => self.spawn(
                session,
                JobKind::Chat {
                    content: request.content,
                    model: request.model.unwrap_or_default(),
                    dataset: session.selected_dataset().map(str::to_string),
                },
            ),
            ClientMessage::RawAiMessage(request) => self.spawn(
                session,
                JobKind::RawChat {
                    content: request.content,
                    model: request.model.unwrap_or_default(),
                },
            ),
            ClientMessage::FileAnalysis(request) => self.spawn(
                session,
                JobKind::FileAnalysis {
                    file_id: request.file_id,
                    query: request.query,
                    model: request.model.unwrap_or_default(),
                },
            ),
            ClientMessage::Passthrough(envelope) => self.forward(envelope).await,
        }
    }

    /// Select a dataset for later chat turns. The selection only changes
    /// when the file exists.
    async fn load_dataset(&self, session: &mut Session, filename: String) -> Transition {
        match self.files.stat(&filename).await {
            Ok(_) => {
                session.select_dataset(filename.clone());
                info!(client_id = %session.id, filename = %filename, "dataset loaded");
                self.hub.send_to_connection(
                    &session.id,
                    ServerMessage::LoadDatasetSuccess {
                        message: format!(
                            "✅ Loaded dataset: {filename}\n\nYou can now ask questions about this dataset or use /analyze to get insights."
                        ),
                        filename: filename.clone(),
                    },
                );
                Transition::DatasetLoaded(filename)
            }
            Err(e) => {
                warn!(client_id = %session.id, filename = %filename, "dataset load failed: {e}");
                self.hub.send_to_connection(
                    &session.id,
                    ServerMessage::LoadDatasetError {
                        error: e.to_string(),
                        filename: Some(filename.clone()),
                    },
                );
                Transition::DatasetRejected(filename)
            }
        }
    }

    fn spawn(&self, session: &Session, kind: JobKind) -> Transition {
        let handle = self.jobs.dispatch(Job {
            connection_id: session.id.clone(),
            kind,
        });
        Transition::JobSpawned(handle)
    }

    async fn forward(&self, envelope: Envelope) -> Transition {
        let topic = envelope.passthrough_topic();
        match self.hub.publish_external(&topic, envelope).await {
            Ok(()) => Transition::Forwarded { topic },
            Err(e) => {
                warn!(topic = %topic, "pass-through publish failed: {e}");
                Transition::ForwardFailed { topic }
            }
        }
    }
}

#[cfg(test)]
mod tests;
