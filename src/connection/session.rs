use super::handle::ConnectionId;

/// Per-connection state owned by the connection's read path.
///
/// Only the router, acting on this connection's own inbound messages, holds
/// `&mut Session`; jobs receive copies of what they need at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: ConnectionId,
    pub user_id: Option<String>,
    selected_dataset: Option<String>,
}

impl Session {
    /// Fresh state for a connection that has no dataset selected yet.
    pub fn new(id: ConnectionId, user_id: Option<String>) -> Self {
        Self {
            id,
            user_id,
            selected_dataset: None,
        }
    }

    /// The dataset chat jobs consult for data questions, if any.
    pub fn selected_dataset(&self) -> Option<&str> {
        self.selected_dataset.as_deref()
    }

    /// Replace the selected dataset. Callers check the file exists first.
    pub fn select_dataset(&mut self, filename: impl Into<String>) {
        self.selected_dataset = Some(filename.into());
    }

    /// User id used for per-user topics; anonymous connections share one.
    pub fn user_label(&self) -> &str {
        self.user_id.as_deref().unwrap_or("anonymous")
    }
}
