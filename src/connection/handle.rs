use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

use crate::transport::message::Frame;

/// Opaque connection id, unique for the life of the process.
pub type ConnectionId = String;

/// Result of offering one frame to a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame is in the queue; the write path will send it.
    Queued,
    /// The queue was at capacity; the frame was discarded.
    Dropped,
    /// The connection is not (or no longer) registered.
    NotFound,
}

/// The hub-side view of a live connection.
///
/// The handle owns the only [`Sender`] for the connection's bounded outbound
/// queue. Dropping the handle is what closes the queue, and only the hub's
/// unregistration path removes handles, so the queue closes exactly once.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Authenticated user, `None` for anonymous connections.
    pub user_id: Option<String>,
    /// Topics this connection is subscribed to, mirrored in the hub's index.
    pub topics: HashSet<String>,
    sender: Sender<Frame>,
}

impl ConnectionHandle {
    /// Create a handle with a fresh id and its outbound queue receiver.
    pub fn new(user_id: Option<String>, capacity: usize) -> (Self, Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: format!("conn-{}", uuid::Uuid::new_v4()),
            user_id,
            topics: HashSet::new(),
            sender,
        };
        (handle, receiver)
    }

    /// A cloned sender used for sending outside the hub lock.
    pub(crate) fn sender(&self) -> Sender<Frame> {
        self.sender.clone()
    }
}

/// Offer a frame without waiting: a full queue drops the frame.
pub(crate) fn offer(sender: &Sender<Frame>, frame: Frame) -> Delivery {
    match sender.try_send(frame) {
        Ok(()) => Delivery::Queued,
        Err(TrySendError::Full(_)) => Delivery::Dropped,
        Err(TrySendError::Closed(_)) => Delivery::NotFound,
    }
}

/// Offer a frame, waiting up to `wait` for queue space before dropping it.
pub(crate) async fn offer_within(sender: &Sender<Frame>, frame: Frame, wait: Duration) -> Delivery {
    match sender.send_timeout(frame, wait).await {
        Ok(()) => Delivery::Queued,
        Err(SendTimeoutError::Timeout(_)) => Delivery::Dropped,
        Err(SendTimeoutError::Closed(_)) => Delivery::NotFound,
    }
}
