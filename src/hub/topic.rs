//! Topic management
//!
//! A `Topic` holds the set of connection IDs subscribed to one topic name.
//! Duplicate subscriptions are a no-op. Topics are created on first
//! subscribe and removed by the hub as soon as they become empty.
//!
//! Concurrency note: topics are only reachable through the hub's registry
//! lock; nothing mutates them outside it.

use std::collections::HashSet;

use crate::connection::ConnectionId;

/// A named topic and the connections subscribed to it.
///
/// The hub keeps one `Topic` per name in its index and mirrors each
/// membership on the subscriber's [`ConnectionHandle`](crate::connection::ConnectionHandle).
#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashSet<ConnectionId>,
}

impl Topic {
    /// Creates a topic with the given name and no subscribers.
    /// The hub calls this on the first subscribe to a name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Adds a subscriber to the topic.
    /// Returns `false` if it was already subscribed, leaving the set as is.
    pub fn subscribe(&mut self, id: ConnectionId) -> bool {
        self.subscribers.insert(id)
    }

    /// Removes a subscriber from the topic.
    /// Returns `false` if it was not subscribed.
    pub fn unsubscribe(&mut self, id: &str) -> bool {
        self.subscribers.remove(id)
    }

    /// Whether nobody listens any more. The hub drops empty topics.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
