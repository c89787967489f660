//! The `connection` module defines the two halves of a connected client.
//!
//! [`ConnectionHandle`] is what the hub stores: identity, subscribed topics
//! and the sender side of the bounded outbound queue. [`Session`] is what the
//! connection's own read path keeps: identity plus the currently selected
//! dataset.

pub mod handle;
pub mod session;

pub use handle::{ConnectionHandle, ConnectionId, Delivery};
pub use session::Session;
