//! The `hub` module is the registry at the centre of the messaging core:
//! live connections, topic subscriptions and best-effort delivery.

pub mod engine;
pub mod topic;

pub use engine::{BroadcastReport, Hub, HubStats};
