//! Background jobs
//!
//! Chat completions and file analyses run on their own tasks so a slow model
//! never stalls a connection's read path. Each job:
//! - queues its start frame before the task is spawned
//! - runs under a hard deadline, with panics caught and shutdown observed
//! - emits exactly one terminal frame (result or error), then the
//!   progress-cleared frame, unless its connection has already left

pub mod prompt;
pub mod runner;

pub use runner::{Job, JobKind, JobOutcome, JobRunner};
