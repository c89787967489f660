//! # air-hub
//!
//! `air-hub` is the real-time messaging core of an AI reporting assistant:
//! a WebSocket hub that multiplexes client connections, fans messages out
//! to topics, bridges them to a publish/subscribe bus for multi-instance
//! deployments and runs AI chat and file-analysis requests as background
//! jobs.
//!
//! ## Core Modules
//!
//! - `hub`: the registry of live connections and topic subscriptions.
//! - `connection`: per-connection handle (outbound queue) and session state.
//! - `router`: classifies inbound messages and performs their transitions.
//! - `jobs`: supervised background work with deadlines and panic containment.
//! - `bridge`: the pub/sub bus abstraction and the hub↔bus bridge.
//! - `transport`: the wire protocol and the WebSocket server.
//! - `llm`: the language-model collaborator (Ollama).
//! - `files`: read access to uploaded datasets.
//! - `config`: layered configuration loading.
//! - `utils`: shared error types and logging setup.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod files;
pub mod hub;
pub mod jobs;
pub mod llm;
pub mod router;
pub mod transport;
pub mod utils;
