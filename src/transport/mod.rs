//! The `transport` module is responsible for network communication with
//! clients over WebSockets.
//!
//! It defines the wire envelope and the inbound/outbound message sets, and
//! runs the server: handshake identity, one read path and one write path per
//! connection, heartbeats and write coalescing.

pub mod message;
pub mod websocket;
