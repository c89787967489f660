//! The `utils` module provides the shared pieces used across `air-hub`:
//! the error taxonomy and logging setup.

pub mod error;
pub mod logging;
