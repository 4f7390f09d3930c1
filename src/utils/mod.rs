//! The `utils` module provides shared pieces used across the relay:
//! the crate-wide error type and tracing initialization.

pub mod error;
pub mod logging;
