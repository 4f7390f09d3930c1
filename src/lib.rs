//! # bluetti-relay
//!
//! `bluetti-relay` subscribes to a power station's MQTT state topics, keeps
//! the latest value of every (device, property) pair in memory, and fans
//! those values out to any number of WebSocket viewers. A viewer receives a
//! full snapshot when it connects and every change after that, in the order
//! the broker delivered them.
//!
//! ## Core Modules
//!
//! - `upstream`: MQTT connection, subscription and topic parsing.
//! - `relay`: the latest-value cache and the broadcaster that owns it.
//! - `session`: per-viewer session records and the viewer-side state mirror.
//! - `transport`: the viewer JSON protocol and WebSocket server.
//! - `config`: layered configuration loading.
//! - `utils`: error type and logging setup.

pub mod config;
pub mod relay;
pub mod session;
pub mod transport;
pub mod upstream;
pub mod utils;
