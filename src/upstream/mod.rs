//! The `upstream` module owns the link to the MQTT broker.
//!
//! `topic` turns `{namespace}/state/{device}/{property}` messages into
//! telemetry events; `mqtt` keeps the connection alive and feeds those
//! events to the broadcaster over a bounded channel.

pub mod mqtt;
pub mod topic;

pub use mqtt::{BrokerStatus, BrokerStatusHandle, ConnectionState, TelemetryClient};
pub use topic::{StateTopicFilter, TopicError};
