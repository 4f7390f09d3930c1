//! The `relay` module is the stateful core: the latest-value cache and the
//! broadcaster that fans telemetry out to viewers.
//!
//! - `event`: the parsed telemetry record handed over by the upstream client
//! - `cache`: latest value per (device, property) and its snapshot form
//! - `engine`: the `Broadcaster`, its session arena and the event pump
//! - `health`: status report combining upstream and fan-out state

pub mod cache;
pub mod engine;
pub mod event;
pub mod health;

pub use cache::{StateCache, StateSnapshot};
pub use engine::{Broadcaster, SharedBroadcaster, run_event_pump};
pub use event::TelemetryEvent;

#[cfg(test)]
mod tests;
