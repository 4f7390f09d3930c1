//! The `transport` module is the viewer-facing side of the relay.
//!
//! It defines the JSON protocol spoken with viewers and implements the
//! WebSocket server that turns each connection into a broadcaster session.

pub mod message;
pub mod websocket;

pub use message::{ClientMessage, DeviceUpdate, ServerMessage};
pub use websocket::{serve, start_websocket_server};
