//! Viewer wire protocol
//!
//! Every frame is a JSON text message tagged by `type`. Server frames carry
//! their body under `data`.

use serde::{Deserialize, Serialize};
use tungstenite::protocol::Message as WsMessage;

use crate::relay::cache::StateSnapshot;
use crate::relay::event::TelemetryEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "initial-data")]
    InitialData(StateSnapshot),
    #[serde(rename = "bluetti-data")]
    BluettiData(DeviceUpdate),
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
}

/// Body of a `bluetti-data` delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUpdate {
    pub device_name: String,
    pub property: String,
    pub value: String,
    pub timestamp: String,
}

impl From<&TelemetryEvent> for DeviceUpdate {
    fn from(event: &TelemetryEvent) -> Self {
        Self {
            device_name: event.device_id.clone(),
            property: event.property.clone(),
            value: event.value.clone(),
            timestamp: event.timestamp(),
        }
    }
}

impl ServerMessage {
    pub fn to_ws(&self) -> Result<WsMessage, serde_json::Error> {
        Ok(WsMessage::text(serde_json::to_string(self)?))
    }
}

/// Control frames a viewer may send. Anything with an unrecognized `type`
/// lands in `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    #[serde(other)]
    Unknown,
}
