//! Viewer-side state reconstruction.
//!
//! Applies an `initial-data` snapshot followed by `bluetti-data` deltas in
//! receipt order. A viewer that does this holds the same state as the
//! relay's cache.

use crate::relay::cache::StateSnapshot;
use crate::transport::message::ServerMessage;

#[derive(Debug, Default)]
pub struct ViewerMirror {
    state: StateSnapshot,
    synced: bool,
}

impl ViewerMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one server frame into the mirror. Returns `true` when state changed.
    pub fn apply(&mut self, msg: &ServerMessage) -> bool {
        match msg {
            ServerMessage::InitialData(snapshot) => {
                self.state = snapshot.clone();
                self.synced = true;
                true
            }
            ServerMessage::BluettiData(update) => {
                self.state
                    .set(&update.device_name, &update.property, &update.value);
                true
            }
            ServerMessage::Ping | ServerMessage::Pong => false,
        }
    }

    pub fn state(&self) -> &StateSnapshot {
        &self.state
    }

    /// Whether an `initial-data` snapshot has been received.
    pub fn is_synced(&self) -> bool {
        self.synced
    }
}
