//! Error types shared by the relay's library code.
//!
//! Parse failures on the upstream side have their own type in
//! `upstream::topic`; everything else surfaces as a [`RelayError`].

use thiserror::Error;

use crate::session::SessionId;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("outbound queue for session {0} is closed")]
    ChannelClosed(SessionId),

    #[error("session {0} is not open")]
    SessionNotOpen(SessionId),
}

pub type Result<T> = std::result::Result<T, RelayError>;
