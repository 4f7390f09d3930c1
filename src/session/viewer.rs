//! Viewer session record
//!
//! One record per WebSocket viewer, owned by the broadcaster's session
//! arena. It carries the sending half of the viewer's outbound queue (the
//! transport drains the other half into the socket), the session state and
//! the handle of the liveness timer so closing can cancel it.
//!
//! Delivery progress is tracked with two counters: frames queued by `push`
//! and frames the writer has actually put on the socket. A liveness ping is
//! considered answered once the writer has moved past it; a viewer that stops
//! reading leaves its previous ping unwritten and fails the next probe.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::utils::error::RelayError;

pub type SessionId = String;

/// `Connecting → Open → Closing → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug)]
pub struct ViewerSession {
    pub id: SessionId,
    sender: UnboundedSender<WsMessage>,
    state: SessionState,
    liveness: Option<AbortHandle>,
    queued: AtomicU64,
    written: Arc<AtomicU64>,
    pending_ping: Option<u64>,
}

/// Writer-side handle for reporting frames that reached the socket.
#[derive(Debug, Clone)]
pub struct WriteProgress(Arc<AtomicU64>);

impl WriteProgress {
    pub fn record_written(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

impl ViewerSession {
    /// A session for a connection whose handshake has not completed yet.
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            state: SessionState::Connecting,
            liveness: None,
            queued: AtomicU64::new(0),
            written: Arc::new(AtomicU64::new(0)),
            pending_ping: None,
        }
    }

    /// Handle for the task draining this session's queue into the socket.
    pub fn write_progress(&self) -> WriteProgress {
        WriteProgress(self.written.clone())
    }

    /// Frames queued but not yet written.
    pub fn backlog(&self) -> u64 {
        self.queued
            .load(Ordering::Acquire)
            .saturating_sub(self.written.load(Ordering::Acquire))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Open and the outbound queue still has a reader.
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open && !self.sender.is_closed()
    }

    pub fn has_liveness_timer(&self) -> bool {
        self.liveness.is_some()
    }

    pub(crate) fn open(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Open;
        }
    }

    pub(crate) fn begin_close(&mut self) {
        if self.state == SessionState::Open {
            self.state = SessionState::Closing;
        }
    }

    /// Queue a frame for the viewer. Fails without side effects when the
    /// session is not open or its writer has gone away.
    pub fn push(&self, msg: WsMessage) -> Result<(), RelayError> {
        if self.state != SessionState::Open {
            return Err(RelayError::SessionNotOpen(self.id.clone()));
        }
        self.sender
            .send(msg)
            .map_err(|_| RelayError::ChannelClosed(self.id.clone()))?;
        self.queued.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Whether the ping queued by the previous probe is still unwritten.
    pub fn ping_outstanding(&self) -> bool {
        self.pending_ping
            .is_some_and(|position| self.written.load(Ordering::Acquire) < position)
    }

    /// Queue a liveness ping and remember its position in the queue.
    pub(crate) fn push_ping(&mut self, ping: WsMessage) -> Result<(), RelayError> {
        self.push(ping)?;
        self.pending_ping = Some(self.queued.load(Ordering::Acquire));
        Ok(())
    }

    /// Attach the liveness timer, cancelling any previous one.
    pub(crate) fn set_liveness(&mut self, handle: AbortHandle) {
        if let Some(old) = self.liveness.replace(handle) {
            old.abort();
        }
    }

    /// Enter `Closed` and cancel the liveness timer. Repeated calls are no-ops.
    pub(crate) fn close(&mut self) {
        self.state = SessionState::Closed;
        if let Some(timer) = self.liveness.take() {
            timer.abort();
        }
    }
}
