//! Fan-out engine
//!
//! The `Broadcaster` owns the latest-value cache and the arena of connected
//! viewer sessions. It is responsible for:
//! - applying telemetry events to the cache and pushing the delta to every
//!   open session
//! - pushing a full snapshot to a session as it registers, before any delta
//! - probing sessions for liveness and reaping the ones that fail
//! - answering viewer `ping` control frames
//!
//! Concurrency and usage notes:
//! - The API is synchronous and meant to sit behind one lock
//!   (`SharedBroadcaster`). Pushes only enqueue onto each session's
//!   unbounded channel, so the lock is never held across socket I/O.
//! - Events are fed by a single pump task (`run_event_pump`) and processed
//!   to completion one at a time, so every viewer observes the same order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::relay::cache::{StateCache, StateSnapshot};
use crate::relay::event::TelemetryEvent;
use crate::session::{SessionId, ViewerSession};
use crate::transport::message::{DeviceUpdate, ServerMessage};
use crate::utils::error::Result;

pub type SharedBroadcaster = Arc<Mutex<Broadcaster>>;

/// Lock the shared broadcaster, recovering the guard if a previous holder
/// panicked.
pub fn lock(broadcaster: &SharedBroadcaster) -> MutexGuard<'_, Broadcaster> {
    broadcaster.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct Broadcaster {
    pub(crate) cache: StateCache,
    pub(crate) sessions: HashMap<SessionId, ViewerSession>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(StateCache::new())
    }
}

impl Broadcaster {
    pub fn new(cache: StateCache) -> Self {
        Self {
            cache,
            sessions: HashMap::new(),
        }
    }

    pub fn shared(self) -> SharedBroadcaster {
        Arc::new(Mutex::new(self))
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.cache.snapshot()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, id: &SessionId) -> Option<&ViewerSession> {
        self.sessions.get(id)
    }

    /// Apply an event and push the resulting delta to every open session.
    /// Returns how many sessions the delta was queued for.
    pub fn handle_event(&mut self, event: TelemetryEvent) -> usize {
        self.cache.apply(&event);

        let delta = ServerMessage::BluettiData(DeviceUpdate::from(&event));
        let ws_msg = match delta.to_ws() {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Failed to serialize delta: {e}");
                return 0;
            }
        };

        self.fan_out(&ws_msg)
    }

    fn fan_out(&self, ws_msg: &WsMessage) -> usize {
        let mut delivered = 0;
        for (id, session) in &self.sessions {
            if !session.is_open() {
                debug!(session = %id, state = ?session.state(), "Skipping session that is not open");
                continue;
            }
            match session.push(ws_msg.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(session = %id, "Failed to push update: {e}"),
            }
        }
        delivered
    }

    /// Add a freshly accepted session and queue the current snapshot for it.
    ///
    /// The snapshot is enqueued while the caller holds the broadcaster lock,
    /// so no delta can reach the session ahead of it.
    pub fn register_session(&mut self, mut session: ViewerSession) -> Result<SessionId> {
        session.open();
        let snapshot = ServerMessage::InitialData(self.cache.snapshot()).to_ws()?;
        session.push(snapshot)?;

        let id = session.id.clone();
        info!(session = %id, viewers = self.sessions.len() + 1, "Viewer connected");
        self.sessions.insert(id.clone(), session);
        Ok(id)
    }

    /// Hand the session its liveness timer. If the session is already gone
    /// the timer is cancelled straight away.
    pub fn attach_liveness(&mut self, id: &SessionId, timer: AbortHandle) {
        match self.sessions.get_mut(id) {
            Some(session) => session.set_liveness(timer),
            None => timer.abort(),
        }
    }

    /// The viewer asked to close; stop pushing to it until it is removed.
    pub fn begin_close(&mut self, id: &SessionId) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.begin_close();
        }
    }

    /// Drop a session and cancel its liveness timer. Removing an absent
    /// session is a no-op; returns whether anything was removed.
    pub fn remove_session(&mut self, id: &SessionId) -> bool {
        match self.sessions.remove(id) {
            Some(mut session) => {
                session.close();
                info!(session = %id, viewers = self.sessions.len(), "Viewer disconnected");
                true
            }
            None => false,
        }
    }

    /// Push a liveness ping. A session that is missing, not open, whose
    /// queue is closed, or whose previous ping is still unwritten is removed;
    /// returns whether it is still alive.
    pub fn probe(&mut self, id: &SessionId) -> bool {
        let alive = match self.sessions.get_mut(id) {
            Some(session) if session.ping_outstanding() => {
                warn!(session = %id, backlog = session.backlog(), "Viewer stopped reading");
                false
            }
            Some(session) if session.is_open() => match ServerMessage::Ping.to_ws() {
                Ok(ping) => session.push_ping(ping).is_ok(),
                Err(_) => false,
            },
            _ => false,
        };

        if !alive {
            debug!(session = %id, "Liveness probe failed");
            self.remove_session(id);
        }
        alive
    }

    /// Answer a viewer `ping`.
    pub fn reply_pong(&self, id: &SessionId) {
        let Some(session) = self.sessions.get(id) else {
            return;
        };
        let sent = ServerMessage::Pong
            .to_ws()
            .map_err(Into::into)
            .and_then(|pong| session.push(pong));
        if let Err(e) = sent {
            debug!(session = %id, "Could not reply pong: {e}");
        }
    }
}

/// Drain the telemetry channel into the broadcaster, one event at a time,
/// until every sender is dropped.
pub async fn run_event_pump(broadcaster: SharedBroadcaster, mut events: mpsc::Receiver<TelemetryEvent>) {
    while let Some(event) = events.recv().await {
        let delivered = lock(&broadcaster).handle_event(event);
        debug!(delivered, "Broadcast telemetry update");
    }
    info!("Telemetry channel closed, event pump exiting");
}
