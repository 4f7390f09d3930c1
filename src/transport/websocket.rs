//! WebSocket transport
//!
//! Accepts viewer connections and wires each one to the broadcaster:
//! - perform the WebSocket handshake (the session is `Connecting` until then)
//! - register the session, which queues the `initial-data` snapshot
//! - run a writer task draining the session's queue into the socket
//! - run a liveness timer that pings the viewer every `ping_interval`
//! - read control frames until the viewer goes away, then tear down once

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::config::RelaySettings;
use crate::relay::engine::{SharedBroadcaster, lock};
use crate::session::{SessionId, ViewerSession};
use crate::transport::message::ClientMessage;
use crate::utils::error::Result;

/// Floor for the ping interval; `tokio::time::interval` rejects zero.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(10);

/// Bind `addr` and serve viewers until the task is dropped.
pub async fn start_websocket_server(
    addr: &str,
    broadcaster: SharedBroadcaster,
    settings: &RelaySettings,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    serve(listener, broadcaster, settings.ping_interval()).await;
    Ok(())
}

/// Accept loop over an already bound listener.
pub async fn serve(listener: TcpListener, broadcaster: SharedBroadcaster, ping_interval: Duration) {
    let ping_interval = ping_interval.max(MIN_PING_INTERVAL);
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                spawn(handle_connection(stream, peer, broadcaster.clone(), ping_interval));
            }
            Err(e) => warn!("Failed to accept connection: {e}"),
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    broadcaster: SharedBroadcaster,
    ping_interval: Duration,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let session = ViewerSession::new(tx);
    let session_id = session.id.clone();
    let progress = session.write_progress();

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(session = %session_id, %peer, "WebSocket handshake error: {e}");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    if let Err(e) = lock(&broadcaster).register_session(session) {
        warn!(session = %session_id, %peer, "Failed to register viewer: {e}");
        return;
    }
    debug!(session = %session_id, %peer, "Viewer session open");

    let cleanup_called = Arc::new(AtomicBool::new(false));

    let do_cleanup = {
        let broadcaster = broadcaster.clone();
        let session_id = session_id.clone();
        let cleanup_called = cleanup_called.clone();

        move || {
            if !cleanup_called.swap(true, Ordering::SeqCst) {
                lock(&broadcaster).remove_session(&session_id);
            }
        }
    };

    let timer = spawn(run_liveness(
        broadcaster.clone(),
        session_id.clone(),
        ping_interval,
    ));
    lock(&broadcaster).attach_liveness(&session_id, timer.abort_handle());

    {
        let session_id = session_id.clone();
        let do_cleanup = do_cleanup.clone();

        spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    warn!(session = %session_id, "Failed to send message: {e}");
                    break;
                }
                progress.record_written();
            }

            do_cleanup();
            debug!(session = %session_id, "Send loop closed");
        });
    }

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => handle_client_message(&broadcaster, &session_id, text.as_str()),
            Ok(WsMessage::Close(_)) => lock(&broadcaster).begin_close(&session_id),
            Ok(_) => {}
            Err(e) => {
                debug!(session = %session_id, "WebSocket read error: {e}");
                break;
            }
        }
    }

    do_cleanup();
}

/// Ping the session every `every` until a probe fails.
async fn run_liveness(broadcaster: SharedBroadcaster, session_id: SessionId, every: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !lock(&broadcaster).probe(&session_id) {
            break;
        }
    }
}

/// Handle one text frame from a viewer. Nothing here closes the session.
pub fn handle_client_message(broadcaster: &SharedBroadcaster, session_id: &SessionId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping) => lock(broadcaster).reply_pong(session_id),
        Ok(ClientMessage::Pong) => debug!(session = %session_id, "Pong from viewer"),
        Ok(ClientMessage::Unknown) => info!(
            session = %session_id,
            "Unknown message type from viewer: {}",
            &text.chars().take(100).collect::<String>()
        ),
        Err(err) => warn!(
            session = %session_id,
            "Invalid viewer message: {err} | {}",
            &text.chars().take(100).collect::<String>()
        ),
    }
}
