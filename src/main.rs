//! CLI for bluetti-relay
//!
//! Subcommands:
//! - `serve`: run the relay (MQTT in, WebSocket out)
//! - `watch`: connect as a viewer and print state changes (useful for smoke tests)

use bluetti_relay::config::load_config;
use bluetti_relay::relay::health;
use bluetti_relay::relay::{Broadcaster, StateCache, run_event_pump};
use bluetti_relay::session::ViewerMirror;
use bluetti_relay::transport::{ServerMessage, start_websocket_server};
use bluetti_relay::upstream::TelemetryClient;
use bluetti_relay::utils::logging;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "bluetti-relay")]
enum Command {
    /// Run the relay
    Serve {
        /// Log level used when RUST_LOG is not set
        #[arg(long, default_value = "info")]
        log_level: String,
    },
    /// Connect as a viewer and print every state change
    Watch {
        /// WebSocket URL of a running relay
        #[arg(long, default_value = "ws://127.0.0.1:8082")]
        url: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let result = match cmd {
        Command::Serve { log_level } => {
            logging::init(&log_level);
            run_server().await
        }
        Command::Watch { url } => {
            logging::init("warn");
            run_watch(&url).await
        }
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let broadcaster = Broadcaster::new(StateCache::new()).shared();
    let (events_tx, events_rx) = mpsc::channel(config.relay.event_channel_capacity.max(1));

    let upstream = TelemetryClient::new(config.mqtt.clone());
    let mqtt_status = upstream.status_handle();

    tokio::spawn(upstream.run(events_tx));
    tokio::spawn(run_event_pump(broadcaster.clone(), events_rx));
    if let Some(every) = config.relay.status_interval() {
        tokio::spawn(health::run_status_logger(
            broadcaster.clone(),
            mqtt_status.clone(),
            every,
        ));
    }

    tokio::select! {
        res = start_websocket_server(&addr, broadcaster.clone(), &config.relay) => {
            res?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    health::log_report(&health::report(&broadcaster, &mqtt_status));
    Ok(())
}

async fn run_watch(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let (mut ws_stream, _response) = connect_async(url).await?;
    let mut mirror = ViewerMirror::new();

    while let Some(frame) = ws_stream.next().await {
        let WsMessage::Text(text) = frame? else {
            continue;
        };
        let msg: ServerMessage = match serde_json::from_str(text.as_str()) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Unreadable frame: {e}");
                continue;
            }
        };

        match &msg {
            ServerMessage::InitialData(snapshot) => {
                println!("Snapshot:");
                for (device, props) in snapshot.devices() {
                    for (property, value) in props {
                        println!("  {device}/{property} = {value}");
                    }
                }
            }
            ServerMessage::BluettiData(update) => println!(
                "{} {}/{} = {}",
                update.timestamp, update.device_name, update.property, update.value
            ),
            ServerMessage::Ping => {
                let pong = serde_json::json!({ "type": "pong" });
                ws_stream.send(WsMessage::Text(pong.to_string().into())).await?;
            }
            ServerMessage::Pong => {}
        }
        mirror.apply(&msg);
    }

    let devices = mirror.state().devices().count();
    println!("Connection closed ({devices} devices seen)");
    Ok(())
}
