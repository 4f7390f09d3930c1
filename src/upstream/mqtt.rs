//! Upstream MQTT client
//!
//! Keeps a single connection to the broker and one wildcard subscription
//! for every device state topic. Each accepted publish becomes a
//! [`TelemetryEvent`] sent, in arrival order, on a bounded channel.
//!
//! Reconnection is deliberately simple: any connection error marks the link
//! down, waits the fixed reconnect interval and polls again, forever.
//! The subscription is re-issued on every CONNACK.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, MqttOptions, NetworkOptions, Packet, QoS, SubAck,
    SubscribeReasonCode,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MqttSettings;
use crate::relay::event::TelemetryEvent;
use crate::upstream::topic::{StateTopicFilter, TopicError};

/// Capacity of rumqttc's request queue between `AsyncClient` and the event loop.
const REQUEST_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The one upstream link and its reconnect bookkeeping.
#[derive(Debug, Clone)]
pub struct BrokerConnection {
    pub state: ConnectionState,
    pub subscribed: bool,
    pub subscription: String,
    pub attempts: u32,
    pub next_delay: Duration,
}

impl BrokerConnection {
    fn new(subscription: String, next_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            subscribed: false,
            subscription,
            attempts: 0,
            next_delay,
        }
    }
}

/// Point-in-time view of the upstream link for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub subscribed: bool,
    pub topic: String,
    pub reconnect_attempts: u32,
}

/// Cloneable read handle onto the client's connection state.
#[derive(Debug, Clone)]
pub struct BrokerStatusHandle(Arc<Mutex<BrokerConnection>>);

impl BrokerStatusHandle {
    pub fn status(&self) -> BrokerStatus {
        let conn = lock(&self.0);
        BrokerStatus {
            state: conn.state,
            connected: conn.state == ConnectionState::Connected,
            subscribed: conn.subscribed,
            topic: conn.subscription.clone(),
            reconnect_attempts: conn.attempts,
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.0).state == ConnectionState::Connected
    }
}

fn lock(conn: &Mutex<BrokerConnection>) -> MutexGuard<'_, BrokerConnection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct TelemetryClient {
    settings: MqttSettings,
    filter: StateTopicFilter,
    connection: Arc<Mutex<BrokerConnection>>,
}

impl TelemetryClient {
    pub fn new(settings: MqttSettings) -> Self {
        let filter = StateTopicFilter::new(settings.topic_namespace.clone());
        let connection = BrokerConnection::new(filter.subscription(), settings.reconnect_interval());
        Self {
            settings,
            filter,
            connection: Arc::new(Mutex::new(connection)),
        }
    }

    pub fn status_handle(&self) -> BrokerStatusHandle {
        BrokerStatusHandle(self.connection.clone())
    }

    /// Connection options for the broker. Credentials are only attached when
    /// both halves are configured.
    pub fn mqtt_options(&self) -> MqttOptions {
        let client_id = format!(
            "{}-{}",
            self.settings.client_id,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let mut options = MqttOptions::new(client_id, &self.settings.host, self.settings.port);
        options.set_keep_alive(Duration::from_secs(self.settings.keep_alive_secs.max(1)));
        options.set_clean_session(self.settings.clean_session);
        if let Some((username, password)) = self.settings.credentials() {
            options.set_credentials(username, password);
        }
        options
    }

    /// rumqttc takes the connect timeout in whole seconds; round up.
    pub(crate) fn network_options(&self) -> NetworkOptions {
        let mut network = NetworkOptions::new();
        let secs = self.settings.connect_timeout().as_millis().div_ceil(1000);
        network.set_connection_timeout(u64::try_from(secs).unwrap_or(u64::MAX).max(1));
        network
    }

    /// Drive the MQTT event loop until the event channel's receiver is gone,
    /// whether or not the broker is reachable at that moment.
    pub async fn run(self, events: mpsc::Sender<TelemetryEvent>) {
        let (client, mut eventloop) = AsyncClient::new(self.mqtt_options(), REQUEST_CAPACITY);
        eventloop.set_network_options(self.network_options());

        info!(
            host = %self.settings.host,
            port = self.settings.port,
            topic = %self.filter.subscription(),
            "Connecting to MQTT broker"
        );
        self.set_state(ConnectionState::Connecting);

        loop {
            let polled = tokio::select! {
                _ = events.closed() => break,
                polled = eventloop.poll() => polled,
            };

            match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => self.on_connack(&client),
                Ok(Event::Incoming(Packet::SubAck(ack))) => self.on_suback(&ack),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Some(event) = self.on_publish(&publish.topic, &publish.payload) {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    info!("Broker sent disconnect");
                    self.set_state(ConnectionState::Disconnected);
                }
                Ok(_) => {}
                Err(err) => {
                    let delay = self.on_connection_error(&err);
                    tokio::select! {
                        _ = events.closed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.set_state(ConnectionState::Connecting);
                }
            }
        }

        info!("Telemetry receiver dropped, stopping MQTT client");
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        let mut conn = lock(&self.connection);
        conn.state = state;
        if state != ConnectionState::Connected {
            conn.subscribed = false;
        }
    }

    pub(crate) fn on_connack(&self, client: &AsyncClient) {
        {
            let mut conn = lock(&self.connection);
            conn.state = ConnectionState::Connected;
            conn.subscribed = false;
            conn.attempts = 0;
        }
        info!("Connected to MQTT broker");

        let topic = self.filter.subscription();
        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            error!(topic = %topic, "Failed to request subscription: {e}");
        }
    }

    pub(crate) fn on_suback(&self, ack: &SubAck) {
        let failed = ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure));
        let mut conn = lock(&self.connection);
        if failed {
            error!(topic = %conn.subscription, "Broker rejected subscription");
            conn.subscribed = false;
        } else {
            info!(topic = %conn.subscription, "Subscribed to device state topics");
            conn.subscribed = true;
        }
    }

    /// Record a failed poll and return how long to wait before the next one.
    pub(crate) fn on_connection_error(&self, err: &ConnectionError) -> Duration {
        let mut conn = lock(&self.connection);
        conn.state = ConnectionState::Disconnected;
        conn.subscribed = false;
        conn.attempts = conn.attempts.saturating_add(1);
        conn.next_delay = self.settings.reconnect_interval();
        warn!(
            attempt = conn.attempts,
            retry_in_ms = conn.next_delay.as_millis() as u64,
            "MQTT connection error: {err}"
        );
        conn.next_delay
    }

    pub(crate) fn on_publish(&self, topic: &str, payload: &[u8]) -> Option<TelemetryEvent> {
        match self.filter.parse(topic, payload) {
            Ok(event) => {
                debug!(
                    device = %event.device_id,
                    property = %event.property,
                    value = %event.value,
                    "MQTT data"
                );
                Some(event)
            }
            Err(TopicError::NotStateTopic(topic)) => {
                debug!(topic = %topic, "Ignoring non-state topic");
                None
            }
            Err(err @ TopicError::InvalidPayload { .. }) => {
                warn!("Dropping MQTT message: {err}");
                None
            }
        }
    }
}
