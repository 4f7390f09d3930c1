use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration settings for the relay.
///
/// Covers the viewer-facing WebSocket server, the upstream MQTT link and the
/// fan-out tuning knobs.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub mqtt: MqttSettings,
    pub relay: RelaySettings,
}

/// Where the WebSocket server listens.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Upstream broker connection settings.
///
/// `username` and `password` are only sent when both are present and
/// non-empty.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub clean_session: bool,
    pub connect_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub keep_alive_secs: u64,
    pub topic_namespace: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RelaySettings {
    pub ping_interval_secs: u64,
    pub event_channel_capacity: usize,
    pub status_interval_secs: u64,
}

impl MqttSettings {
    /// Credentials to put on the CONNECT packet, if any.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl RelaySettings {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// `None` when periodic status logging is disabled.
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from
/// `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub mqtt: Option<PartialMqttSettings>,
    pub relay: Option<PartialRelaySettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialMqttSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub clean_session: Option<bool>,
    pub connect_timeout_ms: Option<u64>,
    pub reconnect_interval_ms: Option<u64>,
    pub keep_alive_secs: Option<u64>,
    pub topic_namespace: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialRelaySettings {
    pub ping_interval_secs: Option<u64>,
    pub event_channel_capacity: Option<usize>,
    pub status_interval_secs: Option<u64>,
}

impl PartialSettings {
    /// Fill every missing value from `default`.
    pub fn merge_over(self, default: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let mqtt = self.mqtt.unwrap_or_default();
        let relay = self.relay.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
            },
            mqtt: MqttSettings {
                host: mqtt.host.unwrap_or(default.mqtt.host),
                port: mqtt.port.unwrap_or(default.mqtt.port),
                username: mqtt.username.or(default.mqtt.username),
                password: mqtt.password.or(default.mqtt.password),
                client_id: mqtt.client_id.unwrap_or(default.mqtt.client_id),
                clean_session: mqtt.clean_session.unwrap_or(default.mqtt.clean_session),
                connect_timeout_ms: mqtt
                    .connect_timeout_ms
                    .unwrap_or(default.mqtt.connect_timeout_ms),
                reconnect_interval_ms: mqtt
                    .reconnect_interval_ms
                    .unwrap_or(default.mqtt.reconnect_interval_ms),
                keep_alive_secs: mqtt.keep_alive_secs.unwrap_or(default.mqtt.keep_alive_secs),
                topic_namespace: mqtt
                    .topic_namespace
                    .unwrap_or(default.mqtt.topic_namespace),
            },
            relay: RelaySettings {
                ping_interval_secs: relay
                    .ping_interval_secs
                    .unwrap_or(default.relay.ping_interval_secs),
                event_channel_capacity: relay
                    .event_channel_capacity
                    .unwrap_or(default.relay.event_channel_capacity),
                status_interval_secs: relay
                    .status_interval_secs
                    .unwrap_or(default.relay.status_interval_secs),
            },
        }
    }
}

/// Defaults match the original single-device deployment: local broker,
/// 1 s reconnect, 4 s connect timeout, 30 s viewer pings.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 8082,
            },
            mqtt: MqttSettings {
                host: "localhost".to_string(),
                port: 1883,
                username: None,
                password: None,
                client_id: "bluetti-relay".to_string(),
                clean_session: true,
                connect_timeout_ms: 4000,
                reconnect_interval_ms: 1000,
                keep_alive_secs: 30,
                topic_namespace: "bluetti".to_string(),
            },
            relay: RelaySettings {
                ping_interval_secs: 30,
                event_channel_capacity: 256,
                status_interval_secs: 60,
            },
        }
    }
}
