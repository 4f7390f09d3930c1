//! Process health summary: upstream link status plus fan-out counters.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::relay::engine::{SharedBroadcaster, lock};
use crate::relay::event::format_timestamp;
use crate::upstream::{BrokerStatus, BrokerStatusHandle};

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: String,
    pub mqtt: BrokerStatus,
    pub viewers: usize,
    pub devices: usize,
    pub keys: usize,
}

pub fn report(broadcaster: &SharedBroadcaster, mqtt: &BrokerStatusHandle) -> HealthReport {
    let (viewers, devices, keys) = {
        let b = lock(broadcaster);
        (b.session_count(), b.cache().device_count(), b.cache().len())
    };
    HealthReport {
        status: "ok",
        timestamp: format_timestamp(&Utc::now()),
        mqtt: mqtt.status(),
        viewers,
        devices,
        keys,
    }
}

pub fn log_report(report: &HealthReport) {
    info!(
        mqtt_connected = report.mqtt.connected,
        mqtt_subscribed = report.mqtt.subscribed,
        reconnect_attempts = report.mqtt.reconnect_attempts,
        viewers = report.viewers,
        devices = report.devices,
        keys = report.keys,
        "Relay status"
    );
}

/// Log a health report every `every`, forever.
pub async fn run_status_logger(broadcaster: SharedBroadcaster, mqtt: BrokerStatusHandle, every: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    loop {
        ticker.tick().await;
        log_report(&report(&broadcaster, &mqtt));
    }
}
