//! Telemetry events flowing from the upstream client into the broadcaster.

use chrono::{DateTime, SecondsFormat, Utc};

/// One parsed device reading.
///
/// `value` is the raw payload text; the relay never interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryEvent {
    pub device_id: String,
    pub property: String,
    pub value: String,
    pub observed_at: DateTime<Utc>,
    pub source_topic: String,
}

impl TelemetryEvent {
    pub fn new(
        device_id: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
        observed_at: DateTime<Utc>,
        source_topic: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            property: property.into(),
            value: value.into(),
            observed_at,
            source_topic: source_topic.into(),
        }
    }

    /// `observed_at` as RFC 3339 with millisecond precision and a `Z` suffix.
    pub fn timestamp(&self) -> String {
        format_timestamp(&self.observed_at)
    }
}

pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
