//! State topic parsing
//!
//! Device state arrives on `{namespace}/state/{device}/{property}`. Extra
//! trailing segments are tolerated and ignored; anything with fewer segments
//! or a different prefix is not telemetry.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::relay::event::TelemetryEvent;

const STATE_SEGMENT: &str = "state";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic '{0}' is not a state topic")]
    NotStateTopic(String),

    #[error("payload on '{topic}' is not valid UTF-8: {source}")]
    InvalidPayload {
        topic: String,
        #[source]
        source: std::str::Utf8Error,
    },
}

/// Matches and parses state topics for one namespace.
#[derive(Debug, Clone)]
pub struct StateTopicFilter {
    namespace: String,
}

impl StateTopicFilter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Wildcard subscription covering every device and property.
    pub fn subscription(&self) -> String {
        format!("{}/{STATE_SEGMENT}/+/+", self.namespace)
    }

    /// Parse a message observed now.
    pub fn parse(&self, topic: &str, payload: &[u8]) -> Result<TelemetryEvent, TopicError> {
        self.parse_at(topic, payload, Utc::now())
    }

    pub fn parse_at(
        &self,
        topic: &str,
        payload: &[u8],
        observed_at: DateTime<Utc>,
    ) -> Result<TelemetryEvent, TopicError> {
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.len() < 4
            || segments[0] != self.namespace
            || segments[1] != STATE_SEGMENT
        {
            return Err(TopicError::NotStateTopic(topic.to_string()));
        }

        let value = std::str::from_utf8(payload).map_err(|source| TopicError::InvalidPayload {
            topic: topic.to_string(),
            source,
        })?;

        Ok(TelemetryEvent::new(
            segments[2],
            segments[3],
            value,
            observed_at,
            topic,
        ))
    }
}
