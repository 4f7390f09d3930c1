//! Latest-value cache
//!
//! Holds the most recently applied value for every (device, property) key.
//! There is no history, eviction or TTL: keys live for the process lifetime,
//! which is fine for a handful of devices with a fixed property set.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::relay::event::TelemetryEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub value: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct StateCache {
    devices: HashMap<String, HashMap<String, CachedValue>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `event.value` under its key, replacing whatever was there.
    /// This is the only mutation the cache supports.
    pub fn apply(&mut self, event: &TelemetryEvent) {
        self.devices
            .entry(event.device_id.clone())
            .or_default()
            .insert(
                event.property.clone(),
                CachedValue {
                    value: event.value.clone(),
                    observed_at: event.observed_at,
                },
            );
    }

    pub fn get(&self, device_id: &str, property: &str) -> Option<&CachedValue> {
        self.devices.get(device_id)?.get(property)
    }

    /// An owned copy of every current value.
    pub fn snapshot(&self) -> StateSnapshot {
        let devices = self
            .devices
            .iter()
            .map(|(device, props)| {
                let props = props
                    .iter()
                    .map(|(prop, cached)| (prop.clone(), cached.value.clone()))
                    .collect();
                (device.clone(), props)
            })
            .collect();
        StateSnapshot(devices)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Total number of (device, property) keys.
    pub fn len(&self) -> usize {
        self.devices.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Device → property → value, as sent to a newly connected viewer.
///
/// Serializes as a plain JSON object of objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSnapshot(pub BTreeMap<String, BTreeMap<String, String>>);

impl StateSnapshot {
    pub fn get(&self, device_id: &str, property: &str) -> Option<&str> {
        self.0.get(device_id)?.get(property).map(String::as_str)
    }

    /// Overwrite one key; used by viewers folding deltas into a snapshot.
    pub fn set(&mut self, device_id: &str, property: &str, value: &str) {
        self.0
            .entry(device_id.to_string())
            .or_default()
            .insert(property.to_string(), value.to_string());
    }

    pub fn devices(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, String>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
