//! Configuration loading.
//!
//! Sources, lowest to highest precedence: built-in defaults,
//! `config/default.*`, `RELAY_<SECTION>__<KEY>` environment variables, and
//! the bare variable names the original deployment used (`PORT`,
//! `MQTT_BROKER_HOST`, `MQTT_BROKER_PORT`, `MQTT_USERNAME`, `MQTT_PASSWORD`).

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{MqttSettings, RelaySettings, ServerSettings, Settings};

/// Compatibility environment variables and the keys they override.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("PORT", "server.port"),
    ("MQTT_BROKER_HOST", "mqtt.host"),
    ("MQTT_BROKER_PORT", "mqtt.port"),
    ("MQTT_USERNAME", "mqtt.username"),
    ("MQTT_PASSWORD", "mqtt.password"),
];

/// Loads the configuration from the default file and environment variables
/// and merges it over `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let mut builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__"),
        );

    for (var, key) in LEGACY_ENV {
        let value = std::env::var(var).ok().filter(|v| !v.is_empty());
        builder = builder.set_override_option(*key, value)?;
    }

    let partial: PartialSettings = builder.build()?.try_deserialize()?;
    Ok(partial.merge_over(Settings::default()))
}
