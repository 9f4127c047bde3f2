//! Bridge configuration loaded from a TOML file.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub paths: PathsConfig,
    pub mqtt: MqttConfig,
    pub uart: UartConfig,
    /// Optional telemetry sink; absent means telemetry is discarded.
    pub influx: Option<InfluxConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            mqtt: MqttConfig::default(),
            uart: UartConfig::default(),
            influx: None,
        }
    }
}

/// File locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Persisted device registry snapshot.
    pub device_registry: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            device_registry: PathBuf::from("devices.json"),
        }
    }
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    /// Topics subscribed at startup, in addition to the topics of registered
    /// MQTT devices.
    pub topics: Vec<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            topics: Vec::new(),
        }
    }
}

/// Serial port settings for the ESP-NOW radio link.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UartConfig {
    pub port: String,
    pub baudrate: u32,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA3".to_string(),
            baudrate: 9600,
        }
    }
}

/// InfluxDB v2 write endpoint for the telemetry sink.
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    #[serde(default)]
    pub token: String,
}

impl BridgeConfig {
    /// Load the configuration from a TOML file.
    ///
    /// The InfluxDB token may be supplied (or overridden) via the
    /// `INFLUXDB_TOKEN` environment variable instead of the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = toml::from_str(&raw)?;

        if let Some(influx) = config.influx.as_mut() {
            if let Ok(token) = std::env::var("INFLUXDB_TOKEN") {
                influx.token = token;
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = BridgeConfig::default();
        assert_eq!(config.mqtt.broker, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.uart.baudrate, 9600);
        assert!(config.influx.is_none());
    }

    #[test]
    fn load_parses_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[paths]
device_registry = "/var/lib/bifrost/devices.json"

[mqtt]
broker = "broker.local"
port = 8883
topics = ["bifrost/#"]

[uart]
port = "/dev/ttyUSB0"
baudrate = 115200

[influx]
url = "http://localhost:8086"
org = "home"
bucket = "iot"
token = "secret"
"#
        )
        .unwrap();

        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(
            config.paths.device_registry,
            PathBuf::from("/var/lib/bifrost/devices.json")
        );
        assert_eq!(config.mqtt.broker, "broker.local");
        assert_eq!(config.mqtt.topics, vec!["bifrost/#".to_string()]);
        assert_eq!(config.uart.port, "/dev/ttyUSB0");
        assert_eq!(config.influx.unwrap().bucket, "iot");
    }

    #[test]
    fn load_tolerates_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[mqtt]\nbroker = \"10.0.0.2\"\n").unwrap();

        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.mqtt.broker, "10.0.0.2");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.uart.baudrate, 9600);
    }

    #[test]
    fn load_rejects_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not toml = = =").unwrap();

        assert!(matches!(
            BridgeConfig::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
