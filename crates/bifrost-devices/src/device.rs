//! Device identity model - one record variant per transport.
//!
//! A [`DeviceRecord`] binds an opaque device identifier to a
//! protocol-specific transport address. The union is discriminated by the
//! `protocol` field on the wire; adding a transport means adding one variant
//! here plus one handler binding, without touching the existing variants.

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Wire tag for the ESP-NOW transport.
pub const PROTOCOL_ESPNOW: &str = "espnow";
/// Wire tag for the MQTT transport.
pub const PROTOCOL_MQTT: &str = "mqtt";

/// A registry entry describing how to reach one device.
///
/// Immutable after construction. Unknown extra fields in the serialized form
/// are tolerated on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum DeviceRecord {
    /// A device reached over the framed ESP-NOW serial link.
    EspNow {
        device_type: String,
        /// Radio MAC address, e.g. `AA:BB:CC:DD:EE:FF`.
        address: String,
    },
    /// A device (or topic) reached through the MQTT broker.
    Mqtt {
        device_type: String,
        /// Broker topic the device listens on.
        topic: String,
    },
}

impl DeviceRecord {
    /// Construct a record from registration payload fields.
    ///
    /// An unknown protocol tag is a validation error and yields no record.
    pub fn from_registration(
        protocol: &str,
        device_type: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self, DeviceError> {
        match protocol {
            PROTOCOL_ESPNOW => Ok(Self::EspNow {
                device_type: device_type.into(),
                address: source.into(),
            }),
            PROTOCOL_MQTT => Ok(Self::Mqtt {
                device_type: device_type.into(),
                topic: source.into(),
            }),
            other => Err(DeviceError::Validation(format!(
                "unknown protocol '{other}'"
            ))),
        }
    }

    /// The transport address or topic used for outbound addressing.
    pub fn destination(&self) -> &str {
        match self {
            Self::EspNow { address, .. } => address,
            Self::Mqtt { topic, .. } => topic,
        }
    }

    /// The device type label, used as the telemetry measurement name.
    pub fn device_type(&self) -> &str {
        match self {
            Self::EspNow { device_type, .. } | Self::Mqtt { device_type, .. } => device_type,
        }
    }

    /// The wire protocol tag, used to pick the matching handler.
    pub fn protocol(&self) -> &'static str {
        match self {
            Self::EspNow { .. } => PROTOCOL_ESPNOW,
            Self::Mqtt { .. } => PROTOCOL_MQTT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_registration_builds_matching_variant() {
        let espnow = DeviceRecord::from_registration("espnow", "temp", "AA:BB").unwrap();
        assert_eq!(espnow.destination(), "AA:BB");
        assert_eq!(espnow.protocol(), "espnow");
        assert_eq!(espnow.device_type(), "temp");

        let mqtt = DeviceRecord::from_registration("mqtt", "lamp", "home/lamp").unwrap();
        assert_eq!(mqtt.destination(), "home/lamp");
        assert_eq!(mqtt.protocol(), "mqtt");
    }

    #[test]
    fn from_registration_rejects_unknown_protocol() {
        let err = DeviceRecord::from_registration("lora", "temp", "addr");
        assert!(matches!(err, Err(DeviceError::Validation(_))));
    }

    #[test]
    fn serialized_form_is_tagged_by_protocol() {
        let record = DeviceRecord::EspNow {
            device_type: "temp".to_string(),
            address: "AA:BB".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["protocol"], "espnow");
        assert_eq!(json["address"], "AA:BB");
        assert_eq!(json["device_type"], "temp");
    }

    #[test]
    fn load_tolerates_unknown_extra_fields() {
        let raw = r#"{"protocol":"mqtt","device_type":"lamp","topic":"home/lamp","firmware":"2.1"}"#;
        let record: DeviceRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.destination(), "home/lamp");
    }

    #[test]
    fn load_rejects_missing_variant_field() {
        let raw = r#"{"protocol":"mqtt","device_type":"lamp"}"#;
        assert!(serde_json::from_str::<DeviceRecord>(raw).is_err());
    }

    #[test]
    fn load_rejects_unknown_tag() {
        let raw = r#"{"protocol":"zigbee","device_type":"lamp","address":"x"}"#;
        assert!(serde_json::from_str::<DeviceRecord>(raw).is_err());
    }
}
