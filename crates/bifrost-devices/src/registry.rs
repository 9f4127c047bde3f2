//! Persisted device registry - identifier to device record mapping.
//!
//! The registry is loaded fully at startup and rewritten in full on every
//! mutation. It is single-writer by design: only the dispatch loop mutates
//! it, so no interior locking is carried here. Snapshots are written
//! crash-safe (temp file + atomic rename) so a crash mid-write leaves either
//! the prior durable state or the new one, never a truncated file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::device::DeviceRecord;
use crate::error::{DeviceError, Result};

/// Outcome of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The identifier was free and the record is now durable.
    Registered,
    /// The identifier was already claimed; the stored record is unchanged.
    AlreadyRegistered,
}

impl RegisterOutcome {
    /// Wire status string reported back to the registering device.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Registered => "success",
            Self::AlreadyRegistered => "already_registered",
        }
    }
}

/// Search criteria for [`DeviceRegistry::search`].
///
/// All present fields must match. An empty query matches nothing - a
/// deliberate guard against accidental full dumps.
#[derive(Debug, Clone, Default)]
pub struct DeviceQuery {
    pub device_id: Option<String>,
    pub protocol: Option<String>,
    pub device_type: Option<String>,
    /// Matches a record's destination value (address or topic).
    pub address: Option<String>,
}

impl DeviceQuery {
    /// Query by transport address or topic.
    pub fn by_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.device_id.is_none()
            && self.protocol.is_none()
            && self.device_type.is_none()
            && self.address.is_none()
    }

    fn matches(&self, device_id: &str, record: &DeviceRecord) -> bool {
        if let Some(id) = &self.device_id {
            if device_id != id {
                return false;
            }
        }
        if let Some(protocol) = &self.protocol {
            if record.protocol() != protocol {
                return false;
            }
        }
        if let Some(device_type) = &self.device_type {
            if record.device_type() != device_type {
                return false;
            }
        }
        if let Some(address) = &self.address {
            if record.destination() != address {
                return false;
            }
        }
        true
    }
}

/// Persisted mapping of device identifier to [`DeviceRecord`].
#[derive(Debug)]
pub struct DeviceRegistry {
    path: PathBuf,
    devices: BTreeMap<String, DeviceRecord>,
}

impl DeviceRegistry {
    /// Load the registry snapshot from disk.
    ///
    /// A missing file starts an empty registry and writes the initial
    /// snapshot. A file that is not valid JSON is fatal. Individual records
    /// that fail validation are skipped with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            info!(
                "Registry file '{}' not found, starting an empty registry",
                path.display()
            );
            let registry = Self {
                path,
                devices: BTreeMap::new(),
            };
            registry.persist()?;
            return Ok(registry);
        }

        let raw = std::fs::read_to_string(&path).map_err(|e| DeviceError::RegistryLoad {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let entries: HashMap<String, Value> =
            serde_json::from_str(&raw).map_err(|e| DeviceError::RegistryLoad {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let mut devices = BTreeMap::new();
        for (device_id, value) in entries {
            match serde_json::from_value::<DeviceRecord>(value) {
                Ok(record) => {
                    devices.insert(device_id, record);
                }
                Err(e) => {
                    warn!("Skipping invalid registry record '{device_id}': {e}");
                }
            }
        }

        info!(
            "Device registry loaded, {} valid device(s) found",
            devices.len()
        );
        Ok(Self { path, devices })
    }

    /// Look up a device by its identifier.
    pub fn get_by_id(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.devices.get(device_id)
    }

    /// Find all devices matching the query, ordered by identifier.
    ///
    /// An empty query returns an empty list, never the whole registry.
    pub fn search(&self, query: &DeviceQuery) -> Vec<(&str, &DeviceRecord)> {
        if query.is_empty() {
            return Vec::new();
        }

        self.devices
            .iter()
            .filter(|(id, record)| query.matches(id, record))
            .map(|(id, record)| (id.as_str(), record))
            .collect()
    }

    /// Register a device under `device_id`.
    ///
    /// Registration is append-only per identifier: a claimed id is never
    /// overwritten, the call becomes an idempotent no-op. On success the
    /// snapshot is persisted before returning.
    pub fn add(&mut self, device_id: impl Into<String>, record: DeviceRecord) -> Result<RegisterOutcome> {
        let device_id = device_id.into();

        if self.devices.contains_key(&device_id) {
            info!("Device '{device_id}' already registered, keeping existing record");
            return Ok(RegisterOutcome::AlreadyRegistered);
        }

        self.devices.insert(device_id.clone(), record);
        self.persist()?;
        info!("Device '{device_id}' registered");
        Ok(RegisterOutcome::Registered)
    }

    /// Topics of all registered MQTT devices, used to restore broker
    /// subscriptions at startup.
    pub fn mqtt_topics(&self) -> Vec<&str> {
        self.devices
            .values()
            .filter_map(|record| match record {
                DeviceRecord::Mqtt { topic, .. } => Some(topic.as_str()),
                DeviceRecord::EspNow { .. } => None,
            })
            .collect()
    }

    /// Iterate over all registered devices, ordered by identifier.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceRecord)> {
        self.devices.iter().map(|(id, record)| (id.as_str(), record))
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry holds no devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Write the full snapshot: temp file in the same directory, then atomic
    /// rename over the live path.
    fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.devices).map_err(|e| {
            DeviceError::Persistence {
                path: self.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            }
        })?;

        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, json).map_err(|e| DeviceError::Persistence {
            path: self.path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| DeviceError::Persistence {
            path: self.path.clone(),
            source: e,
        })?;

        debug!("Registry snapshot written to '{}'", self.path.display());
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
