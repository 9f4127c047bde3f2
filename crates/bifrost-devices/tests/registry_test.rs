//! Tests for DeviceRegistry load, search and registration semantics.

use std::fs;

use bifrost_devices::{DeviceError, DeviceQuery, DeviceRecord, DeviceRegistry, RegisterOutcome};
use tempfile::TempDir;

fn registry_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("devices.json")
}

fn espnow(device_type: &str, address: &str) -> DeviceRecord {
    DeviceRecord::EspNow {
        device_type: device_type.to_string(),
        address: address.to_string(),
    }
}

fn mqtt(device_type: &str, topic: &str) -> DeviceRecord {
    DeviceRecord::Mqtt {
        device_type: device_type.to_string(),
        topic: topic.to_string(),
    }
}

#[test]
fn missing_file_starts_empty_and_writes_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = registry_path(&dir);

    let registry = DeviceRegistry::load(&path).unwrap();
    assert!(registry.is_empty());
    assert!(path.exists(), "initial snapshot should be written");
}

#[test]
fn corrupt_file_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = registry_path(&dir);
    fs::write(&path, "this is not json {").unwrap();

    assert!(matches!(
        DeviceRegistry::load(&path),
        Err(DeviceError::RegistryLoad { .. })
    ));
}

#[test]
fn invalid_records_are_skipped_valid_ones_load() {
    let dir = TempDir::new().unwrap();
    let path = registry_path(&dir);
    fs::write(
        &path,
        r#"{
            "sensor1": {"protocol": "espnow", "device_type": "temp", "address": "AA:BB"},
            "broken": {"protocol": "zigbee", "device_type": "x", "address": "y"},
            "lamp": {"protocol": "mqtt", "device_type": "light", "topic": "home/lamp"}
        }"#,
    )
    .unwrap();

    let registry = DeviceRegistry::load(&path).unwrap();
    assert_eq!(registry.len(), 2);
    assert!(registry.get_by_id("sensor1").is_some());
    assert!(registry.get_by_id("broken").is_none());
    assert!(registry.get_by_id("lamp").is_some());
}

#[test]
fn add_is_idempotent_per_identifier() {
    let dir = TempDir::new().unwrap();
    let mut registry = DeviceRegistry::load(registry_path(&dir)).unwrap();

    let first = espnow("temp", "AA:BB");
    assert_eq!(
        registry.add("sensor1", first.clone()).unwrap(),
        RegisterOutcome::Registered
    );

    // A second registration must not overwrite the stored record.
    let second = espnow("humidity", "CC:DD");
    assert_eq!(
        registry.add("sensor1", second).unwrap(),
        RegisterOutcome::AlreadyRegistered
    );
    assert_eq!(registry.get_by_id("sensor1"), Some(&first));
}

#[test]
fn outcome_status_strings() {
    assert_eq!(RegisterOutcome::Registered.status(), "success");
    assert_eq!(
        RegisterOutcome::AlreadyRegistered.status(),
        "already_registered"
    );
}

#[test]
fn snapshot_survives_reload() {
    let dir = TempDir::new().unwrap();
    let path = registry_path(&dir);

    {
        let mut registry = DeviceRegistry::load(&path).unwrap();
        registry.add("sensor1", espnow("temp", "AA:BB")).unwrap();
        registry.add("lamp", mqtt("light", "home/lamp")).unwrap();
    }

    let reloaded = DeviceRegistry::load(&path).unwrap();
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded.get_by_id("sensor1"), Some(&espnow("temp", "AA:BB")));
    assert_eq!(reloaded.get_by_id("lamp"), Some(&mqtt("light", "home/lamp")));

    // Crash-safe write must not leave the temp file behind.
    assert!(!dir.path().join("devices.json.tmp").exists());
}

#[test]
fn empty_query_matches_nothing() {
    let dir = TempDir::new().unwrap();
    let mut registry = DeviceRegistry::load(registry_path(&dir)).unwrap();
    registry.add("sensor1", espnow("temp", "AA:BB")).unwrap();

    assert!(registry.search(&DeviceQuery::default()).is_empty());
}

#[test]
fn search_by_address_matches_both_variants() {
    let dir = TempDir::new().unwrap();
    let mut registry = DeviceRegistry::load(registry_path(&dir)).unwrap();
    registry.add("sensor1", espnow("temp", "AA:BB")).unwrap();
    registry.add("lamp", mqtt("light", "home/lamp")).unwrap();

    let hits = registry.search(&DeviceQuery::by_address("AA:BB"));
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, "sensor1");

    let hits = registry.search(&DeviceQuery::by_address("home/lamp"));
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, "lamp");

    assert!(registry.search(&DeviceQuery::by_address("nope")).is_empty());
}

#[test]
fn search_combines_criteria() {
    let dir = TempDir::new().unwrap();
    let mut registry = DeviceRegistry::load(registry_path(&dir)).unwrap();
    registry.add("sensor1", espnow("temp", "AA:BB")).unwrap();
    registry.add("sensor2", espnow("temp", "CC:DD")).unwrap();
    registry.add("lamp", mqtt("light", "home/lamp")).unwrap();

    let query = DeviceQuery {
        protocol: Some("espnow".to_string()),
        device_type: Some("temp".to_string()),
        ..DeviceQuery::default()
    };
    let hits = registry.search(&query);
    assert_eq!(hits.len(), 2);
    // Ordered by identifier.
    assert_eq!(hits[0].0, "sensor1");
    assert_eq!(hits[1].0, "sensor2");

    let query = DeviceQuery {
        device_id: Some("sensor2".to_string()),
        protocol: Some("mqtt".to_string()),
        ..DeviceQuery::default()
    };
    assert!(registry.search(&query).is_empty());
}

#[test]
fn mqtt_topics_lists_only_mqtt_devices() {
    let dir = TempDir::new().unwrap();
    let mut registry = DeviceRegistry::load(registry_path(&dir)).unwrap();
    registry.add("sensor1", espnow("temp", "AA:BB")).unwrap();
    registry.add("lamp", mqtt("light", "home/lamp")).unwrap();
    registry.add("plug", mqtt("switch", "home/plug")).unwrap();

    let topics = registry.mqtt_topics();
    assert_eq!(topics.len(), 2);
    assert!(topics.contains(&"home/lamp"));
    assert!(topics.contains(&"home/plug"));
}
