//! Device identity model, persisted registry and telemetry sink.
//!
//! - **[`DeviceRecord`]**: tagged union binding a device to its transport
//!   address, one variant per protocol.
//! - **[`DeviceRegistry`]**: identifier-to-record mapping persisted as a
//!   JSON snapshot, loaded once at startup and rewritten crash-safe on every
//!   registration.
//! - **[`TelemetrySink`]**: fire-and-forget time-series contract with an
//!   InfluxDB v2 implementation.

pub mod device;
pub mod error;
pub mod registry;
pub mod telemetry;

pub use device::{DeviceRecord, PROTOCOL_ESPNOW, PROTOCOL_MQTT};
pub use error::{DeviceError, Result};
pub use registry::{DeviceQuery, DeviceRegistry, RegisterOutcome};
pub use telemetry::{InfluxSink, NullSink, Point, TelemetryError, TelemetrySink};
