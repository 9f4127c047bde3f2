//! Bifrost core - wire envelope protocol and bridge configuration.
//!
//! This crate holds the leaf pieces the rest of the bridge builds on:
//! the [`Envelope`] message schema with its parse/serialize contract, and
//! the TOML-backed [`BridgeConfig`].

pub mod config;
pub mod envelope;

pub use config::{BridgeConfig, ConfigError, InfluxConfig, MqttConfig, PathsConfig, UartConfig};
pub use envelope::{looks_like_frame, Envelope, MessageType, ParseError, ENVELOPE_VERSION};

/// Reserved identifier of the bridge itself. Messages addressed here are
/// consumed by the dispatcher instead of being relayed.
pub const CENTRAL: &str = "central";
