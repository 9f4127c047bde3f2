//! Telemetry sink contract and the InfluxDB implementation.
//!
//! Relayed traffic is mirrored into a time-series store as a fire-and-forget
//! side effect: the dispatcher never retries a failed write and a sink error
//! never affects routing.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use bifrost_core::envelope::Envelope;
use bifrost_core::InfluxConfig;

/// Errors from a telemetry sink write. Logged by the caller, never fatal.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telemetry endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// One time-series data point derived from a relayed envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Measurement name - the sending device's type.
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: Map<String, Value>,
}

impl Point {
    /// Build a point from an envelope: payload becomes the fields, routing
    /// metadata becomes the tags.
    pub fn from_envelope(envelope: &Envelope, measurement: impl Into<String>) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert("src".to_string(), envelope.src.clone());
        tags.insert("protocol".to_string(), envelope.protocol.clone());
        tags.insert("type".to_string(), envelope.kind.to_string());

        Self {
            measurement: measurement.into(),
            tags,
            fields: envelope.payload.clone(),
        }
    }

    /// Render the point in InfluxDB line protocol (second precision).
    fn to_line_protocol(&self) -> Option<String> {
        let mut line = escape_key(&self.measurement);
        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        let fields: Vec<String> = self
            .fields
            .iter()
            .filter_map(|(key, value)| {
                field_value(value).map(|v| format!("{}={v}", escape_key(key)))
            })
            .collect();

        // A point without any representable field is not valid line protocol.
        if fields.is_empty() {
            return None;
        }

        line.push(' ');
        line.push_str(&fields.join(","));
        Some(line)
    }
}

fn escape_key(raw: &str) -> String {
    raw.replace(' ', "\\ ").replace(',', "\\,").replace('=', "\\=")
}

fn field_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::String(s) => Some(format!("\"{}\"", s.replace('"', "\\\""))),
        // Nested structures are stored as their JSON text.
        Value::Array(_) | Value::Object(_) => {
            Some(format!("\"{}\"", value.to_string().replace('"', "\\\"")))
        }
        Value::Null => None,
    }
}

/// Abstract telemetry destination consumed by the dispatcher.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Write one point. The dispatcher ignores the result beyond logging.
    async fn write(&self, point: Point) -> Result<(), TelemetryError>;
}

/// Sink that discards every point. Used when no store is configured.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl TelemetrySink for NullSink {
    async fn write(&self, point: Point) -> Result<(), TelemetryError> {
        debug!("Telemetry discarded (no sink configured): {}", point.measurement);
        Ok(())
    }
}

/// InfluxDB v2 sink writing line protocol over HTTP.
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    token: String,
}

impl InfluxSink {
    /// Build a sink for the configured InfluxDB v2 endpoint.
    pub fn new(config: &InfluxConfig) -> Self {
        let write_url = format!(
            "{}/api/v2/write?org={}&bucket={}&precision=s",
            config.url.trim_end_matches('/'),
            config.org,
            config.bucket
        );
        Self {
            client: reqwest::Client::new(),
            write_url,
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl TelemetrySink for InfluxSink {
    async fn write(&self, point: Point) -> Result<(), TelemetryError> {
        let Some(line) = point.to_line_protocol() else {
            debug!("Telemetry point for '{}' has no fields, skipped", point.measurement);
            return Ok(());
        };

        let response = self
            .client
            .post(&self.write_url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelemetryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
