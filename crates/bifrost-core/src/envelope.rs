//! Wire envelope - the canonical message unit of the bridge.
//!
//! Every frame that crosses a transport is a JSON object with routing
//! metadata (`src`, `dst`, `type`, `protocol`) and an opaque `payload`
//! object. Parsing is strict about the routing fields; serialization is the
//! canonical inverse: `parse(serialize(e))` yields a field-by-field equal
//! envelope (byte layout and field order are insignificant).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while turning raw frame bytes into an [`Envelope`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// The frame is not valid JSON, is missing a required field, or a field
    /// has the wrong shape (e.g. a non-object payload).
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required routing field is present but empty.
    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),
}

/// Message type carried in the `type` field.
///
/// The wire value set is open: unrecognized strings round-trip through
/// [`MessageType::Other`] instead of failing the parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    State,
    Register,
    RegisterRequest,
    RegisterResponse,
    Command,
    Data,
    #[serde(untagged)]
    Other(String),
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State => write!(f, "state"),
            Self::Register => write!(f, "register"),
            Self::RegisterRequest => write!(f, "register_request"),
            Self::RegisterResponse => write!(f, "register_response"),
            Self::Command => write!(f, "command"),
            Self::Data => write!(f, "data"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Envelope version emitted by this implementation.
pub const ENVELOPE_VERSION: u32 = 1;

fn default_version() -> u32 {
    ENVELOPE_VERSION
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A parsed bridge message. Immutable once constructed; created per message
/// and discarded after dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Schema version tag. Opaque: carried but not interpreted.
    #[serde(default = "default_version")]
    pub v: u32,
    /// Transport protocol tag the message arrived on (or should leave on).
    #[serde(default)]
    pub protocol: String,
    /// Sender identifier or transport address.
    pub src: String,
    /// Destination identifier or transport address.
    pub dst: String,
    /// Message type.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Unix timestamp in seconds.
    #[serde(default = "unix_now")]
    pub ts: i64,
    /// Application payload. Always a JSON object; defaults to empty.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// Build a new envelope stamped with the current version and timestamp.
    pub fn new(
        protocol: impl Into<String>,
        src: impl Into<String>,
        dst: impl Into<String>,
        kind: MessageType,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            v: ENVELOPE_VERSION,
            protocol: protocol.into(),
            src: src.into(),
            dst: dst.into(),
            kind,
            ts: unix_now(),
            payload,
        }
    }

    /// Parse raw frame bytes into an envelope.
    ///
    /// Rejects malformed JSON, missing `src`/`dst`/`type`, empty `src`/`dst`
    /// and non-object payloads. `v`, `ts` and `payload` have defaults.
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let envelope: Self = serde_json::from_slice(raw)?;

        if envelope.src.is_empty() {
            return Err(ParseError::EmptyField("src"));
        }
        if envelope.dst.is_empty() {
            return Err(ParseError::EmptyField("dst"));
        }

        Ok(envelope)
    }

    /// Serialize the envelope to its JSON wire form.
    pub fn serialize(&self) -> String {
        // A constructed envelope always serializes; the fallback mirrors the
        // empty-object frame the transports already discard.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Cheap framing hygiene filter applied by the transport adapters before the
/// parser sees the bytes: a plausible frame is at least 3 bytes and delimited
/// by `{`...`}`. The parser enforces the full schema regardless.
pub fn looks_like_frame(raw: &[u8]) -> bool {
    let trimmed = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|start| {
            let end = raw.iter().rposition(|b| !b.is_ascii_whitespace()).unwrap_or(start);
            &raw[start..=end]
        })
        .unwrap_or(&[]);

    trimmed.len() >= 3 && trimmed.first() == Some(&b'{') && trimmed.last() == Some(&b'}')
}
