//! Handler contract - the seam between the dispatcher and the transports.
//!
//! One handler instance exists per supported protocol, created once at
//! startup and living for the process lifetime. Inbound delivery is a
//! producer/consumer queue: the transport produces (possibly from a
//! background task), the dispatch loop is the sole, non-blocking consumer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use bifrost_core::Envelope;
use bifrost_devices::DeviceRecord;

use crate::error::HandlerError;

/// Protocol-specific transport adapter.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The protocol tag this handler serves (`espnow`, `mqtt`, ...).
    fn protocol(&self) -> &str;

    /// Drain one inbound envelope if available. Never blocks; polled every
    /// loop iteration.
    fn read(&self) -> Option<Envelope>;

    /// Send an envelope to the device described by `device`.
    ///
    /// Implementations must verify that the record's protocol matches their
    /// own and reject with [`HandlerError::ProtocolMismatch`] otherwise.
    async fn write(&self, envelope: &Envelope, device: &DeviceRecord) -> Result<(), HandlerError>;

    /// Start listening for traffic from a newly registered device. The
    /// default is a no-op for transports with nothing to set up.
    async fn track(&self, _device: &DeviceRecord) {}

    /// Release transport resources.
    async fn close(&self);
}

/// The set of live handlers, keyed by protocol tag.
#[derive(Clone, Default)]
pub struct HandlerSet {
    inner: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own protocol tag. A later insert for the
    /// same tag replaces the earlier one.
    pub fn insert(&mut self, handler: Arc<dyn Handler>) {
        self.inner.insert(handler.protocol().to_string(), handler);
    }

    /// Handler for a protocol tag, if configured.
    pub fn get(&self, protocol: &str) -> Option<&Arc<dyn Handler>> {
        self.inner.get(protocol)
    }

    /// All handlers, for round-robin polling.
    pub fn all(&self) -> Vec<Arc<dyn Handler>> {
        self.inner.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Close every handler.
    pub async fn close_all(&self) {
        for handler in self.inner.values() {
            handler.close().await;
        }
    }
}
