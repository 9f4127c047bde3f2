//! Error types for handlers and the dispatcher.

use thiserror::Error;

use bifrost_devices::DeviceError;

/// Errors a transport handler can report from `write`.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The device record belongs to a different transport than this handler.
    #[error("handler '{handler}' cannot address a '{device}' device")]
    ProtocolMismatch { handler: String, device: String },

    /// The underlying transport rejected or failed the send.
    #[error("transport error: {0}")]
    Transport(String),

    /// The handler has been closed.
    #[error("handler is closed")]
    Closed,
}

/// Errors that abort the dispatch loop.
///
/// Everything else that can go wrong during dispatch is swallowed at the
/// dispatcher boundary with a logged reason; only losing a registration is
/// judged worse than stopping.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("registry persistence failed: {0}")]
    Persistence(#[from] DeviceError),
}
