//! Error types for the device model and registry.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur in the device registry.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// A device record failed structural validation (unknown protocol tag or
    /// missing variant field). Never yields a partially constructed record.
    #[error("invalid device record: {0}")]
    Validation(String),

    /// The persisted registry snapshot is not valid JSON. Fatal at startup.
    #[error("registry file '{path}' is unreadable: {reason}")]
    RegistryLoad { path: PathBuf, reason: String },

    /// Writing the registry snapshot failed. Fatal: losing a registration
    /// silently is worse than stopping.
    #[error("failed to persist registry to '{path}': {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
