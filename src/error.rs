//! Error types for storage and model lifecycle operations

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the object-store backends and the storage layer.
///
/// Missing objects are reported as `NotFound` so callers can distinguish
/// "the model does not exist" (recoverable with a default) from a backend
/// being unreachable (recoverable by falling back to the local cache).
#[derive(Error, Debug)]
pub enum StorageError {
    /// Remote backend unreachable or misconfigured
    #[error("object store unavailable: {0}")]
    Unavailable(String),

    /// Named object absent in the remote store
    #[error("object not found: {0}")]
    NotFound(String),

    /// Remote operation exceeded the configured timeout
    #[error("object store request timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP transport error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata (de)serialization error
    #[error("metadata serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether a local-cache fallback is an appropriate recovery.
    ///
    /// `NotFound` is structural: the object is permanently missing and the
    /// caller should decide on a default. Everything else is transient.
    pub fn is_transient(&self) -> bool {
        !matches!(self, StorageError::NotFound(_))
    }
}

/// Errors raised by the model manager and model services
#[derive(Error, Debug)]
pub enum ModelError {
    /// A model type failed to construct or initialize
    #[error("initialization of {model_type} failed: {reason}")]
    InitializationFailure { model_type: String, reason: String },

    /// Every model type failed to initialize
    #[error("model manager initialization failed: no model type became ready")]
    ManagerFailed,

    /// A handle was requested for a model type that never loaded
    #[error("model type {0} is not available")]
    NotAvailable(String),

    /// Storage layer error surfaced during weight acquisition
    #[error(transparent)]
    Storage(#[from] StorageError),
}
