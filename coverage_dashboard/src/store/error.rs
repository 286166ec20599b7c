//! Error types for aggregate storage operations.

use coverage_core::CoverageError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A create-only object (daily backup, dated snapshot) is already there.
    /// The first writer of the day wins.
    #[error("object already exists: {key}")]
    AlreadyExists { key: String },

    #[error("object not found: {key}")]
    NotFound { key: String },

    /// Invalid store URL.
    #[error("invalid store spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    /// Container name, credentials or URL missing or unusable.
    #[error("store not configured: {message}")]
    NotConfigured { message: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("object store error: {0}")]
    ObjectStore(object_store::Error),

    /// The stored aggregate could not be decoded or encoded.
    #[error("aggregate table has an unexpected shape: {0}")]
    Shape(#[from] CoverageError),
}

impl StoreError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_shape(&self) -> bool {
        match self {
            Self::Shape(err) => err.is_shape_failure(),
            _ => false,
        }
    }

    /// Failures worth retrying on the next tick or run.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::ObjectStore(_))
    }

    /// Map an `object_store` failure for `key`.
    pub fn from_object_store(err: object_store::Error, key: &str) -> Self {
        match &err {
            object_store::Error::NotFound { .. } => StoreError::NotFound {
                key: key.to_string(),
            },
            object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. } => {
                StoreError::AlreadyExists {
                    key: key.to_string(),
                }
            }
            _ => StoreError::ObjectStore(err),
        }
    }
}

impl From<object_store::Error> for StoreError {
    fn from(err: object_store::Error) -> Self {
        StoreError::from_object_store(err, "unknown")
    }
}
