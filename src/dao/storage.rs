use std::error::Error;
use thiserror::Error;

/// Result alias for local persistence operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by on-device storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend cannot be read or written right now.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A stored value could not be decoded.
    #[error("stored value under `{key}` is corrupt")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    /// A value could not be encoded for storage.
    #[error("failed to encode value for `{key}`")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
