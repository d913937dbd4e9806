//! Error types for metadata store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The metadata could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// The metadata file could not be decoded.
    #[error("metadata corrupted: {0}")]
    Decode(String),

    /// Another process holds the store lock.
    #[error("store at {path} is locked by another process")]
    Locked {
        /// Directory of the locked store.
        path: String,
    },

    /// A value exists under the key but has a different type.
    #[error("type mismatch for key {key}: expected {expected}, found {found}")]
    TypeMismatch {
        /// The key that was read.
        key: String,
        /// Expected value type.
        expected: &'static str,
        /// Actual value type.
        found: &'static str,
    },
}

impl StoreError {
    /// Creates a type mismatch error.
    pub fn type_mismatch(key: &str, expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch {
            key: key.to_string(),
            expected,
            found,
        }
    }
}
