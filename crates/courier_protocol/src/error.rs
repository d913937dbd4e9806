//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding backend payloads.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload is not valid JSON or does not match the expected shape.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field is present but has the wrong type or value.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// A field that should hold a UUID does not.
    #[error("invalid uuid in field {field}: {value}")]
    InvalidUuid {
        /// Field name.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl ProtocolError {
    /// Creates an invalid field error.
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
