//! Error types for calling.

use thiserror::Error;
use uuid::Uuid;

/// Result type for calling operations.
pub type CallingResult<T> = Result<T, CallingError>;

/// Errors raised by voice channel operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallingError {
    /// No voice channel exists for the conversation.
    #[error("no voice channel for conversation {0}")]
    UnknownConversation(Uuid),

    /// The operation requires the self user to have joined.
    #[error("self user has not joined the call in conversation {0}")]
    NotJoined(Uuid),

    /// Video is only available in one-to-one calls.
    #[error("video is not allowed in conversation {0}")]
    VideoNotAllowed(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let id = Uuid::nil();
        let err = CallingError::NotJoined(id);
        assert!(err.to_string().contains("has not joined"));
        assert!(err.to_string().contains(&id.to_string()));
    }
}
