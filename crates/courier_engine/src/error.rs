//! Error types for the sync engine.

use courier_calling::CallingError;
use courier_protocol::ProtocolError;
use courier_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while parsing a version string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The version string is empty.
    #[error("empty version string")]
    Empty,

    /// A component is not a decimal integer.
    #[error("invalid component {component:?} in version {version:?}")]
    InvalidComponent {
        /// The whole version string.
        version: String,
        /// The rejected component.
        component: String,
    },
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A backend payload could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Metadata store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Voice channel error.
    #[error("calling error: {0}")]
    Calling(#[from] CallingError),

    /// Version parse error.
    #[error("version error: {0}")]
    Version(#[from] VersionError),

    /// A hotfix patch failed.
    #[error("hotfix {patch} ({version}) failed: {message}")]
    HotFix {
        /// Patch name.
        patch: String,
        /// Patch version.
        version: String,
        /// Failure description.
        message: String,
    },

    /// A response arrived for a request id the strategy never issued.
    #[error("unknown request id {0}")]
    UnknownRequest(u64),

    /// The strategy was torn down.
    #[error("sync strategy torn down")]
    TornDown,

    /// The conversation does not exist in the local graph.
    #[error("unknown conversation {0}")]
    UnknownConversation(Uuid),

    /// The operation requires an authenticated session.
    #[error("not authenticated")]
    NotAuthenticated,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Store(StoreError::Io(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(!SyncError::TornDown.is_retryable());
        assert!(!SyncError::UnknownRequest(7).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::HotFix {
            patch: "purge".into(),
            version: "1.3.0".into(),
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "hotfix purge (1.3.0) failed: boom");

        let err = VersionError::InvalidComponent {
            version: "1.x".into(),
            component: "x".into(),
        };
        assert!(err.to_string().contains("\"x\""));
    }

    #[test]
    fn conversions() {
        let err: SyncError = CallingError::NotJoined(Uuid::nil()).into();
        assert!(matches!(err, SyncError::Calling(_)));

        let err: SyncError = VersionError::Empty.into();
        assert!(matches!(err, SyncError::Version(VersionError::Empty)));
    }
}
