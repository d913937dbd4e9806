//! Reasons a call ends.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a call was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallClosedReason {
    /// Ended by a participant.
    Normal,
    /// Canceled by the caller before anybody answered.
    Canceled,
    /// Answered on another of self's devices.
    AnsweredElsewhere,
    /// Rejected on another of self's devices.
    RejectedElsewhere,
    /// Nobody answered in time.
    Timeout,
    /// Media stopped flowing.
    LostMedia,
    /// The calling stack failed.
    InternalError,
    /// Audio input or output failed.
    InputOutputError,
    /// The call continues without self.
    StillOngoing,
    /// A participant's identity could no longer be verified.
    SecurityDegraded,
    /// The remote client is too old.
    OutdatedClient,
    /// Anything else.
    Unknown,
}

impl CallClosedReason {
    /// Returns the wire label.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallClosedReason::Normal => "normal",
            CallClosedReason::Canceled => "canceled",
            CallClosedReason::AnsweredElsewhere => "answered-elsewhere",
            CallClosedReason::RejectedElsewhere => "rejected-elsewhere",
            CallClosedReason::Timeout => "timeout",
            CallClosedReason::LostMedia => "lost-media",
            CallClosedReason::InternalError => "internal-error",
            CallClosedReason::InputOutputError => "input-output-error",
            CallClosedReason::StillOngoing => "still-ongoing",
            CallClosedReason::SecurityDegraded => "security-degraded",
            CallClosedReason::OutdatedClient => "outdated-client",
            CallClosedReason::Unknown => "unknown",
        }
    }

    /// Parses a wire label; unknown labels map to [`CallClosedReason::Unknown`].
    pub fn from_label(label: &str) -> Self {
        match label {
            "normal" => CallClosedReason::Normal,
            "canceled" => CallClosedReason::Canceled,
            "answered-elsewhere" => CallClosedReason::AnsweredElsewhere,
            "rejected-elsewhere" => CallClosedReason::RejectedElsewhere,
            "timeout" => CallClosedReason::Timeout,
            "lost-media" => CallClosedReason::LostMedia,
            "internal-error" => CallClosedReason::InternalError,
            "input-output-error" => CallClosedReason::InputOutputError,
            "still-ongoing" => CallClosedReason::StillOngoing,
            "security-degraded" => CallClosedReason::SecurityDegraded,
            "outdated-client" => CallClosedReason::OutdatedClient,
            _ => CallClosedReason::Unknown,
        }
    }

    /// Returns true if the call ended because of a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CallClosedReason::LostMedia
                | CallClosedReason::InternalError
                | CallClosedReason::InputOutputError
                | CallClosedReason::SecurityDegraded
                | CallClosedReason::OutdatedClient
        )
    }
}

impl fmt::Display for CallClosedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
