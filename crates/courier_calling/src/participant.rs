//! Per-participant call state.

use serde::{Deserialize, Serialize};

/// Connection state of a single call participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not in the call.
    NotConnected,
    /// Joined, waiting for media.
    Connecting,
    /// Joined with media flowing.
    Connected,
}

/// State of one participant in a voice channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoiceChannelParticipantState {
    /// Connection state.
    pub connection_state: ConnectionState,
    /// Whether the participant muted their microphone.
    pub muted: bool,
    /// Whether the participant sends video.
    pub is_sending_video: bool,
}

/// Builds a participant state from the join and flow signals.
///
/// Flow without a join is stale and reads as not connected. `muted` and
/// `is_sending_video` are always false; callers that know better set them.
pub fn participant_state_for(joined: bool, flow_active: bool) -> VoiceChannelParticipantState {
    let connection_state = match (joined, flow_active) {
        (false, _) => ConnectionState::NotConnected,
        (true, false) => ConnectionState::Connecting,
        (true, true) => ConnectionState::Connected,
    };

    VoiceChannelParticipantState {
        connection_state,
        muted: false,
        is_sending_video: false,
    }
}
