//! Voice channel state derivation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The observable state of a voice channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoiceChannelState {
    /// Nobody is in the channel.
    NoActiveUsers,
    /// Self joined on this device and waits for others.
    OutgoingCall,
    /// Self joined from another device and waits for others.
    OutgoingCallInactive,
    /// Others are in the channel; self has not joined.
    IncomingCall,
    /// Self and others joined; media is not flowing yet.
    SelfIsJoiningActiveChannel,
    /// Self and others joined; media is flowing on this device.
    SelfConnectedToActiveChannel,
    /// The call is live on another of self's devices.
    DeviceTransferReady,
    /// The user is ignoring the call.
    CallIgnored,
}

impl VoiceChannelState {
    /// Every state, in declaration order.
    pub const ALL: [VoiceChannelState; 8] = [
        VoiceChannelState::NoActiveUsers,
        VoiceChannelState::OutgoingCall,
        VoiceChannelState::OutgoingCallInactive,
        VoiceChannelState::IncomingCall,
        VoiceChannelState::SelfIsJoiningActiveChannel,
        VoiceChannelState::SelfConnectedToActiveChannel,
        VoiceChannelState::DeviceTransferReady,
        VoiceChannelState::CallIgnored,
    ];

    /// Returns true if self takes part in the call on this device.
    pub fn is_active_on_this_device(&self) -> bool {
        matches!(
            self,
            VoiceChannelState::OutgoingCall
                | VoiceChannelState::SelfIsJoiningActiveChannel
                | VoiceChannelState::SelfConnectedToActiveChannel
        )
    }

    /// Returns true if anybody is in the channel.
    pub fn has_participants(&self) -> bool {
        !matches!(self, VoiceChannelState::NoActiveUsers)
    }

    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceChannelState::NoActiveUsers => "NoActiveUsers",
            VoiceChannelState::OutgoingCall => "OutgoingCall",
            VoiceChannelState::OutgoingCallInactive => "OutgoingCallInactive",
            VoiceChannelState::IncomingCall => "IncomingCall",
            VoiceChannelState::SelfIsJoiningActiveChannel => "SelfIsJoiningActiveChannel",
            VoiceChannelState::SelfConnectedToActiveChannel => "SelfConnectedToActiveChannel",
            VoiceChannelState::DeviceTransferReady => "DeviceTransferReady",
            VoiceChannelState::CallIgnored => "CallIgnored",
        }
    }
}

impl fmt::Display for VoiceChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five signals a voice channel state is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CallSignals {
    /// Self joined the call.
    pub self_joined: bool,
    /// At least one other participant joined.
    pub other_joined: bool,
    /// The call is active on this device.
    pub device_active: bool,
    /// Media is flowing on this device.
    pub flow_active: bool,
    /// The user is ignoring the call.
    pub ignoring_call: bool,
}

impl CallSignals {
    /// Derives the channel state for these signals.
    pub fn state(&self) -> VoiceChannelState {
        state_for(
            self.self_joined,
            self.other_joined,
            self.device_active,
            self.flow_active,
            self.ignoring_call,
        )
    }

    /// Enumerates all 32 signal combinations.
    pub fn all() -> impl Iterator<Item = CallSignals> {
        (0u8..32).map(|bits| CallSignals {
            ignoring_call: bits & 0b10000 != 0,
            self_joined: bits & 0b01000 != 0,
            other_joined: bits & 0b00100 != 0,
            device_active: bits & 0b00010 != 0,
            flow_active: bits & 0b00001 != 0,
        })
    }
}

/// Derives the voice channel state from the call signals.
///
/// The function is total. Ignoring overrides every other signal. Without
/// self in the channel, device and flow signals are stale and ignored.
/// With self alone, `flow_active` is irrelevant. With self and others in
/// the channel, an inactive device means the call lives on another device.
///
/// # Example
///
/// ```rust
/// use courier_calling::{state_for, VoiceChannelState};
///
/// assert_eq!(
///     state_for(true, true, true, true, false),
///     VoiceChannelState::SelfConnectedToActiveChannel
/// );
/// assert_eq!(state_for(true, true, true, true, true), VoiceChannelState::CallIgnored);
/// ```
pub fn state_for(
    self_joined: bool,
    other_joined: bool,
    device_active: bool,
    flow_active: bool,
    ignoring_call: bool,
) -> VoiceChannelState {
    if ignoring_call {
        return VoiceChannelState::CallIgnored;
    }

    match (self_joined, other_joined, device_active, flow_active) {
        (false, false, _, _) => VoiceChannelState::NoActiveUsers,
        (false, true, _, _) => VoiceChannelState::IncomingCall,
        (true, false, true, _) => VoiceChannelState::OutgoingCall,
        (true, false, false, _) => VoiceChannelState::OutgoingCallInactive,
        (true, true, true, false) => VoiceChannelState::SelfIsJoiningActiveChannel,
        (true, true, true, true) => VoiceChannelState::SelfConnectedToActiveChannel,
        (true, true, false, _) => VoiceChannelState::DeviceTransferReady,
    }
}
