//! Per-conversation voice channel.

use crate::error::{CallingError, CallingResult};
use crate::participant::{participant_state_for, VoiceChannelParticipantState};
use crate::session::CallSessionRegistry;
use crate::state::{CallSignals, VoiceChannelState};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Default)]
struct ChannelSignals {
    self_joined: bool,
    device_active: bool,
    flow_active: bool,
    ignoring: bool,
    participants: BTreeSet<Uuid>,
    muted: bool,
    sending_video: bool,
    session_id: Option<String>,
}

impl ChannelSignals {
    fn signals(&self) -> CallSignals {
        CallSignals {
            self_joined: self.self_joined,
            other_joined: !self.participants.is_empty(),
            device_active: self.device_active,
            flow_active: self.flow_active,
            ignoring_call: self.ignoring,
        }
    }
}

/// The voice channel of one conversation.
///
/// A channel collects the call signals reported by the backend and by the
/// local calling stack, and derives its [`VoiceChannelState`] from them on
/// demand. Every mutator returns the state after the change.
///
/// When the channel enters [`VoiceChannelState::SelfConnectedToActiveChannel`]
/// it records a session start in the shared [`CallSessionRegistry`].
///
/// # Example
///
/// ```rust
/// use courier_calling::{CallSessionRegistry, VoiceChannel, VoiceChannelState};
/// use std::sync::Arc;
/// use uuid::Uuid;
///
/// let registry = Arc::new(CallSessionRegistry::new());
/// let channel = VoiceChannel::new(Uuid::new_v4(), false, registry.clone());
///
/// channel.participant_joined(Uuid::new_v4());
/// assert_eq!(channel.state(), VoiceChannelState::IncomingCall);
///
/// channel.join();
/// assert_eq!(channel.set_flow_active(true), VoiceChannelState::SelfConnectedToActiveChannel);
/// assert!(registry.last_session_identifier().is_some());
/// ```
#[derive(Debug)]
pub struct VoiceChannel {
    conversation: Uuid,
    is_group: bool,
    registry: Arc<CallSessionRegistry>,
    inner: RwLock<ChannelSignals>,
}

impl VoiceChannel {
    /// Creates an empty channel for a conversation.
    pub fn new(conversation: Uuid, is_group: bool, registry: Arc<CallSessionRegistry>) -> Self {
        Self {
            conversation,
            is_group,
            registry,
            inner: RwLock::new(ChannelSignals::default()),
        }
    }

    /// Returns the conversation id.
    pub fn conversation(&self) -> Uuid {
        self.conversation
    }

    /// Returns true for group conversations.
    pub fn is_group(&self) -> bool {
        self.is_group
    }

    /// Returns the current state.
    pub fn state(&self) -> VoiceChannelState {
        self.inner.read().signals().state()
    }

    /// Returns the current signals.
    pub fn signals(&self) -> CallSignals {
        self.inner.read().signals()
    }

    /// Returns the other participants that joined, in id order.
    pub fn participants(&self) -> Vec<Uuid> {
        self.inner.read().participants.iter().copied().collect()
    }

    /// Returns the identifier of the current session, if self joined.
    pub fn session_identifier(&self) -> Option<String> {
        self.inner.read().session_id.clone()
    }

    /// Self joins the call from this device.
    pub fn join(&self) -> VoiceChannelState {
        self.transition(|s| {
            s.self_joined = true;
            s.device_active = true;
            s.ignoring = false;
            if s.session_id.is_none() {
                s.session_id = Some(Uuid::new_v4().to_string());
            }
        })
        .1
    }

    /// Self joined the call from another device.
    pub fn joined_elsewhere(&self) -> VoiceChannelState {
        self.transition(|s| {
            s.self_joined = true;
            s.device_active = false;
            s.flow_active = false;
        })
        .1
    }

    /// Self leaves the call.
    pub fn leave(&self) -> VoiceChannelState {
        self.transition(|s| {
            s.self_joined = false;
            s.device_active = false;
            s.flow_active = false;
            s.muted = false;
            s.sending_video = false;
            s.session_id = None;
        })
        .1
    }

    /// Self ignores the incoming call.
    pub fn ignore(&self) -> VoiceChannelState {
        self.transition(|s| s.ignoring = true).1
    }

    /// Another user joined.
    pub fn participant_joined(&self, user: Uuid) -> VoiceChannelState {
        self.transition(|s| {
            s.participants.insert(user);
        })
        .1
    }

    /// Another user left. When the last one leaves a call self never
    /// joined, the ignore flag is reset.
    pub fn participant_left(&self, user: Uuid) -> VoiceChannelState {
        self.transition(|s| {
            s.participants.remove(&user);
            if s.participants.is_empty() && !s.self_joined {
                s.ignoring = false;
            }
        })
        .1
    }

    /// Replaces the set of other participants.
    pub fn set_participants(&self, users: impl IntoIterator<Item = Uuid>) -> VoiceChannelState {
        let users: BTreeSet<Uuid> = users.into_iter().collect();
        self.transition(move |s| {
            s.participants = users;
            if s.participants.is_empty() && !s.self_joined {
                s.ignoring = false;
            }
        })
        .1
    }

    /// Media flow started or stopped on this device.
    pub fn set_flow_active(&self, active: bool) -> VoiceChannelState {
        self.transition(|s| s.flow_active = active).1
    }

    /// The call became active or inactive on this device.
    pub fn set_device_active(&self, active: bool) -> VoiceChannelState {
        self.transition(|s| s.device_active = active).1
    }

    /// Mutes or unmutes self.
    ///
    /// # Errors
    ///
    /// Returns [`CallingError::NotJoined`] if self is not in the call.
    pub fn set_muted(&self, muted: bool) -> CallingResult<()> {
        let conversation = self.conversation;
        self.transition(|s| {
            if !s.self_joined {
                return Err(CallingError::NotJoined(conversation));
            }
            s.muted = muted;
            Ok(())
        })
        .0
    }

    /// Starts or stops sending video.
    ///
    /// # Errors
    ///
    /// Returns [`CallingError::VideoNotAllowed`] for group conversations and
    /// [`CallingError::NotJoined`] if self is not in the call.
    pub fn set_sending_video(&self, sending: bool) -> CallingResult<()> {
        let conversation = self.conversation;
        let is_group = self.is_group;
        self.transition(|s| {
            if is_group && sending {
                return Err(CallingError::VideoNotAllowed(conversation));
            }
            if !s.self_joined {
                return Err(CallingError::NotJoined(conversation));
            }
            s.sending_video = sending;
            Ok(())
        })
        .0
    }

    /// Returns the state of another participant.
    pub fn participant_state(&self, user: Uuid) -> VoiceChannelParticipantState {
        let inner = self.inner.read();
        participant_state_for(inner.participants.contains(&user), inner.flow_active)
    }

    /// Returns the state of self, including mute and video.
    pub fn self_participant_state(&self) -> VoiceChannelParticipantState {
        let inner = self.inner.read();
        let mut state =
            participant_state_for(inner.self_joined && inner.device_active, inner.flow_active);
        state.muted = inner.muted;
        state.is_sending_video = inner.sending_video;
        state
    }

    fn transition<T>(&self, f: impl FnOnce(&mut ChannelSignals) -> T) -> (T, VoiceChannelState) {
        let (output, old, new, session) = {
            let mut inner = self.inner.write();
            let old = inner.signals().state();
            let output = f(&mut inner);
            let new = inner.signals().state();
            (output, old, new, inner.session_id.clone())
        };

        if old != new {
            debug!(
                conversation = %self.conversation,
                from = %old,
                to = %new,
                "voice channel state changed"
            );
            if new == VoiceChannelState::SelfConnectedToActiveChannel {
                let identifier = session.unwrap_or_else(|| Uuid::new_v4().to_string());
                info!(conversation = %self.conversation, session = %identifier, "call connected");
                self.registry.record_start(identifier, SystemTime::now());
            }
        }

        (output, new)
    }
}
