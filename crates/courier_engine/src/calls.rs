//! Voice channels of the session.

use courier_calling::{
    CallClosedReason, CallSessionRegistry, CallTimer, CallTimerConfig, CallingError,
    CallingResult, VoiceChannel, VoiceChannelState,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// A local join or leave that must be uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallStateUpdate {
    /// Conversation of the call.
    pub conversation: Uuid,
    /// True when self joined, false when self left.
    pub joined: bool,
}

/// Owns one [`VoiceChannel`] per conversation and the outgoing call timer.
pub struct VoiceChannels {
    channels: RwLock<HashMap<Uuid, Arc<VoiceChannel>>>,
    registry: Arc<CallSessionRegistry>,
    timer: CallTimer,
    pending: Mutex<VecDeque<CallStateUpdate>>,
    closed: Mutex<Vec<(Uuid, CallClosedReason)>>,
}

impl VoiceChannels {
    /// Creates an empty set of channels.
    pub fn new(registry: Arc<CallSessionRegistry>, timer: CallTimerConfig) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            registry,
            timer: CallTimer::new(timer),
            pending: Mutex::new(VecDeque::new()),
            closed: Mutex::new(Vec::new()),
        }
    }

    /// Returns the shared session registry.
    pub fn registry(&self) -> &Arc<CallSessionRegistry> {
        &self.registry
    }

    /// Returns the channel of a conversation, creating it if needed.
    pub fn channel_for(&self, conversation: Uuid, is_group: bool) -> Arc<VoiceChannel> {
        if let Some(channel) = self.channels.read().get(&conversation) {
            return Arc::clone(channel);
        }
        let mut channels = self.channels.write();
        Arc::clone(channels.entry(conversation).or_insert_with(|| {
            Arc::new(VoiceChannel::new(
                conversation,
                is_group,
                Arc::clone(&self.registry),
            ))
        }))
    }

    /// Returns the channel of a conversation if it exists.
    pub fn channel(&self, conversation: Uuid) -> Option<Arc<VoiceChannel>> {
        self.channels.read().get(&conversation).cloned()
    }

    /// Returns the state of a conversation's channel.
    pub fn state(&self, conversation: Uuid) -> VoiceChannelState {
        self.channel(conversation)
            .map(|c| c.state())
            .unwrap_or(VoiceChannelState::NoActiveUsers)
    }

    /// Returns the channel that is active on this device, if any.
    pub fn active_channel(&self) -> Option<Arc<VoiceChannel>> {
        self.channels
            .read()
            .values()
            .find(|c| c.state().is_active_on_this_device())
            .cloned()
    }

    /// Returns true if a call is active on this device.
    pub fn has_active_call(&self) -> bool {
        self.active_channel().is_some()
    }

    /// Self joins the call. An outgoing call starts the timeout timer.
    pub fn join(&self, conversation: Uuid, is_group: bool, now: Instant) -> VoiceChannelState {
        let channel = self.channel_for(conversation, is_group);
        let state = channel.join();
        if channel.participants().is_empty() {
            self.timer.start(conversation, is_group, now);
        }
        self.pending.lock().push_back(CallStateUpdate {
            conversation,
            joined: true,
        });
        info!(conversation = %conversation, state = %state, "joined call");
        state
    }

    /// Self leaves the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the conversation has no channel.
    pub fn leave(&self, conversation: Uuid) -> CallingResult<VoiceChannelState> {
        let reason = if self.timer.is_running(conversation) {
            CallClosedReason::Canceled
        } else {
            CallClosedReason::Normal
        };
        self.close(conversation, reason)
    }

    /// Self ignores the incoming call.
    ///
    /// # Errors
    ///
    /// Returns an error if the conversation has no channel.
    pub fn ignore(&self, conversation: Uuid) -> CallingResult<VoiceChannelState> {
        let channel = self
            .channel(conversation)
            .ok_or(CallingError::UnknownConversation(conversation))?;
        Ok(channel.ignore())
    }

    /// Stops the timeout of a call once somebody answered.
    pub fn participants_did_change(&self, conversation: Uuid) {
        let answered = self
            .channel(conversation)
            .is_some_and(|c| !c.participants().is_empty());
        if answered && self.timer.stop(conversation) {
            debug!(conversation = %conversation, "outgoing call answered");
        }
    }

    /// Leaves every outgoing call nobody answered in time. Returns the
    /// affected conversations.
    pub fn expire(&self, now: Instant) -> Vec<Uuid> {
        let expired = self.timer.expired(now);
        for conversation in &expired {
            info!(conversation = %conversation, "outgoing call timed out");
            // A timer only runs for an existing channel.
            let _ = self.close(*conversation, CallClosedReason::Timeout);
        }
        expired
    }

    /// Removes and returns joins and leaves waiting for upload.
    pub fn take_pending_updates(&self) -> Vec<CallStateUpdate> {
        self.pending.lock().drain(..).collect()
    }

    /// Removes and returns the oldest join or leave waiting for upload.
    pub fn next_pending_update(&self) -> Option<CallStateUpdate> {
        self.pending.lock().pop_front()
    }

    /// Puts an update back at the front of the queue after a failed upload.
    pub fn requeue(&self, update: CallStateUpdate) {
        self.pending.lock().push_front(update);
    }

    /// Returns true if joins or leaves wait for upload.
    pub fn has_pending_updates(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Removes and returns closed calls with their reasons.
    pub fn take_closed_calls(&self) -> Vec<(Uuid, CallClosedReason)> {
        std::mem::take(&mut *self.closed.lock())
    }

    fn close(
        &self,
        conversation: Uuid,
        reason: CallClosedReason,
    ) -> CallingResult<VoiceChannelState> {
        let channel = self
            .channel(conversation)
            .ok_or(CallingError::UnknownConversation(conversation))?;
        self.timer.stop(conversation);
        let state = channel.leave();
        self.pending.lock().push_back(CallStateUpdate {
            conversation,
            joined: false,
        });
        self.closed.lock().push((conversation, reason));
        info!(conversation = %conversation, reason = reason.as_str(), "left call");
        Ok(state)
    }
}

impl std::fmt::Debug for VoiceChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceChannels")
            .field("channels", &self.channels.read().len())
            .field("pending", &self.pending.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn channels() -> VoiceChannels {
        VoiceChannels::new(
            Arc::new(CallSessionRegistry::new()),
            CallTimerConfig::new().with_test_timeout(Duration::from_secs(1)),
        )
    }

    #[test]
    fn join_then_leave() {
        let channels = channels();
        let conversation = Uuid::new_v4();
        let now = Instant::now();

        assert_eq!(
            channels.join(conversation, false, now),
            VoiceChannelState::OutgoingCall
        );
        assert!(channels.has_active_call());

        assert_eq!(
            channels.leave(conversation).unwrap(),
            VoiceChannelState::NoActiveUsers
        );
        assert_eq!(
            channels.take_pending_updates(),
            vec![
                CallStateUpdate {
                    conversation,
                    joined: true
                },
                CallStateUpdate {
                    conversation,
                    joined: false
                },
            ]
        );
        assert_eq!(
            channels.take_closed_calls(),
            vec![(conversation, CallClosedReason::Canceled)]
        );
    }

    #[test]
    fn unanswered_call_times_out() {
        let channels = channels();
        let conversation = Uuid::new_v4();
        let now = Instant::now();
        channels.join(conversation, true, now);

        assert!(channels.expire(now).is_empty());
        assert_eq!(channels.expire(now + Duration::from_secs(2)), vec![conversation]);
        assert_eq!(channels.state(conversation), VoiceChannelState::NoActiveUsers);
        assert_eq!(
            channels.take_closed_calls(),
            vec![(conversation, CallClosedReason::Timeout)]
        );
    }

    #[test]
    fn answered_call_does_not_time_out() {
        let channels = channels();
        let conversation = Uuid::new_v4();
        let now = Instant::now();
        channels.join(conversation, false, now);
        channels
            .channel(conversation)
            .unwrap()
            .participant_joined(Uuid::new_v4());
        channels.participants_did_change(conversation);

        assert!(channels.expire(now + Duration::from_secs(5)).is_empty());
        channels.leave(conversation).unwrap();
        assert_eq!(
            channels.take_closed_calls(),
            vec![(conversation, CallClosedReason::Normal)]
        );
    }

    #[test]
    fn unknown_conversation() {
        let channels = channels();
        let conversation = Uuid::new_v4();
        assert_eq!(
            channels.leave(conversation),
            Err(CallingError::UnknownConversation(conversation))
        );
        assert!(channels.ignore(conversation).is_err());
    }

    #[test]
    fn channel_for_reuses_channel() {
        let channels = channels();
        let conversation = Uuid::new_v4();
        let a = channels.channel_for(conversation, true);
        let b = channels.channel_for(conversation, false);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(b.is_group());
    }
}
