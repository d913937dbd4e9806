//! Call state uploads and calling events.

use super::{RequestGate, Transcoder, TranscoderKind};
use crate::calls::{CallStateUpdate, VoiceChannels};
use crate::error::{SyncError, SyncResult};
use crate::model::ObjectGraph;
use courier_protocol::{Request, Response, UpdateEvent, UpdateEventType};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Uploads local joins and leaves with `PUT /conversations/{id}/call/state`
/// and applies `call.state` and `call.flow-active` events.
#[derive(Debug)]
pub struct CallingTranscoder {
    channels: Arc<VoiceChannels>,
    graph: Arc<ObjectGraph>,
    in_flight: Mutex<Option<CallStateUpdate>>,
    gate: RequestGate,
}

impl CallingTranscoder {
    /// Creates the transcoder.
    pub fn new(channels: Arc<VoiceChannels>, graph: Arc<ObjectGraph>) -> Self {
        Self {
            channels,
            graph,
            in_flight: Mutex::new(None),
            gate: RequestGate::default(),
        }
    }

    fn is_group(&self, conversation: Uuid) -> bool {
        self.graph
            .conversation(conversation)
            .is_some_and(|c| c.is_group())
    }

    fn apply_call_state(&self, event: &UpdateEvent) -> SyncResult<()> {
        let conversation = event.conversation_id()?;
        let channel = self
            .channels
            .channel_for(conversation, self.is_group(conversation));
        let object = event.object();

        let joined = |value: &Value| value.get("state").and_then(Value::as_str) == Some("joined");
        let participants: Vec<Uuid> = object
            .get("participants")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter(|(_, state)| joined(*state))
                    .filter_map(|(id, _)| Uuid::parse_str(id).ok())
                    .filter(|id| Some(*id) != self.graph.self_user_id())
                    .collect()
            })
            .unwrap_or_default();
        let mut state = channel.set_participants(participants);

        if let Some(self_state) = object.get("self").filter(|v| !v.is_null()) {
            let signals = channel.signals();
            if joined(self_state) && !signals.device_active {
                state = channel.joined_elsewhere();
            } else if !joined(self_state) && signals.self_joined && !signals.device_active {
                state = channel.leave();
            }
        }

        self.channels.participants_did_change(conversation);
        debug!(conversation = %conversation, state = %state, "call state updated");
        Ok(())
    }

    fn apply_flow_active(&self, event: &UpdateEvent) {
        let Some(active) = event.object().get("active").and_then(Value::as_object) else {
            return;
        };
        for (id, flag) in active {
            let Ok(conversation) = Uuid::parse_str(id) else {
                continue;
            };
            if let Some(channel) = self.channels.channel(conversation) {
                channel.set_flow_active(flag.as_bool().unwrap_or(false));
            }
        }
    }

    fn requeue_in_flight(&self) {
        if let Some(update) = self.in_flight.lock().take() {
            self.channels.requeue(update);
        }
    }
}

impl Transcoder for CallingTranscoder {
    fn kind(&self) -> TranscoderKind {
        TranscoderKind::Calling
    }

    fn next_request(&self) -> SyncResult<Option<Request>> {
        if !self.channels.has_pending_updates() || !self.gate.try_begin() {
            return Ok(None);
        }
        let Some(update) = self.channels.next_pending_update() else {
            self.gate.end();
            return Ok(None);
        };
        *self.in_flight.lock() = Some(update);

        let state = if update.joined { "joined" } else { "idle" };
        Ok(Some(Request::put(
            format!("/conversations/{}/call/state", update.conversation),
            json!({ "self": { "state": state } }),
        )))
    }

    fn handle_response(&self, _request: &Request, response: &Response) -> SyncResult<()> {
        self.gate.end();
        if response.is_transient_error() {
            self.requeue_in_flight();
            return Ok(());
        }
        let update = self.in_flight.lock().take();
        if !response.is_success() {
            warn!(status = response.status, ?update, "call state rejected");
        }
        Ok(())
    }

    fn handle_failure(&self, _request: &Request, _error: &SyncError) {
        self.requeue_in_flight();
        self.gate.end();
    }

    fn is_event_consumer(&self) -> bool {
        true
    }

    fn consume_events(&self, events: &[UpdateEvent]) -> SyncResult<()> {
        for event in events {
            match event.event_type {
                UpdateEventType::CallState => {
                    if let Err(err) = self.apply_call_state(event) {
                        warn!(event = %event.id, error = %err, "bad call state event");
                    }
                }
                UpdateEventType::CallFlowActive => self.apply_flow_active(event),
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_calling::{CallSessionRegistry, CallTimerConfig, VoiceChannelState};
    use courier_protocol::EventSource;
    use std::time::Instant;

    fn setup() -> (CallingTranscoder, Arc<VoiceChannels>, Arc<ObjectGraph>) {
        let graph = Arc::new(ObjectGraph::new());
        graph.set_self_user_id(Uuid::new_v4());
        let channels = Arc::new(VoiceChannels::new(
            Arc::new(CallSessionRegistry::new()),
            CallTimerConfig::new(),
        ));
        (
            CallingTranscoder::new(channels.clone(), graph.clone()),
            channels,
            graph,
        )
    }

    fn call_state(conversation: Uuid, self_state: Value, participants: Value) -> UpdateEvent {
        UpdateEvent::new(
            Uuid::new_v4(),
            UpdateEventType::CallState,
            json!({
                "type": "call.state",
                "conversation": conversation.to_string(),
                "self": self_state,
                "participants": participants,
            }),
            EventSource::WebSocket,
        )
    }

    #[test]
    fn incoming_call_from_event() {
        let (transcoder, channels, _) = setup();
        let (conversation, caller) = (Uuid::new_v4(), Uuid::new_v4());
        transcoder
            .consume_events(&[call_state(
                conversation,
                Value::Null,
                json!({ caller.to_string(): { "state": "joined" } }),
            )])
            .unwrap();
        assert_eq!(channels.state(conversation), VoiceChannelState::IncomingCall);
    }

    #[test]
    fn joined_on_other_device() {
        let (transcoder, channels, _) = setup();
        let (conversation, caller) = (Uuid::new_v4(), Uuid::new_v4());
        transcoder
            .consume_events(&[call_state(
                conversation,
                json!({ "state": "joined" }),
                json!({ caller.to_string(): { "state": "joined" } }),
            )])
            .unwrap();
        assert_eq!(
            channels.state(conversation),
            VoiceChannelState::DeviceTransferReady
        );
    }

    #[test]
    fn uploads_join_and_flow() {
        let (transcoder, channels, _) = setup();
        let (conversation, callee) = (Uuid::new_v4(), Uuid::new_v4());
        channels.join(conversation, false, Instant::now());

        let request = transcoder.next_request().unwrap().unwrap();
        assert_eq!(
            request.to_string(),
            format!("PUT /conversations/{conversation}/call/state")
        );
        assert_eq!(request.payload, Some(json!({ "self": { "state": "joined" } })));
        transcoder
            .handle_response(&request, &Response::status(200))
            .unwrap();
        assert!(transcoder.next_request().unwrap().is_none());

        transcoder
            .consume_events(&[
                call_state(
                    conversation,
                    json!({ "state": "joined" }),
                    json!({ callee.to_string(): { "state": "joined" } }),
                ),
                UpdateEvent::new(
                    Uuid::new_v4(),
                    UpdateEventType::CallFlowActive,
                    json!({
                        "type": "call.flow-active",
                        "active": { conversation.to_string(): true },
                    }),
                    EventSource::WebSocket,
                ),
            ])
            .unwrap();
        assert_eq!(
            channels.state(conversation),
            VoiceChannelState::SelfConnectedToActiveChannel
        );
    }

    #[test]
    fn failed_upload_is_retried() {
        let (transcoder, channels, _) = setup();
        let conversation = Uuid::new_v4();
        channels.join(conversation, true, Instant::now());

        let request = transcoder.next_request().unwrap().unwrap();
        transcoder.handle_failure(&request, &SyncError::transport_retryable("offline"));
        let retry = transcoder.next_request().unwrap().unwrap();
        assert_eq!(retry, request);
    }
}
