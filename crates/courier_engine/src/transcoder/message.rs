//! Outgoing text messages and message events.

use super::{uuid_at, RequestGate, Transcoder, TranscoderKind};
use crate::error::{SyncError, SyncResult};
use crate::model::{DeliveryState, Message, ObjectGraph};
use courier_protocol::{Request, Response, UpdateEvent, UpdateEventType};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends pending messages with `POST /conversations/{id}/messages` and
/// inserts messages received through events.
#[derive(Debug)]
pub struct MessageTranscoder {
    graph: Arc<ObjectGraph>,
    gate: RequestGate,
}

impl MessageTranscoder {
    /// Creates the transcoder.
    pub fn new(graph: Arc<ObjectGraph>) -> Self {
        Self {
            graph,
            gate: RequestGate::default(),
        }
    }

    fn apply_event(&self, event: &UpdateEvent) -> SyncResult<()> {
        let conversation = event.conversation_id()?;
        let sender = event.sender_id()?;
        let data = event.data().cloned().map(Value::Object).unwrap_or_default();
        let nonce = uuid_at(&data, "nonce")?;
        let timestamp = event
            .object()
            .get("time")
            .and_then(Value::as_str)
            .map(str::to_string);

        // Our own message echoed back by the backend.
        let echoed = self.graph.update_message(nonce, |m| {
            m.delivery = DeliveryState::Delivered;
            if timestamp.is_some() {
                m.server_timestamp = timestamp.clone();
            }
        });
        if echoed.is_some() {
            return Ok(());
        }

        let text = data
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.graph.add_message(Message {
            nonce,
            conversation,
            sender,
            text,
            system: None,
            delivery: DeliveryState::Delivered,
            server_timestamp: timestamp,
        });
        Ok(())
    }
}

impl Transcoder for MessageTranscoder {
    fn kind(&self) -> TranscoderKind {
        TranscoderKind::Message
    }

    fn next_request(&self) -> SyncResult<Option<Request>> {
        if self.gate.is_busy() {
            return Ok(None);
        }
        let Some(message) = self.graph.pending_messages().into_iter().next() else {
            return Ok(None);
        };
        if !self.gate.try_begin() {
            return Ok(None);
        }
        Ok(Some(Request::post(
            format!("/conversations/{}/messages", message.conversation),
            json!({ "nonce": message.nonce.to_string(), "content": message.text }),
        )))
    }

    fn handle_response(&self, request: &Request, response: &Response) -> SyncResult<()> {
        self.gate.end();
        if response.is_transient_error() {
            return Ok(());
        }

        let Some(payload) = request.payload.as_ref() else {
            return Ok(());
        };
        let nonce = uuid_at(payload, "nonce")?;
        let timestamp = response
            .payload
            .as_ref()
            .and_then(|p| p.get("time"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let delivery = if response.is_success() {
            debug!(nonce = %nonce, "message sent");
            DeliveryState::Sent
        } else {
            warn!(nonce = %nonce, status = response.status, "message rejected");
            DeliveryState::FailedToSend
        };
        self.graph.update_message(nonce, |m| {
            m.delivery = delivery;
            m.server_timestamp = timestamp;
        });
        Ok(())
    }

    fn handle_failure(&self, _request: &Request, _error: &SyncError) {
        self.gate.end();
    }

    fn is_event_consumer(&self) -> bool {
        true
    }

    fn consume_events(&self, events: &[UpdateEvent]) -> SyncResult<()> {
        for event in events
            .iter()
            .filter(|e| e.event_type == UpdateEventType::ConversationMessageAdd)
        {
            if let Err(err) = self.apply_event(event) {
                warn!(event = %event.id, error = %err, "bad message event");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Conversation, ConversationKind};
    use courier_protocol::EventSource;
    use uuid::Uuid;

    fn setup() -> (MessageTranscoder, Arc<ObjectGraph>, Uuid) {
        let graph = Arc::new(ObjectGraph::new());
        graph.set_self_user_id(Uuid::new_v4());
        let conversation = Uuid::new_v4();
        graph.upsert_conversation(Conversation::new(conversation, ConversationKind::OneOnOne));
        (MessageTranscoder::new(graph.clone()), graph, conversation)
    }

    fn message_event(conversation: Uuid, nonce: Uuid, content: &str) -> UpdateEvent {
        UpdateEvent::new(
            Uuid::new_v4(),
            UpdateEventType::ConversationMessageAdd,
            json!({
                "type": "conversation.message-add",
                "conversation": conversation.to_string(),
                "from": Uuid::new_v4().to_string(),
                "time": "2024-01-01T00:00:00Z",
                "data": { "nonce": nonce.to_string(), "content": content },
            }),
            EventSource::WebSocket,
        )
    }

    #[test]
    fn sends_pending_message() {
        let (transcoder, graph, conversation) = setup();
        let nonce = graph.append_outgoing_message(conversation, "hello").unwrap();

        let request = transcoder.next_request().unwrap().unwrap();
        assert_eq!(
            request.to_string(),
            format!("POST /conversations/{conversation}/messages")
        );
        assert!(transcoder.next_request().unwrap().is_none());

        transcoder
            .handle_response(&request, &Response::ok(json!({ "time": "t1" })))
            .unwrap();
        let message = graph.message(nonce).unwrap();
        assert_eq!(message.delivery, DeliveryState::Sent);
        assert_eq!(message.server_timestamp.as_deref(), Some("t1"));
        assert!(transcoder.next_request().unwrap().is_none());
    }

    #[test]
    fn rejected_message_fails() {
        let (transcoder, graph, conversation) = setup();
        let nonce = graph.append_outgoing_message(conversation, "hello").unwrap();
        let request = transcoder.next_request().unwrap().unwrap();

        transcoder
            .handle_response(&request, &Response::status(403))
            .unwrap();
        assert_eq!(graph.message(nonce).unwrap().delivery, DeliveryState::FailedToSend);
    }

    #[test]
    fn server_error_keeps_message_pending() {
        let (transcoder, graph, conversation) = setup();
        let nonce = graph.append_outgoing_message(conversation, "hello").unwrap();
        let request = transcoder.next_request().unwrap().unwrap();

        transcoder
            .handle_response(&request, &Response::status(500))
            .unwrap();
        assert_eq!(graph.message(nonce).unwrap().delivery, DeliveryState::Pending);
        assert!(transcoder.next_request().unwrap().is_some());
    }

    #[test]
    fn message_events_deduplicate_by_nonce() {
        let (transcoder, graph, conversation) = setup();
        let nonce = Uuid::new_v4();
        let event = message_event(conversation, nonce, "hi");

        transcoder.consume_events(&[event.clone(), event]).unwrap();
        let messages = graph.messages_in(conversation);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hi");
        assert_eq!(messages[0].delivery, DeliveryState::Delivered);
    }

    #[test]
    fn echo_marks_own_message_delivered() {
        let (transcoder, graph, conversation) = setup();
        let nonce = graph.append_outgoing_message(conversation, "mine").unwrap();
        transcoder
            .consume_events(&[message_event(conversation, nonce, "mine")])
            .unwrap();

        assert_eq!(graph.messages_in(conversation).len(), 1);
        assert_eq!(graph.message(nonce).unwrap().delivery, DeliveryState::Delivered);
    }
}
