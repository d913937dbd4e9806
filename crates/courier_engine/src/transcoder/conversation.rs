//! Conversations: slow sync download, renames and conversation events.

use super::{array, has_more, uuid_at, RequestGate, Transcoder, TranscoderKind};
use crate::error::{SyncError, SyncResult};
use crate::model::{Conversation, ConversationKind, Message, ObjectGraph, SystemMessageKind};
use crate::sync_status::{SyncPhase, SyncStatus};
use courier_protocol::{Method, Request, Response, UpdateEvent, UpdateEventType};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Downloads conversations in `FetchingConversations`, uploads renames and
/// applies conversation events.
#[derive(Debug)]
pub struct ConversationTranscoder {
    graph: Arc<ObjectGraph>,
    status: Arc<SyncStatus>,
    page_size: usize,
    start: Mutex<Option<String>>,
    gate: RequestGate,
}

impl ConversationTranscoder {
    /// Creates the transcoder.
    pub fn new(graph: Arc<ObjectGraph>, status: Arc<SyncStatus>, page_size: usize) -> Self {
        Self {
            graph,
            status,
            page_size: page_size.max(1),
            start: Mutex::new(None),
            gate: RequestGate::default(),
        }
    }

    fn apply_page(&self, payload: Option<&Value>) -> SyncResult<()> {
        let conversations = array(payload, "conversations");
        let mut last = None;
        for value in conversations {
            let conversation = parse_conversation(value)?;
            last = Some(conversation.id);
            self.merge(conversation);
        }
        debug!(count = conversations.len(), "downloaded conversations");

        if has_more(payload) && last.is_some() {
            *self.start.lock() = last.map(|id| id.to_string());
            return Ok(());
        }
        *self.start.lock() = None;
        self.status.did_finish(SyncPhase::FetchingConversations)
    }

    /// Replaces the backend fields, keeping local-only state.
    fn merge(&self, remote: Conversation) {
        let merged = self.graph.update_conversation(remote.id, |local| {
            local.kind = remote.kind;
            local.participants = remote.participants.clone();
            if local.pending_rename.is_none() {
                local.name = remote.name.clone();
            }
        });
        if merged.is_none() {
            self.graph.upsert_conversation(remote);
        }
    }

    fn apply_event(&self, event: &UpdateEvent) -> SyncResult<()> {
        let conversation = event.conversation_id()?;
        let sender = event.sender_id().ok();
        let data = event.data().cloned().map(Value::Object).unwrap_or_default();

        if event.event_type == UpdateEventType::ConversationCreate {
            let replayed = self
                .graph
                .conversation(conversation)
                .is_some_and(|c| c.last_event_id == Some(event.id));
            if replayed {
                return Ok(());
            }
            let mut created = parse_conversation(&data)?;
            created.id = conversation;
            let is_group = created.is_group();
            self.merge(created);
            if is_group {
                self.add_system_message(conversation, sender, SystemMessageKind::NewConversation);
            }
            self.mark_applied(conversation, event);
            return Ok(());
        }

        let applied = self.graph.update_conversation(conversation, |c| {
            if !event.transient && c.last_event_id == Some(event.id) {
                return false;
            }
            match &event.event_type {
                UpdateEventType::ConversationRename => {
                    c.name = data.get("name").and_then(Value::as_str).map(str::to_string);
                }
                UpdateEventType::ConversationMemberJoin => {
                    c.participants.extend(user_ids(&data));
                }
                UpdateEventType::ConversationMemberLeave => {
                    for id in user_ids(&data) {
                        c.participants.remove(&id);
                    }
                }
                _ => return false,
            }
            true
        });

        match applied {
            None => debug!(conversation = %conversation, "event for unknown conversation"),
            Some(false) => {}
            Some(true) => {
                let kind = match event.event_type {
                    UpdateEventType::ConversationRename => {
                        SystemMessageKind::ConversationNameChanged
                    }
                    UpdateEventType::ConversationMemberJoin => {
                        SystemMessageKind::ParticipantsAdded
                    }
                    _ => SystemMessageKind::ParticipantsRemoved,
                };
                self.add_system_message(conversation, sender, kind);
                self.mark_applied(conversation, event);
            }
        }
        Ok(())
    }

    fn add_system_message(
        &self,
        conversation: Uuid,
        sender: Option<Uuid>,
        kind: SystemMessageKind,
    ) {
        let Some(sender) = sender.or_else(|| self.graph.self_user_id()) else {
            return;
        };
        self.graph.add_message(Message::system(conversation, sender, kind));
    }

    fn mark_applied(&self, conversation: Uuid, event: &UpdateEvent) {
        if !event.transient {
            self.graph
                .update_conversation(conversation, |c| c.last_event_id = Some(event.id));
        }
    }
}

fn user_ids(data: &Value) -> Vec<Uuid> {
    array(Some(data), "user_ids")
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|text| Uuid::parse_str(text).ok())
        .collect()
}

/// Parses `{ "id", "name", "type", "members": { "others": [{ "id" }] } }`.
pub(crate) fn parse_conversation(value: &Value) -> SyncResult<Conversation> {
    let id = match value.get("id") {
        Some(_) => uuid_at(value, "id")?,
        None => Uuid::nil(),
    };
    let code = value.get("type").and_then(Value::as_u64).unwrap_or(0);
    let kind = ConversationKind::from_code(code);
    let participants: BTreeSet<Uuid> = value
        .get("members")
        .and_then(|m| m.get("others"))
        .and_then(Value::as_array)
        .map(|others| {
            others
                .iter()
                .filter_map(|member| uuid_at(member, "id").ok())
                .collect()
        })
        .unwrap_or_default();

    let mut conversation = Conversation::new(id, kind);
    conversation.name = value.get("name").and_then(Value::as_str).map(str::to_string);
    conversation.participants = participants;
    Ok(conversation)
}

impl Transcoder for ConversationTranscoder {
    fn kind(&self) -> TranscoderKind {
        TranscoderKind::Conversation
    }

    fn next_request(&self) -> SyncResult<Option<Request>> {
        if self.status.current_phase() == SyncPhase::FetchingConversations {
            if !self.gate.try_begin() {
                return Ok(None);
            }
            let path = match &*self.start.lock() {
                Some(start) => format!("/conversations?size={}&start={start}", self.page_size),
                None => format!("/conversations?size={}", self.page_size),
            };
            return Ok(Some(Request::get(path)));
        }

        let Some((id, name)) = self.graph.conversations_to_rename().into_iter().next() else {
            return Ok(None);
        };
        if !self.gate.try_begin() {
            return Ok(None);
        }
        Ok(Some(Request::put(
            format!("/conversations/{id}"),
            json!({ "name": name }),
        )))
    }

    fn handle_response(&self, request: &Request, response: &Response) -> SyncResult<()> {
        self.gate.end();
        if response.is_transient_error() {
            return Ok(());
        }

        if request.method == Method::Get {
            if response.is_success() {
                return self.apply_page(response.payload.as_ref());
            }
            warn!(status = response.status, "conversation download failed, skipping");
            *self.start.lock() = None;
            return self.status.did_finish(SyncPhase::FetchingConversations);
        }

        let id = request
            .route()
            .rsplit('/')
            .next()
            .and_then(|id| Uuid::parse_str(id).ok());
        let Some(id) = id else {
            return Ok(());
        };
        let accepted = response.is_success();
        self.graph.update_conversation(id, |c| {
            let pending = c.pending_rename.take();
            if accepted {
                c.name = pending;
            }
        });
        if !accepted {
            warn!(conversation = %id, status = response.status, "rename rejected");
        }
        Ok(())
    }

    fn handle_failure(&self, _request: &Request, _error: &SyncError) {
        self.gate.end();
    }

    fn is_event_consumer(&self) -> bool {
        true
    }

    fn consume_events(&self, events: &[UpdateEvent]) -> SyncResult<()> {
        for event in events.iter().filter(|e| {
            e.event_type.is_conversation_event()
                && e.event_type != UpdateEventType::ConversationMessageAdd
        }) {
            if let Err(err) = self.apply_event(event) {
                warn!(event = %event.id, error = %err, "bad conversation event");
            }
        }
        Ok(())
    }
}
