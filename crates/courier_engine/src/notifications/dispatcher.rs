//! Creates and cancels local notifications from update events.

use super::{LocalNotification, NotificationCategory};
use crate::buffer::UpdateEventConsumer;
use crate::model::ObjectGraph;
use crate::operation_status::{OperationState, OperationStatus};
use crate::transcoder::array;
use courier_protocol::{EventSource, UpdateEvent, UpdateEventType};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Turns live and pushed events into local notifications.
///
/// In the background notifications are scheduled with the platform; in the
/// foreground they are buffered and only the latest is shown, see
/// [`process_foreground_buffer`](Self::process_foreground_buffer).
/// Downloaded events never notify.
pub struct LocalNotificationDispatcher {
    graph: Arc<ObjectGraph>,
    operation: Arc<OperationStatus>,
    scheduled: Mutex<Vec<LocalNotification>>,
    foreground: Mutex<Vec<LocalNotification>>,
    ringing: Mutex<HashMap<Uuid, Uuid>>,
    torn_down: AtomicBool,
}

impl LocalNotificationDispatcher {
    /// Creates a dispatcher.
    pub fn new(graph: Arc<ObjectGraph>, operation: Arc<OperationStatus>) -> Self {
        Self {
            graph,
            operation,
            scheduled: Mutex::new(Vec::new()),
            foreground: Mutex::new(Vec::new()),
            ringing: Mutex::new(HashMap::new()),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Returns the notifications scheduled with the platform.
    pub fn scheduled_notifications(&self) -> Vec<LocalNotification> {
        self.scheduled.lock().clone()
    }

    /// Returns the scheduled notification with `id`.
    pub fn notification(&self, id: Uuid) -> Option<LocalNotification> {
        self.scheduled.lock().iter().find(|n| n.id == id).cloned()
    }

    /// Removes and returns the latest notification raised in the
    /// foreground; older ones are dropped.
    pub fn process_foreground_buffer(&self) -> Option<LocalNotification> {
        std::mem::take(&mut *self.foreground.lock()).pop()
    }

    /// Returns the conversations with a ringing incoming call.
    pub fn ringing_conversations(&self) -> Vec<Uuid> {
        self.ringing.lock().keys().copied().collect()
    }

    /// Schedules a notification, or buffers it in the foreground.
    pub fn schedule(&self, note: LocalNotification) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        debug!(category = %note.category, conversation = ?note.conversation, "notification");
        if self.operation.state() == OperationState::Foreground {
            self.foreground.lock().push(note);
        } else {
            self.scheduled.lock().push(note);
        }
    }

    /// Cancels every notification of a conversation, for example when it
    /// was read or its call was joined. Returns how many were removed.
    pub fn cancel_notifications(&self, conversation: Uuid) -> usize {
        let mut scheduled = self.scheduled.lock();
        let before = scheduled.len();
        scheduled.retain(|n| n.conversation != Some(conversation));
        self.foreground
            .lock()
            .retain(|n| n.conversation != Some(conversation));
        before - scheduled.len()
    }

    /// Cancels every notification.
    pub fn cancel_all(&self) {
        self.scheduled.lock().clear();
        self.foreground.lock().clear();
    }

    /// Cancels everything and stops notifying.
    pub fn tear_down(&self) {
        info!("tearing down notification dispatcher");
        self.torn_down.store(true, Ordering::SeqCst);
        self.cancel_all();
        self.ringing.lock().clear();
    }

    fn display_name(&self, user: Uuid) -> String {
        self.graph
            .user(user)
            .map(|u| u.name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "Someone".to_string())
    }

    fn conversation_title(&self, conversation: Uuid, sender: Uuid) -> String {
        self.graph
            .conversation(conversation)
            .and_then(|c| c.name)
            .unwrap_or_else(|| self.display_name(sender))
    }

    fn is_muted(&self, conversation: Uuid) -> bool {
        self.graph
            .conversation(conversation)
            .is_some_and(|c| c.muted)
    }

    fn is_self(&self, user: Uuid) -> bool {
        self.graph.self_user_id() == Some(user)
    }

    fn message_added(&self, event: &UpdateEvent) -> Option<LocalNotification> {
        let conversation = event.conversation_id().ok()?;
        let sender = event.sender_id().ok()?;
        if self.is_self(sender) || self.is_muted(conversation) {
            return None;
        }
        let data = event.data()?;
        let nonce = data
            .get("nonce")
            .and_then(Value::as_str)
            .and_then(|text| Uuid::parse_str(text).ok())?;
        let duplicate = self
            .scheduled
            .lock()
            .iter()
            .any(|n| n.message_nonce == Some(nonce));
        if duplicate {
            return None;
        }

        let content = data.get("content").and_then(Value::as_str).unwrap_or_default();
        let is_group = self
            .graph
            .conversation(conversation)
            .is_some_and(|c| c.is_group());
        let body = if is_group {
            format!("{}: {content}", self.display_name(sender))
        } else {
            content.to_string()
        };
        Some(
            LocalNotification::new(
                NotificationCategory::ConversationWithLike,
                self.conversation_title(conversation, sender),
                body,
            )
            .with_conversation(conversation)
            .with_sender(sender)
            .with_message(nonce),
        )
    }

    fn added_to_conversation(&self, event: &UpdateEvent) -> Option<LocalNotification> {
        let conversation = event.conversation_id().ok()?;
        let sender = event.sender_id().ok()?;
        let self_id = self.graph.self_user_id()?;
        if sender == self_id || self.is_muted(conversation) {
            return None;
        }
        let data = event.data().cloned().map(Value::Object);
        let includes_self = match event.event_type {
            UpdateEventType::ConversationCreate => true,
            _ => array(data.as_ref(), "user_ids")
                .iter()
                .filter_map(Value::as_str)
                .any(|id| id == self_id.to_string()),
        };
        if !includes_self {
            return None;
        }
        Some(
            LocalNotification::new(
                NotificationCategory::Conversation,
                self.conversation_title(conversation, sender),
                format!("{} added you", self.display_name(sender)),
            )
            .with_conversation(conversation)
            .with_sender(sender),
        )
    }

    fn connection_request(&self, event: &UpdateEvent) -> Option<LocalNotification> {
        let connection = event.object().get("connection")?;
        if connection.get("status").and_then(Value::as_str) != Some("pending") {
            return None;
        }
        let from = connection
            .get("to")
            .and_then(Value::as_str)
            .and_then(|text| Uuid::parse_str(text).ok())?;
        let name = event
            .object()
            .get("user")
            .and_then(|u| u.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.display_name(from));

        let mut note = LocalNotification::new(
            NotificationCategory::Connect,
            name.clone(),
            format!("{name} wants to connect"),
        )
        .with_sender(from);
        if let Some(conversation) = connection
            .get("conversation")
            .and_then(Value::as_str)
            .and_then(|text| Uuid::parse_str(text).ok())
        {
            note = note.with_conversation(conversation);
        }
        Some(note)
    }

    fn call_state_changed(&self, event: &UpdateEvent) {
        let Ok(conversation) = event.conversation_id() else {
            return;
        };
        let object = event.object();
        let joined = |v: &Value| v.get("state").and_then(Value::as_str) == Some("joined");

        if object.get("self").is_some_and(joined) {
            // Answered here or on another device.
            if self.ringing.lock().remove(&conversation).is_some() {
                self.cancel_notifications(conversation);
            }
            return;
        }

        let callers: Vec<Uuid> = object
            .get("participants")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter(|(_, state)| joined(*state))
                    .filter_map(|(id, _)| Uuid::parse_str(id).ok())
                    .filter(|id| !self.is_self(*id))
                    .collect()
            })
            .unwrap_or_default();

        match callers.first() {
            Some(caller) => {
                let already_ringing = self
                    .ringing
                    .lock()
                    .insert(conversation, *caller)
                    .is_some();
                if already_ringing || self.is_muted(conversation) {
                    return;
                }
                self.schedule(
                    LocalNotification::new(
                        NotificationCategory::IncomingCall,
                        self.conversation_title(conversation, *caller),
                        format!("{} is calling", self.display_name(*caller)),
                    )
                    .with_conversation(conversation)
                    .with_sender(*caller),
                );
            }
            None => {
                let Some(caller) = self.ringing.lock().remove(&conversation) else {
                    return;
                };
                self.cancel_notifications(conversation);
                self.schedule(
                    LocalNotification::new(
                        NotificationCategory::MissedCall,
                        self.conversation_title(conversation, caller),
                        format!("Missed call from {}", self.display_name(caller)),
                    )
                    .with_conversation(conversation)
                    .with_sender(caller),
                );
            }
        }
    }
}

impl UpdateEventConsumer for LocalNotificationDispatcher {
    fn consume(&self, events: &[UpdateEvent]) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        for event in events.iter().filter(|e| e.source != EventSource::Download) {
            let note = match event.event_type {
                UpdateEventType::ConversationMessageAdd => self.message_added(event),
                UpdateEventType::ConversationCreate | UpdateEventType::ConversationMemberJoin => {
                    self.added_to_conversation(event)
                }
                UpdateEventType::UserConnection => self.connection_request(event),
                UpdateEventType::CallState => {
                    self.call_state_changed(event);
                    None
                }
                _ => None,
            };
            if let Some(note) = note {
                self.schedule(note);
            }
        }
    }
}

impl std::fmt::Debug for LocalNotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNotificationDispatcher")
            .field("scheduled", &self.scheduled.lock().len())
            .field("ringing", &self.ringing.lock().len())
            .finish_non_exhaustive()
    }
}
