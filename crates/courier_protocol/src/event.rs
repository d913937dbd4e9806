//! Update events received from the backend.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Type of an update event, named as the backend names it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UpdateEventType {
    /// A conversation was created.
    ConversationCreate,
    /// A conversation was renamed.
    ConversationRename,
    /// Users were added to a conversation.
    ConversationMemberJoin,
    /// Users left or were removed from a conversation.
    ConversationMemberLeave,
    /// A message was posted to a conversation.
    ConversationMessageAdd,
    /// A user profile changed.
    UserUpdate,
    /// A connection between two users changed.
    UserConnection,
    /// Participants of a call joined or left.
    CallState,
    /// Media flow for a call started or stopped.
    CallFlowActive,
    /// Any event type this client does not know.
    Unknown(String),
}

impl UpdateEventType {
    /// Returns the backend name of the type.
    pub fn as_str(&self) -> &str {
        match self {
            UpdateEventType::ConversationCreate => "conversation.create",
            UpdateEventType::ConversationRename => "conversation.rename",
            UpdateEventType::ConversationMemberJoin => "conversation.member-join",
            UpdateEventType::ConversationMemberLeave => "conversation.member-leave",
            UpdateEventType::ConversationMessageAdd => "conversation.message-add",
            UpdateEventType::UserUpdate => "user.update",
            UpdateEventType::UserConnection => "user.connection",
            UpdateEventType::CallState => "call.state",
            UpdateEventType::CallFlowActive => "call.flow-active",
            UpdateEventType::Unknown(name) => name,
        }
    }

    /// Parses a backend type name. Unrecognised names map to [`UpdateEventType::Unknown`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "conversation.create" => UpdateEventType::ConversationCreate,
            "conversation.rename" => UpdateEventType::ConversationRename,
            "conversation.member-join" => UpdateEventType::ConversationMemberJoin,
            "conversation.member-leave" => UpdateEventType::ConversationMemberLeave,
            "conversation.message-add" => UpdateEventType::ConversationMessageAdd,
            "user.update" => UpdateEventType::UserUpdate,
            "user.connection" => UpdateEventType::UserConnection,
            "call.state" => UpdateEventType::CallState,
            "call.flow-active" => UpdateEventType::CallFlowActive,
            other => UpdateEventType::Unknown(other.to_string()),
        }
    }

    /// Returns true for events that belong to a conversation.
    pub fn is_conversation_event(&self) -> bool {
        matches!(
            self,
            UpdateEventType::ConversationCreate
                | UpdateEventType::ConversationRename
                | UpdateEventType::ConversationMemberJoin
                | UpdateEventType::ConversationMemberLeave
                | UpdateEventType::ConversationMessageAdd
        )
    }

    /// Returns true for calling events.
    pub fn is_call_event(&self) -> bool {
        matches!(
            self,
            UpdateEventType::CallState | UpdateEventType::CallFlowActive
        )
    }
}

impl From<String> for UpdateEventType {
    fn from(name: String) -> Self {
        UpdateEventType::from_name(&name)
    }
}

impl From<UpdateEventType> for String {
    fn from(event_type: UpdateEventType) -> Self {
        event_type.as_str().to_string()
    }
}

/// Where an event was received from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Delivered live over the push channel.
    WebSocket,
    /// Fetched from the notification stream.
    Download,
    /// Carried by a remote push notification.
    PushNotification,
}

/// A single change pushed from the backend.
///
/// Events are identified by the UUID of the notification that carried them.
/// A notification with several payload entries yields several events that
/// share one UUID; discarding by id drops all of them.
///
/// # Fields
///
/// - `id`: Notification UUID
/// - `event_type`: What kind of change this is
/// - `payload`: The raw JSON object of the event
/// - `source`: How the event reached this client
/// - `transient`: Transient events (typing, call signalling) are not persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// Notification UUID.
    pub id: Uuid,
    /// Event type.
    pub event_type: UpdateEventType,
    /// Raw event payload.
    pub payload: Value,
    /// Delivery channel.
    pub source: EventSource,
    /// Whether the event is transient.
    pub transient: bool,
}

impl UpdateEvent {
    /// Creates a new event.
    pub fn new(id: Uuid, event_type: UpdateEventType, payload: Value, source: EventSource) -> Self {
        Self {
            id,
            event_type,
            payload,
            source,
            transient: false,
        }
    }

    /// Creates an event from a raw payload object, reading its `type` field.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not an object or has no `type`.
    pub fn from_payload(
        id: Uuid,
        payload: Value,
        source: EventSource,
        transient: bool,
    ) -> ProtocolResult<Self> {
        let event_type = payload
            .as_object()
            .ok_or_else(|| ProtocolError::invalid_field("payload", "expected object"))?
            .get("type")
            .and_then(Value::as_str)
            .map(UpdateEventType::from_name)
            .ok_or(ProtocolError::MissingField("type"))?;

        Ok(Self {
            id,
            event_type,
            payload,
            source,
            transient,
        })
    }

    /// Returns the payload as a JSON object, or an empty map.
    pub fn object(&self) -> &Map<String, Value> {
        static EMPTY: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();
        self.payload
            .as_object()
            .unwrap_or_else(|| EMPTY.get_or_init(Map::new))
    }

    /// Returns the nested `data` object, if any.
    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.object().get("data").and_then(Value::as_object)
    }

    /// Returns the conversation this event belongs to.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is missing or not a UUID.
    pub fn conversation_id(&self) -> ProtocolResult<Uuid> {
        uuid_field(self.object(), "conversation")
    }

    /// Returns the user that caused this event.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is missing or not a UUID.
    pub fn sender_id(&self) -> ProtocolResult<Uuid> {
        uuid_field(self.object(), "from")
    }

    /// Reads a UUID from the top level of the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is missing or not a UUID.
    pub fn uuid(&self, field: &'static str) -> ProtocolResult<Uuid> {
        uuid_field(self.object(), field)
    }
}

/// Reads a UUID-valued string field from a JSON object.
///
/// # Errors
///
/// Returns an error if the field is missing or does not parse.
pub(crate) fn uuid_field(object: &Map<String, Value>, field: &'static str) -> ProtocolResult<Uuid> {
    let text = object
        .get(field)
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingField(field))?;
    Uuid::parse_str(text).map_err(|_| ProtocolError::InvalidUuid {
        field,
        value: text.to_string(),
    })
}
