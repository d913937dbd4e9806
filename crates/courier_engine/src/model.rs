//! Local object graph.
//!
//! The graph holds the client's view of users, connections, conversations
//! and messages. Transcoders write downloaded state into it; outgoing
//! changes are flagged on the objects and picked up by the transcoders that
//! upload them.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// A user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Unique handle, if the user picked one.
    pub handle: Option<String>,
    /// The profile must be downloaded again.
    pub needs_refresh: bool,
}

impl User {
    /// Creates a placeholder that still needs to be downloaded.
    pub fn placeholder(id: Uuid) -> Self {
        Self {
            id,
            name: String::new(),
            handle: None,
            needs_refresh: true,
        }
    }
}

/// Status of a connection between the self user and another user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// The other user sent a request.
    Pending,
    /// Self sent a request.
    Sent,
    /// Both users are connected.
    Accepted,
    /// Self blocked the other user.
    Blocked,
    /// Self ignored the request.
    Ignored,
    /// Self cancelled a sent request.
    Cancelled,
}

impl ConnectionStatus {
    /// Returns the backend label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::Sent => "sent",
            ConnectionStatus::Accepted => "accepted",
            ConnectionStatus::Blocked => "blocked",
            ConnectionStatus::Ignored => "ignored",
            ConnectionStatus::Cancelled => "cancelled",
        }
    }

    /// Parses a backend label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(ConnectionStatus::Pending),
            "sent" => Some(ConnectionStatus::Sent),
            "accepted" => Some(ConnectionStatus::Accepted),
            "blocked" => Some(ConnectionStatus::Blocked),
            "ignored" => Some(ConnectionStatus::Ignored),
            "cancelled" => Some(ConnectionStatus::Cancelled),
            _ => None,
        }
    }
}

/// A connection to another user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// The other user.
    pub to: Uuid,
    /// The conversation of the connection.
    pub conversation: Option<Uuid>,
    /// Current status.
    pub status: ConnectionStatus,
    /// The status was changed locally and must be uploaded.
    pub needs_sync: bool,
}

/// Kind of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationKind {
    /// A group conversation.
    Group,
    /// The self user's private conversation.
    SelfConversation,
    /// A conversation with one other user.
    OneOnOne,
    /// A pending connection request.
    Connection,
}

impl ConversationKind {
    /// Maps the backend type code.
    pub fn from_code(code: u64) -> Self {
        match code {
            1 => ConversationKind::SelfConversation,
            2 => ConversationKind::OneOnOne,
            3 => ConversationKind::Connection,
            _ => ConversationKind::Group,
        }
    }
}

/// A conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id.
    pub id: Uuid,
    /// Kind.
    pub kind: ConversationKind,
    /// Name, if any.
    pub name: Option<String>,
    /// Other participants.
    pub participants: BTreeSet<Uuid>,
    /// Notifications are silenced.
    pub muted: bool,
    /// The conversation is archived.
    pub archived: bool,
    /// A local rename waits to be uploaded.
    pub pending_rename: Option<String>,
    /// Id of the last event applied to this conversation.
    pub last_event_id: Option<Uuid>,
}

impl Conversation {
    /// Creates an empty conversation.
    pub fn new(id: Uuid, kind: ConversationKind) -> Self {
        Self {
            id,
            kind,
            name: None,
            participants: BTreeSet::new(),
            muted: false,
            archived: false,
            pending_rename: None,
            last_event_id: None,
        }
    }

    /// Returns true for group conversations.
    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }
}

/// Kind of a system message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemMessageKind {
    /// The conversation was created.
    NewConversation,
    /// Participants were added.
    ParticipantsAdded,
    /// Participants were removed.
    ParticipantsRemoved,
    /// The conversation was renamed.
    ConversationNameChanged,
    /// A call was missed.
    MissedCall,
}

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Waiting to be sent.
    Pending,
    /// Accepted by the backend.
    Sent,
    /// Received from the backend.
    Delivered,
    /// Sending failed.
    FailedToSend,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Client-generated nonce, unique per message.
    pub nonce: Uuid,
    /// Conversation the message belongs to.
    pub conversation: Uuid,
    /// Author.
    pub sender: Uuid,
    /// Text content; empty for system messages.
    pub text: String,
    /// System message kind.
    pub system: Option<SystemMessageKind>,
    /// Delivery state.
    pub delivery: DeliveryState,
    /// Backend timestamp, once known.
    pub server_timestamp: Option<String>,
}

impl Message {
    /// Creates a system message.
    pub fn system(conversation: Uuid, sender: Uuid, kind: SystemMessageKind) -> Self {
        Self {
            nonce: Uuid::new_v4(),
            conversation,
            sender,
            text: String::new(),
            system: Some(kind),
            delivery: DeliveryState::Delivered,
            server_timestamp: None,
        }
    }
}

/// Object counts, for logging and inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphCounts {
    /// Users.
    pub users: usize,
    /// Connections.
    pub connections: usize,
    /// Conversations.
    pub conversations: usize,
    /// Messages.
    pub messages: usize,
}

#[derive(Debug, Default)]
struct GraphInner {
    self_user: Option<Uuid>,
    users: HashMap<Uuid, User>,
    connections: HashMap<Uuid, Connection>,
    conversations: HashMap<Uuid, Conversation>,
    messages: Vec<Message>,
}

/// The local object graph.
#[derive(Debug, Default)]
pub struct ObjectGraph {
    inner: RwLock<GraphInner>,
}

impl ObjectGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the self user id once known.
    pub fn self_user_id(&self) -> Option<Uuid> {
        self.inner.read().self_user
    }

    /// Sets the self user id.
    pub fn set_self_user_id(&self, id: Uuid) {
        self.inner.write().self_user = Some(id);
    }

    /// Inserts or replaces a user.
    pub fn upsert_user(&self, user: User) {
        self.inner.write().users.insert(user.id, user);
    }

    /// Returns a user.
    pub fn user(&self, id: Uuid) -> Option<User> {
        self.inner.read().users.get(&id).cloned()
    }

    /// Returns ids of users that are referenced but unknown, or flagged for
    /// refresh, up to `limit`.
    pub fn users_to_fetch(&self, limit: usize) -> Vec<Uuid> {
        let inner = self.inner.read();
        let mut wanted: BTreeSet<Uuid> = inner
            .users
            .values()
            .filter(|u| u.needs_refresh)
            .map(|u| u.id)
            .collect();

        let referenced = inner
            .connections
            .keys()
            .copied()
            .chain(inner.conversations.values().flat_map(|c| c.participants.iter().copied()));
        for id in referenced {
            if Some(id) != inner.self_user && !inner.users.contains_key(&id) {
                wanted.insert(id);
            }
        }

        wanted.into_iter().take(limit).collect()
    }

    /// Inserts or replaces a connection.
    pub fn upsert_connection(&self, connection: Connection) {
        self.inner.write().connections.insert(connection.to, connection);
    }

    /// Returns the connection to a user.
    pub fn connection(&self, to: Uuid) -> Option<Connection> {
        self.inner.read().connections.get(&to).cloned()
    }

    /// Changes a connection status locally; the change is uploaded later.
    ///
    /// Returns false if there is no connection to the user.
    pub fn set_connection_status_locally(&self, to: Uuid, status: ConnectionStatus) -> bool {
        match self.inner.write().connections.get_mut(&to) {
            Some(connection) => {
                connection.status = status;
                connection.needs_sync = true;
                true
            }
            None => false,
        }
    }

    /// Returns connections with local changes.
    pub fn connections_to_sync(&self) -> Vec<Connection> {
        self.inner
            .read()
            .connections
            .values()
            .filter(|c| c.needs_sync)
            .cloned()
            .collect()
    }

    /// Inserts or replaces a conversation.
    pub fn upsert_conversation(&self, conversation: Conversation) {
        self.inner
            .write()
            .conversations
            .insert(conversation.id, conversation);
    }

    /// Returns a conversation.
    pub fn conversation(&self, id: Uuid) -> Option<Conversation> {
        self.inner.read().conversations.get(&id).cloned()
    }

    /// Returns all conversations.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.read().conversations.values().cloned().collect()
    }

    /// Applies `f` to a conversation. Returns `None` if it does not exist.
    pub fn update_conversation<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Conversation) -> T,
    ) -> Option<T> {
        self.inner.write().conversations.get_mut(&id).map(f)
    }

    /// Returns conversations with a rename waiting to be uploaded.
    pub fn conversations_to_rename(&self) -> Vec<(Uuid, String)> {
        self.inner
            .read()
            .conversations
            .values()
            .filter_map(|c| c.pending_rename.clone().map(|name| (c.id, name)))
            .collect()
    }

    /// Adds a message. Returns false if a message with the same nonce exists.
    pub fn add_message(&self, message: Message) -> bool {
        let mut inner = self.inner.write();
        if inner.messages.iter().any(|m| m.nonce == message.nonce) {
            return false;
        }
        inner.messages.push(message);
        true
    }

    /// Appends a text message from the self user to be sent.
    ///
    /// Returns the message nonce, or `None` if the conversation does not
    /// exist or the self user is unknown.
    pub fn append_outgoing_message(
        &self,
        conversation: Uuid,
        text: impl Into<String>,
    ) -> Option<Uuid> {
        let mut inner = self.inner.write();
        let sender = inner.self_user?;
        if !inner.conversations.contains_key(&conversation) {
            return None;
        }

        let nonce = Uuid::new_v4();
        inner.messages.push(Message {
            nonce,
            conversation,
            sender,
            text: text.into(),
            system: None,
            delivery: DeliveryState::Pending,
            server_timestamp: None,
        });
        Some(nonce)
    }

    /// Returns a message by nonce.
    pub fn message(&self, nonce: Uuid) -> Option<Message> {
        self.inner
            .read()
            .messages
            .iter()
            .find(|m| m.nonce == nonce)
            .cloned()
    }

    /// Applies `f` to a message. Returns `None` if it does not exist.
    pub fn update_message<T>(&self, nonce: Uuid, f: impl FnOnce(&mut Message) -> T) -> Option<T> {
        self.inner
            .write()
            .messages
            .iter_mut()
            .find(|m| m.nonce == nonce)
            .map(f)
    }

    /// Returns the messages of a conversation in insertion order.
    pub fn messages_in(&self, conversation: Uuid) -> Vec<Message> {
        self.inner
            .read()
            .messages
            .iter()
            .filter(|m| m.conversation == conversation)
            .cloned()
            .collect()
    }

    /// Returns messages from the self user that wait to be sent.
    pub fn pending_messages(&self) -> Vec<Message> {
        let inner = self.inner.read();
        inner
            .messages
            .iter()
            .filter(|m| m.delivery == DeliveryState::Pending && Some(m.sender) == inner.self_user)
            .cloned()
            .collect()
    }

    /// Returns object counts.
    pub fn counts(&self) -> GraphCounts {
        let inner = self.inner.read();
        GraphCounts {
            users: inner.users.len(),
            connections: inner.connections.len(),
            conversations: inner.conversations.len(),
            messages: inner.messages.len(),
        }
    }
}
