//! Transcoders translate between the object graph and backend requests.
//!
//! Each transcoder owns one kind of entity. The strategy asks transcoders
//! for requests in directory order, hands each response back to the
//! transcoder that issued the request, and fans update events out to every
//! transcoder that consumes them.

mod auth;
mod calling;
mod connection;
mod conversation;
mod last_event;
mod message;
mod missing_events;
mod push_token;
mod user;

pub use auth::{LoginCodeTranscoder, LoginTranscoder, RegistrationTranscoder};
pub use calling::CallingTranscoder;
pub use connection::ConnectionTranscoder;
pub use conversation::ConversationTranscoder;
pub use last_event::LastUpdateEventIdTranscoder;
pub use message::MessageTranscoder;
pub use missing_events::MissingUpdateEventsTranscoder;
pub use push_token::PushTokenTranscoder;
pub use user::UserTranscoder;

use crate::error::{SyncError, SyncResult};
use courier_protocol::{ProtocolError, Request, Response, UpdateEvent};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Identifies a transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TranscoderKind {
    /// Email or phone login.
    Login,
    /// Login code requests.
    LoginCode,
    /// Account registration.
    Registration,
    /// Push token registration.
    PushToken,
    /// Latest notification id.
    LastUpdateEventId,
    /// Connections.
    Connection,
    /// Conversations.
    Conversation,
    /// Users.
    User,
    /// Outgoing messages.
    Message,
    /// Call state.
    Calling,
    /// Notifications missed while offline.
    MissingUpdateEvents,
}

impl TranscoderKind {
    /// Returns the transcoder label.
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscoderKind::Login => "login",
            TranscoderKind::LoginCode => "login-code",
            TranscoderKind::Registration => "registration",
            TranscoderKind::PushToken => "push-token",
            TranscoderKind::LastUpdateEventId => "last-update-event-id",
            TranscoderKind::Connection => "connection",
            TranscoderKind::Conversation => "conversation",
            TranscoderKind::User => "user",
            TranscoderKind::Message => "message",
            TranscoderKind::Calling => "calling",
            TranscoderKind::MissingUpdateEvents => "missing-update-events",
        }
    }
}

impl fmt::Display for TranscoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-entity request generator and event consumer.
///
/// Every capability has a no-op default, so a transcoder only implements
/// what it does. All state is interior; methods take `&self`.
pub trait Transcoder: Send + Sync {
    /// Returns the transcoder kind.
    fn kind(&self) -> TranscoderKind;

    /// Returns the next request to send, if any.
    fn next_request(&self) -> SyncResult<Option<Request>> {
        Ok(None)
    }

    /// Handles the response to a request this transcoder issued.
    fn handle_response(&self, _request: &Request, _response: &Response) -> SyncResult<()> {
        Ok(())
    }

    /// A request this transcoder issued could not be sent.
    fn handle_failure(&self, _request: &Request, _error: &SyncError) {}

    /// Returns true if the transcoder wants update events.
    fn is_event_consumer(&self) -> bool {
        false
    }

    /// Applies update events to the object graph.
    fn consume_events(&self, _events: &[UpdateEvent]) -> SyncResult<()> {
        Ok(())
    }

    /// Removes and returns events downloaded by this transcoder.
    fn take_downloaded_events(&self) -> Vec<UpdateEvent> {
        Vec::new()
    }

    /// The push channel closed.
    fn on_stream_interrupted(&self) {}

    /// The push channel opened.
    fn on_stream_established(&self) {}
}

/// Transcoders in priority order.
#[derive(Default)]
pub struct TranscoderDirectory {
    transcoders: Vec<Arc<dyn Transcoder>>,
}

impl TranscoderDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transcoder with the lowest priority so far.
    pub fn register(&mut self, transcoder: Arc<dyn Transcoder>) {
        self.transcoders.push(transcoder);
    }

    /// Returns the transcoders in priority order.
    pub fn transcoders(&self) -> &[Arc<dyn Transcoder>] {
        &self.transcoders
    }

    /// Returns the transcoder at `index`.
    pub fn get(&self, index: usize) -> Option<&Arc<dyn Transcoder>> {
        self.transcoders.get(index)
    }

    /// Returns the transcoder of a kind.
    pub fn find(&self, kind: TranscoderKind) -> Option<&Arc<dyn Transcoder>> {
        self.transcoders.iter().find(|t| t.kind() == kind)
    }

    /// Returns the kinds in priority order.
    pub fn kinds(&self) -> Vec<TranscoderKind> {
        self.transcoders.iter().map(|t| t.kind()).collect()
    }

    /// Returns the transcoders that consume update events.
    pub fn event_consumers(&self) -> Vec<Arc<dyn Transcoder>> {
        self.transcoders
            .iter()
            .filter(|t| t.is_event_consumer())
            .cloned()
            .collect()
    }

    /// Returns the number of transcoders.
    pub fn len(&self) -> usize {
        self.transcoders.len()
    }

    /// Returns true if no transcoder is registered.
    pub fn is_empty(&self) -> bool {
        self.transcoders.is_empty()
    }
}

impl fmt::Debug for TranscoderDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}

/// Allows one request in flight at a time.
#[derive(Debug, Default)]
pub(crate) struct RequestGate {
    in_flight: AtomicBool,
}

impl RequestGate {
    /// Claims the gate. Returns false if a request is in flight.
    pub(crate) fn try_begin(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the gate.
    pub(crate) fn end(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Returns the JSON array under `key`, or an empty slice.
pub(crate) fn array<'a>(payload: Option<&'a Value>, key: &str) -> &'a [Value] {
    payload
        .and_then(|p| p.get(key))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Returns the `has_more` flag of a page.
pub(crate) fn has_more(payload: Option<&Value>) -> bool {
    payload
        .and_then(|p| p.get("has_more"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Reads a UUID-valued string field of a JSON object.
pub(crate) fn uuid_at(value: &Value, field: &'static str) -> SyncResult<Uuid> {
    let text = value
        .get(field)
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingField(field))?;
    let id = Uuid::parse_str(text).map_err(|_| ProtocolError::InvalidUuid {
        field,
        value: text.to_string(),
    })?;
    Ok(id)
}
