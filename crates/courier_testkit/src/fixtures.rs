//! Test fixtures and session helpers.
//!
//! Provides a user session wired to a scripted transport, plus builders
//! for the JSON payloads the backend sends.

use courier_engine::{MockTransport, SyncConfig, UserSession};
use courier_protocol::Response;
use courier_store::{FileStore, InMemoryStore, MetadataStore};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// Client version used by test sessions.
pub const TEST_CLIENT_VERSION: &str = "1.0.0";

/// A test session with automatic cleanup.
pub struct TestSession {
    /// The session instance.
    pub session: UserSession,
    /// The scripted backend.
    pub transport: Arc<MockTransport>,
    /// The metadata store.
    pub store: Arc<dyn MetadataStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestSession {
    /// Creates a session over an in-memory store.
    pub fn memory() -> Self {
        Self::over(Arc::new(InMemoryStore::new()), None)
    }

    /// Creates a session over a file store in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(temp_dir.path()).expect("Failed to open file store");
        Self::over(Arc::new(store), Some(temp_dir))
    }

    /// Creates an in-memory session that is logged in and done syncing
    /// against an empty backend.
    pub fn logged_in() -> Self {
        let fixture = Self::memory();
        script_empty_backend(&fixture.transport);
        fixture.session.authentication().restore(Uuid::new_v4());
        fixture
            .session
            .perform_requests()
            .expect("Failed to sync against empty backend");
        fixture
    }

    fn over(store: Arc<dyn MetadataStore>, temp_dir: Option<TempDir>) -> Self {
        let transport = Arc::new(MockTransport::new());
        let session = UserSession::new(
            SyncConfig::new(TEST_CLIENT_VERSION),
            store.clone(),
            transport.clone(),
        )
        .expect("Failed to create session");
        Self {
            session,
            transport,
            store,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }
}

impl std::ops::Deref for TestSession {
    type Target = UserSession;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

/// Scripts a backend with one notification and nothing else.
///
/// The last notification id resolves, and every other request gets an
/// empty notification page, so a slow sync runs to completion.
pub fn script_empty_backend(transport: &MockTransport) {
    transport.respond(
        "GET /notifications/last",
        Response::ok(json!({ "id": Uuid::new_v4().to_string() })),
    );
    transport.set_fallback(Response::ok(json!({ "notifications": [], "has_more": false })));
}

/// Runs a test with a logged-in in-memory session.
///
/// # Example
///
/// ```rust,ignore
/// use courier_testkit::with_session;
///
/// #[test]
/// fn my_test() {
///     with_session(|fixture| {
///         assert!(fixture.authentication().is_authenticated());
///     });
/// }
/// ```
pub fn with_session<F, R>(f: F) -> R
where
    F: FnOnce(&TestSession) -> R,
{
    let fixture = TestSession::logged_in();
    f(&fixture)
}

/// Builders for backend payloads.
pub mod payloads {
    use serde_json::{json, Value};
    use uuid::Uuid;

    /// A notification with a fresh id.
    pub fn notification(payload: Vec<Value>) -> Value {
        notification_with_id(Uuid::new_v4(), payload)
    }

    /// A notification with the given id.
    pub fn notification_with_id(id: Uuid, payload: Vec<Value>) -> Value {
        json!({ "id": id.to_string(), "payload": payload })
    }

    /// A page of notifications.
    pub fn page(notifications: Vec<Value>, has_more: bool) -> Value {
        json!({ "notifications": notifications, "has_more": has_more })
    }

    /// A `conversation.message-add` event.
    pub fn message_add(conversation: Uuid, from: Uuid, text: &str) -> Value {
        json!({
            "type": "conversation.message-add",
            "conversation": conversation.to_string(),
            "from": from.to_string(),
            "data": { "nonce": Uuid::new_v4().to_string(), "content": text },
        })
    }

    /// A `user.update` event.
    pub fn user_update(id: Uuid, name: &str) -> Value {
        json!({ "type": "user.update", "user": { "id": id.to_string(), "name": name } })
    }

    /// A remote push payload carrying a notification.
    pub fn remote_push(notification: Value) -> Value {
        json!({ "aps": { "content-available": 1 }, "data": notification })
    }
}
