//! Integration tests for the user session against an in-memory backend.

use courier_engine::hotfix::{ClosurePatch, HotFixContext};
use courier_engine::{
    Credentials, HotFixDirectory, HotFixPhase, SyncConfig, SyncPhase, SyncResult,
    SyncStateDelegate, Transport, UserSession, Version,
};
use courier_calling::CallSessionRegistry;
use courier_protocol::{Method, Request, Response};
use courier_store::{keys, FileStore, InMemoryStore, MetadataStore};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A backend that serves a fixed account from memory.
struct InMemoryBackend {
    self_id: Uuid,
    alice: Uuid,
    conversation: Uuid,
    notifications: Mutex<Vec<Value>>,
    log: Mutex<Vec<String>>,
}

impl InMemoryBackend {
    fn new() -> Self {
        Self {
            self_id: Uuid::new_v4(),
            alice: Uuid::new_v4(),
            conversation: Uuid::new_v4(),
            notifications: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Appends a message from Alice to the notification stream. Returns the
    /// notification id.
    fn post_message(&self, text: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.notifications.lock().push(self.message_notification(id, text));
        id
    }

    fn message_notification(&self, id: Uuid, text: &str) -> Value {
        json!({
            "id": id.to_string(),
            "payload": [{
                "type": "conversation.message-add",
                "conversation": self.conversation.to_string(),
                "from": self.alice.to_string(),
                "time": "2024-05-01T10:00:00Z",
                "data": { "nonce": Uuid::new_v4().to_string(), "content": text },
            }],
        })
    }

    fn requests(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn notifications_page(&self, request: &Request) -> Response {
        let all = self.notifications.lock().clone();
        let size = request
            .query_param("size")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(100);
        let start = match request.query_param("since") {
            None => 0,
            Some(since) => match all.iter().position(|n| n["id"] == since) {
                Some(index) => index + 1,
                None => {
                    return Response::new(
                        404,
                        Some(json!({ "notifications": all, "has_more": false })),
                    );
                }
            },
        };
        let rest = &all[start.min(all.len())..];
        let page: Vec<Value> = rest.iter().take(size).cloned().collect();
        Response::ok(json!({ "notifications": page, "has_more": rest.len() > size }))
    }
}

impl Transport for InMemoryBackend {
    fn send(&self, request: &Request) -> SyncResult<Response> {
        self.log.lock().push(request.to_string());
        let route = request.route().to_string();
        let response = match (request.method, route.as_str()) {
            (Method::Post, "/login") => Response::ok(json!({ "user": self.self_id.to_string() })),
            (Method::Get, "/notifications/last") => {
                match self.notifications.lock().last() {
                    Some(last) => Response::ok(json!({ "id": last["id"] })),
                    None => Response::status(404),
                }
            }
            (Method::Get, "/notifications") => self.notifications_page(request),
            (Method::Get, "/connections") => Response::ok(json!({
                "connections": [{
                    "to": self.alice.to_string(),
                    "conversation": self.conversation.to_string(),
                    "status": "accepted",
                }],
                "has_more": false,
            })),
            (Method::Get, "/conversations") => Response::ok(json!({
                "conversations": [{
                    "id": self.conversation.to_string(),
                    "type": 2,
                    "members": { "others": [{ "id": self.alice.to_string() }] },
                }],
                "has_more": false,
            })),
            (Method::Get, "/users") => Response::ok(json!([
                { "id": self.alice.to_string(), "name": "Alice" },
            ])),
            (Method::Post, _) if route.ends_with("/messages") => {
                Response::ok(json!({ "time": "2024-05-01T10:05:00Z" }))
            }
            _ => Response::ok(json!({})),
        };
        Ok(response)
    }
}

#[derive(Default)]
struct CountingDelegate {
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl SyncStateDelegate for CountingDelegate {
    fn did_start_sync(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn did_finish_sync(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

fn session_over(
    store: Arc<dyn MetadataStore>,
    backend: &Arc<InMemoryBackend>,
) -> UserSession {
    UserSession::new(SyncConfig::new("3.2.0"), store, backend.clone()).unwrap()
}

fn login(session: &UserSession) {
    session
        .login(Credentials::Email {
            email: "me@example.com".into(),
            password: "secret".into(),
        })
        .unwrap();
}

#[test]
fn slow_sync_from_fresh_install() {
    let backend = Arc::new(InMemoryBackend::new());
    let latest = backend.post_message("before install");
    let store = Arc::new(InMemoryStore::new());
    let session = session_over(store.clone(), &backend);
    let delegate = Arc::new(CountingDelegate::default());
    session.set_sync_delegate(delegate.clone());

    login(&session);

    assert_eq!(session.sync_status().current_phase(), SyncPhase::Done);
    assert_eq!(delegate.started.load(Ordering::SeqCst), 1);
    assert_eq!(delegate.finished.load(Ordering::SeqCst), 1);
    assert_eq!(
        store.get_uuid(keys::LAST_UPDATE_EVENT_ID).unwrap(),
        Some(latest)
    );

    let graph = session.graph();
    assert!(graph.conversation(backend.conversation).is_some());
    assert_eq!(graph.user(backend.alice).unwrap().name, "Alice");
    // The slow sync starts after the latest notification; older messages
    // are not replayed.
    assert!(graph.messages_in(backend.conversation).is_empty());

    let requests = backend.requests();
    assert_eq!(requests[0], "POST /login");
    assert_eq!(requests[1], "GET /notifications/last");
}

#[test]
fn quick_sync_downloads_missed_events() {
    let backend = Arc::new(InMemoryBackend::new());
    let seen = backend.post_message("seen");
    backend.post_message("missed one");
    let last = backend.post_message("missed two");

    let store = Arc::new(InMemoryStore::new());
    store
        .set(keys::LAST_UPDATE_EVENT_ID, seen.into())
        .unwrap();
    let session = session_over(store.clone(), &backend);
    assert_eq!(
        session.sync_status().current_phase(),
        SyncPhase::FetchingMissedEvents
    );

    login(&session);

    let texts: Vec<String> = session
        .graph()
        .messages_in(backend.conversation)
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, vec!["missed one", "missed two"]);
    assert_eq!(store.get_uuid(keys::LAST_UPDATE_EVENT_ID).unwrap(), Some(last));
    assert!(!backend
        .requests()
        .iter()
        .any(|r| r.starts_with("GET /connections")));
}

#[test]
fn unknown_last_event_id_falls_back_to_slow_sync() {
    let backend = Arc::new(InMemoryBackend::new());
    let last = backend.post_message("only message");

    let store = Arc::new(InMemoryStore::new());
    store
        .set(keys::LAST_UPDATE_EVENT_ID, Uuid::new_v4().into())
        .unwrap();
    let session = session_over(store.clone(), &backend);

    login(&session);

    assert_eq!(session.sync_status().current_phase(), SyncPhase::Done);
    assert_eq!(store.get_uuid(keys::LAST_UPDATE_EVENT_ID).unwrap(), Some(last));
    let requests = backend.requests();
    assert!(requests.iter().any(|r| r.starts_with("GET /connections")));
    // The 404 page is not requested again with the unknown id.
    let missed: Vec<_> = requests
        .iter()
        .filter(|r| r.starts_with("GET /notifications?"))
        .collect();
    assert_eq!(missed.len(), 2);
    assert!(missed[1].contains(&format!("since={last}")));
}

#[test]
fn live_events_wait_for_the_sync_to_finish() {
    let backend = Arc::new(InMemoryBackend::new());
    let seen = backend.post_message("seen");
    let store = Arc::new(InMemoryStore::new());
    store.set(keys::LAST_UPDATE_EVENT_ID, seen.into()).unwrap();
    let session = session_over(store.clone(), &backend);
    session.authentication().restore(backend.self_id);

    let live_a = Uuid::new_v4();
    let live_b = Uuid::new_v4();
    session
        .did_receive_push_channel_data(&backend.message_notification(live_a, "live a"))
        .unwrap();
    session
        .did_receive_push_channel_data(&backend.message_notification(live_b, "live b"))
        .unwrap();
    assert_eq!(session.strategy().buffer().len(), 2);
    assert!(session.graph().messages_in(backend.conversation).is_empty());

    backend.post_message("missed");
    session.perform_requests().unwrap();

    let texts: Vec<String> = session
        .graph()
        .messages_in(backend.conversation)
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, vec!["missed", "live a", "live b"]);
    assert!(session.strategy().buffer().is_empty());
    assert_eq!(store.get_uuid(keys::LAST_UPDATE_EVENT_ID).unwrap(), Some(live_b));
}

#[test]
fn outgoing_message_is_sent_and_confirmed() {
    let backend = Arc::new(InMemoryBackend::new());
    let session = session_over(Arc::new(InMemoryStore::new()), &backend);
    login(&session);

    let nonce = session.send_message(backend.conversation, "hello").unwrap();
    let message = session.graph().message(nonce).unwrap();
    assert_eq!(message.delivery, courier_engine::DeliveryState::Sent);
    assert!(backend
        .requests()
        .contains(&format!("POST /conversations/{}/messages", backend.conversation)));
}

#[test]
fn after_sync_hotfix_runs_once_across_launches() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(InMemoryBackend::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let launch = |version: &str| {
        let store: Arc<dyn MetadataStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let mut hotfixes = HotFixDirectory::new();
        let counter = runs.clone();
        hotfixes.register(Box::new(ClosurePatch::new(
            Version::parse("3.1.0").unwrap(),
            HotFixPhase::AfterSync,
            "count",
            move |_ctx: &HotFixContext<'_>| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )));
        let session = UserSession::with_parts(
            SyncConfig::new(version),
            store,
            backend.clone(),
            hotfixes,
            Arc::new(CallSessionRegistry::new()),
        )
        .unwrap();
        session
            .did_finish_launching(Default::default())
            .unwrap();
        login(&session);
        assert_eq!(session.sync_status().current_phase(), SyncPhase::Done);
    };

    // Fresh install at 3.0.0 only writes the markers.
    launch("3.0.0");
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    launch("3.2.0");
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    launch("3.2.0");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
