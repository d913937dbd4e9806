//! Transport layer abstraction for backend requests.

use crate::error::{SyncError, SyncResult};
use courier_protocol::{Request, Response};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

/// Sends requests to the backend.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, mock for testing, etc.). A returned `Response`
/// may carry any status; `Err` means the request never reached the
/// backend.
pub trait Transport: Send + Sync {
    /// Sends a request and waits for the response.
    fn send(&self, request: &Request) -> SyncResult<Response>;
}

/// A scripted transport for testing.
///
/// Responses are queued per `"METHOD /route"` key and handed out in order.
/// Requests without a scripted response get the fallback response, 404 by
/// default.
#[derive(Debug)]
pub struct MockTransport {
    scripted: Mutex<HashMap<String, VecDeque<SyncResult<Response>>>>,
    fallback: Mutex<Response>,
    sent: Mutex<Vec<Request>>,
    offline: AtomicBool,
}

impl MockTransport {
    /// Creates a mock transport with nothing scripted.
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(HashMap::new()),
            fallback: Mutex::new(Response::status(404)),
            sent: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
        }
    }

    fn key(method: impl std::fmt::Display, route: &str) -> String {
        format!("{method} {route}")
    }

    /// Queues a response for `"METHOD /route"`, for example
    /// `"GET /notifications"`. The query string is not part of the route.
    pub fn respond(&self, route: &str, response: Response) {
        self.scripted
            .lock()
            .entry(route.to_string())
            .or_default()
            .push_back(Ok(response));
    }

    /// Queues a transport error for `"METHOD /route"`.
    pub fn fail(&self, route: &str, error: SyncError) {
        self.scripted
            .lock()
            .entry(route.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Sets the response for requests that have nothing scripted.
    pub fn set_fallback(&self, response: Response) {
        *self.fallback.lock() = response;
    }

    /// Makes every request fail with a retryable transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns every request sent so far.
    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().clone()
    }

    /// Returns the `"METHOD /path"` lines of every request sent so far.
    pub fn sent_lines(&self) -> Vec<String> {
        self.sent.lock().iter().map(ToString::to_string).collect()
    }

    /// Returns how many scripted responses have not been used.
    pub fn remaining(&self) -> usize {
        self.scripted.lock().values().map(VecDeque::len).sum()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn send(&self, request: &Request) -> SyncResult<Response> {
        self.sent.lock().push(request.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("offline"));
        }

        let key = Self::key(request.method, request.route());
        let scripted = self
            .scripted
            .lock()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(result) => result,
            None => Ok(self.fallback.lock().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scripted_in_order_then_fallback() {
        let transport = MockTransport::new();
        transport.respond("GET /users", Response::ok(json!([])));
        transport.respond("GET /users", Response::status(500));

        let request = Request::get("/users?ids=a");
        assert_eq!(transport.send(&request).unwrap().status, 200);
        assert_eq!(transport.send(&request).unwrap().status, 500);
        assert_eq!(transport.send(&request).unwrap().status, 404);
        assert_eq!(transport.sent().len(), 3);
        assert_eq!(transport.remaining(), 0);
    }

    #[test]
    fn failures_and_offline() {
        let transport = MockTransport::new();
        transport.fail("POST /login", SyncError::transport_fatal("tls"));
        let login = Request::post("/login", json!({}));
        assert!(!transport.send(&login).unwrap_err().is_retryable());

        transport.set_offline(true);
        assert!(transport.send(&login).unwrap_err().is_retryable());
        assert_eq!(transport.sent_lines(), vec!["POST /login", "POST /login"]);
    }
}
