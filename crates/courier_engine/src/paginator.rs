//! Paging through the notification stream.

use crate::transcoder::RequestGate;
use courier_protocol::{NotificationPage, ProtocolResult, Request, Response};
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// What a paginated response means for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    /// A page arrived. `finished` is true on the last page.
    Page {
        /// The decoded page.
        page: NotificationPage,
        /// No page follows.
        finished: bool,
    },
    /// The `since` id is unknown to the backend. The response may still
    /// carry the notifications the backend has.
    NotFound {
        /// Notifications returned with the 404, if any.
        page: Option<NotificationPage>,
    },
    /// The request should be sent again.
    Retry,
    /// The backend refused the request.
    Rejected {
        /// Response status.
        status: u16,
    },
}

#[derive(Debug, Default)]
struct Cursor {
    active: bool,
    since: Option<Uuid>,
}

/// Walks `GET {path}?size=N[&since=id][&client=c]` until `has_more` is
/// false.
#[derive(Debug)]
pub struct ListPaginator {
    path: String,
    page_size: usize,
    client_id: Option<String>,
    cursor: Mutex<Cursor>,
    gate: RequestGate,
}

impl ListPaginator {
    /// Creates an idle paginator.
    pub fn new(path: impl Into<String>, page_size: usize, client_id: Option<String>) -> Self {
        Self {
            path: path.into(),
            page_size: page_size.max(1),
            client_id,
            cursor: Mutex::new(Cursor::default()),
            gate: RequestGate::default(),
        }
    }

    /// Starts paging after `since`, or from the oldest entry.
    pub fn begin(&self, since: Option<Uuid>) {
        debug!(since = ?since, path = %self.path, "start paging");
        *self.cursor.lock() = Cursor {
            active: true,
            since,
        };
    }

    /// Stops paging.
    pub fn cancel(&self) {
        self.cursor.lock().active = false;
    }

    /// Returns true while pages remain to be fetched.
    pub fn is_active(&self) -> bool {
        self.cursor.lock().active
    }

    /// Returns the id the next page starts after.
    pub fn since(&self) -> Option<Uuid> {
        self.cursor.lock().since
    }

    /// Returns the request for the next page unless one is in flight.
    pub fn next_request(&self) -> Option<Request> {
        let cursor = self.cursor.lock();
        if !cursor.active || !self.gate.try_begin() {
            return None;
        }

        let mut path = format!("{}?size={}", self.path, self.page_size);
        if let Some(since) = cursor.since {
            path.push_str(&format!("&since={since}"));
        }
        if let Some(client) = &self.client_id {
            path.push_str(&format!("&client={client}"));
        }
        Some(Request::get(path))
    }

    /// Handles the response to the last request.
    ///
    /// # Errors
    ///
    /// Returns an error if a successful response cannot be decoded; the
    /// page is requested again.
    pub fn did_receive(&self, response: &Response) -> ProtocolResult<PageOutcome> {
        self.gate.end();
        if response.is_transient_error() {
            return Ok(PageOutcome::Retry);
        }

        let mut cursor = self.cursor.lock();
        if response.status == 404 {
            cursor.active = false;
            let page = response
                .payload
                .as_ref()
                .and_then(|p| NotificationPage::from_json(p).ok());
            if let Some(last) = page.as_ref().and_then(NotificationPage::last_id) {
                cursor.since = Some(last);
            }
            return Ok(PageOutcome::NotFound { page });
        }
        if !response.is_success() {
            warn!(status = response.status, path = %self.path, "page rejected");
            cursor.active = false;
            return Ok(PageOutcome::Rejected {
                status: response.status,
            });
        }

        let payload = response.payload.clone().unwrap_or_default();
        let page = NotificationPage::from_json(&payload)?;
        if let Some(last) = page.last_id() {
            cursor.since = Some(last);
        }
        let finished = !page.has_more || page.notifications.is_empty();
        if finished {
            cursor.active = false;
        }
        Ok(PageOutcome::Page { page, finished })
    }

    /// The request could not be sent; it is sent again.
    pub fn did_fail(&self) {
        self.gate.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn page(ids: &[Uuid], has_more: bool) -> Value {
        let notifications: Vec<Value> = ids
            .iter()
            .map(|id| json!({ "id": id.to_string(), "payload": [{ "type": "user.update" }] }))
            .collect();
        json!({ "notifications": notifications, "has_more": has_more })
    }

    #[test]
    fn idle_until_started() {
        let paginator = ListPaginator::new("/notifications", 10, None);
        assert!(paginator.next_request().is_none());
        paginator.begin(None);
        assert_eq!(
            paginator.next_request().unwrap().path,
            "/notifications?size=10"
        );
        assert!(paginator.next_request().is_none());
    }

    #[test]
    fn follows_has_more() {
        let paginator = ListPaginator::new("/notifications", 2, Some("c1".into()));
        let since = Uuid::new_v4();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        paginator.begin(Some(since));

        let request = paginator.next_request().unwrap();
        assert_eq!(request.query_param("since"), Some(since.to_string().as_str()));
        assert_eq!(request.query_param("client"), Some("c1"));
        let outcome = paginator.did_receive(&Response::ok(page(&[a, b], true))).unwrap();
        assert!(matches!(outcome, PageOutcome::Page { finished: false, .. }));

        let request = paginator.next_request().unwrap();
        assert_eq!(request.query_param("since"), Some(b.to_string().as_str()));
        let outcome = paginator.did_receive(&Response::ok(page(&[c], false))).unwrap();
        assert!(matches!(outcome, PageOutcome::Page { finished: true, .. }));
        assert!(!paginator.is_active());
        assert_eq!(paginator.since(), Some(c));
    }

    #[test]
    fn not_found_keeps_returned_page() {
        let paginator = ListPaginator::new("/notifications", 2, None);
        let a = Uuid::new_v4();
        paginator.begin(Some(Uuid::new_v4()));
        paginator.next_request().unwrap();

        let outcome = paginator
            .did_receive(&Response::new(404, Some(page(&[a], false))))
            .unwrap();
        match outcome {
            PageOutcome::NotFound { page: Some(page) } => assert_eq!(page.last_id(), Some(a)),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!paginator.is_active());
    }

    #[test]
    fn transient_errors_retry() {
        let paginator = ListPaginator::new("/notifications", 2, None);
        paginator.begin(None);
        let request = paginator.next_request().unwrap();
        assert_eq!(
            paginator.did_receive(&Response::status(503)).unwrap(),
            PageOutcome::Retry
        );
        assert_eq!(paginator.next_request().unwrap(), request);

        paginator.did_fail();
        assert!(paginator.next_request().is_some());
    }

    #[test]
    fn rejected_stops() {
        let paginator = ListPaginator::new("/notifications", 2, None);
        paginator.begin(None);
        paginator.next_request().unwrap();
        assert_eq!(
            paginator.did_receive(&Response::status(403)).unwrap(),
            PageOutcome::Rejected { status: 403 }
        );
        assert!(!paginator.is_active());
    }
}
