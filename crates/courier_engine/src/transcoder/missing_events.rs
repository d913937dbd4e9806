//! Notifications missed while the push channel was closed.

use super::{Transcoder, TranscoderKind};
use crate::error::{SyncError, SyncResult};
use crate::paginator::{ListPaginator, PageOutcome};
use crate::sync_status::{SyncPhase, SyncStatus};
use courier_protocol::{EventSource, NotificationPage, Request, Response, UpdateEvent};
use courier_store::{keys, MetaValue, MetadataStore};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pages through `/notifications` from the persisted last event id while in
/// `FetchingMissedEvents`.
///
/// Downloaded events are handed to the strategy through
/// [`Transcoder::take_downloaded_events`]. A 404 means the backend no
/// longer knows the id: the events it returned are kept and the sync falls
/// back to slow sync.
pub struct MissingUpdateEventsTranscoder {
    store: Arc<dyn MetadataStore>,
    status: Arc<SyncStatus>,
    paginator: ListPaginator,
    downloaded: Mutex<Vec<UpdateEvent>>,
}

impl MissingUpdateEventsTranscoder {
    /// Creates the transcoder.
    pub fn new(
        store: Arc<dyn MetadataStore>,
        status: Arc<SyncStatus>,
        client_id: Option<String>,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            status,
            paginator: ListPaginator::new("/notifications", page_size, client_id),
            downloaded: Mutex::new(Vec::new()),
        }
    }

    /// Returns the persisted id of the last processed notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn last_update_event_id(&self) -> SyncResult<Option<Uuid>> {
        Ok(self.store.get_uuid(keys::LAST_UPDATE_EVENT_ID)?)
    }

    fn persist_last_id(&self, id: Uuid) -> SyncResult<()> {
        self.store.set(keys::LAST_UPDATE_EVENT_ID, MetaValue::Uuid(id))?;
        Ok(())
    }

    fn keep(&self, page: &NotificationPage) -> SyncResult<()> {
        if let Some(last) = page.last_id() {
            self.persist_last_id(last)?;
        }
        let events = page.events(EventSource::Download);
        debug!(events = events.len(), "downloaded missed events");
        self.downloaded.lock().extend(events);
        Ok(())
    }
}

impl Transcoder for MissingUpdateEventsTranscoder {
    fn kind(&self) -> TranscoderKind {
        TranscoderKind::MissingUpdateEvents
    }

    fn next_request(&self) -> SyncResult<Option<Request>> {
        if self.status.current_phase() != SyncPhase::FetchingMissedEvents {
            return Ok(None);
        }
        if !self.paginator.is_active() {
            self.paginator.begin(self.last_update_event_id()?);
        }
        Ok(self.paginator.next_request())
    }

    fn handle_response(&self, _request: &Request, response: &Response) -> SyncResult<()> {
        match self.paginator.did_receive(response)? {
            PageOutcome::Retry => Ok(()),
            PageOutcome::Page { page, finished } => {
                self.keep(&page)?;
                if finished {
                    self.status.did_finish(SyncPhase::FetchingMissedEvents)?;
                }
                Ok(())
            }
            PageOutcome::NotFound { page } => {
                if let Some(page) = page {
                    self.keep(&page)?;
                }
                info!("last update event id unknown to backend");
                self.status.did_fail(SyncPhase::FetchingMissedEvents)
            }
            PageOutcome::Rejected { status } => {
                warn!(status, "giving up on missed events");
                self.status.did_finish(SyncPhase::FetchingMissedEvents)
            }
        }
    }

    fn handle_failure(&self, _request: &Request, _error: &SyncError) {
        self.paginator.did_fail();
    }

    fn is_event_consumer(&self) -> bool {
        true
    }

    /// Live events move the persisted id forward once the sync is done.
    fn consume_events(&self, events: &[UpdateEvent]) -> SyncResult<()> {
        if self.status.is_syncing() {
            return Ok(());
        }
        let last = events
            .iter()
            .rev()
            .find(|e| !e.transient && e.source == EventSource::WebSocket);
        if let Some(event) = last {
            self.persist_last_id(event.id)?;
        }
        Ok(())
    }

    fn take_downloaded_events(&self) -> Vec<UpdateEvent> {
        std::mem::take(&mut *self.downloaded.lock())
    }

    fn on_stream_interrupted(&self) {
        self.paginator.cancel();
    }
}

impl std::fmt::Debug for MissingUpdateEventsTranscoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MissingUpdateEventsTranscoder")
            .field("paginator", &self.paginator)
            .field("downloaded", &self.downloaded.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_protocol::UpdateEventType;
    use courier_store::InMemoryStore;
    use serde_json::{json, Value};

    type Fixture = (MissingUpdateEventsTranscoder, Arc<SyncStatus>, Arc<InMemoryStore>);

    fn setup(last: Option<Uuid>) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        if let Some(id) = last {
            store.set(keys::LAST_UPDATE_EVENT_ID, MetaValue::Uuid(id)).unwrap();
        }
        let status = Arc::new(SyncStatus::new(store.clone()).unwrap());
        (
            MissingUpdateEventsTranscoder::new(store.clone(), status.clone(), None, 2),
            status,
            store,
        )
    }

    fn page(ids: &[Uuid], has_more: bool) -> Value {
        let notifications: Vec<Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id.to_string(),
                    "payload": [{ "type": "user.update", "user": {} }],
                })
            })
            .collect();
        json!({ "notifications": notifications, "has_more": has_more })
    }

    #[test]
    fn pages_from_persisted_id_then_finishes() {
        let since = Uuid::new_v4();
        let (transcoder, status, store) = setup(Some(since));
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let request = transcoder.next_request().unwrap().unwrap();
        assert_eq!(request.route(), "/notifications");
        assert_eq!(request.query_param("since"), Some(since.to_string().as_str()));
        transcoder
            .handle_response(&request, &Response::ok(page(&[a, b], true)))
            .unwrap();
        assert_eq!(store.get_uuid(keys::LAST_UPDATE_EVENT_ID).unwrap(), Some(b));
        assert_eq!(status.current_phase(), SyncPhase::FetchingMissedEvents);

        let request = transcoder.next_request().unwrap().unwrap();
        assert_eq!(request.query_param("since"), Some(b.to_string().as_str()));
        transcoder
            .handle_response(&request, &Response::ok(page(&[c], false)))
            .unwrap();

        let events = transcoder.take_downloaded_events();
        assert_eq!(
            events.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![a, b, c]
        );
        assert!(events.iter().all(|e| e.source == EventSource::Download));
        assert!(transcoder.take_downloaded_events().is_empty());
        assert_eq!(status.current_phase(), SyncPhase::Done);
        assert!(transcoder.next_request().unwrap().is_none());
    }

    #[test]
    fn not_found_falls_back_to_slow_sync() {
        let (transcoder, status, store) = setup(Some(Uuid::new_v4()));
        let a = Uuid::new_v4();
        let request = transcoder.next_request().unwrap().unwrap();

        transcoder
            .handle_response(&request, &Response::new(404, Some(page(&[a], false))))
            .unwrap();
        assert_eq!(transcoder.take_downloaded_events().len(), 1);
        assert_eq!(store.get_uuid(keys::LAST_UPDATE_EVENT_ID).unwrap(), Some(a));
        assert_eq!(status.current_phase(), SyncPhase::FetchingConnections);
        assert!(transcoder.next_request().unwrap().is_none());
    }

    #[test]
    fn idle_outside_missed_events_phase() {
        let (transcoder, _, _) = setup(None);
        assert!(transcoder.next_request().unwrap().is_none());
    }

    #[test]
    fn transport_failure_resends_page() {
        let (transcoder, _, _) = setup(Some(Uuid::new_v4()));
        let request = transcoder.next_request().unwrap().unwrap();
        assert!(transcoder.next_request().unwrap().is_none());
        transcoder.handle_failure(&request, &SyncError::transport_retryable("offline"));
        assert_eq!(transcoder.next_request().unwrap().unwrap(), request);
    }

    #[test]
    fn live_events_advance_last_id_when_done() {
        let (transcoder, status, store) = setup(Some(Uuid::new_v4()));
        status.did_finish(SyncPhase::FetchingMissedEvents).unwrap();

        let live = Uuid::new_v4();
        let mut transient = UpdateEvent::new(
            Uuid::new_v4(),
            UpdateEventType::UserUpdate,
            json!({ "type": "user.update" }),
            EventSource::WebSocket,
        );
        transient.transient = true;
        let event = UpdateEvent::new(
            live,
            UpdateEventType::UserUpdate,
            json!({ "type": "user.update" }),
            EventSource::WebSocket,
        );
        transcoder.consume_events(&[event, transient]).unwrap();
        assert_eq!(store.get_uuid(keys::LAST_UPDATE_EVENT_ID).unwrap(), Some(live));
    }
}
