//! Fetches the id of the latest notification at the start of a slow sync.

use super::{uuid_at, RequestGate, Transcoder, TranscoderKind};
use crate::error::{SyncError, SyncResult};
use crate::sync_status::{SyncPhase, SyncStatus};
use courier_protocol::{Request, Response};
use std::sync::Arc;
use tracing::debug;

/// Sends `GET /notifications/last` while in `FetchingLastUpdateEventID`.
#[derive(Debug)]
pub struct LastUpdateEventIdTranscoder {
    status: Arc<SyncStatus>,
    client_id: Option<String>,
    gate: RequestGate,
}

impl LastUpdateEventIdTranscoder {
    /// Creates the transcoder.
    pub fn new(status: Arc<SyncStatus>, client_id: Option<String>) -> Self {
        Self {
            status,
            client_id,
            gate: RequestGate::default(),
        }
    }
}

impl Transcoder for LastUpdateEventIdTranscoder {
    fn kind(&self) -> TranscoderKind {
        TranscoderKind::LastUpdateEventId
    }

    fn next_request(&self) -> SyncResult<Option<Request>> {
        if self.status.current_phase() != SyncPhase::FetchingLastUpdateEventID
            || !self.gate.try_begin()
        {
            return Ok(None);
        }
        let path = match &self.client_id {
            Some(client) => format!("/notifications/last?client={client}"),
            None => "/notifications/last".to_string(),
        };
        Ok(Some(Request::get(path)))
    }

    fn handle_response(&self, _request: &Request, response: &Response) -> SyncResult<()> {
        self.gate.end();
        if response.is_transient_error() {
            return Ok(());
        }

        if response.is_success() {
            let payload = response.payload.clone().unwrap_or_default();
            let id = uuid_at(&payload, "id")?;
            debug!(id = %id, "fetched last update event id");
            self.status.update_last_update_event_id(id);
        }
        // 404: the account has no notifications yet.
        self.status.did_finish(SyncPhase::FetchingLastUpdateEventID)
    }

    fn handle_failure(&self, _request: &Request, _error: &SyncError) {
        self.gate.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_store::{keys, InMemoryStore, MetadataStore};
    use serde_json::json;
    use uuid::Uuid;

    fn setup() -> (LastUpdateEventIdTranscoder, Arc<SyncStatus>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let status = Arc::new(SyncStatus::new(store.clone()).unwrap());
        (
            LastUpdateEventIdTranscoder::new(status.clone(), Some("c1".into())),
            status,
            store,
        )
    }

    #[test]
    fn fetches_id_and_advances() {
        let (transcoder, status, store) = setup();
        let request = transcoder.next_request().unwrap().unwrap();
        assert_eq!(request.path, "/notifications/last?client=c1");
        assert!(transcoder.next_request().unwrap().is_none());

        let id = Uuid::new_v4();
        transcoder
            .handle_response(&request, &Response::ok(json!({ "id": id.to_string() })))
            .unwrap();
        assert_eq!(status.current_phase(), SyncPhase::FetchingConnections);

        for phase in [
            SyncPhase::FetchingConnections,
            SyncPhase::FetchingConversations,
            SyncPhase::FetchingUsers,
        ] {
            status.did_finish(phase).unwrap();
        }
        assert_eq!(store.get_uuid(keys::LAST_UPDATE_EVENT_ID).unwrap(), Some(id));
    }

    #[test]
    fn not_found_still_advances() {
        let (transcoder, status, _) = setup();
        let request = transcoder.next_request().unwrap().unwrap();
        transcoder
            .handle_response(&request, &Response::status(404))
            .unwrap();
        assert_eq!(status.current_phase(), SyncPhase::FetchingConnections);
        assert!(transcoder.next_request().unwrap().is_none());
    }

    #[test]
    fn server_error_retries() {
        let (transcoder, status, _) = setup();
        let request = transcoder.next_request().unwrap().unwrap();
        transcoder
            .handle_response(&request, &Response::status(502))
            .unwrap();
        assert_eq!(status.current_phase(), SyncPhase::FetchingLastUpdateEventID);
        assert!(transcoder.next_request().unwrap().is_some());
    }
}
