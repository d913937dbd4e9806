//! Users: profile downloads and user update events.

use super::{uuid_at, RequestGate, Transcoder, TranscoderKind};
use crate::error::{SyncError, SyncResult};
use crate::model::{ObjectGraph, User};
use crate::sync_status::{SyncPhase, SyncStatus};
use courier_protocol::{Request, Response, UpdateEvent, UpdateEventType};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Downloads unknown and stale users with `GET /users?ids=...`.
///
/// In `FetchingUsers` the phase finishes once no user is left to fetch.
#[derive(Debug)]
pub struct UserTranscoder {
    graph: Arc<ObjectGraph>,
    status: Arc<SyncStatus>,
    batch_size: usize,
    gate: RequestGate,
}

impl UserTranscoder {
    /// Creates the transcoder; at most `batch_size` users are requested at
    /// once.
    pub fn new(graph: Arc<ObjectGraph>, status: Arc<SyncStatus>, batch_size: usize) -> Self {
        Self {
            graph,
            status,
            batch_size: batch_size.max(1),
            gate: RequestGate::default(),
        }
    }

    fn requested_ids(request: &Request) -> Vec<Uuid> {
        request
            .query_param("ids")
            .unwrap_or_default()
            .split(',')
            .filter_map(|id| Uuid::parse_str(id).ok())
            .collect()
    }

    /// Marks users that the backend did not return as known, so they are
    /// not requested again.
    fn settle(&self, requested: &[Uuid], returned: &HashSet<Uuid>) {
        for id in requested.iter().filter(|id| !returned.contains(id)) {
            let mut user = self.graph.user(*id).unwrap_or_else(|| User::placeholder(*id));
            user.needs_refresh = false;
            self.graph.upsert_user(user);
        }
    }

    fn apply(&self, value: &Value) -> SyncResult<Uuid> {
        let id = uuid_at(value, "id")?;
        let mut user = self.graph.user(id).unwrap_or_else(|| User::placeholder(id));
        if let Some(name) = value.get("name").and_then(Value::as_str) {
            user.name = name.to_string();
        }
        if let Some(handle) = value.get("handle").and_then(Value::as_str) {
            user.handle = Some(handle.to_string());
        }
        user.needs_refresh = false;
        self.graph.upsert_user(user);
        Ok(id)
    }
}

impl Transcoder for UserTranscoder {
    fn kind(&self) -> TranscoderKind {
        TranscoderKind::User
    }

    fn next_request(&self) -> SyncResult<Option<Request>> {
        if self.gate.is_busy() {
            return Ok(None);
        }
        let ids = self.graph.users_to_fetch(self.batch_size);
        if ids.is_empty() {
            if self.status.current_phase() == SyncPhase::FetchingUsers {
                self.status.did_finish(SyncPhase::FetchingUsers)?;
            }
            return Ok(None);
        }
        if !self.gate.try_begin() {
            return Ok(None);
        }

        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        Ok(Some(Request::get(format!("/users?ids={}", ids.join(",")))))
    }

    fn handle_response(&self, request: &Request, response: &Response) -> SyncResult<()> {
        self.gate.end();
        if response.is_transient_error() {
            return Ok(());
        }

        let requested = Self::requested_ids(request);
        let mut returned = HashSet::new();
        if response.is_success() {
            let users = response
                .payload
                .as_ref()
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            for value in users {
                match self.apply(value) {
                    Ok(id) => {
                        returned.insert(id);
                    }
                    Err(err) => warn!(error = %err, "skipping malformed user"),
                }
            }
            debug!(requested = requested.len(), returned = returned.len(), "downloaded users");
        } else {
            warn!(status = response.status, "user download rejected");
        }
        self.settle(&requested, &returned);
        Ok(())
    }

    fn handle_failure(&self, _request: &Request, _error: &SyncError) {
        self.gate.end();
    }

    fn is_event_consumer(&self) -> bool {
        true
    }

    fn consume_events(&self, events: &[UpdateEvent]) -> SyncResult<()> {
        for event in events
            .iter()
            .filter(|e| e.event_type == UpdateEventType::UserUpdate)
        {
            let Some(user) = event.object().get("user") else {
                continue;
            };
            if let Err(err) = self.apply(user) {
                warn!(event = %event.id, error = %err, "bad user event");
            }
        }
        Ok(())
    }
}
