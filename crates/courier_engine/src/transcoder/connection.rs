//! Connections: slow sync download, status uploads and connection events.

use super::{array, has_more, uuid_at, RequestGate, Transcoder, TranscoderKind};
use crate::error::{SyncError, SyncResult};
use crate::model::{Connection, ConnectionStatus, ObjectGraph};
use crate::sync_status::{SyncPhase, SyncStatus};
use courier_protocol::{Method, ProtocolError, Request, Response, UpdateEvent, UpdateEventType};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Downloads connections in `FetchingConnections` and uploads local status
/// changes with `PUT /connections/{user}`.
#[derive(Debug)]
pub struct ConnectionTranscoder {
    graph: Arc<ObjectGraph>,
    status: Arc<SyncStatus>,
    page_size: usize,
    start: Mutex<Option<String>>,
    gate: RequestGate,
}

impl ConnectionTranscoder {
    /// Creates the transcoder.
    pub fn new(graph: Arc<ObjectGraph>, status: Arc<SyncStatus>, page_size: usize) -> Self {
        Self {
            graph,
            status,
            page_size: page_size.max(1),
            start: Mutex::new(None),
            gate: RequestGate::default(),
        }
    }

    fn apply_page(&self, payload: Option<&Value>) -> SyncResult<()> {
        let connections = array(payload, "connections");
        let mut last = None;
        for value in connections {
            let connection = parse_connection(value)?;
            last = Some(connection.to);
            self.merge(connection);
        }
        debug!(count = connections.len(), "downloaded connections");

        if has_more(payload) && last.is_some() {
            *self.start.lock() = last.map(|id| id.to_string());
            return Ok(());
        }
        *self.start.lock() = None;
        self.status.did_finish(SyncPhase::FetchingConnections)
    }

    fn merge(&self, connection: Connection) {
        // A local change not yet uploaded wins over the backend copy.
        if self.graph.connection(connection.to).is_some_and(|c| c.needs_sync) {
            return;
        }
        self.graph.upsert_connection(connection);
    }

    fn mark_synced(&self, request: &Request) {
        let to = request
            .route()
            .rsplit('/')
            .next()
            .and_then(|id| Uuid::parse_str(id).ok());
        if let Some(mut connection) = to.and_then(|to| self.graph.connection(to)) {
            connection.needs_sync = false;
            self.graph.upsert_connection(connection);
        }
    }
}

/// Parses `{ "to", "conversation"?, "status" }`.
pub(crate) fn parse_connection(value: &Value) -> SyncResult<Connection> {
    let to = uuid_at(value, "to")?;
    let conversation = value
        .get("conversation")
        .and_then(Value::as_str)
        .and_then(|text| Uuid::parse_str(text).ok());
    let label = value
        .get("status")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingField("status"))?;
    let status = ConnectionStatus::from_label(label)
        .ok_or_else(|| ProtocolError::invalid_field("status", format!("unknown status {label}")))?;

    Ok(Connection {
        to,
        conversation,
        status,
        needs_sync: false,
    })
}

impl Transcoder for ConnectionTranscoder {
    fn kind(&self) -> TranscoderKind {
        TranscoderKind::Connection
    }

    fn next_request(&self) -> SyncResult<Option<Request>> {
        if self.status.current_phase() == SyncPhase::FetchingConnections {
            if !self.gate.try_begin() {
                return Ok(None);
            }
            let path = match &*self.start.lock() {
                Some(start) => format!("/connections?size={}&start={start}", self.page_size),
                None => format!("/connections?size={}", self.page_size),
            };
            return Ok(Some(Request::get(path)));
        }

        let Some(connection) = self.graph.connections_to_sync().into_iter().next() else {
            return Ok(None);
        };
        if !self.gate.try_begin() {
            return Ok(None);
        }
        Ok(Some(Request::put(
            format!("/connections/{}", connection.to),
            json!({ "status": connection.status.as_str() }),
        )))
    }

    fn handle_response(&self, request: &Request, response: &Response) -> SyncResult<()> {
        self.gate.end();
        if response.is_transient_error() {
            return Ok(());
        }

        match request.method {
            Method::Get if response.is_success() => self.apply_page(response.payload.as_ref()),
            Method::Get => {
                warn!(status = response.status, "connection download failed, skipping");
                *self.start.lock() = None;
                self.status.did_finish(SyncPhase::FetchingConnections)
            }
            _ => {
                if !response.is_success() {
                    warn!(
                        status = response.status,
                        route = request.route(),
                        "connection update rejected"
                    );
                }
                self.mark_synced(request);
                Ok(())
            }
        }
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
            .filter(|e| e.event_type == UpdateEventType::UserConnection)
        {
            match event.object().get("connection").map(parse_connection) {
                Some(Ok(connection)) => self.merge(connection),
                Some(Err(err)) => warn!(event = %event.id, error = %err, "bad connection event"),
                None => warn!(event = %event.id, "connection event without connection"),
            }
        }
        Ok(())
    }
}
