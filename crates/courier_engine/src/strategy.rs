//! Request scheduling and event routing.

use crate::buffer::{UpdateEventConsumer, UpdateEventsBuffer};
use crate::decoder::EventDecoder;
use crate::error::{SyncError, SyncResult};
use crate::hotfix::{HotFix, Version};
use crate::sync_status::{SyncPhase, SyncStateDelegate, SyncStatus, SyncStatusEvent};
use crate::transcoder::{Transcoder, TranscoderDirectory, TranscoderKind};
use courier_protocol::{EventSource, Request, Response, UpdateEvent};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A request handed out by [`SyncStrategy::next_request`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledRequest {
    /// Id to report the response or failure with.
    pub id: u64,
    /// Transcoder that issued the request.
    pub transcoder: TranscoderKind,
    /// The request itself.
    pub request: Request,
}

/// Fans events out to the event-consuming transcoders, then to extra
/// consumers, in registration order.
struct EventConsumers {
    transcoders: Vec<Arc<dyn Transcoder>>,
    extra: RwLock<Vec<Arc<dyn UpdateEventConsumer>>>,
}

impl UpdateEventConsumer for EventConsumers {
    fn consume(&self, events: &[UpdateEvent]) {
        for transcoder in &self.transcoders {
            if let Err(err) = transcoder.consume_events(events) {
                warn!(transcoder = %transcoder.kind(), error = %err, "failed to apply events");
            }
        }
        let extra = self.extra.read().clone();
        for consumer in extra {
            consumer.consume(events);
        }
    }
}

/// Drives the transcoders.
///
/// The strategy is pull-based: the owner asks for the next request, sends
/// it, and reports the response or failure back with the request id.
/// Events from the push channel are buffered while a sync is in progress
/// and flushed once it finishes; downloaded and push notification events
/// are applied right away.
pub struct SyncStrategy {
    directory: TranscoderDirectory,
    consumers: Arc<EventConsumers>,
    buffer: UpdateEventsBuffer,
    decoder: EventDecoder,
    status: Arc<SyncStatus>,
    hotfix: Arc<HotFix>,
    version: Version,
    batch_size: usize,
    delegate: RwLock<Option<Arc<dyn SyncStateDelegate>>>,
    pending: Mutex<HashMap<u64, (usize, Request)>>,
    next_id: AtomicU64,
    last_started: Mutex<Option<SyncPhase>>,
    torn_down: AtomicBool,
}

impl SyncStrategy {
    /// Creates a strategy over `directory`.
    pub fn new(
        directory: TranscoderDirectory,
        status: Arc<SyncStatus>,
        decoder: EventDecoder,
        hotfix: Arc<HotFix>,
        version: Version,
        batch_size: usize,
    ) -> Self {
        let consumers = Arc::new(EventConsumers {
            transcoders: directory.event_consumers(),
            extra: RwLock::new(Vec::new()),
        });
        let buffer = UpdateEventsBuffer::new(consumers.clone());
        info!(transcoders = ?directory, "sync strategy created");

        Self {
            directory,
            consumers,
            buffer,
            decoder,
            status,
            hotfix,
            version,
            batch_size: batch_size.max(1),
            delegate: RwLock::new(None),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            last_started: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Sets the receiver of sync start and finish notifications.
    pub fn set_delegate(&self, delegate: Arc<dyn SyncStateDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    /// Adds a consumer that receives every event after the transcoders.
    pub fn add_event_consumer(&self, consumer: Arc<dyn UpdateEventConsumer>) {
        self.consumers.extra.write().push(consumer);
    }

    /// Returns the transcoder directory.
    pub fn directory(&self) -> &TranscoderDirectory {
        &self.directory
    }

    /// Returns the sync status.
    pub fn status(&self) -> &Arc<SyncStatus> {
        &self.status
    }

    /// Returns the event buffer.
    pub fn buffer(&self) -> &UpdateEventsBuffer {
        &self.buffer
    }

    /// Returns the number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns true once [`tear_down`](Self::tear_down) was called.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Returns the first request any transcoder has, in directory order.
    ///
    /// # Errors
    ///
    /// Returns an error if a transcoder fails to build its request.
    pub fn next_request(&self) -> SyncResult<Option<ScheduledRequest>> {
        if self.is_torn_down() {
            return Ok(None);
        }
        self.note_phase_start();

        let mut scheduled = None;
        for (index, transcoder) in self.directory.transcoders().iter().enumerate() {
            if let Some(request) = transcoder.next_request()? {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                debug!(id, transcoder = %transcoder.kind(), request = %request, "scheduled");
                self.pending.lock().insert(id, (index, request.clone()));
                scheduled = Some(ScheduledRequest {
                    id,
                    transcoder: transcoder.kind(),
                    request,
                });
                break;
            }
        }

        // Transcoders may have moved the phase without issuing a request.
        self.drain_status_events();
        Ok(scheduled)
    }

    /// Routes a response to the transcoder that issued the request.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownRequest`] for an id this strategy did not
    /// hand out, or the transcoder's error.
    pub fn did_receive_response(&self, id: u64, response: &Response) -> SyncResult<()> {
        let (transcoder, request) = self.take_pending(id)?;
        debug!(id, transcoder = %transcoder.kind(), status = response.status, "response");

        let handled = transcoder.handle_response(&request, response);
        let downloaded = transcoder.take_downloaded_events();
        if !downloaded.is_empty() {
            self.process_events(downloaded)?;
        }
        self.drain_status_events();
        handled
    }

    /// Reports that a request could not be sent. The transcoder resets and
    /// retries later.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownRequest`] for an unknown id.
    pub fn did_fail_request(&self, id: u64, error: &SyncError) -> SyncResult<()> {
        let (transcoder, request) = self.take_pending(id)?;
        warn!(id, transcoder = %transcoder.kind(), error = %error, "request failed");
        transcoder.handle_failure(&request, error);
        self.drain_status_events();
        Ok(())
    }

    /// Delivers events to every consumer, in batches.
    pub fn consume(&self, events: &[UpdateEvent]) {
        if self.is_torn_down() {
            return;
        }
        for batch in events.chunks(self.batch_size) {
            self.consumers.consume(batch);
        }
    }

    /// Drops events already received by push, then buffers push channel
    /// events while syncing and consumes everything else.
    ///
    /// Push channel events are buffered until the flush that follows the
    /// end of the sync, and delivered after everything it flushed.
    ///
    /// # Errors
    ///
    /// Returns an error if the received id list cannot be updated.
    pub fn process_events(&self, events: Vec<UpdateEvent>) -> SyncResult<()> {
        if self.is_torn_down() || events.is_empty() {
            return Ok(());
        }
        let events = self.decoder.filter(events)?;

        self.buffer.exclusive(|buffer| {
            if !self.status.buffers_live_events() {
                self.consume(&events);
                return;
            }
            let (live, immediate): (Vec<_>, Vec<_>) = events
                .into_iter()
                .partition(|e| e.source == EventSource::WebSocket);
            if !live.is_empty() {
                debug!(count = live.len(), "buffering events during sync");
                for event in live {
                    buffer.add(event);
                }
            }
            self.consume(&immediate);
        });
        self.drain_status_events();
        Ok(())
    }

    /// The push channel closed.
    pub fn on_stream_interrupted(&self) {
        info!("push channel interrupted");
        self.status.push_channel_did_close();
        for transcoder in self.directory.transcoders() {
            transcoder.on_stream_interrupted();
        }
        self.drain_status_events();
    }

    /// The push channel opened; a quick sync fetches what was missed.
    pub fn on_stream_established(&self) {
        info!("push channel established");
        self.status.push_channel_did_open();
        for transcoder in self.directory.transcoders() {
            transcoder.on_stream_established();
        }
        self.drain_status_events();
    }

    /// Stops scheduling and drops buffered events and pending requests.
    pub fn tear_down(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("tearing down sync strategy");
        self.buffer.discard_all();
        self.pending.lock().clear();
    }

    fn take_pending(&self, id: u64) -> SyncResult<(Arc<dyn Transcoder>, Request)> {
        if self.is_torn_down() {
            return Err(SyncError::TornDown);
        }
        let (index, request) = self
            .pending
            .lock()
            .remove(&id)
            .ok_or(SyncError::UnknownRequest(id))?;
        let transcoder = self
            .directory
            .get(index)
            .cloned()
            .ok_or(SyncError::UnknownRequest(id))?;
        Ok((transcoder, request))
    }

    fn note_phase_start(&self) {
        let phase = self.status.current_phase();
        let mut last = self.last_started.lock();
        if !phase.is_syncing() {
            *last = None;
        } else if *last != Some(phase) {
            *last = Some(phase);
            self.status.did_start(phase);
        }
    }

    fn drain_status_events(&self) {
        for event in self.status.take_events() {
            let delegate = self.delegate.read().clone();
            match event {
                SyncStatusEvent::DidStartSync => {
                    if let Some(delegate) = delegate {
                        delegate.did_start_sync();
                    }
                }
                SyncStatusEvent::DidFinishSync => {
                    self.buffer
                        .flush_then(|| self.status.did_flush_live_events());
                    self.run_after_sync_hotfixes();
                    if let Some(delegate) = delegate {
                        delegate.did_finish_sync();
                    }
                }
            }
        }
    }

    fn run_after_sync_hotfixes(&self) {
        match self.hotfix.apply_patches_after_sync_completed(&self.version) {
            Ok(report) if !report.applied.is_empty() => {
                info!(applied = ?report.applied, "after-sync hotfixes applied");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "after-sync hotfixes failed"),
        }
    }
}

impl std::fmt::Debug for SyncStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStrategy")
            .field("directory", &self.directory)
            .field("buffered", &self.buffer.len())
            .field("pending", &self.pending_requests())
            .field("torn_down", &self.is_torn_down())
            .finish_non_exhaustive()
    }
}
