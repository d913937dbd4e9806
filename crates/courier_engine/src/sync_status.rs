//! Sync phase machine.

use crate::error::SyncResult;
use courier_store::{keys, MetaValue, MetadataStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Phase of the sync.
///
/// A slow sync walks every phase from `FetchingLastUpdateEventID`. A quick
/// sync only fetches missed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SyncPhase {
    /// Fetching the id of the latest notification.
    FetchingLastUpdateEventID,
    /// Downloading connections.
    FetchingConnections,
    /// Downloading conversations.
    FetchingConversations,
    /// Downloading users.
    FetchingUsers,
    /// Fetching notifications since the last known event.
    FetchingMissedEvents,
    /// Not syncing.
    Done,
}

impl SyncPhase {
    /// Returns true while a sync is in progress.
    pub fn is_syncing(&self) -> bool {
        !matches!(self, SyncPhase::Done)
    }

    /// Returns true for the last phase of a slow sync.
    pub fn is_last_slow_sync_phase(&self) -> bool {
        matches!(self, SyncPhase::FetchingUsers)
    }

    /// Returns the following phase.
    pub fn next(&self) -> Option<SyncPhase> {
        match self {
            SyncPhase::FetchingLastUpdateEventID => Some(SyncPhase::FetchingConnections),
            SyncPhase::FetchingConnections => Some(SyncPhase::FetchingConversations),
            SyncPhase::FetchingConversations => Some(SyncPhase::FetchingUsers),
            SyncPhase::FetchingUsers => Some(SyncPhase::FetchingMissedEvents),
            SyncPhase::FetchingMissedEvents => Some(SyncPhase::Done),
            SyncPhase::Done => None,
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Notifications emitted by the sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatusEvent {
    /// A sync started.
    DidStartSync,
    /// The sync finished.
    DidFinishSync,
}

/// Receives sync start and finish notifications.
pub trait SyncStateDelegate: Send + Sync {
    /// A sync started.
    fn did_start_sync(&self);

    /// The sync finished.
    fn did_finish_sync(&self);
}

#[derive(Debug)]
struct StatusInner {
    phase: SyncPhase,
    previous_phase: SyncPhase,
    needs_quick_sync_restart: bool,
    push_channel_open: bool,
    // A closed push channel already announced the sync that follows.
    start_announced: bool,
    // Live events are buffered from the start of a sync until the flush
    // that follows its end.
    buffering_live_events: bool,
    last_update_event_id: Option<Uuid>,
    pending: Vec<SyncStatusEvent>,
}

impl StatusInner {
    fn set_phase(&mut self, phase: SyncPhase) {
        if phase != self.phase {
            debug!(from = %self.phase, to = %phase, "sync phase changed");
            self.previous_phase = self.phase;
            self.phase = phase;
        }
        if phase.is_syncing() {
            self.buffering_live_events = true;
        }
    }
}

/// Tracks the current sync phase.
///
/// Start and finish notifications are queued and drained by the owner with
/// [`SyncStatus::take_events`], so no callback runs under the status lock.
pub struct SyncStatus {
    store: Arc<dyn MetadataStore>,
    inner: Mutex<StatusInner>,
}

impl SyncStatus {
    /// Creates the status. The initial phase is `FetchingMissedEvents` if a
    /// last event id is persisted, else `FetchingLastUpdateEventID`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn new(store: Arc<dyn MetadataStore>) -> SyncResult<Self> {
        let phase = if store.get_uuid(keys::LAST_UPDATE_EVENT_ID)?.is_some() {
            SyncPhase::FetchingMissedEvents
        } else {
            SyncPhase::FetchingLastUpdateEventID
        };
        info!(phase = %phase, "sync status created");

        Ok(Self {
            store,
            inner: Mutex::new(StatusInner {
                phase,
                previous_phase: SyncPhase::Done,
                needs_quick_sync_restart: false,
                push_channel_open: false,
                start_announced: false,
                buffering_live_events: phase.is_syncing(),
                last_update_event_id: None,
                pending: Vec::new(),
            }),
        })
    }

    /// Returns the current phase.
    pub fn current_phase(&self) -> SyncPhase {
        self.inner.lock().phase
    }

    /// Returns true while a sync is in progress.
    pub fn is_syncing(&self) -> bool {
        self.current_phase().is_syncing()
    }

    /// Returns true while push channel events must be buffered: from the
    /// start of a sync until the events buffered during it were flushed.
    pub fn buffers_live_events(&self) -> bool {
        self.inner.lock().buffering_live_events
    }

    /// The events buffered during the sync were flushed. Buffering goes on
    /// if another sync already started.
    pub fn did_flush_live_events(&self) {
        let mut inner = self.inner.lock();
        inner.buffering_live_events = inner.phase.is_syncing();
    }

    /// Returns true if quick sync restarts once the current one completes.
    pub fn needs_to_restart_quick_sync(&self) -> bool {
        self.inner.lock().needs_quick_sync_restart
    }

    /// Returns true if a last event id is persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn has_persisted_last_event_id(&self) -> SyncResult<bool> {
        Ok(self.store.get_uuid(keys::LAST_UPDATE_EVENT_ID)?.is_some())
    }

    /// A phase started. Emits `DidStartSync` unless a sync was already
    /// running before or a closed push channel announced it.
    pub fn did_start(&self, _phase: SyncPhase) {
        let mut inner = self.inner.lock();
        if !inner.previous_phase.is_syncing() && !inner.start_announced {
            inner.pending.push(SyncStatusEvent::DidStartSync);
        }
    }

    /// A phase finished. Ignored unless `phase` is the current phase.
    ///
    /// # Errors
    ///
    /// Returns an error if the last event id cannot be persisted.
    pub fn did_finish(&self, phase: SyncPhase) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        if phase != inner.phase {
            return Ok(());
        }
        let Some(next) = phase.next() else {
            return Ok(());
        };

        if phase.is_last_slow_sync_phase() {
            if let Some(id) = inner.last_update_event_id {
                self.store.set(keys::LAST_UPDATE_EVENT_ID, MetaValue::Uuid(id))?;
            }
        }

        inner.set_phase(next);
        if next == SyncPhase::Done {
            if inner.needs_quick_sync_restart && inner.push_channel_open {
                info!("restarting quick sync");
                inner.set_phase(SyncPhase::FetchingMissedEvents);
                inner.needs_quick_sync_restart = false;
                return Ok(());
            }
            info!("sync finished");
            inner.start_announced = false;
            inner.pending.push(SyncStatusEvent::DidFinishSync);
        }
        Ok(())
    }

    /// A phase failed. Only failures to fetch missed events change the
    /// phase: the sync falls back to slow sync.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn did_fail(&self, phase: SyncPhase) -> SyncResult<()> {
        let has_persisted = self.has_persisted_last_event_id()?;
        let mut inner = self.inner.lock();
        if phase != inner.phase || phase != SyncPhase::FetchingMissedEvents {
            return Ok(());
        }

        let fallback = if has_persisted {
            SyncPhase::FetchingConnections
        } else {
            SyncPhase::FetchingLastUpdateEventID
        };
        info!(fallback = %fallback, "missed events unavailable, starting slow sync");
        inner.set_phase(fallback);
        inner.needs_quick_sync_restart = false;
        Ok(())
    }

    /// Remembers the latest notification id, persisted when the slow sync
    /// completes.
    pub fn update_last_update_event_id(&self, id: Uuid) {
        self.inner.lock().last_update_event_id = Some(id);
    }

    /// The push channel closed.
    pub fn push_channel_did_close(&self) {
        let mut inner = self.inner.lock();
        inner.push_channel_open = false;
        if !inner.phase.is_syncing() && !inner.start_announced {
            inner.start_announced = true;
            inner.pending.push(SyncStatusEvent::DidStartSync);
        }
    }

    /// The push channel opened.
    pub fn push_channel_did_open(&self) {
        let mut inner = self.inner.lock();
        inner.push_channel_open = true;
        if inner.phase == SyncPhase::FetchingMissedEvents {
            // Notifications sent between the last page and the reopening
            // may be missing.
            inner.needs_quick_sync_restart = true;
        }
        if inner.phase == SyncPhase::Done {
            inner.set_phase(SyncPhase::FetchingMissedEvents);
        }
    }

    /// Removes and returns queued notifications.
    pub fn take_events(&self) -> Vec<SyncStatusEvent> {
        std::mem::take(&mut self.inner.lock().pending)
    }
}

impl fmt::Debug for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncStatus")
            .field("inner", &*self.inner.lock())
            .finish_non_exhaustive()
    }
}
