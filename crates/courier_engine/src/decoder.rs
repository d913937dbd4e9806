//! De-duplication of events received through push notifications.

use crate::error::SyncResult;
use courier_protocol::{EventSource, UpdateEvent};
use courier_store::{keys, MetaValue, MetadataStore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Filters events that were already received through a push notification.
///
/// Events delivered by push notification are processed right away; their
/// ids are remembered in the metadata store. When the same events arrive
/// again over the push channel or the notification stream, they are
/// dropped. The remembered list is bounded; the oldest ids are forgotten
/// first.
pub struct EventDecoder {
    store: Arc<dyn MetadataStore>,
    limit: usize,
}

impl EventDecoder {
    /// Creates a decoder backed by `store`, remembering up to `limit` ids.
    pub fn new(store: Arc<dyn MetadataStore>, limit: usize) -> Self {
        Self { store, limit }
    }

    /// Records push event ids, then drops non-push events seen before.
    ///
    /// # Errors
    ///
    /// Returns an error if the id list cannot be read or written.
    pub fn filter(&self, events: Vec<UpdateEvent>) -> SyncResult<Vec<UpdateEvent>> {
        self.store_received_push_event_ids(&events)?;

        let seen: HashSet<String> = self
            .store
            .get_text_list(keys::PREVIOUSLY_RECEIVED_EVENT_IDS)?
            .into_iter()
            .collect();
        if seen.is_empty() {
            return Ok(events);
        }

        let before = events.len();
        let filtered: Vec<UpdateEvent> = events
            .into_iter()
            .filter(|e| {
                e.source == EventSource::PushNotification || !seen.contains(&e.id.to_string())
            })
            .collect();

        if filtered.len() != before {
            debug!(dropped = before - filtered.len(), "dropped events already received by push");
        }
        Ok(filtered)
    }

    /// Returns how many push event ids are remembered.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be read.
    pub fn previously_received_count(&self) -> SyncResult<usize> {
        Ok(self
            .store
            .get_text_list(keys::PREVIOUSLY_RECEIVED_EVENT_IDS)?
            .len())
    }

    /// Forgets every remembered push event id.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be written.
    pub fn discard_list_of_already_received_push_event_ids(&self) -> SyncResult<()> {
        self.store
            .set(keys::PREVIOUSLY_RECEIVED_EVENT_IDS, MetaValue::TextList(Vec::new()))?;
        Ok(())
    }

    fn store_received_push_event_ids(&self, events: &[UpdateEvent]) -> SyncResult<()> {
        let mut ids = self.store.get_text_list(keys::PREVIOUSLY_RECEIVED_EVENT_IDS)?;
        let before = ids.len();

        for event in events.iter().filter(|e| e.source == EventSource::PushNotification) {
            let id = event.id.to_string();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.len() == before {
            return Ok(());
        }

        if ids.len() > self.limit {
            let excess = ids.len() - self.limit;
            ids.drain(..excess);
        }
        self.store
            .set(keys::PREVIOUSLY_RECEIVED_EVENT_IDS, MetaValue::TextList(ids))?;
        Ok(())
    }
}
