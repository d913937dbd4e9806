//! Buffer for update events received while a sync is in progress.

use courier_protocol::UpdateEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Receives batches of update events.
pub trait UpdateEventConsumer: Send + Sync {
    /// Processes events in the given order.
    fn consume(&self, events: &[UpdateEvent]);
}

/// A collection whose contents can be flushed to a consumer.
pub trait FlushableCollection {
    /// Delivers everything held to the consumer and clears the collection.
    fn process_all_events_in_buffer(&self);
}

/// Ordered buffer of update events.
///
/// Events are held in receipt order until [`process_all_events_in_buffer`]
/// hands them to the consumer in a single call. Each event is delivered at
/// most once; discarded events are never delivered.
///
/// # Thread Safety
///
/// Producers are serialized by the event lock. Deliveries are serialized by
/// a separate flush lock, so two concurrent flushes cannot reorder events.
/// [`exclusive`](Self::exclusive) sections take the flush lock as well, which
/// lets an owner decide between buffering and direct delivery without racing
/// a flush. The consumer must not flush the same buffer from inside
/// `consume`.
///
/// [`process_all_events_in_buffer`]: FlushableCollection::process_all_events_in_buffer
pub struct UpdateEventsBuffer {
    consumer: Arc<dyn UpdateEventConsumer>,
    events: Mutex<Vec<UpdateEvent>>,
    flush: Mutex<()>,
}

impl UpdateEventsBuffer {
    /// Creates an empty buffer delivering to `consumer`.
    pub fn new(consumer: Arc<dyn UpdateEventConsumer>) -> Self {
        Self {
            consumer,
            events: Mutex::new(Vec::new()),
            flush: Mutex::new(()),
        }
    }

    /// Appends an event.
    pub fn add(&self, event: UpdateEvent) {
        self.events.lock().push(event);
    }

    /// Drops every buffered event without delivering it.
    pub fn discard_all(&self) {
        let mut events = self.events.lock();
        if !events.is_empty() {
            debug!(count = events.len(), "discarding buffered events");
        }
        events.clear();
    }

    /// Drops every buffered event with the given id. Unknown ids are ignored.
    pub fn discard(&self, event_id: Uuid) {
        self.events.lock().retain(|e| e.id != event_id);
    }

    /// Runs `route` while no flush is in progress. Events `route` delivers
    /// itself are ordered after everything flushed before it.
    pub fn exclusive<T>(&self, route: impl FnOnce(&Self) -> T) -> T {
        let _flush = self.flush.lock();
        route(self)
    }

    /// Flushes the buffer, then runs `after` before any other flush or
    /// [`exclusive`](Self::exclusive) section can start.
    pub fn flush_then(&self, after: impl FnOnce()) {
        let _flush = self.flush.lock();
        let events = std::mem::take(&mut *self.events.lock());
        if !events.is_empty() {
            debug!(count = events.len(), "flushing buffered events");
            self.consumer.consume(&events);
        }
        after();
    }

    /// Returns a copy of the buffered events.
    pub fn update_events(&self) -> Vec<UpdateEvent> {
        self.events.lock().clone()
    }

    /// Returns the number of buffered events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl FlushableCollection for UpdateEventsBuffer {
    fn process_all_events_in_buffer(&self) {
        self.flush_then(|| {});
    }
}

impl std::fmt::Debug for UpdateEventsBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateEventsBuffer")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_protocol::{EventSource, UpdateEventType};
    use serde_json::json;
    use std::thread;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Vec<Uuid>>>,
    }

    impl Recorder {
        fn delivered(&self) -> Vec<Uuid> {
            self.calls.lock().iter().flatten().copied().collect()
        }
    }

    impl UpdateEventConsumer for Recorder {
        fn consume(&self, events: &[UpdateEvent]) {
            self.calls.lock().push(events.iter().map(|e| e.id).collect());
        }
    }

    fn event(id: Uuid) -> UpdateEvent {
        UpdateEvent::new(
            id,
            UpdateEventType::ConversationRename,
            json!({}),
            EventSource::WebSocket,
        )
    }

    fn buffer() -> (UpdateEventsBuffer, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (UpdateEventsBuffer::new(recorder.clone()), recorder)
    }

    #[test]
    fn flush_delivers_in_order_once() {
        let (buffer, recorder) = buffer();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            buffer.add(event(*id));
        }

        buffer.process_all_events_in_buffer();
        buffer.process_all_events_in_buffer();

        assert_eq!(recorder.calls.lock().len(), 1);
        assert_eq!(recorder.delivered(), ids);
        assert!(buffer.is_empty());
    }

    #[test]
    fn discard_removes_all_events_with_id() {
        let (buffer, recorder) = buffer();
        let shared = Uuid::new_v4();
        let kept = Uuid::new_v4();

        buffer.add(event(shared));
        buffer.add(event(kept));
        buffer.add(event(shared));
        buffer.discard(shared);
        buffer.discard(Uuid::new_v4());

        assert_eq!(buffer.len(), 1);
        buffer.process_all_events_in_buffer();
        assert_eq!(recorder.delivered(), vec![kept]);
    }

    #[test]
    fn discard_all_delivers_nothing() {
        let (buffer, recorder) = buffer();
        buffer.add(event(Uuid::new_v4()));
        buffer.add(event(Uuid::new_v4()));

        buffer.discard_all();
        buffer.process_all_events_in_buffer();

        assert!(recorder.calls.lock().is_empty());
    }

    #[test]
    fn empty_flush_does_not_call_consumer() {
        let (buffer, recorder) = buffer();
        buffer.process_all_events_in_buffer();
        assert!(recorder.calls.lock().is_empty());
    }

    #[test]
    fn snapshot_keeps_events() {
        let (buffer, _) = buffer();
        let id = Uuid::new_v4();
        buffer.add(event(id));

        assert_eq!(buffer.update_events()[0].id, id);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn exclusive_section_waits_for_flush() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        struct Slow {
            inner: Recorder,
            done: AtomicBool,
        }
        impl UpdateEventConsumer for Slow {
            fn consume(&self, events: &[UpdateEvent]) {
                thread::sleep(Duration::from_millis(50));
                self.inner.consume(events);
                self.done.store(true, Ordering::SeqCst);
            }
        }

        let slow = Arc::new(Slow {
            inner: Recorder::default(),
            done: AtomicBool::new(false),
        });
        let buffer = Arc::new(UpdateEventsBuffer::new(slow.clone()));
        buffer.add(event(Uuid::new_v4()));

        let flusher = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.flush_then(|| {}))
        };
        while buffer.len() == 1 && !slow.done.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        let saw_flush_complete = buffer.exclusive(|_| slow.done.load(Ordering::SeqCst));
        flusher.join().unwrap();

        assert!(saw_flush_complete);
        assert_eq!(slow.inner.delivered().len(), 1);
    }

    #[test]
    fn concurrent_producers_and_flushes_deliver_each_event_once() {
        let (buffer, recorder) = buffer();
        let buffer = Arc::new(buffer);

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for _ in 0..250 {
                        buffer.add(event(Uuid::new_v4()));
                    }
                })
            })
            .collect();
        let flusher = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for _ in 0..100 {
                    buffer.process_all_events_in_buffer();
                }
            })
        };

        for handle in producers {
            handle.join().unwrap();
        }
        flusher.join().unwrap();
        buffer.process_all_events_in_buffer();

        let delivered = recorder.delivered();
        assert_eq!(delivered.len(), 1_000);
        let unique: std::collections::HashSet<_> = delivered.iter().collect();
        assert_eq!(unique.len(), 1_000);
    }
}
