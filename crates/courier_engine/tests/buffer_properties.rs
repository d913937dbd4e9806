//! Property tests for the update event buffer.

use courier_engine::{FlushableCollection, UpdateEventConsumer, UpdateEventsBuffer};
use courier_protocol::{EventSource, UpdateEvent, UpdateEventType};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

#[derive(Default)]
struct Recorder {
    delivered: Mutex<Vec<Uuid>>,
    calls: Mutex<usize>,
}

impl UpdateEventConsumer for Recorder {
    fn consume(&self, events: &[UpdateEvent]) {
        *self.calls.lock() += 1;
        self.delivered.lock().extend(events.iter().map(|e| e.id));
    }
}

fn event(id: Uuid) -> UpdateEvent {
    UpdateEvent::new(
        id,
        UpdateEventType::UserUpdate,
        json!({ "type": "user.update" }),
        EventSource::WebSocket,
    )
}

#[derive(Debug, Clone)]
enum Op {
    Add,
    /// Discards the n-th event added so far, modulo the count.
    Discard(usize),
    DiscardUnknown,
    DiscardAll,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => Just(Op::Add),
        2 => (0usize..64).prop_map(Op::Discard),
        1 => Just(Op::DiscardUnknown),
        1 => Just(Op::DiscardAll),
    ]
}

proptest! {
    #[test]
    fn flush_delivers_receipt_order_minus_discarded(ops in prop::collection::vec(op(), 0..80)) {
        let recorder = Arc::new(Recorder::default());
        let buffer = UpdateEventsBuffer::new(recorder.clone());
        let mut added: Vec<Uuid> = Vec::new();
        let mut expected: Vec<Uuid> = Vec::new();

        for op in ops {
            match op {
                Op::Add => {
                    let id = Uuid::new_v4();
                    added.push(id);
                    expected.push(id);
                    buffer.add(event(id));
                }
                Op::Discard(n) if !added.is_empty() => {
                    let id = added[n % added.len()];
                    expected.retain(|e| *e != id);
                    buffer.discard(id);
                }
                Op::Discard(_) => {}
                Op::DiscardUnknown => buffer.discard(Uuid::new_v4()),
                Op::DiscardAll => {
                    expected.clear();
                    buffer.discard_all();
                }
            }
        }

        prop_assert_eq!(buffer.len(), expected.len());
        buffer.process_all_events_in_buffer();
        prop_assert_eq!(&*recorder.delivered.lock(), &expected);
        prop_assert_eq!(*recorder.calls.lock(), usize::from(!expected.is_empty()));

        // A second flush delivers nothing new.
        buffer.process_all_events_in_buffer();
        prop_assert_eq!(recorder.delivered.lock().len(), expected.len());
        prop_assert!(buffer.is_empty());
    }
}

#[test]
fn concurrent_producers_deliver_each_event_once() {
    let recorder = Arc::new(Recorder::default());
    let buffer = Arc::new(UpdateEventsBuffer::new(recorder.clone()));

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let buffer = buffer.clone();
            thread::spawn(move || {
                let ids: Vec<Uuid> = (0..250).map(|_| Uuid::new_v4()).collect();
                for id in &ids {
                    buffer.add(event(*id));
                }
                ids
            })
        })
        .collect();
    let flusher = {
        let buffer = buffer.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                buffer.process_all_events_in_buffer();
                thread::yield_now();
            }
        })
    };

    let mut per_producer = Vec::new();
    for producer in producers {
        per_producer.push(producer.join().unwrap());
    }
    flusher.join().unwrap();
    buffer.process_all_events_in_buffer();

    let delivered = recorder.delivered.lock().clone();
    assert_eq!(delivered.len(), 1_000);
    // Each producer's events keep their relative order.
    for ids in per_producer {
        let positions: Vec<usize> = ids
            .iter()
            .map(|id| delivered.iter().position(|d| d == id).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }
}
