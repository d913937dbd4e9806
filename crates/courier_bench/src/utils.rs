//! Benchmark utilities.

use courier_calling::CallSignals;
use courier_engine::Version;
use courier_protocol::{EventSource, UpdateEvent, UpdateEventType};
use rand::Rng;
use serde_json::{json, Value};
use uuid::Uuid;

/// Generate random dotted versions with three components.
pub fn random_versions(count: usize) -> Vec<Version> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            Version::from_components(vec![
                rng.gen_range(0..10),
                rng.gen_range(0..30),
                rng.gen_range(0..100),
            ])
        })
        .collect()
}

/// Generate random call signal combinations.
pub fn random_signals(count: usize) -> Vec<CallSignals> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| CallSignals {
            self_joined: rng.gen(),
            other_joined: rng.gen(),
            device_active: rng.gen(),
            flow_active: rng.gen(),
            ignoring_call: rng.gen_bool(0.1),
        })
        .collect()
}

/// Generate live events with distinct ids.
pub fn live_events(count: usize) -> Vec<UpdateEvent> {
    (0..count)
        .map(|_| {
            UpdateEvent::new(
                Uuid::new_v4(),
                UpdateEventType::UserUpdate,
                json!({ "type": "user.update" }),
                EventSource::WebSocket,
            )
        })
        .collect()
}

/// Generate a notification page of message events in one conversation.
pub fn message_page(conversation: Uuid, count: usize) -> Value {
    let mut rng = rand::thread_rng();
    let notifications: Vec<Value> = (0..count)
        .map(|_| {
            let length = rng.gen_range(4..64);
            let text: String = (0..length)
                .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
                .collect();
            json!({
                "id": Uuid::new_v4().to_string(),
                "payload": [{
                    "type": "conversation.message-add",
                    "conversation": conversation.to_string(),
                    "from": Uuid::new_v4().to_string(),
                    "data": { "nonce": Uuid::new_v4().to_string(), "content": text },
                }],
            })
        })
        .collect();
    json!({ "notifications": notifications, "has_more": false })
}
