//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use courier_calling::CallSignals;
use courier_engine::Version;
use courier_protocol::{EventSource, UpdateEvent, UpdateEventType};
use proptest::prelude::*;
use serde_json::{json, Value};
use uuid::Uuid;

/// Strategy for generating random UUIDs.
pub fn uuid_strategy() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

/// Strategy for generating dotted versions with one to four components.
pub fn version_strategy() -> impl Strategy<Value = Version> {
    prop::collection::vec(0u64..40, 1..=4).prop_map(Version::from_components)
}

/// Strategy for generating version strings, including zero-padded forms
/// such as `1.02` that parse to the same version as `1.2`.
pub fn version_text_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec((0u64..40, any::<bool>()), 1..=4).prop_map(|parts| {
        parts
            .into_iter()
            .map(|(n, pad)| if pad { format!("0{n}") } else { n.to_string() })
            .collect::<Vec<_>>()
            .join(".")
    })
}

/// Strategy for generating call signal combinations.
pub fn call_signals_strategy() -> impl Strategy<Value = CallSignals> {
    (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
        |(self_joined, other_joined, device_active, flow_active, ignoring_call)| CallSignals {
            self_joined,
            other_joined,
            device_active,
            flow_active,
            ignoring_call,
        },
    )
}

/// Strategy for generating event sources.
pub fn event_source_strategy() -> impl Strategy<Value = EventSource> {
    prop_oneof![
        Just(EventSource::WebSocket),
        Just(EventSource::Download),
        Just(EventSource::PushNotification),
    ]
}

/// Strategy for generating known event type names.
pub fn event_type_strategy() -> impl Strategy<Value = UpdateEventType> {
    prop_oneof![
        Just(UpdateEventType::ConversationCreate),
        Just(UpdateEventType::ConversationRename),
        Just(UpdateEventType::ConversationMemberJoin),
        Just(UpdateEventType::ConversationMemberLeave),
        Just(UpdateEventType::ConversationMessageAdd),
        Just(UpdateEventType::UserUpdate),
        Just(UpdateEventType::UserConnection),
        Just(UpdateEventType::CallState),
        Just(UpdateEventType::CallFlowActive),
    ]
}

/// Strategy for generating update events with a minimal payload.
pub fn update_event_strategy() -> impl Strategy<Value = UpdateEvent> {
    (uuid_strategy(), event_type_strategy(), event_source_strategy()).prop_map(
        |(id, event_type, source)| {
            let payload = json!({ "type": event_type.as_str() });
            UpdateEvent::new(id, event_type, payload, source)
        },
    )
}

/// Strategy for generating message notifications in one conversation.
///
/// Every notification carries one `conversation.message-add` event with a
/// distinct nonce.
pub fn message_notifications_strategy(
    conversation: Uuid,
    max: usize,
) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec("[a-z ]{1,24}", 0..max).prop_map(move |texts| {
        texts
            .into_iter()
            .map(|text| {
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
            .collect()
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to generate.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
