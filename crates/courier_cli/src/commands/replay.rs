//! Replay command implementation.
//!
//! Feeds a notification dump through a session backed by a scripted
//! transport and reports the resulting object graph.

use courier_engine::{GraphCounts, MockTransport, SyncConfig, SyncPhase, UserSession};
use courier_protocol::{NotificationPage, Response};
use courier_store::{keys, InMemoryStore, MetadataStore};
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Replay result.
#[derive(Debug, Serialize)]
pub struct ReplayResult {
    /// Notifications in the dump.
    pub notifications: usize,
    /// Events carried by the notifications.
    pub events: usize,
    /// Sync phase after the replay.
    pub phase: SyncPhase,
    /// Last processed notification id.
    pub last_update_event_id: Option<Uuid>,
    /// Requests sent to the scripted backend.
    pub requests: usize,
    /// Object counts after the replay.
    pub counts: GraphCounts,
    /// Messages per conversation.
    pub conversations: Vec<ConversationSummary>,
}

/// Messages of one conversation.
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    /// Conversation id.
    pub id: Uuid,
    /// Message texts in order.
    pub messages: Vec<String>,
}

/// Runs the replay command.
pub fn run(path: &Path, live: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    let dump: Value = serde_json::from_str(&content)?;
    let result = replay(dump, live)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Replays a notification page, or a bare array of notifications.
pub fn replay(dump: Value, live: bool) -> Result<ReplayResult, Box<dyn std::error::Error>> {
    let page = match dump {
        Value::Array(items) => json!({ "notifications": items, "has_more": false }),
        other => other,
    };
    let parsed = NotificationPage::from_json(&page)?;
    let events = parsed
        .notifications
        .iter()
        .map(|n| n.payload.len())
        .sum::<usize>();
    info!(notifications = parsed.notifications.len(), events, live, "replaying dump");

    let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
    let transport = Arc::new(MockTransport::new());
    transport.set_fallback(Response::ok(json!({ "notifications": [], "has_more": false })));

    if live {
        transport.respond(
            "GET /notifications/last",
            Response::ok(json!({ "id": Uuid::new_v4().to_string() })),
        );
    } else {
        // Start from a known position so the dump is downloaded as missed
        // events.
        store.set(keys::LAST_UPDATE_EVENT_ID, Uuid::new_v4().into())?;
        transport.respond("GET /notifications", Response::ok(page.clone()));
    }

    let session = UserSession::new(
        SyncConfig::new(env!("CARGO_PKG_VERSION")),
        store.clone(),
        transport.clone(),
    )?;
    session.authentication().restore(Uuid::new_v4());
    session.perform_requests()?;

    if live {
        let notifications = page
            .get("notifications")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for notification in &notifications {
            session.did_receive_push_channel_data(notification)?;
        }
        session.perform_requests()?;
    }

    let graph = session.graph();
    let mut conversations: Vec<ConversationSummary> = graph
        .conversations()
        .into_iter()
        .map(|c| ConversationSummary {
            id: c.id,
            messages: graph
                .messages_in(c.id)
                .into_iter()
                .map(|m| match m.system {
                    Some(kind) => format!("[{kind:?}]"),
                    None => m.text,
                })
                .collect(),
        })
        .collect();
    conversations.sort_by_key(|c| c.id);

    Ok(ReplayResult {
        notifications: parsed.notifications.len(),
        events,
        phase: session.sync_status().current_phase(),
        last_update_event_id: store.get_uuid(keys::LAST_UPDATE_EVENT_ID)?,
        requests: transport.sent().len(),
        counts: graph.counts(),
        conversations,
    })
}

fn print_text_output(result: &ReplayResult) {
    println!("Replay");
    println!("======");
    println!();
    println!("Notifications: {}", result.notifications);
    println!("Events:        {}", result.events);
    println!("Requests:      {}", result.requests);
    println!("Phase:         {:?}", result.phase);
    match result.last_update_event_id {
        Some(id) => println!("Last event:    {id}"),
        None => println!("Last event:    -"),
    }
    println!();
    println!("Graph:");
    println!("  Users:         {}", result.counts.users);
    println!("  Connections:   {}", result.counts.connections);
    println!("  Conversations: {}", result.counts.conversations);
    println!("  Messages:      {}", result.counts.messages);

    for conversation in &result.conversations {
        println!();
        println!("Conversation {}:", conversation.id);
        for text in &conversation.messages {
            println!("  {text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump() -> (Value, Uuid) {
        let conversation = Uuid::new_v4();
        let last = Uuid::new_v4();
        let message = |id: Uuid, text: &str| {
            json!({
                "id": id.to_string(),
                "payload": [{
                    "type": "conversation.message-add",
                    "conversation": conversation.to_string(),
                    "from": Uuid::new_v4().to_string(),
                    "data": { "nonce": Uuid::new_v4().to_string(), "content": text },
                }],
            })
        };
        (
            json!([message(Uuid::new_v4(), "first"), message(last, "second")]),
            last,
        )
    }

    #[test]
    fn replays_as_missed_events() {
        let (dump, last) = dump();
        let result = replay(dump, false).unwrap();
        assert_eq!(result.notifications, 2);
        assert_eq!(result.events, 2);
        assert_eq!(result.phase, SyncPhase::Done);
        assert_eq!(result.last_update_event_id, Some(last));
        assert_eq!(result.counts.messages, 2);
    }

    #[test]
    fn replays_over_push_channel() {
        let (dump, last) = dump();
        let result = replay(dump, true).unwrap();
        assert_eq!(result.phase, SyncPhase::Done);
        assert_eq!(result.last_update_event_id, Some(last));
        assert_eq!(result.counts.messages, 2);
    }

    #[test]
    fn reads_dump_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        fs::write(&path, json!({ "notifications": [], "has_more": false }).to_string()).unwrap();
        run(&path, false, "json").unwrap();
    }
}
