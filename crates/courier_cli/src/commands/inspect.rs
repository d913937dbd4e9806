//! Inspect command implementation.

use courier_store::{keys, FileStore, MetaValue, MetadataStore};
use serde::Serialize;
use std::path::Path;

/// Metadata store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Id of the last processed notification.
    pub last_update_event_id: Option<String>,
    /// Startup hotfix marker.
    pub startup_marker: Option<String>,
    /// After-sync hotfix marker.
    pub after_sync_marker: Option<String>,
    /// Hotfixes are disabled by the persisted flag.
    pub hotfix_skipped: bool,
    /// The push token was registered with the backend.
    pub push_token_registered: bool,
    /// Number of remembered push event ids.
    pub previously_received: usize,
    /// Every entry of the store.
    pub entries: Vec<Entry>,
}

/// A single store entry.
#[derive(Debug, Serialize)]
pub struct Entry {
    /// Key.
    pub key: String,
    /// Value type.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Value rendered as text.
    pub value: String,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No metadata store found at {:?}", path).into());
    }
    let store = FileStore::open(path)?;
    let result = inspect(&store, path)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Collects the inspection result of a store.
pub fn inspect(
    store: &dyn MetadataStore,
    path: &Path,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let mut entries = Vec::new();
    for key in store.keys()? {
        if let Some(value) = store.get(&key)? {
            entries.push(Entry {
                kind: value.type_name(),
                value: render(&value),
                key,
            });
        }
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        last_update_event_id: store
            .get_uuid(keys::LAST_UPDATE_EVENT_ID)?
            .map(|id| id.to_string()),
        startup_marker: store.get_text(keys::HOTFIX_STARTUP_VERSION)?,
        after_sync_marker: store.get_text(keys::HOTFIX_AFTER_SYNC_VERSION)?,
        hotfix_skipped: store.get_bool(keys::SKIP_HOTFIX)?.unwrap_or(false),
        push_token_registered: store.get_bool(keys::PUSH_TOKEN_REGISTERED)?.unwrap_or(false),
        previously_received: store
            .get_text_list(keys::PREVIOUSLY_RECEIVED_EVENT_IDS)?
            .len(),
        entries,
    })
}

fn render(value: &MetaValue) -> String {
    match value {
        MetaValue::Text(text) => text.clone(),
        MetaValue::Uuid(id) => id.to_string(),
        MetaValue::Bool(flag) => flag.to_string(),
        MetaValue::Integer(n) => n.to_string(),
        MetaValue::TextList(list) => format!("[{} entries]", list.len()),
        MetaValue::Timestamp(ms) => format!("{ms} ms since epoch"),
    }
}

fn print_text_output(result: &InspectResult) {
    let or_none = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());

    println!("Courier Metadata Inspection");
    println!("===========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Sync:");
    println!("  Last update event: {}", or_none(&result.last_update_event_id));
    println!("  Push received ids: {}", result.previously_received);
    println!("  Push token:        {}", if result.push_token_registered {
        "registered"
    } else {
        "not registered"
    });
    println!();
    println!("Hotfix:");
    println!("  Startup marker:    {}", or_none(&result.startup_marker));
    println!("  After-sync marker: {}", or_none(&result.after_sync_marker));
    println!("  Skipped:           {}", result.hotfix_skipped);

    if !result.entries.is_empty() {
        println!();
        println!("Entries:");
        for entry in &result.entries {
            println!("  {} ({}) = {}", entry.key, entry.kind, entry.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_store::InMemoryStore;
    use uuid::Uuid;

    #[test]
    fn reports_known_keys() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        store.set(keys::LAST_UPDATE_EVENT_ID, id.into()).unwrap();
        store.set(keys::HOTFIX_STARTUP_VERSION, "2.0.1".into()).unwrap();
        store
            .set(
                keys::PREVIOUSLY_RECEIVED_EVENT_IDS,
                vec!["a".to_string(), "b".to_string()].into(),
            )
            .unwrap();

        let result = inspect(&store, Path::new("mem")).unwrap();
        assert_eq!(result.last_update_event_id, Some(id.to_string()));
        assert_eq!(result.startup_marker.as_deref(), Some("2.0.1"));
        assert_eq!(result.after_sync_marker, None);
        assert_eq!(result.previously_received, 2);
        assert_eq!(result.entries.len(), 3);
    }

    #[test]
    fn opens_file_store() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set(keys::SKIP_HOTFIX, true.into()).unwrap();
            store.flush().unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        let result = inspect(&store, dir.path()).unwrap();
        assert!(result.hotfix_skipped);
    }
}
