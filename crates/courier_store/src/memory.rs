//! In-memory metadata store for testing.

use crate::error::StoreResult;
use crate::store::MetadataStore;
use crate::value::MetaValue;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory metadata store.
///
/// This store keeps all values in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral sessions that don't need persistence
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use courier_store::{InMemoryStore, MetaValue, MetadataStore};
///
/// let store = InMemoryStore::new();
/// store.set("greeting", MetaValue::from("hello")).unwrap();
/// assert_eq!(store.get_text("greeting").unwrap().as_deref(), Some("hello"));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: RwLock<BTreeMap<String, MetaValue>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing values.
    ///
    /// Useful for simulating a relaunch with persisted state.
    #[must_use]
    pub fn with_values(values: impl IntoIterator<Item = (String, MetaValue)>) -> Self {
        Self {
            values: RwLock::new(values.into_iter().collect()),
        }
    }

    /// Returns a copy of all stored values.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, MetaValue> {
        self.values.read().clone()
    }

    /// Removes every value.
    pub fn clear(&self) {
        self.values.write().clear();
    }
}

impl MetadataStore for InMemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<MetaValue>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: MetaValue) -> StoreResult<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<Option<MetaValue>> {
        Ok(self.values.write().remove(key))
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.values.read().keys().cloned().collect())
    }

    fn flush(&self) -> StoreResult<()> {
        // Nothing is pending in memory
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::keys;
    use uuid::Uuid;

    #[test]
    fn set_and_get() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();

        store.set(keys::LAST_UPDATE_EVENT_ID, id.into()).unwrap();
        assert_eq!(store.get_uuid(keys::LAST_UPDATE_EVENT_ID).unwrap(), Some(id));
        assert_eq!(store.get_uuid("missing").unwrap(), None);
    }

    #[test]
    fn overwrite_and_remove() {
        let store = InMemoryStore::new();

        store.set(keys::SKIP_HOTFIX, true.into()).unwrap();
        store.set(keys::SKIP_HOTFIX, false.into()).unwrap();
        assert_eq!(store.get_bool(keys::SKIP_HOTFIX).unwrap(), Some(false));

        let removed = store.remove(keys::SKIP_HOTFIX).unwrap();
        assert_eq!(removed, Some(MetaValue::Bool(false)));
        assert!(store.get(keys::SKIP_HOTFIX).unwrap().is_none());
    }

    #[test]
    fn type_mismatch_is_reported() {
        let store = InMemoryStore::new();
        store.set(keys::PUSH_TOKEN, "abcd".into()).unwrap();

        let result = store.get_bool(keys::PUSH_TOKEN);
        assert!(matches!(result, Err(StoreError::TypeMismatch { .. })));
    }

    #[test]
    fn missing_text_list_is_empty() {
        let store = InMemoryStore::new();
        assert!(store
            .get_text_list(keys::PREVIOUSLY_RECEIVED_EVENT_IDS)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn keys_are_sorted() {
        let store = InMemoryStore::with_values(vec![
            ("b".to_string(), MetaValue::Integer(2)),
            ("a".to_string(), MetaValue::Integer(1)),
        ]);
        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);

        store.clear();
        assert!(store.snapshot().is_empty());
    }
}
