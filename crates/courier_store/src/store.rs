//! Metadata store trait definition.

use crate::error::{StoreError, StoreResult};
use crate::value::MetaValue;
use uuid::Uuid;

/// A persisted key/value store for sync engine metadata.
///
/// Stores hold small typed values under string keys (see [`crate::keys`]).
/// All methods take `&self`; implementations synchronize internally so a
/// store can be shared between the sync context and the hotfix runner.
///
/// # Invariants
///
/// - `get` returns exactly the value last passed to `set` for that key
/// - `remove` returns the removed value, if any
/// - After `flush` returns, every prior `set` survives process termination
///
/// # Implementors
///
/// - [`crate::InMemoryStore`] - For testing
/// - [`crate::FileStore`] - For persistent storage
pub trait MetadataStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self, key: &str) -> StoreResult<Option<MetaValue>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be persisted.
    fn set(&self, key: &str, value: MetaValue) -> StoreResult<()>;

    /// Removes the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be persisted.
    fn remove(&self, key: &str) -> StoreResult<Option<MetaValue>>;

    /// Returns all keys in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// Ensures all writes are durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> StoreResult<()>;

    /// Reads a UUID value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TypeMismatch`] if the key holds another type.
    fn get_uuid(&self, key: &str) -> StoreResult<Option<Uuid>> {
        match self.get(key)? {
            None => Ok(None),
            Some(MetaValue::Uuid(id)) => Ok(Some(id)),
            Some(other) => Err(StoreError::type_mismatch(key, "uuid", other.type_name())),
        }
    }

    /// Reads a text value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TypeMismatch`] if the key holds another type.
    fn get_text(&self, key: &str) -> StoreResult<Option<String>> {
        match self.get(key)? {
            None => Ok(None),
            Some(MetaValue::Text(text)) => Ok(Some(text)),
            Some(other) => Err(StoreError::type_mismatch(key, "text", other.type_name())),
        }
    }

    /// Reads a boolean value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TypeMismatch`] if the key holds another type.
    fn get_bool(&self, key: &str) -> StoreResult<Option<bool>> {
        match self.get(key)? {
            None => Ok(None),
            Some(MetaValue::Bool(flag)) => Ok(Some(flag)),
            Some(other) => Err(StoreError::type_mismatch(key, "bool", other.type_name())),
        }
    }

    /// Reads a list of strings; a missing key reads as an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TypeMismatch`] if the key holds another type.
    fn get_text_list(&self, key: &str) -> StoreResult<Vec<String>> {
        match self.get(key)? {
            None => Ok(Vec::new()),
            Some(MetaValue::TextList(list)) => Ok(list),
            Some(other) => Err(StoreError::type_mismatch(key, "text list", other.type_name())),
        }
    }
}
