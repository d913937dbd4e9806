//! File-based metadata store for persistent storage.
//!
//! The store directory has the following layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK               # Advisory lock for single-writer
//! └─ metadata.cbor      # CBOR-encoded key/value map
//! ```

use crate::error::{StoreError, StoreResult};
use crate::store::MetadataStore;
use crate::value::MetaValue;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = "LOCK";
const METADATA_FILE: &str = "metadata.cbor";
/// Temporary file for atomic metadata writes.
const METADATA_TEMP: &str = "metadata.cbor.tmp";

/// A file-based metadata store.
///
/// Every `set` and `remove` is written through to disk using the
/// write-then-rename pattern, so a crash leaves either the old or the new
/// map on disk, never a partial one. This matters for hotfix markers,
/// which are advanced after each applied patch.
///
/// # Thread Safety
///
/// The store holds an exclusive advisory lock on its directory. Only one
/// `FileStore` can be open per directory at a time; within a process the
/// store is shared behind an `Arc`.
///
/// # Example
///
/// ```no_run
/// use courier_store::{keys, FileStore, MetadataStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("session-meta")).unwrap();
/// store.set(keys::SKIP_HOTFIX, true.into()).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, MetaValue>>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store in the given directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - Another process holds the lock (returns [`StoreError::Locked`])
    /// - The metadata file exists but cannot be decoded
    pub fn open(path: &Path) -> StoreResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked {
                path: path.display().to_string(),
            });
        }

        let values = Self::load(&path.join(METADATA_FILE))?;
        debug!(path = %path.display(), keys = values.len(), "opened metadata store");

        Ok(Self {
            path: path.to_path_buf(),
            values: RwLock::new(values),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(metadata_path: &Path) -> StoreResult<BTreeMap<String, MetaValue>> {
        if !metadata_path.exists() {
            return Ok(BTreeMap::new());
        }

        let file = File::open(metadata_path)?;
        if file.metadata()?.len() == 0 {
            return Ok(BTreeMap::new());
        }

        ciborium::from_reader(BufReader::new(file)).map_err(|e| StoreError::Decode(e.to_string()))
    }

    /// Writes the map to disk atomically.
    fn persist(&self, values: &BTreeMap<String, MetaValue>) -> StoreResult<()> {
        let mut data = Vec::new();
        ciborium::into_writer(values, &mut data).map_err(|e| StoreError::Encode(e.to_string()))?;

        let temp_path = self.path.join(METADATA_TEMP);
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.path.join(METADATA_FILE))?;
        Ok(())
    }
}

impl MetadataStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<MetaValue>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: MetaValue) -> StoreResult<()> {
        let mut values = self.values.write();
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> StoreResult<Option<MetaValue>> {
        let mut values = self.values.write();
        let removed = values.remove(key);
        if removed.is_some() {
            self.persist(&values)?;
        }
        Ok(removed)
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.values.read().keys().cloned().collect())
    }

    fn flush(&self) -> StoreResult<()> {
        let values = self.values.read();
        self.persist(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use tempfile::tempdir;
    use uuid::Uuid;

    #[test]
    fn open_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("meta");

        let store = FileStore::open(&path).unwrap();
        assert!(path.is_dir());
        assert_eq!(store.path(), path);
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempdir().unwrap();
        let id = Uuid::new_v4();

        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set(keys::LAST_UPDATE_EVENT_ID, id.into()).unwrap();
            store.set(keys::HOTFIX_STARTUP_VERSION, "1.2.0".into()).unwrap();
            store
                .set(
                    keys::PREVIOUSLY_RECEIVED_EVENT_IDS,
                    vec!["a".to_string(), "b".to_string()].into(),
                )
                .unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get_uuid(keys::LAST_UPDATE_EVENT_ID).unwrap(), Some(id));
        assert_eq!(
            store.get_text(keys::HOTFIX_STARTUP_VERSION).unwrap().as_deref(),
            Some("1.2.0")
        );
        assert_eq!(
            store.get_text_list(keys::PREVIOUSLY_RECEIVED_EVENT_IDS).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn remove_is_persisted() {
        let dir = tempdir().unwrap();

        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set(keys::SKIP_HOTFIX, true.into()).unwrap();
            store.remove(keys::SKIP_HOTFIX).unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.get(keys::SKIP_HOTFIX).unwrap().is_none());
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();

        let _first = FileStore::open(dir.path()).unwrap();
        let second = FileStore::open(dir.path());
        assert!(matches!(second, Err(StoreError::Locked { .. })));
    }

    #[test]
    fn corrupted_metadata_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(METADATA_FILE), b"\xff\x00not cbor").unwrap();

        let result = FileStore::open(dir.path());
        assert!(matches!(result, Err(StoreError::Decode(_))));
    }

    #[test]
    fn flush_writes_file() {
        let dir = tempdir().unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        store.flush().unwrap();
        assert!(dir.path().join(METADATA_FILE).exists());
        assert!(!dir.path().join(METADATA_TEMP).exists());
    }
}
