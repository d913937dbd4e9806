//! # Courier Store
//!
//! Persisted metadata store for the Courier sync engine.
//!
//! The sync engine keeps a handful of small values that must survive
//! process restarts: the last update event id, hotfix version markers, the
//! hotfix bypass flag, the push token and the list of push event ids that
//! were already received. This crate provides the store abstraction for
//! those values.
//!
//! ## Design Principles
//!
//! - Stores are simple key/value maps of typed [`MetaValue`]s
//! - Stores use interior mutability so they can be shared behind an `Arc`
//! - Must be `Send + Sync` for concurrent access
//! - Writes to the file store are atomic (write to temp file, then rename)
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral sessions
//! - [`FileStore`] - CBOR-encoded file with an advisory lock
//!
//! ## Example
//!
//! ```rust
//! use courier_store::{keys, InMemoryStore, MetaValue, MetadataStore};
//!
//! let store = InMemoryStore::new();
//! store.set(keys::SKIP_HOTFIX, MetaValue::Bool(true)).unwrap();
//! assert_eq!(store.get_bool(keys::SKIP_HOTFIX).unwrap(), Some(true));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
pub mod keys;
mod memory;
mod store;
mod value;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::MetadataStore;
pub use value::MetaValue;
