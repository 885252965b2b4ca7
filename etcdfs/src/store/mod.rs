//! Key-value store seam.
//!
//! The namespace layer only ever talks to a [`KvStore`]. Production mounts use
//! [`EtcdStore`]; tests and `--memory` runs use [`MemoryStore`]. Handles are
//! shared as `Arc<S>` and must tolerate concurrent calls.

pub mod etcd;
pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;

pub use etcd::{EtcdStore, EtcdStoreConfig};
pub use memory::MemoryStore;

/// Revision a conditional put expects for a key that does not exist yet.
pub const ABSENT: i64 = 0;

/// One key-value pair as returned by a range read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
    /// Store revision of the last modification of this key.
    pub mod_revision: i64,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Exact lookup, or every key starting with `key` when `prefix` is set.
    /// Results are sorted by key; no match yields an empty list.
    async fn get(&self, key: &str, prefix: bool) -> Result<Vec<KvEntry>, StoreError>;

    /// Replace the whole value of `key`. With `expected_revision` the write
    /// only happens if the key's current mod revision matches ([`ABSENT`]
    /// for a missing key), otherwise [`StoreError::Conflict`] is returned.
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_revision: Option<i64>,
    ) -> Result<i64, StoreError>;

    /// Remove `key`, or every key starting with it when `prefix` is set.
    async fn delete(&self, key: &str, prefix: bool) -> Result<u64, StoreError>;

    /// Atomically remove `key` and every key under `key/`. Either both go or
    /// neither does; keys that merely share a string prefix are kept.
    async fn delete_tree(&self, key: &str) -> Result<u64, StoreError>;
}
