//! In-process store with etcd-like revision semantics, for tests and dev mounts.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ABSENT, KvEntry, KvStore};
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    map: BTreeMap<String, (Vec<u8>, i64)>,
    revision: i64,
    forced_conflicts: u32,
}

impl Inner {
    fn matching(&self, key: &str, prefix: bool) -> Vec<String> {
        if prefix {
            self.map
                .range(key.to_string()..)
                .take_while(|(k, _)| k.starts_with(key))
                .map(|(k, _)| k.clone())
                .collect()
        } else if self.map.contains_key(key) {
            vec![key.to_string()]
        } else {
            Vec::new()
        }
    }

    /// One revision for the whole batch, as a single etcd transaction would.
    fn remove_all(&mut self, keys: &[String]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        self.revision += 1;
        for k in keys {
            self.map.remove(k);
        }
        keys.len() as u64
    }
}

/// Every mutation bumps a single store-wide revision, and each key records the
/// revision that last touched it, which is what conditional puts compare.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` conditional puts with [`StoreError::Conflict`], as
    /// if another writer had slipped in between read and write.
    pub fn inject_conflicts(&self, n: u32) {
        self.inner.lock().unwrap().forced_conflicts = n;
    }

    /// Current store-wide revision.
    pub fn revision(&self) -> i64 {
        self.inner.lock().unwrap().revision
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str, prefix: bool) -> Result<Vec<KvEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .matching(key, prefix)
            .into_iter()
            .filter_map(|k| {
                let (value, rev) = inner.map.get(&k)?;
                Some(KvEntry {
                    key: k,
                    value: value.clone(),
                    mod_revision: *rev,
                })
            })
            .collect())
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_revision: Option<i64>,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(expected) = expected_revision {
            if inner.forced_conflicts > 0 {
                inner.forced_conflicts -= 1;
                return Err(StoreError::Conflict(key.to_string()));
            }
            let current = inner.map.get(key).map_or(ABSENT, |(_, rev)| *rev);
            if current != expected {
                return Err(StoreError::Conflict(key.to_string()));
            }
        }
        inner.revision += 1;
        let rev = inner.revision;
        inner.map.insert(key.to_string(), (value, rev));
        Ok(rev)
    }

    async fn delete(&self, key: &str, prefix: bool) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let doomed = inner.matching(key, prefix);
        Ok(inner.remove_all(&doomed))
    }

    async fn delete_tree(&self, key: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut doomed = inner.matching(key, false);
        doomed.extend(inner.matching(&format!("{key}/"), true));
        Ok(inner.remove_all(&doomed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefix_get_is_sorted_and_bounded() {
        let store = MemoryStore::new();
        for k in ["/b", "/a/2", "/a", "/a/1", "/ab"] {
            store.put(k, b"x".to_vec(), None).await.unwrap();
        }
        let keys: Vec<String> = store
            .get("/a", true)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["/a", "/a/1", "/a/2", "/ab"]);
        assert_eq!(store.get("/a", false).await.unwrap().len(), 1);
        assert!(store.get("/zz", true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conditional_put_checks_revision() {
        let store = MemoryStore::new();
        let r1 = store.put("/k", b"1".to_vec(), Some(ABSENT)).await.unwrap();
        assert!(matches!(
            store.put("/k", b"2".to_vec(), Some(ABSENT)).await,
            Err(StoreError::Conflict(_))
        ));
        let r2 = store.put("/k", b"2".to_vec(), Some(r1)).await.unwrap();
        assert!(r2 > r1);
        assert!(store.put("/k", b"3".to_vec(), Some(r1)).await.is_err());
        assert_eq!(store.get("/k", false).await.unwrap()[0].value, b"2");
    }

    #[tokio::test]
    async fn injected_conflicts_only_hit_conditional_puts() {
        let store = MemoryStore::new();
        store.inject_conflicts(1);
        store.put("/k", Vec::new(), None).await.unwrap();
        let rev = store.get("/k", false).await.unwrap()[0].mod_revision;
        assert!(store.put("/k", b"a".to_vec(), Some(rev)).await.is_err());
        assert!(store.put("/k", b"a".to_vec(), Some(rev)).await.is_ok());
    }

    #[tokio::test]
    async fn delete_exact_and_prefix() {
        let store = MemoryStore::new();
        for k in ["/d", "/d/x", "/d/y/z", "/e"] {
            store.put(k, Vec::new(), None).await.unwrap();
        }
        assert_eq!(store.delete("/d/", true).await.unwrap(), 2);
        assert_eq!(store.delete("/d", false).await.unwrap(), 1);
        assert_eq!(store.delete("/missing", false).await.unwrap(), 0);
        assert_eq!(store.get("/", true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_tree_spares_string_prefix_siblings() {
        let store = MemoryStore::new();
        for k in ["/d", "/d/x", "/d/y/z", "/dd", "/dd/w"] {
            store.put(k, Vec::new(), None).await.unwrap();
        }
        let before = store.revision();
        assert_eq!(store.delete_tree("/d").await.unwrap(), 3);
        assert_eq!(store.revision(), before + 1);
        let left: Vec<String> = store
            .get("/", true)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(left, vec!["/dd", "/dd/w"]);

        assert_eq!(store.delete_tree("/d").await.unwrap(), 0);
        assert_eq!(store.revision(), before + 1);
    }

    #[tokio::test]
    async fn rejected_put_leaves_revision_alone() {
        let store = MemoryStore::new();
        let rev = store.put("/k", b"1".to_vec(), None).await.unwrap();
        assert_eq!(store.revision(), rev);
        assert!(store.put("/k", b"2".to_vec(), Some(ABSENT)).await.is_err());
        assert_eq!(store.revision(), rev);
    }
}
