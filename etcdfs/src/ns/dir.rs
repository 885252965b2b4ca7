//! Immediate-children listing of a directory key.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, error};

use super::attr::NodeKind;
use crate::error::{FsError, Result};
use crate::key::Key;
use crate::store::KvStore;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: NodeKind,
}

/// Fold scanned keys under `prefix` into their first path segment.
///
/// A name seen both as a leaf and with something nested under it is a
/// directory: the flag is OR-ed across every key, so the outcome does not
/// depend on which key came first.
pub fn merge_children<'a, I>(prefix: &str, keys: I) -> Vec<Entry>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut nested: BTreeMap<&'a str, bool> = BTreeMap::new();
    for key in keys {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        let (name, is_dir) = match rest.split_once('/') {
            Some((first, _)) => (first, true),
            None => (rest, false),
        };
        if name.is_empty() {
            continue;
        }
        *nested.entry(name).or_insert(false) |= is_dir;
    }
    nested
        .into_iter()
        .map(|(name, is_dir)| Entry {
            name: name.to_string(),
            kind: if is_dir {
                NodeKind::Directory
            } else {
                NodeKind::File
            },
        })
        .collect()
}

pub struct DirectoryEnumerator<S> {
    store: Arc<S>,
}

impl<S> Clone for DirectoryEnumerator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: KvStore> DirectoryEnumerator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Entries sorted by name. An empty directory is an empty list; only a
    /// failed scan is reported, as `NotFound`.
    ///
    /// The listing reflects a single scan, not a snapshot of the tree.
    pub async fn list_children(&self, dir: &Key) -> Result<Vec<Entry>> {
        let prefix = dir.dir_prefix();
        let matches = self.store.get(&prefix, true).await.map_err(|e| {
            error!("list_children {dir}: scan failed: {e}");
            FsError::NotFound(dir.to_string())
        })?;
        let entries = merge_children(&prefix, matches.iter().map(|m| m.key.as_str()));
        debug!("list_children {dir}: {} entries", entries.len());
        Ok(entries)
    }
}
