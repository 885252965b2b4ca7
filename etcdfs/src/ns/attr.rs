//! File/directory inference from a single prefix scan.

use std::sync::Arc;

use log::debug;

use crate::error::{FsError, Result};
use crate::key::Key;
use crate::store::{KvEntry, KvStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Directory,
}

/// Permission bits reported for each node kind. Nothing enforces them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Permissions {
    pub file: u16,
    pub dir: u16,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            file: 0o644,
            dir: 0o755,
        }
    }
}

impl Permissions {
    pub fn for_kind(&self, kind: NodeKind) -> u16 {
        match kind {
            NodeKind::File => self.file,
            NodeKind::Directory => self.dir,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub kind: NodeKind,
    /// Value length for files, always 0 for directories.
    pub size: u64,
    pub perm: u16,
}

/// Classify `key` from the result of a prefix scan on it.
///
/// Only the key itself and keys under `key/` count; a sibling such as `/ab`
/// matched by a scan for `/a` is ignored. Any descendant makes the key a
/// directory, whatever its own value holds and wherever it sits in `matches`.
pub fn classify(key: &Key, matches: &[KvEntry]) -> Option<(NodeKind, u64)> {
    let nested = key.dir_prefix();
    let mut exact = None;
    let mut has_children = false;
    for m in matches {
        if m.key == key.as_str() {
            exact = Some(m.value.len() as u64);
        } else if m.key.starts_with(&nested) {
            has_children = true;
        }
    }
    if has_children {
        Some((NodeKind::Directory, 0))
    } else {
        exact.map(|len| (NodeKind::File, len))
    }
}

pub struct AttributeResolver<S> {
    store: Arc<S>,
    perms: Permissions,
}

impl<S> Clone for AttributeResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            perms: self.perms,
        }
    }
}

impl<S: KvStore> AttributeResolver<S> {
    pub fn new(store: Arc<S>, perms: Permissions) -> Self {
        Self { store, perms }
    }

    pub fn permissions(&self) -> Permissions {
        self.perms
    }

    pub async fn attributes_of(&self, key: &Key) -> Result<Attributes> {
        if key.is_root() {
            return Ok(self.attrs(NodeKind::Directory, 0));
        }
        let matches = self.store.get(key.as_str(), true).await?;
        let Some((kind, size)) = classify(key, &matches) else {
            debug!("attributes_of {key}: not found");
            return Err(FsError::NotFound(key.to_string()));
        };
        debug!("attributes_of {key}: {kind:?} size={size}");
        Ok(self.attrs(kind, size))
    }

    fn attrs(&self, kind: NodeKind, size: u64) -> Attributes {
        Attributes {
            kind,
            size,
            perm: self.perms.for_kind(kind),
        }
    }
}
