//! Namespace translation: a flat keyspace presented as a file tree.
//!
//! Directories are never stored. A key is a directory when some other key
//! lives under `key/`, and a file otherwise; the root is always a directory.
//! [`NamespaceService`] is what the FUSE adapter calls; it normalizes every
//! path through [`to_key`] before touching the store.
//!
//! Submodules:
//! - `attr`: kind and size of one key from a prefix scan
//! - `dir`: immediate children of a directory key
//! - `content`: offset reads and CAS-guarded read-modify-write
//! - `handle`: open-file handles and the capability table

pub mod attr;
pub mod content;
pub mod dir;
pub mod handle;

use std::sync::Arc;

use log::debug;

use crate::error::{FsError, Result, StoreError};
use crate::key::{Key, to_key};
use crate::store::{ABSENT, KvStore};

pub use attr::{AttributeResolver, Attributes, NodeKind, Permissions};
pub use content::{ContentEditor, DEFAULT_MAX_VALUE_SIZE, RetryPolicy};
pub use dir::{DirectoryEnumerator, Entry};
pub use handle::{CAPABILITIES, Capability, FileHandle, Support};

pub struct NamespaceService<S> {
    store: Arc<S>,
    attrs: AttributeResolver<S>,
    dirs: DirectoryEnumerator<S>,
    content: ContentEditor<S>,
}

impl<S: KvStore> NamespaceService<S> {
    pub fn new(store: Arc<S>, perms: Permissions, policy: RetryPolicy) -> Self {
        Self {
            attrs: AttributeResolver::new(store.clone(), perms),
            dirs: DirectoryEnumerator::new(store.clone()),
            content: ContentEditor::new(store.clone(), policy),
            store,
        }
    }

    /// Cap on the length of any value a write may produce.
    pub fn with_max_value_size(mut self, limit: usize) -> Self {
        self.content = self.content.with_max_value_size(limit);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn permissions(&self) -> Permissions {
        self.attrs.permissions()
    }

    pub async fn get_attr(&self, path: &str) -> Result<Attributes> {
        self.attrs.attributes_of(&to_key(path)).await
    }

    pub async fn open_dir(&self, path: &str) -> Result<Vec<Entry>> {
        self.dirs.list_children(&to_key(path)).await
    }

    /// Bind a handle to an existing key.
    pub async fn open(&self, path: &str) -> Result<FileHandle<S>> {
        let key = to_key(path);
        let attrs = self.attrs.attributes_of(&key).await?;
        debug!("open {key} as {:?}", attrs.kind);
        Ok(self.handle(key, attrs.kind))
    }

    /// Materialize `path` with an empty value and open it.
    pub async fn create(&self, path: &str) -> Result<FileHandle<S>> {
        let key = to_key(path);
        if key.is_root() {
            return Err(FsError::NotSupported("create on the root"));
        }
        debug!("create {key}");
        self.store.put(key.as_str(), Vec::new(), None).await?;
        Ok(self.handle(key, NodeKind::File))
    }

    /// Put an empty value at `path` unless the key already exists.
    ///
    /// Until something is created beneath it, the new key reads back as an
    /// empty file.
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let key = to_key(path);
        if key.is_root() {
            return Ok(());
        }
        debug!("mkdir {key}");
        match self.store.put(key.as_str(), Vec::new(), Some(ABSENT)).await {
            Ok(_) => Ok(()),
            Err(StoreError::Conflict(_)) => {
                debug!("mkdir {key}: key already present, left untouched");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn unlink(&self, path: &str) -> Result<()> {
        let key = to_key(path);
        if key.is_root() {
            return Ok(());
        }
        debug!("unlink {key}");
        match self.store.delete(key.as_str(), false).await? {
            0 => Err(FsError::NotFound(key.to_string())),
            _ => Ok(()),
        }
    }

    /// Remove `path` and everything nested under `path/` in one store call.
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        let key = to_key(path);
        if key.is_root() {
            return Ok(());
        }
        let removed = self.store.delete_tree(key.as_str()).await?;
        debug!("rmdir {key}: removed {removed} keys");
        if removed == 0 {
            return Err(FsError::NotFound(key.to_string()));
        }
        Ok(())
    }

    fn handle(&self, key: Key, kind: NodeKind) -> FileHandle<S> {
        FileHandle::new(key, kind, self.attrs.clone(), self.content.clone())
    }
}
