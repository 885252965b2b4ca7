//! Open-file handles and the table of operations with no keyspace meaning.
//!
//! A handle is bound to one key and carries no buffered state: every read and
//! write is a store round trip. Releasing consumes the handle.

use log::debug;

use super::attr::{AttributeResolver, Attributes, NodeKind};
use super::content::ContentEditor;
use crate::error::{FsError, Result};
use crate::key::Key;
use crate::store::KvStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Support {
    /// Accepted and reported as successful without any effect.
    Permissive,
    /// Rejected with [`FsError::NotSupported`].
    Unsupported,
}

/// Filesystem primitives that the keyspace cannot express.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Flush,
    Release,
    Fsync,
    Truncate,
    Allocate,
    /// There is no lock table; lock queries and requests always succeed.
    GetLock,
    SetLock,
    SetTimes,
    Chown,
    Chmod,
}

pub const CAPABILITIES: [Capability; 10] = [
    Capability::Flush,
    Capability::Release,
    Capability::Fsync,
    Capability::Truncate,
    Capability::Allocate,
    Capability::GetLock,
    Capability::SetLock,
    Capability::SetTimes,
    Capability::Chown,
    Capability::Chmod,
];

impl Capability {
    pub const fn support(self) -> Support {
        match self {
            Capability::Flush
            | Capability::Release
            | Capability::Fsync
            | Capability::Truncate
            | Capability::Allocate
            | Capability::GetLock
            | Capability::SetLock => Support::Permissive,
            Capability::SetTimes | Capability::Chown | Capability::Chmod => Support::Unsupported,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Capability::Flush => "flush",
            Capability::Release => "release",
            Capability::Fsync => "fsync",
            Capability::Truncate => "truncate",
            Capability::Allocate => "allocate",
            Capability::GetLock => "getlk",
            Capability::SetLock => "setlk",
            Capability::SetTimes => "utimens",
            Capability::Chown => "chown",
            Capability::Chmod => "chmod",
        }
    }

    pub fn check(self) -> Result<()> {
        match self.support() {
            Support::Permissive => Ok(()),
            Support::Unsupported => Err(FsError::NotSupported(self.name())),
        }
    }
}

pub struct FileHandle<S> {
    key: Key,
    kind: NodeKind,
    attrs: AttributeResolver<S>,
    content: ContentEditor<S>,
}

impl<S: KvStore> FileHandle<S> {
    pub(crate) fn new(
        key: Key,
        kind: NodeKind,
        attrs: AttributeResolver<S>,
        content: ContentEditor<S>,
    ) -> Self {
        Self {
            key,
            kind,
            attrs,
            content,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Kind observed when the handle was opened.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub async fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.content.read(&self.key, offset, length).await
    }

    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<usize> {
        self.content.write(&self.key, offset, data).await
    }

    pub async fn getattr(&self) -> Result<Attributes> {
        self.attrs.attributes_of(&self.key).await
    }

    pub fn flush(&self) -> Result<()> {
        Capability::Flush.check()
    }

    pub fn fsync(&self) -> Result<()> {
        Capability::Fsync.check()
    }

    /// Accepted without changing the stored value.
    pub fn truncate(&self, size: u64) -> Result<()> {
        debug!("truncate {} to {size}: ignored", self.key);
        Capability::Truncate.check()
    }

    pub fn allocate(&self, offset: u64, length: u64) -> Result<()> {
        debug!("allocate {} [{offset}, +{length}): ignored", self.key);
        Capability::Allocate.check()
    }

    pub fn get_lock(&self) -> Result<()> {
        Capability::GetLock.check()
    }

    pub fn set_lock(&self) -> Result<()> {
        Capability::SetLock.check()
    }

    pub fn set_times(&self) -> Result<()> {
        Capability::SetTimes.check()
    }

    pub fn release(self) -> Result<()> {
        debug!("release {}", self.key);
        Capability::Release.check()
    }
}
