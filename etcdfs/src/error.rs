//! Error taxonomy for the namespace layer and the store seam.

use thiserror::Error;

/// Failures reported by a [`KvStore`](crate::store::KvStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional put observed a revision other than the expected one.
    #[error("revision conflict on {0}")]
    Conflict(String),
    #[error(transparent)]
    Etcd(#[from] Box<etcd_client::Error>),
    #[error("invalid store data: {0}")]
    InvalidData(String),
}

impl From<etcd_client::Error> for StoreError {
    fn from(e: etcd_client::Error) -> Self {
        StoreError::Etcd(Box::new(e))
    }
}

/// Errors surfaced to the filesystem-protocol engine.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such key: {0}")]
    NotFound(String),
    #[error("write to {key} lost the race {attempts} times")]
    Conflict { key: String, attempts: u32 },
    #[error("write to {key} would grow it to {size} bytes, over the {limit} byte limit")]
    TooLarge { key: String, size: u64, limit: usize },
    #[error("store failure: {0}")]
    Io(#[source] StoreError),
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
}

impl From<StoreError> for FsError {
    fn from(e: StoreError) -> Self {
        FsError::Io(e)
    }
}

impl FsError {
    /// The errno the FUSE adapter replies with.
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::Conflict { .. } => libc::EAGAIN,
            FsError::TooLarge { .. } => libc::EFBIG,
            FsError::Io(_) => libc::EIO,
            FsError::NotSupported(_) => libc::ENOSYS,
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
