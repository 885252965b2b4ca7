//! Byte-range read and write over a value stored as one opaque blob.
//!
//! Writes are read-modify-write: fetch the whole value, splice, put it back.
//! The put is conditioned on the mod revision seen by the fetch, and a lost
//! race restarts the cycle from a fresh read, up to [`RetryPolicy::max_attempts`].

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;
use tokio::time::sleep;

use crate::error::{FsError, Result, StoreError};
use crate::key::Key;
use crate::store::{ABSENT, KvStore};

/// Bounded exponential backoff between conflicting write attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately; for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before the attempt following the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << shift)
            .min(self.max_backoff)
    }
}

/// Serialized form of [`RetryPolicy`] in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let p = RetryPolicy::default();
        Self {
            max_attempts: p.max_attempts,
            initial_backoff_ms: p.initial_backoff.as_millis() as u64,
            max_backoff_ms: p.max_backoff.as_millis() as u64,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(c: &RetryConfig) -> Self {
        Self {
            max_attempts: c.max_attempts.max(1),
            initial_backoff: Duration::from_millis(c.initial_backoff_ms),
            max_backoff: Duration::from_millis(c.max_backoff_ms),
        }
    }
}

/// Largest value etcd accepts in one request with its default
/// `--max-request-bytes`.
pub const DEFAULT_MAX_VALUE_SIZE: usize = 1536 * 1024;

/// Size limits in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub max_value_size: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        }
    }
}

/// Bytes `[offset, offset + length)` of `value`, clipped to its end.
pub fn slice_range(value: &[u8], offset: usize, length: usize) -> &[u8] {
    if offset >= value.len() {
        return &[];
    }
    let end = offset.saturating_add(length).min(value.len());
    &value[offset..end]
}

/// Overlay `data` on `value` at `offset`. A gap past the current end is
/// filled with zero bytes; bytes after the written range are preserved.
pub fn splice(value: &[u8], offset: usize, data: &[u8]) -> Vec<u8> {
    let end = offset + data.len();
    let mut out = Vec::with_capacity(end.max(value.len()));
    out.extend_from_slice(&value[..offset.min(value.len())]);
    out.resize(offset, 0);
    out.extend_from_slice(data);
    if end < value.len() {
        out.extend_from_slice(&value[end..]);
    }
    out
}

pub struct ContentEditor<S> {
    store: Arc<S>,
    policy: RetryPolicy,
    max_value_size: usize,
}

impl<S> Clone for ContentEditor<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            policy: self.policy,
            max_value_size: self.max_value_size,
        }
    }
}

impl<S: KvStore> ContentEditor<S> {
    pub fn new(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        }
    }

    /// Refuse writes that would leave a value longer than `limit` bytes.
    pub fn with_max_value_size(mut self, limit: usize) -> Self {
        self.max_value_size = limit;
        self
    }

    pub async fn read(&self, key: &Key, offset: u64, length: usize) -> Result<Vec<u8>> {
        let entry = self
            .store
            .get(key.as_str(), false)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FsError::NotFound(key.to_string()))?;
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(slice_range(&entry.value, offset, length).to_vec())
    }

    /// Splice `data` at `offset` and return the number of bytes written.
    /// A missing key is treated as an empty value.
    pub async fn write(&self, key: &Key, offset: u64, data: &[u8]) -> Result<usize> {
        // Checked before anything is fetched or allocated.
        let end = offset.saturating_add(data.len() as u64);
        if end > self.max_value_size as u64 {
            return Err(FsError::TooLarge {
                key: key.to_string(),
                size: end,
                limit: self.max_value_size,
            });
        }
        let offset = offset as usize;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let (current, revision) = match self.store.get(key.as_str(), false).await?.pop() {
                Some(entry) => (entry.value, entry.mod_revision),
                None => (Vec::new(), ABSENT),
            };
            let next = splice(&current, offset, data);
            match self.store.put(key.as_str(), next, Some(revision)).await {
                Ok(rev) => {
                    debug!(
                        "write {key}: {} bytes at {offset}, revision {rev}, attempt {attempt}",
                        data.len()
                    );
                    return Ok(data.len());
                }
                Err(StoreError::Conflict(_)) if attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!("write {key}: revision {revision} is stale, retrying in {delay:?}");
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
                Err(StoreError::Conflict(_)) => {
                    return Err(FsError::Conflict {
                        key: key.to_string(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
