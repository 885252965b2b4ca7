//! etcd v3 backend.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, DeleteOptions, GetOptions, KvClient, Txn, TxnOp,
    TxnOpResponse,
};
use log::{debug, info};

use super::{KvEntry, KvStore};
use crate::error::StoreError;

/// Connection settings for [`EtcdStore::connect`].
#[derive(Debug, Clone, Default)]
pub struct EtcdStoreConfig {
    pub endpoints: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout; a request exceeding it surfaces as a transport error.
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl EtcdStoreConfig {
    /// Split a comma separated endpoint list, dropping blanks.
    pub fn parse_endpoints(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// User and password to authenticate with. A user without a password
    /// authenticates with an empty one.
    fn credentials(&self) -> Option<(String, String)> {
        let user = self.username.as_deref().filter(|u| !u.is_empty())?;
        Some((user.to_string(), self.password.clone().unwrap_or_default()))
    }

    fn connect_options(&self) -> ConnectOptions {
        let mut opts = ConnectOptions::new();
        if let Some((user, pass)) = self.credentials() {
            opts = opts.with_user(user, pass);
        }
        if let Some(t) = self.timeout {
            opts = opts.with_timeout(t);
        }
        if let Some(t) = self.connect_timeout {
            opts = opts.with_connect_timeout(t);
        }
        opts
    }
}

/// A [`KvStore`] over an etcd cluster.
///
/// `KvClient` wraps a multiplexed channel and is cheap to clone, so each call
/// works on its own clone instead of queueing behind a shared lock.
#[derive(Clone)]
pub struct EtcdStore {
    kv: KvClient,
}

impl EtcdStore {
    pub async fn connect(config: &EtcdStoreConfig) -> Result<Self, StoreError> {
        info!("connecting to etcd endpoints {:?}", config.endpoints);
        let client = Client::connect(&config.endpoints, Some(config.connect_options())).await?;
        Ok(Self::from_client(&client))
    }

    pub fn from_client(client: &Client) -> Self {
        Self {
            kv: client.kv_client(),
        }
    }

    fn kv(&self) -> KvClient {
        self.kv.clone()
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get(&self, key: &str, prefix: bool) -> Result<Vec<KvEntry>, StoreError> {
        let opts = prefix.then(|| GetOptions::new().with_prefix());
        let resp = self.kv().get(key, opts).await?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| KvEntry {
                key: String::from_utf8_lossy(kv.key()).into_owned(),
                value: kv.value().to_vec(),
                mod_revision: kv.mod_revision(),
            })
            .collect())
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_revision: Option<i64>,
    ) -> Result<i64, StoreError> {
        let Some(rev) = expected_revision else {
            let resp = self.kv().put(key, value, None).await?;
            return Ok(resp.header().map_or(0, |h| h.revision()));
        };

        // A missing key compares as mod revision 0.
        let cmp = Compare::mod_revision(key, CompareOp::Equal, rev);
        let txn = Txn::new()
            .when([cmp])
            .and_then([TxnOp::put(key, value, None)]);
        let resp = self.kv().txn(txn).await?;
        if !resp.succeeded() {
            debug!("conditional put on {key} rejected, expected revision {rev}");
            return Err(StoreError::Conflict(key.to_string()));
        }
        Ok(resp.header().map_or(0, |h| h.revision()))
    }

    async fn delete(&self, key: &str, prefix: bool) -> Result<u64, StoreError> {
        let opts = prefix.then(|| DeleteOptions::new().with_prefix());
        let resp = self.kv().delete(key, opts).await?;
        Ok(resp.deleted().max(0) as u64)
    }

    async fn delete_tree(&self, key: &str) -> Result<u64, StoreError> {
        let txn = Txn::new().and_then([
            TxnOp::delete(key, None),
            TxnOp::delete(format!("{key}/"), Some(DeleteOptions::new().with_prefix())),
        ]);
        let resp = self.kv().txn(txn).await?;
        let removed: u64 = resp
            .op_responses()
            .into_iter()
            .map(|op| match op {
                TxnOpResponse::Delete(d) => d.deleted().max(0) as u64,
                _ => 0,
            })
            .sum();
        debug!("delete_tree {key}: {removed} keys");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_split_and_trimmed() {
        assert_eq!(
            EtcdStoreConfig::parse_endpoints("127.0.0.1:2379, 10.0.0.2:2379,,"),
            vec!["127.0.0.1:2379".to_string(), "10.0.0.2:2379".to_string()]
        );
        assert!(EtcdStoreConfig::parse_endpoints(" , ").is_empty());
    }

    #[test]
    fn user_without_password_still_authenticates() {
        let mut config = EtcdStoreConfig {
            username: Some("root".into()),
            ..Default::default()
        };
        assert_eq!(
            config.credentials(),
            Some(("root".to_string(), String::new()))
        );

        config.password = Some("secret".into());
        assert_eq!(
            config.credentials(),
            Some(("root".to_string(), "secret".to_string()))
        );

        config.username = Some(String::new());
        assert_eq!(config.credentials(), None);
        config.username = None;
        assert_eq!(config.credentials(), None);
    }
}
