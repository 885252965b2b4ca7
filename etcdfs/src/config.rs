//! Runtime configuration: an optional YAML file overlaid by CLI flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::cli::Cli;
use crate::ns::content::{ContentConfig, RetryConfig};
use crate::ns::{Permissions, RetryPolicy};
use crate::store::EtcdStoreConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub etcd: EtcdConfig,
    pub mount: MountConfig,
    pub retry: RetryConfig,
    pub content: ContentConfig,
    pub attr: AttrConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub path: Option<PathBuf>,
    pub allow_other: bool,
    pub fs_name: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            path: None,
            allow_other: false,
            fs_name: "etcdfs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttrConfig {
    pub file_mode: u16,
    pub dir_mode: u16,
    /// How long the kernel may cache entries and attributes.
    pub ttl_ms: u64,
}

impl Default for AttrConfig {
    fn default() -> Self {
        let perms = Permissions::default();
        Self {
            file_mode: perms.file,
            dir_mode: perms.dir,
            ttl_ms: 1000,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let cfg: Config = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    Ok(cfg)
}

/// Everything `main` needs to build the store and mount it.
#[derive(Debug, Clone)]
pub struct Settings {
    pub etcd: EtcdStoreConfig,
    pub mount_path: PathBuf,
    pub allow_other: bool,
    pub fs_name: String,
    pub privileged: bool,
    pub memory: bool,
    pub perms: Permissions,
    pub retry: RetryPolicy,
    pub max_value_size: usize,
    pub ttl: Duration,
}

impl Settings {
    /// Load the config file named by `cli` (if any) and apply the flags on top.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let cfg = match &cli.config {
            Some(path) => load_config(path)?,
            None => Config::default(),
        };
        Self::merge(cfg, cli)
    }

    pub fn merge(cfg: Config, cli: &Cli) -> Result<Self> {
        let endpoints = match &cli.etcd_endpoints {
            Some(list) => EtcdStoreConfig::parse_endpoints(list),
            None => cfg.etcd.endpoints,
        };
        if endpoints.is_empty() && !cli.memory {
            bail!("no etcd endpoints given; pass --etcd-endpoints or set etcd.endpoints");
        }
        let mount_path = cli
            .mount_path
            .clone()
            .or(cfg.mount.path)
            .filter(|p| !p.as_os_str().is_empty())
            .context("no mount path given; pass --mount-path or set mount.path")?;

        Ok(Self {
            etcd: EtcdStoreConfig {
                endpoints,
                username: cli.etcd_user.clone().or(cfg.etcd.username),
                password: cli.etcd_password.clone().or(cfg.etcd.password),
                timeout: cfg.etcd.timeout_ms.map(Duration::from_millis),
                connect_timeout: cfg.etcd.connect_timeout_ms.map(Duration::from_millis),
            },
            mount_path,
            allow_other: cli.allow_other || cfg.mount.allow_other,
            fs_name: cfg.mount.fs_name,
            privileged: cli.privileged,
            memory: cli.memory,
            perms: Permissions {
                file: cfg.attr.file_mode,
                dir: cfg.attr.dir_mode,
            },
            retry: RetryPolicy::from(&cfg.retry),
            max_value_size: cfg.content.max_value_size,
            ttl: Duration::from_millis(cfg.attr.ttl_ms),
        })
    }
}
