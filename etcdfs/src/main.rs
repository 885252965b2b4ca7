use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info};
use tokio::signal;

use etcdfs::cli::Cli;
use etcdfs::config::Settings;
use etcdfs::fuse::EtcdFs;
use etcdfs::fuse::mount::{mount, mount_options, mount_unprivileged};
use etcdfs::ns::NamespaceService;
use etcdfs::store::{EtcdStore, KvStore, MemoryStore};

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .target(env_logger::Target::Stdout)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let settings = Settings::resolve(&cli)?;
    if settings.memory {
        info!("serving an in-memory keyspace");
        serve(Arc::new(MemoryStore::new()), &settings).await
    } else {
        let store = EtcdStore::connect(&settings.etcd)
            .await
            .context("failed to connect to etcd")?;
        serve(Arc::new(store), &settings).await
    }
}

async fn serve<S: KvStore + 'static>(store: Arc<S>, settings: &Settings) -> anyhow::Result<()> {
    let ns = NamespaceService::new(store, settings.perms, settings.retry)
        .with_max_value_size(settings.max_value_size);
    let fs = EtcdFs::new(ns, settings.ttl);
    let opts = mount_options(&settings.fs_name, settings.allow_other);
    let path = &settings.mount_path;

    let mut handle = if settings.privileged {
        mount(fs, path, opts).await
    } else {
        mount_unprivileged(fs, path, opts).await
    }
    .with_context(|| format!("failed to mount on {}", path.display()))?;
    info!("mounted on {}", path.display());

    let res = tokio::select! {
        res = &mut handle => res,
        _ = signal::ctrl_c() => {
            info!("interrupted, unmounting {}", path.display());
            handle.unmount().await
        }
    };
    if let Err(e) = &res {
        error!("session on {} ended with error: {e}", path.display());
    }
    res.context("FUSE session failed")
}
