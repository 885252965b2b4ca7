use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "etcdfs", version, about = "Mount an etcd keyspace as a filesystem")]
pub struct Cli {
    /// etcd user name
    #[arg(long)]
    pub etcd_user: Option<String>,

    /// etcd password
    #[arg(long)]
    pub etcd_password: Option<String>,

    /// Comma separated etcd endpoints, e.g. http://127.0.0.1:2379
    #[arg(long)]
    pub etcd_endpoints: Option<String>,

    /// Empty directory to mount on
    #[arg(long)]
    pub mount_path: Option<PathBuf>,

    /// YAML config file; flags take precedence over its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Let other users access the mount (needs user_allow_other)
    #[arg(long)]
    pub allow_other: bool,

    /// Mount via /dev/fuse directly instead of fusermount3
    #[arg(long)]
    pub privileged: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    pub debug: bool,

    /// Serve an in-process keyspace instead of connecting to etcd
    #[arg(long)]
    pub memory: bool,
}
