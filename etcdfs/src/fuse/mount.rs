//! Mount helpers for starting/stopping FUSE
//!
//! Notes:
//! - Only supported on Linux. Unprivileged mounts go through fusermount3.
//! - These helpers are thin wrappers over rfuse3 raw Session APIs.

use std::path::Path;

use rfuse3::MountOptions;
use rfuse3::raw::{MountHandle, Session};

use super::EtcdFs;
use crate::store::KvStore;

/// Mount options for an etcdfs session.
pub fn mount_options(fs_name: &str, allow_other: bool) -> MountOptions {
    let mut mo = MountOptions::default();
    mo.fs_name(fs_name);
    mo.allow_other(allow_other);
    mo
}

/// Mount `fs` on an empty directory without root, via fusermount3.
#[cfg(target_os = "linux")]
pub async fn mount_unprivileged<S>(
    fs: EtcdFs<S>,
    mount_point: impl AsRef<Path>,
    opts: MountOptions,
) -> std::io::Result<MountHandle>
where
    S: KvStore + 'static,
{
    Session::new(opts)
        .mount_with_unprivileged(fs, mount_point)
        .await
}

/// Mount `fs` by opening /dev/fuse directly. Needs CAP_SYS_ADMIN.
#[cfg(target_os = "linux")]
pub async fn mount<S>(
    fs: EtcdFs<S>,
    mount_point: impl AsRef<Path>,
    opts: MountOptions,
) -> std::io::Result<MountHandle>
where
    S: KvStore + 'static,
{
    Session::new(opts).mount(fs, mount_point).await
}

#[cfg(not(target_os = "linux"))]
pub async fn mount_unprivileged<S>(
    _fs: EtcdFs<S>,
    _mount_point: impl AsRef<Path>,
    _opts: MountOptions,
) -> std::io::Result<MountHandle>
where
    S: KvStore + 'static,
{
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
pub async fn mount<S>(
    _fs: EtcdFs<S>,
    _mount_point: impl AsRef<Path>,
    _opts: MountOptions,
) -> std::io::Result<MountHandle>
where
    S: KvStore + 'static,
{
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
fn unsupported() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    )
}
