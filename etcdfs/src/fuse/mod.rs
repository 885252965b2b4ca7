//! FUSE adapter.
//!
//! Implements `rfuse3::raw::Filesystem` for [`EtcdFs`], translating inode-based
//! kernel requests into path-based [`NamespaceService`] calls.
//!
//! - `inode`: inode number <-> key table
//! - `dirent`: listing layout and errno choices
//! - `mount`: mount helpers
//!
//! The adapter owns the only in-process state: the inode table and the table
//! of open file handles. Attribute TTLs are short because any other client of
//! the keyspace can change the tree under us.
pub mod dirent;
pub mod inode;
pub mod mount;

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use log::{debug, error};
use rfuse3::raw::Filesystem;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyCreated, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyLock, ReplyOpen,
    ReplyStatFs, ReplyWrite,
};
use rfuse3::{Errno, FileType, Result as FuseResult, SetAttr, Timestamp};

use crate::error::FsError;
use crate::key::Key;
use crate::ns::{Attributes, Capability, FileHandle, NamespaceService, NodeKind};
use crate::store::KvStore;
use dirent::{Slot, UNKNOWN_INO, entry_name, expect_kind, expect_vacant, listing};
use inode::{InodeTable, ROOT_INO};

const MAX_WRITE: NonZeroU32 = NonZeroU32::new(1024 * 1024).unwrap();

pub struct EtcdFs<S> {
    ns: NamespaceService<S>,
    inodes: InodeTable,
    handles: Mutex<HashMap<u64, Arc<FileHandle<S>>>>,
    next_fh: AtomicU64,
    ttl: Duration,
}

impl<S: KvStore + 'static> EtcdFs<S> {
    pub fn new(ns: NamespaceService<S>, ttl: Duration) -> Self {
        Self {
            ns,
            inodes: InodeTable::new(),
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
            ttl,
        }
    }

    fn key_of(&self, ino: u64) -> FuseResult<Key> {
        self.inodes.key_of(ino).ok_or_else(|| libc::ENOENT.into())
    }

    fn child_key(&self, parent: u64, name: &OsStr) -> FuseResult<Key> {
        let name = entry_name(name).map_err(Errno::from)?;
        Ok(self.key_of(parent)?.child(name))
    }

    fn register(&self, handle: FileHandle<S>) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().unwrap().insert(fh, Arc::new(handle));
        fh
    }

    fn open_handle(&self, fh: u64) -> Option<Arc<FileHandle<S>>> {
        self.handles.lock().unwrap().get(&fh).cloned()
    }

    /// The open handle `fh`, or a transient one on `ino` when the kernel
    /// sends a request without a handle of ours.
    async fn handle(&self, ino: u64, fh: u64) -> FuseResult<Arc<FileHandle<S>>> {
        if let Some(h) = self.open_handle(fh) {
            return Ok(h);
        }
        let key = self.key_of(ino)?;
        let h = self.ns.open(key.as_str()).await.map_err(to_errno)?;
        Ok(Arc::new(h))
    }

    /// Attributes for an entry handed to the kernel; takes a lookup reference.
    fn attr_of(&self, key: &Key, attrs: &Attributes, req: &Request) -> FileAttr {
        to_fuse_attr(self.inodes.lookup(key), attrs, req)
    }

    /// Inode number for a listed entry without taking a reference.
    fn listed_ino(&self, key: &Key) -> u64 {
        self.inodes.peek(key).unwrap_or(UNKNOWN_INO)
    }

    async fn entry_for(&self, key: &Key, req: &Request) -> FuseResult<ReplyEntry> {
        let attrs = self.ns.get_attr(key.as_str()).await.map_err(to_errno)?;
        Ok(ReplyEntry {
            ttl: self.ttl,
            attr: self.attr_of(key, &attrs, req),
            generation: 0,
        })
    }
}

fn to_errno(e: FsError) -> Errno {
    match &e {
        FsError::NotFound(_) => debug!("{e}"),
        _ => error!("{e}"),
    }
    e.errno().into()
}

fn to_fuse_kind(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::File => FileType::RegularFile,
    }
}

fn to_fuse_attr(ino: u64, attrs: &Attributes, req: &Request) -> FileAttr {
    // The keyspace keeps no timestamps.
    let now = Timestamp::from(SystemTime::now());
    FileAttr {
        ino,
        size: attrs.size,
        blocks: attrs.size.div_ceil(512),
        atime: now,
        mtime: now,
        ctime: now,
        #[cfg(target_os = "macos")]
        crtime: now,
        kind: to_fuse_kind(attrs.kind),
        perm: attrs.perm,
        nlink: 1,
        uid: req.uid,
        gid: req.gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: 4096,
    }
}

impl<S: KvStore + 'static> Filesystem for EtcdFs<S> {
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        Ok(ReplyInit {
            max_write: MAX_WRITE,
        })
    }

    async fn destroy(&self, _req: Request) {}

    async fn lookup(&self, req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let key = self.child_key(parent, name)?;
        debug!("lookup {key}");
        self.entry_for(&key, &req).await
    }

    async fn forget(&self, _req: Request, inode: u64, nlookup: u64) {
        self.inodes.forget(inode, nlookup);
    }

    async fn batch_forget(&self, _req: Request, inodes: &[(u64, u64)]) {
        for &(inode, nlookup) in inodes {
            self.inodes.forget(inode, nlookup);
        }
        debug!("batch forget {}: {} inodes left", inodes.len(), self.inodes.len());
    }

    async fn getattr(
        &self,
        req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let key = self.key_of(ino)?;
        let attrs = self.ns.get_attr(key.as_str()).await.map_err(to_errno)?;
        Ok(ReplyAttr {
            ttl: self.ttl,
            attr: to_fuse_attr(ino, &attrs, &req),
        })
    }

    async fn setattr(
        &self,
        req: Request,
        ino: u64,
        fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let key = self.key_of(ino)?;
        if set_attr.mode.is_some() {
            Capability::Chmod.check().map_err(to_errno)?;
        }
        if set_attr.uid.is_some() || set_attr.gid.is_some() {
            Capability::Chown.check().map_err(to_errno)?;
        }
        if set_attr.atime.is_some() || set_attr.mtime.is_some() {
            match fh.and_then(|fh| self.open_handle(fh)) {
                Some(h) => h.set_times(),
                None => Capability::SetTimes.check(),
            }
            .map_err(to_errno)?;
        }
        if let Some(size) = set_attr.size {
            match fh.and_then(|fh| self.open_handle(fh)) {
                Some(h) => h.truncate(size),
                None => Capability::Truncate.check(),
            }
            .map_err(to_errno)?;
        }
        let attrs = self.ns.get_attr(key.as_str()).await.map_err(to_errno)?;
        Ok(ReplyAttr {
            ttl: self.ttl,
            attr: to_fuse_attr(ino, &attrs, &req),
        })
    }

    async fn open(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let key = self.key_of(ino)?;
        let handle = self.ns.open(key.as_str()).await.map_err(to_errno)?;
        expect_kind(handle.kind(), NodeKind::File)?;
        let fh = self.register(handle);
        debug!("open {key}: fh={fh}");
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let key = self.key_of(ino)?;
        let attrs = self.ns.get_attr(key.as_str()).await.map_err(to_errno)?;
        expect_kind(attrs.kind, NodeKind::Directory)?;
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        ino: u64,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let data = self
            .handle(ino, fh)
            .await?
            .read(offset, size as usize)
            .await
            .map_err(to_errno)?;
        Ok(ReplyData {
            data: Bytes::from(data),
        })
    }

    async fn write(
        &self,
        _req: Request,
        ino: u64,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let written = self
            .handle(ino, fh)
            .await?
            .write(offset, data)
            .await
            .map_err(to_errno)?;
        Ok(ReplyWrite {
            written: written as u32,
        })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let key = self.key_of(ino)?;
        let children = self.ns.open_dir(key.as_str()).await.map_err(to_errno)?;

        let parent_ino = key.parent().map_or(ROOT_INO, |p| self.listed_ino(&p));
        let rest: Vec<_> = listing(children, offset.max(0) as u64)
            .into_iter()
            .map(|(offset, slot)| {
                let (inode, kind, name) = match slot {
                    Slot::Dot => (ino, FileType::Directory, OsString::from(".")),
                    Slot::DotDot => (parent_ino, FileType::Directory, OsString::from("..")),
                    Slot::Child(e) => (
                        self.listed_ino(&key.child(&e.name)),
                        to_fuse_kind(e.kind),
                        OsString::from(e.name),
                    ),
                };
                Ok(DirectoryEntry {
                    inode,
                    kind,
                    name,
                    offset,
                })
            })
            .collect();
        let entries: Self::DirEntryStream<'a> = Box::pin(stream::iter(rest));
        Ok(ReplyDirectory { entries })
    }

    async fn readdirplus<'a>(
        &'a self,
        req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let key = self.key_of(ino)?;
        let children = self.ns.open_dir(key.as_str()).await.map_err(to_errno)?;
        let dir_attrs = self.ns.get_attr(key.as_str()).await.map_err(to_errno)?;

        let parent = key.parent().unwrap_or_else(Key::root);
        let parent_attrs = self.ns.get_attr(parent.as_str()).await.unwrap_or(dir_attrs);

        // `.` and `..` carry no lookup reference; each child does.
        let mut rest = Vec::new();
        for (offset, slot) in listing(children, offset) {
            let (inode, name, attr) = match slot {
                Slot::Dot => (ino, OsString::from("."), to_fuse_attr(ino, &dir_attrs, &req)),
                Slot::DotDot => {
                    let p = self.listed_ino(&parent);
                    (p, OsString::from(".."), to_fuse_attr(p, &parent_attrs, &req))
                }
                Slot::Child(e) => {
                    let child = key.child(&e.name);
                    // Deleted since the listing scan: leave it out.
                    let Ok(attrs) = self.ns.get_attr(child.as_str()).await else {
                        continue;
                    };
                    let attr = self.attr_of(&child, &attrs, &req);
                    (attr.ino, OsString::from(e.name), attr)
                }
            };
            rest.push(Ok(DirectoryEntryPlus {
                inode,
                generation: 0,
                kind: attr.kind,
                name,
                offset,
                attr,
                entry_ttl: self.ttl,
                attr_ttl: self.ttl,
            }));
        }
        let entries: Self::DirEntryPlusStream<'a> = Box::pin(stream::iter(rest));
        Ok(ReplyDirectoryPlus { entries })
    }

    async fn statfs(&self, _req: Request, _ino: u64) -> FuseResult<ReplyStatFs> {
        // No capacity figures are available from the keyspace.
        Ok(ReplyStatFs {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            ffree: u64::MAX,
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
        })
    }

    async fn mkdir(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
    ) -> FuseResult<ReplyEntry> {
        let key = self.child_key(parent, name)?;
        expect_vacant(&self.ns.get_attr(key.as_str()).await)?;
        self.ns.mkdir(key.as_str()).await.map_err(to_errno)?;
        // Report what was asked for; the key reads back as an empty file until
        // it gains a child.
        let attrs = Attributes {
            kind: NodeKind::Directory,
            size: 0,
            perm: self.ns.permissions().dir,
        };
        Ok(ReplyEntry {
            ttl: self.ttl,
            attr: self.attr_of(&key, &attrs, &req),
            generation: 0,
        })
    }

    async fn create(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let key = self.child_key(parent, name)?;
        let handle = self.ns.create(key.as_str()).await.map_err(to_errno)?;
        let attrs = handle.getattr().await.map_err(to_errno)?;
        let attr = self.attr_of(&key, &attrs, &req);
        let fh = self.register(handle);
        debug!("create {key}: fh={fh}");
        Ok(ReplyCreated {
            ttl: self.ttl,
            attr,
            generation: 0,
            fh,
            flags: 0,
        })
    }

    async fn unlink(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let key = self.child_key(parent, name)?;
        let attrs = self.ns.get_attr(key.as_str()).await.map_err(to_errno)?;
        expect_kind(attrs.kind, NodeKind::File)?;
        self.ns.unlink(key.as_str()).await.map_err(to_errno)?;
        self.inodes.remove(&key, false);
        Ok(())
    }

    async fn rmdir(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let key = self.child_key(parent, name)?;
        self.ns.rmdir(key.as_str()).await.map_err(to_errno)?;
        self.inodes.remove(&key, true);
        Ok(())
    }

    async fn release(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        let handle = self.handles.lock().unwrap().remove(&fh);
        match handle.map(Arc::try_unwrap) {
            Some(Ok(h)) => h.release().map_err(to_errno),
            _ => Capability::Release.check().map_err(to_errno),
        }
    }

    async fn flush(&self, _req: Request, _inode: u64, fh: u64, _lock_owner: u64) -> FuseResult<()> {
        match self.open_handle(fh) {
            Some(h) => h.flush(),
            None => Capability::Flush.check(),
        }
        .map_err(to_errno)
    }

    async fn fsync(&self, _req: Request, _inode: u64, fh: u64, _datasync: bool) -> FuseResult<()> {
        match self.open_handle(fh) {
            Some(h) => h.fsync(),
            None => Capability::Fsync.check(),
        }
        .map_err(to_errno)
    }

    async fn releasedir(&self, _req: Request, _inode: u64, _fh: u64, _flags: u32) -> FuseResult<()> {
        Ok(())
    }

    async fn fsyncdir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _datasync: bool,
    ) -> FuseResult<()> {
        Capability::Fsync.check().map_err(to_errno)
    }

    async fn fallocate(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        offset: u64,
        length: u64,
        _mode: u32,
    ) -> FuseResult<()> {
        match self.open_handle(fh) {
            Some(h) => h.allocate(offset, length),
            None => Capability::Allocate.check(),
        }
        .map_err(to_errno)
    }

    async fn getlk(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        _lock_owner: u64,
        start: u64,
        end: u64,
        _type: u32,
        _pid: u32,
    ) -> FuseResult<ReplyLock> {
        match self.open_handle(fh) {
            Some(h) => h.get_lock(),
            None => Capability::GetLock.check(),
        }
        .map_err(to_errno)?;
        // Nothing is ever locked.
        Ok(ReplyLock {
            start,
            end,
            r#type: libc::F_UNLCK as u32,
            pid: 0,
        })
    }

    async fn setlk(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        _lock_owner: u64,
        _start: u64,
        _end: u64,
        _type: u32,
        _pid: u32,
        _block: bool,
    ) -> FuseResult<()> {
        match self.open_handle(fh) {
            Some(h) => h.set_lock(),
            None => Capability::SetLock.check(),
        }
        .map_err(to_errno)
    }

    async fn interrupt(&self, _req: Request, _unique: u64) -> FuseResult<()> {
        Ok(())
    }
}
