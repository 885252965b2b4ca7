//! Session-independent pieces of the adapter: listing layout, name checks and
//! the errno picked for each kind mismatch.

use std::ffi::OsStr;

use libc::c_int;

use crate::error::{FsError, Result};
use crate::ns::{Attributes, Entry, NodeKind};

/// Reported for listed entries the kernel holds no reference to yet.
pub const UNKNOWN_INO: u64 = 0xffff_ffff;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    Dot,
    DotDot,
    Child(Entry),
}

/// A directory listing as `(offset, slot)` pairs, resumed after `offset`.
///
/// Offsets are 1-based positions in the full listing: `.` is 1, `..` is 2 and
/// children follow in name order, so an offset handed back by the kernel
/// always names the same position of an unchanged directory.
pub fn listing(children: Vec<Entry>, offset: u64) -> Vec<(i64, Slot)> {
    [Slot::Dot, Slot::DotDot]
        .into_iter()
        .chain(children.into_iter().map(Slot::Child))
        .zip(1i64..)
        .filter(|(_, pos)| *pos as u64 > offset)
        .map(|(slot, pos)| (pos, slot))
        .collect()
}

/// Path segment for a name sent by the kernel. Keys are UTF-8, and a lossy
/// conversion could fold two names onto one key.
pub fn entry_name(name: &OsStr) -> std::result::Result<&str, c_int> {
    match name.to_str() {
        Some(s) if !s.is_empty() && !s.contains('/') => Ok(s),
        _ => Err(libc::EINVAL),
    }
}

/// Errno for operating on `actual` where `want` is required.
pub fn expect_kind(actual: NodeKind, want: NodeKind) -> std::result::Result<(), c_int> {
    match (want, actual) {
        (NodeKind::File, NodeKind::Directory) => Err(libc::EISDIR),
        (NodeKind::Directory, NodeKind::File) => Err(libc::ENOTDIR),
        _ => Ok(()),
    }
}

/// Whether a new entry may be made where `existing` was resolved.
pub fn expect_vacant(existing: &Result<Attributes>) -> std::result::Result<(), c_int> {
    match existing {
        Ok(_) => Err(libc::EEXIST),
        Err(FsError::NotFound(_)) => Ok(()),
        Err(e) => Err(e.errno()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::os::unix::ffi::OsStrExt;

    fn entries(names: &[(&str, NodeKind)]) -> Vec<Entry> {
        names
            .iter()
            .map(|(n, k)| Entry {
                name: n.to_string(),
                kind: *k,
            })
            .collect()
    }

    fn offsets(l: &[(i64, Slot)]) -> Vec<i64> {
        l.iter().map(|(o, _)| *o).collect()
    }

    #[test]
    fn full_listing_starts_with_dots() {
        let l = listing(
            entries(&[("a", NodeKind::File), ("b", NodeKind::Directory)]),
            0,
        );
        assert_eq!(offsets(&l), vec![1, 2, 3, 4]);
        assert_eq!(l[0].1, Slot::Dot);
        assert_eq!(l[1].1, Slot::DotDot);
        assert!(matches!(&l[3].1, Slot::Child(e) if e.name == "b" && e.kind == NodeKind::Directory));
    }

    #[test]
    fn resume_skips_what_was_returned() {
        let children = entries(&[("a", NodeKind::File), ("b", NodeKind::File), ("c", NodeKind::File)]);
        assert_eq!(offsets(&listing(children.clone(), 2)), vec![3, 4, 5]);
        let l = listing(children.clone(), 4);
        assert_eq!(offsets(&l), vec![5]);
        assert!(matches!(&l[0].1, Slot::Child(e) if e.name == "c"));
        assert!(listing(children.clone(), 5).is_empty());
        assert!(listing(children, u64::MAX).is_empty());
    }

    #[test]
    fn empty_directory_lists_only_dots() {
        assert_eq!(offsets(&listing(Vec::new(), 0)), vec![1, 2]);
        assert_eq!(offsets(&listing(Vec::new(), 1)), vec![2]);
    }

    #[test]
    fn names_must_be_utf8_segments() {
        assert_eq!(entry_name(OsStr::new("hello.txt")), Ok("hello.txt"));
        assert_eq!(entry_name(OsStr::from_bytes(b"bad\xff")), Err(libc::EINVAL));
        assert_eq!(entry_name(OsStr::new("")), Err(libc::EINVAL));
        assert_eq!(entry_name(OsStr::new("a/b")), Err(libc::EINVAL));
    }

    #[test]
    fn kind_mismatch_errnos() {
        assert_eq!(expect_kind(NodeKind::Directory, NodeKind::File), Err(libc::EISDIR));
        assert_eq!(expect_kind(NodeKind::File, NodeKind::Directory), Err(libc::ENOTDIR));
        assert_eq!(expect_kind(NodeKind::File, NodeKind::File), Ok(()));
        assert_eq!(expect_kind(NodeKind::Directory, NodeKind::Directory), Ok(()));
    }

    #[test]
    fn mkdir_target_must_be_vacant() {
        let existing = Ok(Attributes {
            kind: NodeKind::File,
            size: 0,
            perm: 0o644,
        });
        assert_eq!(expect_vacant(&existing), Err(libc::EEXIST));
        assert_eq!(expect_vacant(&Err(FsError::NotFound("/a".into()))), Ok(()));
        let down = Err(FsError::Io(StoreError::InvalidData("down".into())));
        assert_eq!(expect_vacant(&down), Err(libc::EIO));
    }
}
