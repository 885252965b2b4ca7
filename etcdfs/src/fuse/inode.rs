//! Kernel inode numbers for keys.
//!
//! The keyspace has no inodes, so numbers are handed out the first time the
//! kernel is given an entry for a key. Each number carries the kernel's lookup
//! count and is dropped once the kernel forgets it, so keys removed by other
//! clients do not pile up here.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::key::Key;

pub const ROOT_INO: u64 = 1;

struct Node {
    key: Key,
    lookups: u64,
}

struct Inner {
    next: u64,
    by_ino: HashMap<u64, Node>,
    by_key: HashMap<Key, u64>,
}

impl Inner {
    fn drop_ino(&mut self, ino: u64) {
        if let Some(node) = self.by_ino.remove(&ino) {
            self.by_key.remove(&node.key);
        }
    }
}

pub struct InodeTable {
    inner: Mutex<Inner>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let root = Key::root();
        let mut by_ino = HashMap::new();
        let mut by_key = HashMap::new();
        by_key.insert(root.clone(), ROOT_INO);
        by_ino.insert(
            ROOT_INO,
            Node {
                key: root,
                lookups: 1,
            },
        );
        Self {
            inner: Mutex::new(Inner {
                next: ROOT_INO + 1,
                by_ino,
                by_key,
            }),
        }
    }

    pub fn key_of(&self, ino: u64) -> Option<Key> {
        self.inner
            .lock()
            .unwrap()
            .by_ino
            .get(&ino)
            .map(|n| n.key.clone())
    }

    /// Inode number already assigned to `key`, without taking a reference.
    pub fn peek(&self, key: &Key) -> Option<u64> {
        self.inner.lock().unwrap().by_key.get(key).copied()
    }

    /// Inode number of `key` for an entry handed to the kernel, allocating on
    /// first sight. Every call must be matched by a kernel forget.
    pub fn lookup(&self, key: &Key) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&ino) = inner.by_key.get(key) {
            if let Some(node) = inner.by_ino.get_mut(&ino) {
                node.lookups += 1;
            }
            return ino;
        }
        let ino = inner.next;
        inner.next += 1;
        inner.by_ino.insert(
            ino,
            Node {
                key: key.clone(),
                lookups: 1,
            },
        );
        inner.by_key.insert(key.clone(), ino);
        ino
    }

    /// Release `nlookup` kernel references; the number is retired at zero.
    pub fn forget(&self, ino: u64, nlookup: u64) {
        if ino == ROOT_INO {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        let Some(node) = inner.by_ino.get_mut(&ino) else {
            return;
        };
        node.lookups = node.lookups.saturating_sub(nlookup);
        if node.lookups == 0 {
            inner.drop_ino(ino);
        }
    }

    /// Drop `key` and, when `recursive`, everything mapped under it, whatever
    /// the kernel still holds. Later forgets for those numbers are ignored.
    pub fn remove(&self, key: &Key, recursive: bool) {
        let mut inner = self.inner.lock().unwrap();
        let prefix = key.dir_prefix();
        let doomed: Vec<u64> = inner
            .by_key
            .iter()
            .filter(|(k, _)| *k == key || (recursive && k.as_str().starts_with(&prefix)))
            .filter(|(k, _)| !k.is_root())
            .map(|(_, &ino)| ino)
            .collect();
        for ino in doomed {
            inner.drop_ino(ino);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
