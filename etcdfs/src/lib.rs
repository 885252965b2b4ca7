//! etcdfs: an etcd keyspace exposed as a file tree over FUSE.
//!
//! Keys are paths; a key with other keys under `key/` is a directory,
//! anything else is a file whose content is the key's value.

pub mod cli;
pub mod config;
pub mod error;
pub mod fuse;
pub mod key;
pub mod ns;
pub mod store;
