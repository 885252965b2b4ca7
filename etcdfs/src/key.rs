//! Path to keyspace key normalization.
//!
//! Every path handed in by the protocol engine goes through [`to_key`] before
//! any store call. Keys are absolute, `/`-separated and carry no trailing
//! slash, except the root key `/`.

use std::fmt;

pub const ROOT: &str = "/";

/// An absolute keyspace key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(String);

/// Normalize a filesystem path into a key. Idempotent.
pub fn to_key(path: &str) -> Key {
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    out.push_str(&parts.join("/"));
    Key(out)
}

impl Key {
    pub fn root() -> Self {
        Key(ROOT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    /// Prefix shared by every key nested under this one.
    pub fn dir_prefix(&self) -> String {
        if self.is_root() {
            ROOT.to_string()
        } else {
            format!("{}/", self.0)
        }
    }

    /// Key of the entry `name` inside this directory.
    pub fn child(&self, name: &str) -> Key {
        to_key(&format!("{}/{}", self.0, name))
    }

    pub fn parent(&self) -> Option<Key> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) | None => Some(Key::root()),
            Some(n) => Some(Key(self.0[..n].to_string())),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
