#![forbid(unsafe_code)]
//! Identifiers and digests shared by the pool, the tree, and the stores.

use std::fmt;

use sha2::{Digest, Sha256};

/// Length in bytes of every node hash.
pub const HASH_LEN: usize = 32;

/// A committed tree version. Version numbers start at 1.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Version(pub u64);

impl Version {
    /// The version before anything was saved.
    pub const ZERO: Version = Version(0);

    /// Returns the version that follows this one.
    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Version(value)
    }
}

impl From<Version> for u64 {
    fn from(value: Version) -> Self {
        value.0
    }
}

/// Durable address of a persisted node: the version that created it plus a
/// sequence number unique within that version.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeKey {
    /// Version in which the node was saved.
    pub version: Version,
    /// Post-order sequence within the save, starting at 1.
    pub sequence: u32,
}

impl NodeKey {
    /// Builds a node key.
    pub fn new(version: Version, sequence: u32) -> Self {
        Self { version, sequence }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.version.0, self.sequence)
    }
}

/// A node superseded by a copy-on-write replacement.
///
/// The node is live for versions `key.version` up to but excluding
/// `orphaned_at`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Orphan {
    /// The replaced node.
    pub key: NodeKey,
    /// First version in which the node is no longer reachable.
    pub orphaned_at: Version,
}

impl Orphan {
    /// Returns true if some version in `versions` can still reach the node.
    pub fn is_live_in<'a>(&self, mut versions: impl Iterator<Item = &'a Version>) -> bool {
        versions.any(|v| *v >= self.key.version && *v < self.orphaned_at)
    }
}

/// SHA-256 digest of a node.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// Hashes arbitrary bytes.
    pub fn digest(data: &[u8]) -> Self {
        Hash(Sha256::digest(data).into())
    }

    /// Root hash of a tree with no keys.
    pub fn empty() -> Self {
        Hash::digest(&[])
    }

    /// Builds a hash from a slice that must be exactly [`HASH_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().ok()?;
        Some(Hash(arr))
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}
