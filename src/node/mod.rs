//! Tree nodes, their references, and the deterministic hash encoding.

pub mod codec;

use crate::pool::NodeId;
use crate::primitives::bytes::var;
use crate::types::{Hash, NodeKey, Version, HASH_LEN};

/// Reference from a parent to a child node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeRef {
    /// The child is resident in the node pool.
    Pooled(NodeId),
    /// The child is persisted and must be resolved through the store.
    Stored(NodeKey),
}

/// A leaf holding one key/value pair, or an internal branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    /// Stored key for leaves; smallest key of the right subtree for branches.
    pub key: Vec<u8>,
    /// Present only on leaves.
    pub value: Option<Vec<u8>>,
    /// Left child, absent on leaves.
    pub left: Option<NodeRef>,
    /// Right child, absent on leaves.
    pub right: Option<NodeRef>,
    /// 0 for leaves.
    pub height: u8,
    /// Number of leaves below this node.
    pub size: u64,
    /// Version that created this node instance.
    pub version: Version,
    /// Durable address, assigned when the node is saved.
    pub node_key: Option<NodeKey>,
    hash: Option<Hash>,
}

impl Node {
    /// Builds a leaf for the given version.
    pub fn leaf(key: Vec<u8>, value: Vec<u8>, version: Version) -> Self {
        Self {
            key,
            value: Some(value),
            left: None,
            right: None,
            height: 0,
            size: 1,
            version,
            node_key: None,
            hash: None,
        }
    }

    /// Builds a branch. Height and size must be filled in by the caller.
    pub fn branch(key: Vec<u8>, left: NodeRef, right: NodeRef, version: Version) -> Self {
        Self {
            key,
            value: None,
            left: Some(left),
            right: Some(right),
            height: 1,
            size: 2,
            version,
            node_key: None,
            hash: None,
        }
    }

    /// Returns true for leaves.
    pub fn is_leaf(&self) -> bool {
        self.height == 0
    }

    /// Returns true once the node belongs to a saved version.
    pub fn is_persisted(&self) -> bool {
        self.node_key.is_some()
    }

    /// Cached hash, if computed.
    pub fn hash(&self) -> Option<Hash> {
        self.hash
    }

    pub(crate) fn set_hash(&mut self, hash: Hash) {
        self.hash = Some(hash);
    }

    /// Turns a persisted node into a fresh working copy for `version`.
    ///
    /// The copy has no node key and no cached hash.
    pub fn clone_for(&self, version: Version) -> Self {
        let mut copy = self.clone();
        copy.reset_for(version);
        copy
    }

    /// Clears identity and hash so the node can be re-allocated as a working node.
    pub fn reset_for(&mut self, version: Version) {
        self.version = version;
        self.node_key = None;
        self.hash = None;
    }

    /// Hash of a leaf record.
    pub fn leaf_hash(key: &[u8], value: &[u8]) -> Hash {
        let mut buf = Vec::with_capacity(key.len() + HASH_LEN + 8);
        var::encode_i64(0, &mut buf);
        var::encode_i64(1, &mut buf);
        var::encode_bytes(key, &mut buf);
        var::encode_bytes(Hash::digest(value).as_bytes(), &mut buf);
        Hash::digest(&buf)
    }

    /// Hash of a branch from its shape and its children's hashes.
    pub fn branch_hash(height: u8, size: u64, left: &Hash, right: &Hash) -> Hash {
        let mut buf = Vec::with_capacity(2 * HASH_LEN + 16);
        var::encode_i64(height as i64, &mut buf);
        var::encode_i64(size as i64, &mut buf);
        var::encode_bytes(left.as_bytes(), &mut buf);
        var::encode_bytes(right.as_bytes(), &mut buf);
        Hash::digest(&buf)
    }
}
