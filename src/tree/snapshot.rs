use std::borrow::Cow;
use std::sync::Arc;

use super::read::{self, NodeSource, Range, VerifyReport};
use crate::error::{IavlError, Result};
use crate::node::{codec, Node, NodeRef};
use crate::store::NodeStore;
use crate::types::{Hash, Version};

/// Read-only view of one committed version.
///
/// Snapshots share the store with the tree that produced them and can be
/// moved to other threads. Reads fail with `NotFound` once the version has
/// been pruned.
#[derive(Clone)]
pub struct Snapshot {
    store: Arc<dyn NodeStore>,
    version: Version,
    root: Option<NodeRef>,
    verify_hashes: bool,
}

impl Snapshot {
    pub(crate) fn open(store: Arc<dyn NodeStore>, version: Version, verify_hashes: bool) -> Result<Self> {
        let root = store.open_version(version)?.map(NodeRef::Stored);
        Ok(Self {
            store,
            version,
            root,
            verify_hashes,
        })
    }

    /// Version this snapshot reads.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Root hash of the version.
    pub fn hash(&self) -> Result<Hash> {
        match &self.root {
            None => Ok(Hash::empty()),
            Some(root) => {
                let node = self.view(root)?;
                node.hash()
                    .ok_or_else(|| IavlError::Corruption(format!("root of {} has no hash", self.version)))
            }
        }
    }

    /// Looks up `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        read::get(self, key)
    }

    /// Returns true if `key` is present.
    pub fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Number of keys smaller than `key`, and the value under `key`.
    pub fn get_with_index(&self, key: &[u8]) -> Result<(u64, Option<Vec<u8>>)> {
        read::get_with_index(self, key)
    }

    /// The `index`-th pair in key order.
    pub fn get_by_index(&self, index: u64) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        read::get_by_index(self, index)
    }

    /// Number of keys.
    pub fn size(&self) -> Result<u64> {
        read::size(self)
    }

    /// Iterates from `start` (inclusive) to `end` (exclusive).
    pub fn iter_range(&self, start: Option<&[u8]>, end: Option<&[u8]>, ascending: bool) -> Range<'_> {
        Range::new(self, start, end, ascending)
    }

    /// Iterates every pair in ascending key order.
    pub fn iter(&self) -> Range<'_> {
        self.iter_range(None, None, true)
    }

    /// Walks the whole version and checks its invariants and hashes.
    pub fn verify(&self) -> Result<VerifyReport> {
        read::verify(self)
    }
}

impl NodeSource for Snapshot {
    fn root(&self) -> Option<NodeRef> {
        self.root
    }

    fn view(&self, r: &NodeRef) -> Result<Cow<'_, Node>> {
        let NodeRef::Stored(key) = r else {
            return Err(IavlError::consistency("snapshot reached a pooled node"));
        };
        let node = self.store.read_node(self.version, *key)?;
        if self.verify_hashes {
            codec::check_leaf_hash(&node)?;
        }
        Ok(Cow::Owned(node))
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}
