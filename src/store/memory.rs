use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;
use tracing::{debug, info};

use super::{collectable, partition_versions, CommitBatch, NodeStore, PruneOutcome};
use crate::error::{IavlError, Result};
use crate::node::{codec, Node};
use crate::types::{NodeKey, Orphan, Version};

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeKey, Vec<u8>>,
    orphans: HashMap<NodeKey, Version>,
    roots: BTreeMap<Version, Option<NodeKey>>,
}

impl Inner {
    fn latest(&self) -> Version {
        self.roots
            .keys()
            .next_back()
            .copied()
            .unwrap_or(Version::ZERO)
    }
}

/// Process-local store. Records are kept encoded so reads go through the
/// same codec as the durable backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of node records held.
    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    /// Number of orphan entries held.
    pub fn orphan_count(&self) -> usize {
        self.inner.read().orphans.len()
    }
}

impl NodeStore for MemoryStore {
    fn read_node(&self, version: Version, key: NodeKey) -> Result<Node> {
        let inner = self.inner.read();
        if !inner.roots.contains_key(&version) {
            return Err(IavlError::NotFound("version"));
        }
        if key.version > version {
            return Err(IavlError::NotFound("node"));
        }
        if matches!(inner.orphans.get(&key), Some(at) if *at <= version) {
            return Err(IavlError::NotFound("node"));
        }
        let bytes = inner.nodes.get(&key).ok_or(IavlError::NotFound("node"))?;
        codec::decode(key, bytes)
    }

    fn commit(&self, batch: CommitBatch) -> Result<()> {
        let mut inner = self.inner.write();
        if batch.version != inner.latest().next() {
            return Err(IavlError::Invalid("commit version must follow the latest"));
        }
        let node_count = batch.nodes.len();
        let orphan_count = batch.orphans.len();
        inner.nodes.extend(batch.nodes);
        inner
            .orphans
            .extend(batch.orphans.into_iter().map(|o| (o.key, o.orphaned_at)));
        inner.roots.insert(batch.version, batch.root);
        debug!(
            version = batch.version.0,
            nodes = node_count,
            orphans = orphan_count,
            "store.memory.commit"
        );
        Ok(())
    }

    fn open_version(&self, version: Version) -> Result<Option<NodeKey>> {
        self.inner
            .read()
            .roots
            .get(&version)
            .copied()
            .ok_or(IavlError::NotFound("version"))
    }

    fn prune(&self, keep: &BTreeSet<Version>) -> Result<PruneOutcome> {
        let mut inner = self.inner.write();
        let existing: BTreeSet<Version> = inner.roots.keys().copied().collect();
        let (removed, retained) = partition_versions(&existing, keep);
        for v in &removed {
            inner.roots.remove(v);
        }
        let orphans: Vec<Orphan> = inner
            .orphans
            .iter()
            .map(|(key, at)| Orphan {
                key: *key,
                orphaned_at: *at,
            })
            .collect();
        let mut dead = collectable(orphans.iter(), &retained);
        dead.sort();
        for key in &dead {
            inner.orphans.remove(key);
            inner.nodes.remove(key);
        }
        info!(
            versions = removed.len(),
            nodes = dead.len(),
            "store.memory.prune"
        );
        Ok(PruneOutcome {
            versions_removed: removed,
            nodes_deleted: dead,
        })
    }

    fn latest_version(&self) -> Result<Option<Version>> {
        Ok(self.inner.read().roots.keys().next_back().copied())
    }

    fn versions(&self) -> Result<Vec<Version>> {
        Ok(self.inner.read().roots.keys().copied().collect())
    }
}
