//! Durable, version-addressed persistence of tree nodes.
//!
//! A store keeps three things: encoded node records keyed by [`NodeKey`],
//! the root pointer of every retained version, and the orphan list that
//! says when each superseded node stopped being reachable. Commits and
//! prunes are atomic with respect to concurrent readers.

mod memory;
mod sqlite;

use std::collections::BTreeSet;

use crate::error::Result;
use crate::node::Node;
use crate::types::{NodeKey, Orphan, Version};

pub use memory::MemoryStore;
pub use sqlite::{SqliteOptions, SqliteStore, Synchronous};

/// Everything written for one saved version.
#[derive(Clone, Debug, Default)]
pub struct CommitBatch {
    /// Version being committed; must be `latest + 1`.
    pub version: Version,
    /// Root of the version, `None` for an empty tree.
    pub root: Option<NodeKey>,
    /// Encoded records of the nodes created by this version.
    pub nodes: Vec<(NodeKey, Vec<u8>)>,
    /// Persisted nodes replaced while building this version.
    pub orphans: Vec<Orphan>,
}

/// What a prune removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Versions whose root pointers were dropped.
    pub versions_removed: Vec<Version>,
    /// Node records deleted.
    pub nodes_deleted: Vec<NodeKey>,
}

/// Durable node storage.
///
/// Implementations must be safe to read from many threads while a single
/// writer commits or prunes.
pub trait NodeStore: Send + Sync {
    /// Reads a node that is reachable-capable at `version`.
    ///
    /// Fails with `NotFound` if the version is not retained, the key was
    /// created after `version`, the node was orphaned at or before
    /// `version`, or the record is gone.
    fn read_node(&self, version: Version, key: NodeKey) -> Result<Node>;

    /// Atomically persists a version.
    fn commit(&self, batch: CommitBatch) -> Result<()>;

    /// Root pointer of a retained version.
    fn open_version(&self, version: Version) -> Result<Option<NodeKey>>;

    /// Drops every version not in `keep` (the latest always survives) and
    /// deletes the orphans no retained version can reach.
    fn prune(&self, keep: &BTreeSet<Version>) -> Result<PruneOutcome>;

    /// Most recent committed version, if any.
    fn latest_version(&self) -> Result<Option<Version>>;

    /// All retained versions in ascending order.
    fn versions(&self) -> Result<Vec<Version>>;
}

/// Splits `existing` into versions to drop and versions to retain.
pub(crate) fn partition_versions(
    existing: &BTreeSet<Version>,
    keep: &BTreeSet<Version>,
) -> (Vec<Version>, BTreeSet<Version>) {
    let latest = existing.iter().next_back().copied();
    let (retained, removed): (BTreeSet<Version>, BTreeSet<Version>) = existing
        .iter()
        .copied()
        .partition(|v| keep.contains(v) || Some(*v) == latest);
    (removed.into_iter().collect(), retained)
}

/// Orphans that no retained version can reach.
pub(crate) fn collectable<'a>(
    orphans: impl Iterator<Item = &'a Orphan>,
    retained: &BTreeSet<Version>,
) -> Vec<NodeKey> {
    orphans
        .filter(|o| {
            let window = retained
                .range(o.key.version..)
                .take_while(|v| **v < o.orphaned_at);
            !o.is_live_in(window)
        })
        .map(|o| o.key)
        .collect()
}
