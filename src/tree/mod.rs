//! The versioned AVL tree.
//!
//! Mutations replace every node on the root-to-leaf path with a fresh pool
//! allocation and rebalance on the way back up. Replaced nodes that were
//! already saved become orphans; replaced nodes that were never saved are
//! retired from the pool straight away. `save_version` hashes and encodes
//! the working set and hands it to the store as one batch.

mod balance;
mod read;
mod snapshot;


use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{IavlError, Result};
use crate::node::{codec, Node, NodeRef};
use crate::options::TreeOptions;
use crate::pool::{NodeId, NodePool};
use crate::store::{CommitBatch, NodeStore, PruneOutcome};
use crate::types::{Hash, NodeKey, Orphan, Version};

pub use read::{Range, VerifyReport};
pub use snapshot::Snapshot;

use read::NodeSource;

/// A mutable, versioned, authenticated key-value tree.
///
/// Only one mutation chain may run at a time (`&mut self`). Committed
/// versions can be read concurrently through [`Snapshot`]s.
pub struct Tree {
    store: Arc<dyn NodeStore>,
    pool: NodePool,
    options: TreeOptions,
    root: Option<NodeRef>,
    /// Last saved version, `Version::ZERO` before the first save.
    version: Version,
    saved_root: Option<NodeKey>,
    saved_hash: Hash,
    /// Persisted nodes resident in the pool.
    resident: HashMap<NodeKey, NodeId>,
    /// Saved nodes replaced since the last save.
    orphans: Vec<Orphan>,
}

struct Removal {
    node: Option<NodeRef>,
    new_key: Option<Vec<u8>>,
    value: Vec<u8>,
}

impl Tree {
    /// Builds a tree over `store`, resuming from its latest version.
    pub fn new(store: Arc<dyn NodeStore>, pool: NodePool, options: TreeOptions) -> Result<Self> {
        let mut tree = Self {
            store,
            pool,
            options,
            root: None,
            version: Version::ZERO,
            saved_root: None,
            saved_hash: Hash::empty(),
            resident: HashMap::new(),
            orphans: Vec::new(),
        };
        if let Some(latest) = tree.store.latest_version()? {
            let root = tree.store.open_version(latest)?;
            tree.version = latest;
            tree.saved_root = root;
            tree.root = root.map(NodeRef::Stored);
            if let Some(root) = tree.root {
                let id = tree.fetch(root)?;
                tree.saved_hash = tree.hash_of(id)?;
            }
            info!(
                version = latest.0,
                hash = %tree.saved_hash,
                "tree.open"
            );
        }
        Ok(tree)
    }

    /// Builds a tree with a pool sized from `options.pool`.
    pub fn open(store: Arc<dyn NodeStore>, options: TreeOptions) -> Result<Self> {
        let pool = NodePool::new(options.pool.clone());
        Self::new(store, pool, options)
    }

    /// Last saved version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Version the working set will be saved as.
    pub fn working_version(&self) -> Version {
        self.version.next()
    }

    /// Root hash of the last saved version.
    pub fn hash(&self) -> Hash {
        self.saved_hash
    }

    /// The store backing this tree.
    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// The node pool.
    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    /// Returns true if the working set differs from the last saved version.
    pub fn has_changes(&self) -> Result<bool> {
        if !self.orphans.is_empty() {
            return Ok(true);
        }
        match self.root {
            Some(NodeRef::Pooled(id)) => Ok(!self.pool.resolve(id)?.is_persisted()),
            Some(NodeRef::Stored(_)) => Ok(false),
            None => Ok(self.saved_root.is_some()),
        }
    }

    /// Looks up `key` in the working tree.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        read::get(self, key)
    }

    /// Returns true if `key` is present in the working tree.
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

    /// Number of keys in the working tree.
    pub fn size(&self) -> Result<u64> {
        read::size(self)
    }

    /// Height of the working tree's root, 0 when empty or a single leaf.
    pub fn height(&self) -> Result<u8> {
        read::height(self)
    }

    /// Returns true if the working tree holds no keys.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Iterates the working tree in key order from `start` (inclusive) to
    /// `end` (exclusive).
    pub fn iter_range(&self, start: Option<&[u8]>, end: Option<&[u8]>, ascending: bool) -> Range<'_> {
        Range::new(self, start, end, ascending)
    }

    /// Iterates every pair of the working tree in ascending key order.
    pub fn iter(&self) -> Range<'_> {
        self.iter_range(None, None, true)
    }

    /// Checks ordering, balance, size, and hash integrity of the working tree.
    pub fn verify(&self) -> Result<VerifyReport> {
        read::verify(self)
    }

    /// Stores `value` under `key`. Returns true if the key already existed.
    ///
    /// A storage error part way through leaves the working set unspecified;
    /// call [`Tree::rollback`] before continuing.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        let updated = match self.root {
            None => {
                let leaf = Node::leaf(key.to_vec(), value.to_vec(), self.working_version());
                self.root = Some(self.alloc(leaf));
                false
            }
            Some(root) => {
                let (root, updated) = self.set_rec(root, key, value)?;
                self.root = Some(root);
                updated
            }
        };
        self.options.metrics.set(updated);
        Ok(updated)
    }

    fn set_rec(&mut self, r: NodeRef, key: &[u8], value: &[u8]) -> Result<(NodeRef, bool)> {
        let w = self.working_version();
        let id = self.fetch(r)?;
        let (is_leaf, ordering, node_key) = {
            let node = self.pool.resolve(id)?;
            (node.is_leaf(), key.cmp(node.key.as_slice()), node.key.clone())
        };
        if is_leaf {
            use std::cmp::Ordering::*;
            let existing = NodeRef::Pooled(id);
            return match ordering {
                Less => {
                    let leaf = self.alloc(Node::leaf(key.to_vec(), value.to_vec(), w));
                    Ok((self.alloc(Node::branch(node_key, leaf, existing, w)), false))
                }
                Greater => {
                    let leaf = self.alloc(Node::leaf(key.to_vec(), value.to_vec(), w));
                    Ok((self.alloc(Node::branch(key.to_vec(), existing, leaf, w)), false))
                }
                Equal => {
                    let mut node = self.take_for_write(existing)?;
                    node.value = Some(value.to_vec());
                    Ok((self.alloc(node), true))
                }
            };
        }

        let mut node = self.take_for_write(NodeRef::Pooled(id))?;
        let updated = if ordering == std::cmp::Ordering::Less {
            let left = self.child(&node, true)?;
            let (left, updated) = self.set_rec(left, key, value)?;
            node.left = Some(left);
            updated
        } else {
            let right = self.child(&node, false)?;
            let (right, updated) = self.set_rec(right, key, value)?;
            node.right = Some(right);
            updated
        };
        if updated {
            // Shape is unchanged on overwrite.
            return Ok((self.alloc(node), true));
        }
        self.update_shape(&mut node)?;
        let node = self.balance(node)?;
        Ok((self.alloc(node), false))
    }

    /// Removes `key`, returning the stored value and whether it was present.
    ///
    /// Removing an absent key changes nothing and returns `(None, false)`.
    pub fn remove(&mut self, key: &[u8]) -> Result<(Option<Vec<u8>>, bool)> {
        let Some(root) = self.root else {
            return Ok((None, false));
        };
        match self.remove_rec(root, key)? {
            None => Ok((None, false)),
            Some(removal) => {
                self.root = removal.node;
                self.options.metrics.removed();
                Ok((Some(removal.value), true))
            }
        }
    }

    fn remove_rec(&mut self, r: NodeRef, key: &[u8]) -> Result<Option<Removal>> {
        let id = self.fetch(r)?;
        let (is_leaf, go_left, left, right) = {
            let node = self.pool.resolve(id)?;
            (
                node.is_leaf(),
                key < node.key.as_slice(),
                node.left,
                node.right,
            )
        };
        let this = NodeRef::Pooled(id);
        if is_leaf {
            if self.pool.resolve(id)?.key != key {
                return Ok(None);
            }
            let leaf = self.take_for_write(this)?;
            return Ok(Some(Removal {
                node: None,
                new_key: None,
                value: leaf.value.unwrap_or_default(),
            }));
        }

        let missing = || IavlError::consistency("branch without children");
        if go_left {
            let Some(removal) = self.remove_rec(left.ok_or_else(missing)?, key)? else {
                return Ok(None);
            };
            let mut node = self.take_for_write(this)?;
            match removal.node {
                // The left leaf went away; this branch collapses into its
                // right subtree, whose smallest key is our split key.
                None => Ok(Some(Removal {
                    node: node.right,
                    new_key: Some(node.key),
                    value: removal.value,
                })),
                Some(new_left) => {
                    node.left = Some(new_left);
                    self.update_shape(&mut node)?;
                    let node = self.balance(node)?;
                    Ok(Some(Removal {
                        node: Some(self.alloc(node)),
                        new_key: removal.new_key,
                        value: removal.value,
                    }))
                }
            }
        } else {
            let Some(removal) = self.remove_rec(right.ok_or_else(missing)?, key)? else {
                return Ok(None);
            };
            let mut node = self.take_for_write(this)?;
            match removal.node {
                None => Ok(Some(Removal {
                    node: node.left,
                    new_key: None,
                    value: removal.value,
                })),
                Some(new_right) => {
                    node.right = Some(new_right);
                    if let Some(new_key) = removal.new_key {
                        node.key = new_key;
                    }
                    self.update_shape(&mut node)?;
                    let node = self.balance(node)?;
                    Ok(Some(Removal {
                        node: Some(self.alloc(node)),
                        new_key: None,
                        value: removal.value,
                    }))
                }
            }
        }
    }

    /// Root hash of the working tree, hashing any unsaved nodes.
    pub fn working_hash(&mut self) -> Result<Hash> {
        match self.root {
            None => Ok(Hash::empty()),
            Some(root) => {
                let id = self.fetch(root)?;
                self.hash_of(id)
            }
        }
    }

    /// Persists the working set as the next version.
    ///
    /// On failure nothing is visible in the store and the tree keeps its
    /// working set, so the save can be retried.
    pub fn save_version(&mut self) -> Result<(Version, Hash)> {
        let version = self.working_version();
        let root_hash = self.working_hash()?;

        let mut assigned = HashMap::new();
        let mut nodes = Vec::new();
        let mut sequence = 0u32;
        let root_key = match self.root {
            Some(root) => Some(self.collect_unsaved(
                root,
                version,
                &mut sequence,
                &mut assigned,
                &mut nodes,
            )?),
            None => None,
        };
        let node_count = nodes.len();
        let orphan_count = self.orphans.len();
        self.store.commit(CommitBatch {
            version,
            root: root_key,
            nodes,
            orphans: self.orphans.clone(),
        })?;

        for (id, key) in assigned {
            self.pool.resolve_mut(id)?.node_key = Some(key);
            self.resident.insert(key, id);
        }
        self.orphans.clear();
        self.version = version;
        self.saved_root = root_key;
        self.saved_hash = root_hash;
        self.options.metrics.version_saved(node_count, orphan_count);
        info!(
            version = version.0,
            hash = %root_hash,
            nodes = node_count,
            orphans = orphan_count,
            "tree.save_version"
        );
        Ok((version, root_hash))
    }

    fn collect_unsaved(
        &self,
        r: NodeRef,
        version: Version,
        sequence: &mut u32,
        assigned: &mut HashMap<NodeId, NodeKey>,
        out: &mut Vec<(NodeKey, Vec<u8>)>,
    ) -> Result<NodeKey> {
        let id = match r {
            NodeRef::Stored(key) => return Ok(key),
            NodeRef::Pooled(id) => id,
        };
        let node = self.pool.resolve(id)?;
        if let Some(key) = node.node_key {
            return Ok(key);
        }
        let (left, right) = if node.is_leaf() {
            (None, None)
        } else {
            let l = self.collect_unsaved(self.child(node, true)?, version, sequence, assigned, out)?;
            let r = self.collect_unsaved(self.child(node, false)?, version, sequence, assigned, out)?;
            (Some(l), Some(r))
        };
        *sequence = sequence
            .checked_add(1)
            .ok_or(IavlError::Invalid("too many nodes in one version"))?;
        let key = NodeKey::new(version, *sequence);
        out.push((key, codec::encode(node, left, right)?));
        assigned.insert(id, key);
        Ok(key)
    }

    /// Discards the working set and returns to the last saved version.
    pub fn rollback(&mut self) -> Result<()> {
        let mut stack: Vec<NodeRef> = self.root.take().into_iter().collect();
        let mut retired = 0usize;
        while let Some(r) = stack.pop() {
            let NodeRef::Pooled(id) = r else { continue };
            if self.pool.resolve(id)?.is_persisted() {
                continue;
            }
            let node = self.pool.retire(id)?;
            retired += 1;
            stack.extend(node.left);
            stack.extend(node.right);
        }
        self.orphans.clear();
        self.root = self.saved_root.map(NodeRef::Stored);
        debug!(version = self.version.0, retired, "tree.rollback");
        Ok(())
    }

    /// Reads `key` as of a committed `version`.
    pub fn get_at_version(&self, version: Version, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.snapshot(version)?.get(key)
    }

    /// Read-only view of a committed version.
    pub fn snapshot(&self, version: Version) -> Result<Snapshot> {
        Snapshot::open(self.store.clone(), version, self.options.verify_hashes)
    }

    /// Versions still held by the store.
    pub fn available_versions(&self) -> Result<Vec<Version>> {
        self.store.versions()
    }

    /// Returns true if `version` is still held by the store.
    pub fn version_exists(&self, version: Version) -> Result<bool> {
        Ok(self.store.versions()?.binary_search(&version).is_ok())
    }

    /// Deletes every saved version not in `keep`. The latest saved version
    /// is always retained.
    pub fn prune(&mut self, keep: &BTreeSet<Version>) -> Result<PruneOutcome> {
        let outcome = self.store.prune(keep)?;
        let mut retired = 0usize;
        for key in &outcome.nodes_deleted {
            if let Some(id) = self.resident.remove(key) {
                self.pool.retire(id)?;
                retired += 1;
            }
        }
        self.options.metrics.pruned(outcome.nodes_deleted.len());
        info!(
            versions = outcome.versions_removed.len(),
            nodes = outcome.nodes_deleted.len(),
            retired,
            "tree.prune"
        );
        Ok(outcome)
    }

    fn alloc(&mut self, node: Node) -> NodeRef {
        NodeRef::Pooled(self.pool.allocate(node))
    }

    fn child(&self, node: &Node, left: bool) -> Result<NodeRef> {
        let r = if left { node.left } else { node.right };
        r.ok_or_else(|| {
            IavlError::consistency(format!(
                "branch {} has no {} child",
                read::location(node),
                if left { "left" } else { "right" }
            ))
        })
    }

    /// Resolves `r` to a pool id, loading persisted nodes on demand.
    fn fetch(&mut self, r: NodeRef) -> Result<NodeId> {
        match r {
            NodeRef::Pooled(id) => Ok(id),
            NodeRef::Stored(key) => {
                if let Some(id) = self.resident.get(&key) {
                    return Ok(*id);
                }
                let node = self.load(key)?;
                let id = self.pool.allocate(node);
                self.resident.insert(key, id);
                Ok(id)
            }
        }
    }

    fn load(&self, key: NodeKey) -> Result<Node> {
        let node = self.store.read_node(self.version, key)?;
        if self.options.verify_hashes {
            codec::check_leaf_hash(&node)?;
        }
        self.options.metrics.node_loaded();
        Ok(node)
    }

    /// Hands back an owned working copy of `r` for modification.
    ///
    /// Saved nodes are copied and recorded as orphans of the working
    /// version; unsaved nodes are retired from the pool and reused as is.
    fn take_for_write(&mut self, r: NodeRef) -> Result<Node> {
        let w = self.working_version();
        let id = self.fetch(r)?;
        let node = self.pool.resolve(id)?;
        match node.node_key {
            Some(key) => {
                let copy = node.clone_for(w);
                self.orphans.push(Orphan {
                    key,
                    orphaned_at: w,
                });
                Ok(copy)
            }
            None => {
                let mut node = self.pool.retire(id)?;
                node.reset_for(w);
                Ok(node)
            }
        }
    }

    /// Height and size of the node behind `r`.
    fn shape(&mut self, r: NodeRef) -> Result<(u8, u64)> {
        let id = self.fetch(r)?;
        let node = self.pool.resolve(id)?;
        Ok((node.height, node.size))
    }

    fn update_shape(&mut self, node: &mut Node) -> Result<()> {
        let (left, right) = (self.child(node, true)?, self.child(node, false)?);
        let (lh, ls) = self.shape(left)?;
        let (rh, rs) = self.shape(right)?;
        node.height = 1 + lh.max(rh);
        node.size = ls + rs;
        Ok(())
    }

    /// Hash of a resident node, computing and caching it for unsaved nodes.
    fn hash_of(&mut self, id: NodeId) -> Result<Hash> {
        let (left, right) = {
            let node = self.pool.resolve(id)?;
            if let Some(hash) = node.hash() {
                return Ok(hash);
            }
            if node.is_leaf() {
                let hash = Node::leaf_hash(&node.key, node.value.as_deref().unwrap_or_default());
                self.pool.resolve_mut(id)?.set_hash(hash);
                return Ok(hash);
            }
            (self.child(node, true)?, self.child(node, false)?)
        };
        let left = self.fetch(left)?;
        let left_hash = self.hash_of(left)?;
        let right = self.fetch(right)?;
        let right_hash = self.hash_of(right)?;
        let node = self.pool.resolve_mut(id)?;
        let hash = Node::branch_hash(node.height, node.size, &left_hash, &right_hash);
        node.set_hash(hash);
        Ok(hash)
    }
}

impl NodeSource for Tree {
    fn root(&self) -> Option<NodeRef> {
        self.root
    }

    fn view(&self, r: &NodeRef) -> Result<Cow<'_, Node>> {
        match r {
            NodeRef::Pooled(id) => Ok(Cow::Borrowed(self.pool.resolve(*id)?)),
            NodeRef::Stored(key) => match self.resident.get(key) {
                Some(id) => Ok(Cow::Borrowed(self.pool.resolve(*id)?)),
                None => Ok(Cow::Owned(self.load(*key)?)),
            },
        }
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("version", &self.version)
            .field("hash", &self.saved_hash)
            .field("resident", &self.resident.len())
            .field("pending_orphans", &self.orphans.len())
            .finish_non_exhaustive()
    }
}
