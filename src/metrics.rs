use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for counting tree operations.
///
/// Implementations receive a call for every mutation, save, and prune so
/// callers can feed their own monitoring without the tree depending on a
/// metrics backend.
pub trait TreeMetrics: Send + Sync {
    /// Records a `set`.
    ///
    /// # Parameters
    /// * `updated` - `true` when an existing key was overwritten.
    fn set(&self, updated: bool);

    /// Records a `remove` that found its key.
    fn removed(&self);

    /// Records a committed version and how many nodes it persisted.
    fn version_saved(&self, nodes: usize, orphans: usize);

    /// Records a prune and how many node records it deleted.
    fn pruned(&self, nodes_deleted: usize);

    /// Records a node pulled from the store into memory.
    fn node_loaded(&self);
}

/// A no-op implementation of [`TreeMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl TreeMetrics for NoopMetrics {
    fn set(&self, _updated: bool) {}
    fn removed(&self) {}
    fn version_saved(&self, _nodes: usize, _orphans: usize) {}
    fn pruned(&self, _nodes_deleted: usize) {}
    fn node_loaded(&self) {}
}

/// A thread-safe counter-based implementation of [`TreeMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Inserts of new keys.
    pub inserts: AtomicU64,
    /// Overwrites of existing keys.
    pub updates: AtomicU64,
    /// Successful removals.
    pub removes: AtomicU64,
    /// Versions saved.
    pub saves: AtomicU64,
    /// Nodes written across all saves.
    pub nodes_persisted: AtomicU64,
    /// Orphans recorded across all saves.
    pub orphans_recorded: AtomicU64,
    /// Prune passes.
    pub prunes: AtomicU64,
    /// Node records deleted by pruning.
    pub nodes_pruned: AtomicU64,
    /// Nodes loaded from the store.
    pub nodes_loaded: AtomicU64,
}

impl TreeMetrics for CounterMetrics {
    fn set(&self, updated: bool) {
        if updated {
            self.updates.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inserts.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn removed(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    fn version_saved(&self, nodes: usize, orphans: usize) {
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.nodes_persisted
            .fetch_add(nodes as u64, Ordering::Relaxed);
        self.orphans_recorded
            .fetch_add(orphans as u64, Ordering::Relaxed);
    }

    fn pruned(&self, nodes_deleted: usize) {
        self.prunes.fetch_add(1, Ordering::Relaxed);
        self.nodes_pruned
            .fetch_add(nodes_deleted as u64, Ordering::Relaxed);
    }

    fn node_loaded(&self) {
        self.nodes_loaded.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation, [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn TreeMetrics> {
    Arc::new(NoopMetrics)
}
