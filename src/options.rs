use std::sync::Arc;

use crate::metrics::{default_metrics, TreeMetrics};
use crate::pool::PoolOptions;

/// Configuration supplied when constructing a [`crate::Tree`].
#[derive(Clone)]
pub struct TreeOptions {
    /// Recompute and compare the hash of every leaf loaded from the store.
    pub verify_hashes: bool,
    /// Sizing for the pool created by [`crate::Tree::open`].
    pub pool: PoolOptions,
    /// Metrics sink.
    pub metrics: Arc<dyn TreeMetrics>,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            verify_hashes: false,
            pool: PoolOptions::default(),
            metrics: default_metrics(),
        }
    }
}

impl std::fmt::Debug for TreeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeOptions")
            .field("verify_hashes", &self.verify_hashes)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl TreeOptions {
    /// Enables or disables hash verification of loaded leaves.
    pub fn verify_hashes(mut self, enabled: bool) -> Self {
        self.verify_hashes = enabled;
        self
    }

    /// Sets the pool sizing.
    pub fn pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn TreeMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}
