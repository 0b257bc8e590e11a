//! Versioned, authenticated AVL key-value tree.
//!
//! A [`Tree`] is a balanced binary search tree whose every node carries a
//! SHA-256 hash of its subtree. Each [`Tree::save_version`] produces an
//! immutable version with a root hash committing to the full key set.
//! Older versions stay readable through [`Snapshot`]s until they are
//! pruned. Nodes live in a [`NodePool`] arena while in memory and in a
//! [`NodeStore`] once saved.
//!
//! ```no_run
//! use std::sync::Arc;
//! use iavl::{MemoryStore, Tree, TreeOptions};
//!
//! # fn main() -> iavl::Result<()> {
//! let mut tree = Tree::open(Arc::new(MemoryStore::new()), TreeOptions::default())?;
//! tree.set(b"alice", b"10")?;
//! let (version, hash) = tree.save_version()?;
//! assert_eq!(tree.get_at_version(version, b"alice")?, Some(b"10".to_vec()));
//! println!("v{version} {hash}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// TOML configuration loading.
pub mod config;
/// Error type and result alias.
pub mod error;
/// Operation counters.
pub mod metrics;
/// Tree nodes and their record codec.
pub mod node;
/// Construction options for a tree.
pub mod options;
/// Arena of in-memory nodes.
pub mod pool;
/// Byte encoding helpers.
pub mod primitives;
/// Storage backends.
pub mod store;
/// The versioned tree and its snapshots.
pub mod tree;
/// Versions, node keys, and hashes.
pub mod types;

pub use config::IavlConfig;
pub use error::{IavlError, Result};
pub use metrics::{CounterMetrics, NoopMetrics, TreeMetrics};
pub use node::{Node, NodeRef};
pub use options::TreeOptions;
pub use pool::{NodeId, NodePool, PoolOptions, PoolStats};
pub use store::{
    CommitBatch, MemoryStore, NodeStore, PruneOutcome, SqliteOptions, SqliteStore, Synchronous,
};
pub use tree::{Range, Snapshot, Tree, VerifyReport};
pub use types::{Hash, NodeKey, Orphan, Version};
