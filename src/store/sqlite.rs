use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use tracing::{debug, info};

use super::{collectable, partition_versions, CommitBatch, NodeStore, PruneOutcome};
use crate::error::{IavlError, Result};
use crate::node::{codec, Node};
use crate::types::{NodeKey, Orphan, Version};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS node (
    version  INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    bytes    BLOB NOT NULL,
    PRIMARY KEY (version, sequence)
) WITHOUT ROWID;
CREATE TABLE IF NOT EXISTS orphan (
    version     INTEGER NOT NULL,
    sequence    INTEGER NOT NULL,
    orphaned_at INTEGER NOT NULL,
    PRIMARY KEY (version, sequence)
) WITHOUT ROWID;
CREATE TABLE IF NOT EXISTS root (
    version       INTEGER PRIMARY KEY,
    node_version  INTEGER,
    node_sequence INTEGER
);
";

/// SQLite `synchronous` pragma.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    /// No fsync.
    Off,
    /// Fsync at WAL checkpoints.
    Normal,
    /// Fsync on every commit.
    Full,
}

impl Synchronous {
    fn pragma(self) -> &'static str {
        match self {
            Synchronous::Off => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
        }
    }
}

/// Options for opening a [`SqliteStore`].
#[derive(Clone, Debug)]
pub struct SqliteOptions {
    /// Database file. Created if missing.
    pub path: PathBuf,
    /// Durability mode.
    pub synchronous: Synchronous,
    /// Use SQLite's write-ahead journal.
    pub wal: bool,
    /// Decoded nodes kept in the read cache (0 disables it).
    pub cache_nodes: usize,
}

impl SqliteOptions {
    /// Defaults for a database at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            synchronous: Synchronous::Full,
            wal: true,
            cache_nodes: 16 * 1024,
        }
    }

    /// Sets the durability mode.
    pub fn synchronous(mut self, mode: Synchronous) -> Self {
        self.synchronous = mode;
        self
    }

    /// Enables or disables the write-ahead journal.
    pub fn wal(mut self, enabled: bool) -> Self {
        self.wal = enabled;
        self
    }

    /// Sets the read cache size in nodes.
    pub fn cache_nodes(mut self, nodes: usize) -> Self {
        self.cache_nodes = nodes;
        self
    }
}

/// Decoded node plus the version it was orphaned at, if any.
#[derive(Clone)]
struct CachedNode {
    node: Node,
    orphaned_at: Option<Version>,
}

/// Durable store backed by a single SQLite database.
///
/// Every commit and prune runs in one SQLite transaction while holding the
/// connection lock, so readers never see a half-written version. Cache
/// entries are filled and updated under the same lock, so a cache hit
/// answers a read without touching the database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    versions: RwLock<BTreeSet<Version>>,
    cache: Option<Mutex<LruCache<NodeKey, CachedNode>>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Opens or creates the database described by `options`.
    pub fn open(options: SqliteOptions) -> Result<Self> {
        let conn = Connection::open(&options.path)?;
        conn.pragma_update(None, "synchronous", options.synchronous.pragma())?;
        if options.wal {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        conn.execute_batch(SCHEMA)?;

        let versions = {
            let mut stmt = conn.prepare("SELECT version FROM root ORDER BY version")?;
            let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
            let mut versions = BTreeSet::new();
            for v in rows {
                versions.insert(Version(v? as u64));
            }
            versions
        };
        info!(
            path = %options.path.display(),
            versions = versions.len(),
            latest = versions.iter().next_back().map(|v| v.0).unwrap_or(0),
            "store.sqlite.open"
        );
        let cache = NonZeroUsize::new(options.cache_nodes).map(|cap| Mutex::new(LruCache::new(cap)));
        Ok(Self {
            conn: Mutex::new(conn),
            versions: RwLock::new(versions),
            cache,
            path: options.path,
        })
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cached(&self, key: &NodeKey) -> Option<CachedNode> {
        self.cache.as_ref()?.lock().get(key).cloned()
    }

    /// Caller holds the connection lock.
    fn remember(&self, key: NodeKey, node: &Node, orphaned_at: Option<Version>) {
        if let Some(cache) = self.cache.as_ref() {
            cache.lock().put(
                key,
                CachedNode {
                    node: node.clone(),
                    orphaned_at,
                },
            );
        }
    }

    /// Caller holds the connection lock.
    fn mark_orphaned(&self, orphans: &[Orphan]) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let mut cache = cache.lock();
        for orphan in orphans {
            if let Some(entry) = cache.peek_mut(&orphan.key) {
                entry.orphaned_at = Some(orphan.orphaned_at);
            }
        }
    }
}

fn visible_at(orphaned_at: Option<Version>, version: Version) -> bool {
    !matches!(orphaned_at, Some(at) if at <= version)
}

impl NodeStore for SqliteStore {
    fn read_node(&self, version: Version, key: NodeKey) -> Result<Node> {
        if !self.versions.read().contains(&version) {
            return Err(IavlError::NotFound("version"));
        }
        if key.version > version {
            return Err(IavlError::NotFound("node"));
        }
        if let Some(entry) = self.cached(&key) {
            if !visible_at(entry.orphaned_at, version) {
                return Err(IavlError::NotFound("node"));
            }
            return Ok(entry.node);
        }
        let conn = self.conn.lock();
        let orphaned_at: Option<Version> = conn
            .prepare_cached("SELECT orphaned_at FROM orphan WHERE version = ?1 AND sequence = ?2")?
            .query_row(params![key.version.0 as i64, key.sequence as i64], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?
            .map(|at| Version(at as u64));
        let bytes: Option<Vec<u8>> = conn
            .prepare_cached("SELECT bytes FROM node WHERE version = ?1 AND sequence = ?2")?
            .query_row(params![key.version.0 as i64, key.sequence as i64], |row| row.get(0))
            .optional()?;
        let node = match bytes {
            Some(bytes) => codec::decode(key, &bytes)?,
            None => return Err(IavlError::NotFound("node")),
        };
        self.remember(key, &node, orphaned_at);
        drop(conn);
        if !visible_at(orphaned_at, version) {
            return Err(IavlError::NotFound("node"));
        }
        Ok(node)
    }

    fn commit(&self, batch: CommitBatch) -> Result<()> {
        let mut conn = self.conn.lock();
        let mut versions = self.versions.write();
        let latest = versions.iter().next_back().copied().unwrap_or(Version::ZERO);
        if batch.version != latest.next() {
            return Err(IavlError::Invalid("commit version must follow the latest"));
        }
        let tx = conn.transaction()?;
        {
            let mut insert_node = tx.prepare_cached(
                "INSERT INTO node (version, sequence, bytes) VALUES (?1, ?2, ?3)",
            )?;
            for (key, bytes) in &batch.nodes {
                insert_node.execute(params![key.version.0 as i64, key.sequence as i64, bytes])?;
            }
            let mut insert_orphan = tx.prepare_cached(
                "INSERT OR REPLACE INTO orphan (version, sequence, orphaned_at) VALUES (?1, ?2, ?3)",
            )?;
            for orphan in &batch.orphans {
                insert_orphan.execute(params![
                    orphan.key.version.0 as i64,
                    orphan.key.sequence as i64,
                    orphan.orphaned_at.0 as i64
                ])?;
            }
            tx.execute(
                "INSERT INTO root (version, node_version, node_sequence) VALUES (?1, ?2, ?3)",
                params![
                    batch.version.0 as i64,
                    batch.root.map(|k| k.version.0 as i64),
                    batch.root.map(|k| k.sequence as i64)
                ],
            )?;
        }
        tx.commit()?;
        self.mark_orphaned(&batch.orphans);
        versions.insert(batch.version);
        debug!(
            version = batch.version.0,
            nodes = batch.nodes.len(),
            orphans = batch.orphans.len(),
            "store.sqlite.commit"
        );
        Ok(())
    }

    fn open_version(&self, version: Version) -> Result<Option<NodeKey>> {
        if !self.versions.read().contains(&version) {
            return Err(IavlError::NotFound("version"));
        }
        let conn = self.conn.lock();
        let row: Option<(Option<i64>, Option<i64>)> = conn
            .prepare_cached("SELECT node_version, node_sequence FROM root WHERE version = ?1")?
            .query_row(params![version.0 as i64], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        match row {
            None => Err(IavlError::NotFound("version")),
            Some((Some(v), Some(seq))) => {
                let sequence = u32::try_from(seq)
                    .map_err(|_| IavlError::Corruption("root sequence out of range".into()))?;
                Ok(Some(NodeKey::new(Version(v as u64), sequence)))
            }
            Some(_) => Ok(None),
        }
    }

    fn prune(&self, keep: &BTreeSet<Version>) -> Result<PruneOutcome> {
        let mut conn = self.conn.lock();
        let mut versions = self.versions.write();
        let (removed, retained) = partition_versions(&versions, keep);
        let tx = conn.transaction()?;
        let dead = {
            let mut drop_root = tx.prepare_cached("DELETE FROM root WHERE version = ?1")?;
            for v in &removed {
                drop_root.execute(params![v.0 as i64])?;
            }
            let mut stmt = tx.prepare("SELECT version, sequence, orphaned_at FROM orphan")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })?;
            let mut orphans = Vec::new();
            for row in rows {
                let (v, seq, at) = row?;
                let sequence = u32::try_from(seq)
                    .map_err(|_| IavlError::Corruption("orphan sequence out of range".into()))?;
                orphans.push(Orphan {
                    key: NodeKey::new(Version(v as u64), sequence),
                    orphaned_at: Version(at as u64),
                });
            }
            let mut dead = collectable(orphans.iter(), &retained);
            dead.sort();
            let mut drop_node =
                tx.prepare_cached("DELETE FROM node WHERE version = ?1 AND sequence = ?2")?;
            let mut drop_orphan =
                tx.prepare_cached("DELETE FROM orphan WHERE version = ?1 AND sequence = ?2")?;
            for key in &dead {
                let (v, seq) = (key.version.0 as i64, key.sequence as i64);
                drop_node.execute(params![v, seq])?;
                drop_orphan.execute(params![v, seq])?;
            }
            dead
        };
        tx.commit()?;
        *versions = retained;
        if let Some(cache) = self.cache.as_ref() {
            let mut cache = cache.lock();
            for key in &dead {
                cache.pop(key);
            }
        }
        info!(
            path = %self.path.display(),
            versions = removed.len(),
            nodes = dead.len(),
            "store.sqlite.prune"
        );
        Ok(PruneOutcome {
            versions_removed: removed,
            nodes_deleted: dead,
        })
    }

    fn latest_version(&self) -> Result<Option<Version>> {
        Ok(self.versions.read().iter().next_back().copied())
    }

    fn versions(&self) -> Result<Vec<Version>> {
        Ok(self.versions.read().iter().copied().collect())
    }
}
