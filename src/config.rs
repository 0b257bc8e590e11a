//! TOML configuration.
//!
//! ```toml
//! [tree]
//! verify_hashes = true
//!
//! [pool]
//! initial_capacity = 4096
//! max_free_slots = 65536
//!
//! [sqlite]
//! path = "state.db"
//! synchronous = "normal"
//! wal = true
//! cache_nodes = 16384
//! ```
//!
//! Every field is optional; missing ones take the option structs' defaults.
//! The `[sqlite]` table is only needed when a durable store is wanted.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{IavlError, Result};
use crate::options::TreeOptions;
use crate::pool::PoolOptions;
use crate::store::{SqliteOptions, Synchronous};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    tree: RawTree,
    #[serde(default)]
    pool: RawPool,
    sqlite: Option<RawSqlite>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTree {
    verify_hashes: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPool {
    initial_capacity: Option<usize>,
    max_free_slots: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSqlite {
    path: PathBuf,
    synchronous: Option<Synchronous>,
    wal: Option<bool>,
    cache_nodes: Option<usize>,
}

/// Parsed configuration, ready to build option structs from.
#[derive(Clone, Debug, Default)]
pub struct IavlConfig {
    /// Tree options. The metrics sink is always the default one.
    pub tree: TreeOptions,
    /// SQLite store options, if a `[sqlite]` table was given.
    pub sqlite: Option<SqliteOptions>,
}

impl IavlConfig {
    /// Parses configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text)?;
        convert(raw, None)
    }

    /// Reads and parses a TOML file. A relative `sqlite.path` is resolved
    /// against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| IavlError::Config(format!("read {}: {err}", path.display())))?;
        let raw: RawConfig = toml::from_str(&text)
            .map_err(|err| IavlError::Config(format!("parse {}: {err}", path.display())))?;
        let config = convert(raw, path.parent())?;
        debug!(path = %path.display(), "config.loaded");
        Ok(config)
    }
}

fn convert(raw: RawConfig, base: Option<&Path>) -> Result<IavlConfig> {
    let mut pool = PoolOptions::default();
    if let Some(slots) = raw.pool.initial_capacity {
        pool = pool.initial_capacity(slots);
    }
    if let Some(slots) = raw.pool.max_free_slots {
        pool = pool.max_free_slots(slots);
    }
    let mut tree = TreeOptions::default().pool(pool);
    if let Some(verify) = raw.tree.verify_hashes {
        tree = tree.verify_hashes(verify);
    }

    let sqlite = match raw.sqlite {
        None => None,
        Some(raw) => {
            if raw.path.as_os_str().is_empty() {
                return Err(IavlError::Config("sqlite.path must not be empty".into()));
            }
            let path = match base {
                Some(base) if raw.path.is_relative() => base.join(&raw.path),
                _ => raw.path,
            };
            let mut options = SqliteOptions::new(path);
            if let Some(mode) = raw.synchronous {
                options = options.synchronous(mode);
            }
            if let Some(wal) = raw.wal {
                options = options.wal(wal);
            }
            if let Some(nodes) = raw.cache_nodes {
                options = options.cache_nodes(nodes);
            }
            Some(options)
        }
    };
    Ok(IavlConfig { tree, sqlite })
}
