#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Once;

use iavl::{Result, Tree};
use tracing_subscriber::EnvFilter;

/// Installs a test subscriber honouring `RUST_LOG` once per process.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Key-value surface shared by the tree and the reference map, so the same
/// operation stream can drive both.
pub trait KvTree {
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<bool>;
    fn remove(&mut self, key: &[u8]) -> Result<(Option<Vec<u8>>, bool)>;
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

impl KvTree for Tree {
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        Tree::set(self, key, value)
    }

    fn remove(&mut self, key: &[u8]) -> Result<(Option<Vec<u8>>, bool)> {
        Tree::remove(self, key)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Tree::get(self, key)
    }

    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.iter().collect()
    }
}

/// Ordered map standing in for a tree.
#[derive(Default)]
pub struct Oracle(pub BTreeMap<Vec<u8>, Vec<u8>>);

impl KvTree for Oracle {
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        Ok(self.0.insert(key.to_vec(), value.to_vec()).is_some())
    }

    fn remove(&mut self, key: &[u8]) -> Result<(Option<Vec<u8>>, bool)> {
        let value = self.0.remove(key);
        let removed = value.is_some();
        Ok((value, removed))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.0.get(key).cloned())
    }

    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}
