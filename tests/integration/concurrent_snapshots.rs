#![allow(missing_docs)]

mod support;

use std::sync::Arc;
use std::thread;

use iavl::{Result, SqliteOptions, SqliteStore, Tree, TreeOptions, Version};
use tempfile::tempdir;

use support::init_tracing;

const READERS: usize = 4;
const ROUNDS: u32 = 20;
const KEYS: u32 = 64;

fn value(round: u32, key: u32) -> Vec<u8> {
    format!("{round}:{key}").into_bytes()
}

#[test]
fn readers_see_stable_versions_while_writer_commits() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let store = Arc::new(SqliteStore::open(SqliteOptions::new(dir.path().join("c.db")))?);
    let mut tree = Tree::open(store, TreeOptions::default())?;
    for key in 0..KEYS {
        tree.set(&key.to_be_bytes(), &value(0, key))?;
    }
    let (base, base_hash) = tree.save_version()?;
    let snapshot = tree.snapshot(base)?;

    thread::scope(|scope| -> Result<()> {
        let readers: Vec<_> = (0..READERS)
            .map(|_| {
                let snapshot = snapshot.clone();
                scope.spawn(move || -> Result<()> {
                    for _ in 0..ROUNDS {
                        for key in 0..KEYS {
                            assert_eq!(snapshot.get(&key.to_be_bytes())?, Some(value(0, key)));
                        }
                        assert_eq!(snapshot.hash()?, base_hash);
                    }
                    Ok(())
                })
            })
            .collect();

        for round in 1..=ROUNDS {
            for key in (0..KEYS).filter(|k| k % 2 == round % 2) {
                tree.set(&key.to_be_bytes(), &value(round, key))?;
            }
            tree.save_version()?;
        }
        for reader in readers {
            reader.join().expect("reader panicked")?;
        }
        Ok(())
    })?;

    assert_eq!(tree.version(), Version(u64::from(ROUNDS) + 1));
    assert_eq!(tree.snapshot(base)?.verify()?.root_hash, base_hash);
    Ok(())
}
