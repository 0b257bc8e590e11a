#![allow(missing_docs)]

mod support;

use std::collections::BTreeSet;
use std::sync::Arc;

use iavl::{
    IavlConfig, IavlError, NodeStore, Result, SqliteOptions, SqliteStore, Tree, TreeOptions,
    Version,
};
use tempfile::tempdir;

use support::init_tracing;

fn open(path: &std::path::Path) -> Result<Tree> {
    let store = Arc::new(SqliteStore::open(SqliteOptions::new(path))?);
    Tree::open(store, TreeOptions::default().verify_hashes(true))
}

#[test]
fn reopen_restores_latest_version_and_hash() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("tree.db");
    let (version, hash) = {
        let mut tree = open(&path)?;
        for i in 0u16..300 {
            tree.set(&i.to_be_bytes(), format!("value-{i}").as_bytes())?;
        }
        tree.save_version()?;
        for i in (0u16..300).step_by(2) {
            tree.remove(&i.to_be_bytes())?;
        }
        tree.save_version()?
    };

    let mut tree = open(&path)?;
    assert_eq!(tree.version(), version);
    assert_eq!(tree.hash(), hash);
    assert_eq!(tree.working_hash()?, hash);
    assert_eq!(tree.size()?, 150);
    assert_eq!(tree.get(&3u16.to_be_bytes())?, Some(b"value-3".to_vec()));
    assert_eq!(tree.get(&4u16.to_be_bytes())?, None);
    assert_eq!(
        tree.get_at_version(Version(1), &4u16.to_be_bytes())?,
        Some(b"value-4".to_vec())
    );
    tree.verify()?;

    tree.set(b"after-reopen", b"1")?;
    let (next, _) = tree.save_version()?;
    assert_eq!(next, version.next());
    Ok(())
}

#[test]
fn prune_survives_reopen() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("tree.db");
    {
        let mut tree = open(&path)?;
        for round in 0u8..5 {
            for i in 0u8..20 {
                tree.set(&[i], &[round])?;
            }
            tree.save_version()?;
        }
        let keep: BTreeSet<Version> = [Version(2)].into_iter().collect();
        let outcome = tree.prune(&keep)?;
        assert_eq!(outcome.versions_removed, vec![Version(1), Version(3), Version(4)]);
    }
    let store = SqliteStore::open(SqliteOptions::new(&path))?;
    assert_eq!(store.versions()?, vec![Version(2), Version(5)]);
    let tree = Tree::open(Arc::new(store), TreeOptions::default())?;
    assert_eq!(tree.get_at_version(Version(2), &[7])?, Some(vec![1]));
    assert_eq!(tree.get(&[7])?, Some(vec![4]));
    tree.snapshot(Version(2))?.verify()?;
    Ok(())
}

#[test]
fn out_of_order_commit_is_rejected() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let store = SqliteStore::open(SqliteOptions::new(dir.path().join("tree.db")))?;
    let err = store
        .commit(iavl::CommitBatch {
            version: Version(5),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, IavlError::Invalid(_)));
    Ok(())
}

#[test]
fn config_file_opens_a_store() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let file = dir.path().join("iavl.toml");
    std::fs::write(
        &file,
        "[tree]\nverify_hashes = true\n\n[sqlite]\npath = \"nodes.db\"\nsynchronous = \"off\"\n",
    )?;
    let config = IavlConfig::load(&file)?;
    let sqlite = config.sqlite.expect("sqlite section");
    assert_eq!(sqlite.path, dir.path().join("nodes.db"));

    let store = Arc::new(SqliteStore::open(sqlite)?);
    let mut tree = Tree::open(store, config.tree)?;
    tree.set(b"k", b"v")?;
    tree.save_version()?;
    assert!(dir.path().join("nodes.db").exists());
    Ok(())
}
