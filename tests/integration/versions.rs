#![allow(missing_docs)]

mod support;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use iavl::{Hash, MemoryStore, NodeStore, Result, Tree, TreeOptions, Version};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use support::init_tracing;

const SEED: u64 = 0x1a71_5eed;

fn keep(vs: &[u64]) -> BTreeSet<Version> {
    vs.iter().copied().map(Version).collect()
}

#[test]
fn every_saved_version_reads_back_its_own_contents() -> Result<()> {
    init_tracing();
    let mut tree = Tree::open(Arc::new(MemoryStore::new()), TreeOptions::default())?;
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let mut model = BTreeMap::new();
    let mut history = Vec::new();

    for _ in 0..20 {
        for _ in 0..50 {
            let key = vec![rng.gen_range(0..64u8)];
            if rng.gen_bool(0.7) {
                let value = vec![rng.gen::<u8>(); rng.gen_range(0..4)];
                tree.set(&key, &value)?;
                model.insert(key, value);
            } else {
                tree.remove(&key)?;
                model.remove(&key);
            }
        }
        let (version, hash) = tree.save_version()?;
        history.push((version, hash, model.clone()));
    }

    for (version, hash, contents) in &history {
        let snapshot = tree.snapshot(*version)?;
        assert_eq!(snapshot.hash()?, *hash);
        assert_eq!(snapshot.size()?, contents.len() as u64);
        let report = snapshot.verify()?;
        assert_eq!(report.root_hash, *hash);
        let read: Vec<_> = snapshot.iter().collect::<Result<_>>()?;
        let expected: Vec<_> = contents.clone().into_iter().collect();
        assert_eq!(read, expected);
    }
    Ok(())
}

#[test]
fn pruning_keeps_selected_versions_intact() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let mut tree = Tree::open(store.clone(), TreeOptions::default())?;
    let mut hashes = Vec::new();
    for round in 0u8..10 {
        for i in 0u8..16 {
            tree.set(&[i], &[round, i])?;
        }
        if round % 3 == 0 {
            tree.remove(&[round])?;
        }
        hashes.push(tree.save_version()?.1);
    }
    let nodes_before = store.node_count();

    let outcome = tree.prune(&keep(&[3, 7]))?;
    assert_eq!(
        outcome.versions_removed,
        [1, 2, 4, 5, 6, 8, 9].map(Version).to_vec()
    );
    assert_eq!(store.node_count(), nodes_before - outcome.nodes_deleted.len());
    assert_eq!(
        tree.available_versions()?,
        vec![Version(3), Version(7), Version(10)]
    );

    for v in [3u64, 7, 10] {
        let snapshot = tree.snapshot(Version(v))?;
        let report = snapshot.verify()?;
        assert_eq!(report.root_hash, hashes[v as usize - 1]);
    }
    assert!(tree.snapshot(Version(5)).unwrap_err().is_not_found());

    // A second prune with the same keep set finds nothing more to do.
    let again = tree.prune(&keep(&[3, 7]))?;
    assert!(again.versions_removed.is_empty());
    assert!(again.nodes_deleted.is_empty());
    Ok(())
}

#[test]
fn latest_version_survives_empty_keep_set() -> Result<()> {
    init_tracing();
    let mut tree = Tree::open(Arc::new(MemoryStore::new()), TreeOptions::default())?;
    tree.set(b"a", b"1")?;
    tree.save_version()?;
    tree.set(b"a", b"2")?;
    let (latest, hash) = tree.save_version()?;
    tree.prune(&BTreeSet::new())?;
    assert_eq!(tree.available_versions()?, vec![latest]);
    assert_eq!(tree.snapshot(latest)?.hash()?, hash);

    tree.set(b"b", b"3")?;
    let (next, _) = tree.save_version()?;
    assert_eq!(next, Version(3));
    assert_eq!(tree.get_at_version(next, b"a")?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn removing_everything_yields_empty_hash() -> Result<()> {
    init_tracing();
    let mut tree = Tree::open(Arc::new(MemoryStore::new()), TreeOptions::default())?;
    for i in 0u8..40 {
        tree.set(&[i], b"x")?;
    }
    tree.save_version()?;
    for i in (0u8..40).rev() {
        assert_eq!(tree.remove(&[i])?, (Some(b"x".to_vec()), true));
    }
    assert!(tree.is_empty());
    let (version, hash) = tree.save_version()?;
    assert_eq!(hash, Hash::empty());
    assert_eq!(tree.store().open_version(version)?, None);
    assert_eq!(tree.get_at_version(Version(1), &[7])?, Some(b"x".to_vec()));
    Ok(())
}

#[test]
fn snapshots_do_not_see_later_writes() -> Result<()> {
    init_tracing();
    let store: Arc<dyn NodeStore> = Arc::new(MemoryStore::new());
    let mut tree = Tree::open(store, TreeOptions::default())?;
    tree.set(b"k", b"old")?;
    let (v1, _) = tree.save_version()?;
    let snapshot = tree.snapshot(v1)?;

    tree.set(b"k", b"new")?;
    tree.set(b"j", b"added")?;
    assert_eq!(snapshot.get(b"k")?, Some(b"old".to_vec()));
    assert_eq!(snapshot.get(b"j")?, None);
    tree.save_version()?;
    assert_eq!(snapshot.get(b"k")?, Some(b"old".to_vec()));
    assert_eq!(tree.get(b"k")?, Some(b"new".to_vec()));
    Ok(())
}
