#![allow(missing_docs)]

mod support;

use std::sync::Arc;

use iavl::{MemoryStore, Result, SqliteOptions, SqliteStore, Synchronous, Tree, TreeOptions};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

use support::{init_tracing, KvTree, Oracle};

#[derive(Clone, Debug)]
enum Op {
    Set(Vec<u8>, Vec<u8>),
    Remove(Vec<u8>),
    Save,
}

/// Applies `op` to the subject and the oracle and checks they agree.
fn step(tree: &mut Tree, oracle: &mut Oracle, op: &Op) -> Result<()> {
    match op {
        Op::Set(k, v) => {
            assert_eq!(KvTree::set(tree, k, v)?, oracle.set(k, v)?, "set {k:?}");
        }
        Op::Remove(k) => {
            assert_eq!(KvTree::remove(tree, k)?, oracle.remove(k)?, "remove {k:?}");
        }
        Op::Save => {
            tree.save_version()?;
        }
    }
    Ok(())
}

fn random_ops(seed: u64, count: usize) -> Vec<Op> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let key: Vec<u8> = (0..rng.gen_range(0..3)).map(|_| rng.gen_range(0..24)).collect();
            match rng.gen_range(0..10) {
                0 => Op::Save,
                1..=3 => Op::Remove(key),
                _ => Op::Set(key, (0..rng.gen_range(0..6)).map(|_| rng.gen()).collect()),
            }
        })
        .collect()
}

#[test]
fn memory_and_sqlite_agree_on_every_root_hash() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let sqlite = SqliteStore::open(
        SqliteOptions::new(dir.path().join("diff.db")).synchronous(Synchronous::Off),
    )?;
    let mut durable = Tree::open(Arc::new(sqlite), TreeOptions::default())?;
    let mut memory = Tree::open(Arc::new(MemoryStore::new()), TreeOptions::default())?;
    let mut oracle = Oracle::default();

    for op in random_ops(0xd1ff, 2_000) {
        match op {
            Op::Save => {
                let a = durable.save_version()?;
                let b = memory.save_version()?;
                assert_eq!(a, b);
            }
            ref op => {
                let mut shadow = Oracle(oracle.0.clone());
                step(&mut durable, &mut oracle, op)?;
                step(&mut memory, &mut shadow, op)?;
            }
        }
    }
    assert_eq!(durable.working_hash()?, memory.working_hash()?);
    assert_eq!(durable.entries()?, oracle.entries()?);
    Ok(())
}

#[test]
fn hashes_depend_only_on_operation_history() -> Result<()> {
    init_tracing();
    let ops = random_ops(0x5a5a, 500);
    let run = || -> Result<Vec<iavl::Hash>> {
        let mut tree = Tree::open(Arc::new(MemoryStore::new()), TreeOptions::default())?;
        let mut oracle = Oracle::default();
        let mut hashes = Vec::new();
        for op in &ops {
            step(&mut tree, &mut oracle, op)?;
            if matches!(op, Op::Save) {
                hashes.push(tree.hash());
            }
        }
        Ok(hashes)
    };
    assert_eq!(run()?, run()?);
    Ok(())
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let key = prop::collection::vec(0u8..6, 0..3);
    prop_oneof![
        5 => (key.clone(), prop::collection::vec(any::<u8>(), 0..3)).prop_map(|(k, v)| Op::Set(k, v)),
        3 => key.prop_map(Op::Remove),
        1 => Just(Op::Save),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn tree_matches_oracle_and_stays_valid(ops in prop::collection::vec(op_strategy(), 1..150)) {
        let mut tree = Tree::open(Arc::new(MemoryStore::new()), TreeOptions::default()).unwrap();
        let mut oracle = Oracle::default();
        for op in &ops {
            step(&mut tree, &mut oracle, op).unwrap();
            for (k, v) in oracle.0.iter().take(3) {
                prop_assert_eq!(KvTree::get(&tree, k).unwrap(), Some(v.clone()));
            }
        }
        let report = tree.verify().unwrap();
        prop_assert_eq!(report.leaves, oracle.0.len() as u64);
        prop_assert_eq!(tree.entries().unwrap(), oracle.entries().unwrap());
    }
}
