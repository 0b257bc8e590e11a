//! Micro benchmarks for tree mutation, hashing, and historical reads.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use iavl::{MemoryStore, SqliteOptions, SqliteStore, Synchronous, Tree, TreeOptions, Version};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

const KEY_COUNT: u64 = 8_192;
const BATCH: u64 = 512;

fn memory_tree() -> Tree {
    Tree::open(Arc::new(MemoryStore::new()), TreeOptions::default()).unwrap()
}

fn shuffled_keys(seed: u64) -> Vec<[u8; 8]> {
    let mut keys: Vec<[u8; 8]> = (0..KEY_COUNT).map(u64::to_be_bytes).collect();
    keys.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    keys
}

fn tree_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/tree");
    group.sample_size(20);

    let keys = shuffled_keys(0x1A71_0001);
    group.throughput(Throughput::Elements(KEY_COUNT));
    group.bench_function("random_insert", |b| {
        b.iter_batched(
            memory_tree,
            |mut tree| {
                for key in &keys {
                    tree.set(key, key).unwrap();
                }
                black_box(tree.working_hash().unwrap());
            },
            BatchSize::SmallInput,
        );
    });

    group.throughput(Throughput::Elements(KEY_COUNT));
    group.bench_function("save_every_batch", |b| {
        b.iter_batched(
            memory_tree,
            |mut tree| {
                for chunk in keys.chunks(BATCH as usize) {
                    for key in chunk {
                        tree.set(key, key).unwrap();
                    }
                    black_box(tree.save_version().unwrap());
                }
            },
            BatchSize::SmallInput,
        );
    });

    let mut loaded = memory_tree();
    for key in &keys {
        loaded.set(key, key).unwrap();
    }
    loaded.save_version().unwrap();
    group.throughput(Throughput::Elements(KEY_COUNT));
    group.bench_function("get_latest", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(loaded.get(key).unwrap());
            }
        });
    });

    let snapshot = loaded.snapshot(Version(1)).unwrap();
    group.throughput(Throughput::Elements(BATCH));
    group.bench_function("get_snapshot", |b| {
        b.iter(|| {
            for key in keys.iter().take(BATCH as usize) {
                black_box(snapshot.get(key).unwrap());
            }
        });
    });
    group.finish();
}

fn sqlite_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/sqlite");
    group.sample_size(10);
    let keys = shuffled_keys(0x1A71_0002);
    group.throughput(Throughput::Elements(BATCH));
    group.bench_function("commit_batch", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let options = SqliteOptions::new(dir.path().join("bench.db"))
                    .synchronous(Synchronous::Off);
                let store = Arc::new(SqliteStore::open(options).unwrap());
                let tree = Tree::open(store, TreeOptions::default()).unwrap();
                (dir, tree)
            },
            |(_dir, mut tree)| {
                for key in keys.iter().take(BATCH as usize) {
                    tree.set(key, key).unwrap();
                }
                black_box(tree.save_version().unwrap());
            },
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

criterion_group!(benches, tree_ops, sqlite_commit);
criterion_main!(benches);
