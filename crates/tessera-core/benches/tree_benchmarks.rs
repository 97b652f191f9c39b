//! Benchmarks for the authenticated key-value engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tessera_core::{MerkleHashSortTree, TreeOptions};
use tessera_store::MemoryNodeStore;

fn create_engine() -> MerkleHashSortTree<MemoryNodeStore> {
    let store = Arc::new(MemoryNodeStore::new());
    MerkleHashSortTree::new(store, TreeOptions::default(), &b"bench/"[..])
}

fn bench_set(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("engine_set");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let mut tree = create_engine();
                    for i in 0..size {
                        let key = format!("key-{i:08}");
                        let value = format!("value-{i}").into_bytes();
                        tree.set_data(key.as_bytes(), 0, value).await.unwrap();
                    }
                    black_box(tree)
                })
            });
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    // Pre-populate and commit
    let mut tree = create_engine();
    rt.block_on(async {
        for i in 0..1000 {
            let key = format!("key-{i:08}");
            let value = format!("value-{i}").into_bytes();
            tree.set_data(key.as_bytes(), 0, value).await.unwrap();
        }
        tree.commit().await.unwrap();
    });

    let mut group = c.benchmark_group("engine_get");

    group.bench_function("existing_key", |b| {
        b.iter(|| {
            rt.block_on(async {
                let record = tree.get_data(b"key-00000500", None).await.unwrap();
                black_box(record)
            })
        });
    });

    group.bench_function("absent_key", |b| {
        b.iter(|| {
            rt.block_on(async {
                let record = tree.get_data(b"no-such-key", None).await.unwrap();
                black_box(record)
            })
        });
    });

    group.finish();
}

fn bench_commit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("engine_commit");

    for size in [10, 100].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let mut tree = create_engine();
                    for i in 0..size {
                        let key = format!("key-{i:08}");
                        tree.set_data(key.as_bytes(), 0, &b"value"[..]).await.unwrap();
                    }
                    black_box(tree.commit().await.unwrap())
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_set, bench_get, bench_commit);
criterion_main!(benches);
