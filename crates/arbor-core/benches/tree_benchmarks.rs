//! Benchmarks for tree, proof and version operations

use arbor_core::proof::{codec, verify_proof};
use arbor_core::{TreeConfig, VersionedTree, WorkingTree};
use arbor_store::MemoryKvStore;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

fn populated(size: u32) -> WorkingTree {
    let mut tree = WorkingTree::new(1);
    for i in 0..size {
        let key = format!("key-{:08}", i);
        let value = format!("value-{}", i);
        tree.set(key, value).unwrap();
    }
    tree
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("avl_insert");

    for size in [10u32, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(populated(size)));
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let tree = populated(1000).view();
    let mut group = c.benchmark_group("avl_lookup");

    group.bench_function("existing_key", |b| {
        b.iter(|| black_box(tree.get(b"key-00000500")));
    });

    group.bench_function("missing_key", |b| {
        b.iter(|| black_box(tree.get(b"nonexistent")));
    });

    group.finish();
}

fn bench_proofs(c: &mut Criterion) {
    let tree = populated(1000).view();
    let root = tree.root_hash();
    let mut group = c.benchmark_group("avl_proof");

    group.bench_function("extract_existence", |b| {
        b.iter(|| black_box(tree.get_with_proof(b"key-00000500")));
    });

    group.bench_function("extract_absence", |b| {
        b.iter(|| black_box(tree.get_with_proof(b"key-00000500x")));
    });

    let (value, proof) = tree.get_with_proof(b"key-00000500");
    let bytes = codec::encode(&proof);
    group.bench_function("verify_existence", |b| {
        b.iter(|| {
            verify_proof(&bytes, b"key-00000500", value.as_deref(), &root).unwrap();
        });
    });

    let (_, proof) = tree.get_with_proof(b"key-00000500x");
    let bytes = codec::encode(&proof);
    group.bench_function("verify_absence", |b| {
        b.iter(|| {
            verify_proof(&bytes, b"key-00000500x", None, &root).unwrap();
        });
    });

    group.finish();
}

fn bench_save_version(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("save_version_100_updates", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = Arc::new(MemoryKvStore::new());
                let mut tree = VersionedTree::new(store, TreeConfig::default());
                for i in 0..1000u32 {
                    tree.set(format!("key-{:08}", i), "v").unwrap();
                }
                tree.save_version().await.unwrap();
                for i in 0..100u32 {
                    tree.set(format!("key-{:08}", i * 7), "updated").unwrap();
                }
                black_box(tree.save_version().await.unwrap())
            })
        });
    });
}

criterion_group!(
    benches,
    bench_insert,
    bench_lookup,
    bench_proofs,
    bench_save_version
);
criterion_main!(benches);
