//! Engine benchmarks: the baseline driver workload (put, get, exists, each,
//! each_like) against the tree backend, with the discard backend as the
//! floor that isolates facade and dispatch cost from storage cost.

#![allow(clippy::expect_used, missing_docs)]

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use poolkv::{Config, Engine, SyncMode};
use tempfile::TempDir;

const BACKENDS: [&str; 2] = ["tree", "discard"];
const ENTRIES: usize = 10_000;
const VALUE_SIZES: [usize; 2] = [16, 256];

fn key(i: usize) -> Vec<u8> {
    format!("{:08}", i).into_bytes()
}

/// Open `backend` over a fresh pool. Benchmarks measure the engine, not the
/// disk, so commits are not fsynced.
fn open(backend: &str) -> (TempDir, Engine) {
    let temp_dir = TempDir::new().expect("create temp dir");
    let config = Config::new(temp_dir.path().join("pool")).with_sync_mode(SyncMode::None);
    let engine = Engine::open(backend, config).expect("open engine");
    (temp_dir, engine)
}

fn populated(backend: &str, value_size: usize) -> (TempDir, Engine) {
    let (temp_dir, engine) = open(backend);
    let value = vec![b'x'; value_size];
    for i in 0..ENTRIES {
        engine.put(&key(i), &value).expect("put");
    }
    (temp_dir, engine)
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/put");
    group.throughput(Throughput::Elements(1));

    for backend in BACKENDS {
        for value_size in VALUE_SIZES {
            let (_dir, engine) = open(backend);
            let value = vec![b'x'; value_size];
            group.bench_with_input(
                BenchmarkId::new(backend, value_size),
                &value,
                |b, value| {
                    let mut counter = 0usize;
                    b.iter(|| {
                        counter = (counter + 1) % ENTRIES;
                        engine.put(&key(counter), value).expect("put");
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/get");
    group.throughput(Throughput::Elements(1));

    for backend in BACKENDS {
        for value_size in VALUE_SIZES {
            let (_dir, engine) = populated(backend, value_size);
            group.bench_function(BenchmarkId::new(backend, value_size), |b| {
                let mut counter = 0usize;
                b.iter(|| {
                    counter = (counter + 7919) % ENTRIES;
                    black_box(engine.get(&key(counter)).expect("get"))
                });
            });
        }
    }

    group.finish();
}

fn bench_exists(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/exists");
    group.throughput(Throughput::Elements(1));

    for backend in BACKENDS {
        let (_dir, engine) = populated(backend, 256);
        group.bench_function(backend, |b| {
            let mut counter = 0usize;
            b.iter(|| {
                counter = (counter + 7919) % ENTRIES;
                black_box(engine.exists(&key(counter)).expect("exists"))
            });
        });
    }

    group.finish();
}

fn bench_each(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/each");
    group.throughput(Throughput::Elements(ENTRIES as u64));
    group.sample_size(20);

    for backend in BACKENDS {
        let (_dir, engine) = populated(backend, 16);
        group.bench_function(backend, |b| {
            b.iter(|| {
                let mut bytes = 0usize;
                engine
                    .each(|key, value| bytes += key.len() + value.len())
                    .expect("each");
                black_box(bytes)
            });
        });
    }

    group.finish();
}

fn bench_each_like(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/each_like");
    group.sample_size(20);

    for backend in BACKENDS {
        let (_dir, engine) = populated(backend, 16);
        group.bench_function(backend, |b| {
            b.iter(|| {
                let mut hits = 0usize;
                engine
                    .each_like("0000123.", |_, _| hits += 1)
                    .expect("each_like");
                black_box(hits)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_put,
    bench_get,
    bench_exists,
    bench_each,
    bench_each_like
);
criterion_main!(benches);
