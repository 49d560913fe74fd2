//! Criterion benchmarks for the hybrid cache lookup paths.
//!
//! Benchmarks `HybridCache::get` on a RAM hit, a DB hit (RAM tier evicted)
//! and a total miss, plus `HybridCache::put` and cache key derivation.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use locus_core::{CacheKey, HybridCache, Method, SqliteStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ── Helpers ──────────────────────────────────────────────────────────

const TTL: Duration = Duration::from_secs(3600);

fn create_cache(capacity: usize, shards: usize) -> (TempDir, HybridCache) {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(temp_dir.path().join("bench.sqlite")).unwrap());
    (temp_dir, HybridCache::new(store, capacity, shards))
}

fn key(i: usize) -> CacheKey {
    CacheKey::new(
        "bench",
        Method::Ask,
        &json!({ "query": format!("item {}", i), "kwargs": { "limit": 10 } }),
    )
}

fn sample_value() -> serde_json::Value {
    json!({ "items": (0..16).collect::<Vec<_>>(), "source": "bench" })
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_lookup_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("hybrid_cache_get");

    let (_ram_dir, ram_cache) = create_cache(1024, 16);
    let hot = key(0);
    ram_cache.put(&hot, &sample_value(), TTL).unwrap();
    group.bench_function("ram_hit", |b| {
        b.iter(|| black_box(ram_cache.get(black_box(&hot)).unwrap()))
    });

    // One RAM slot: alternating between two keys always falls through to SQLite.
    let (_db_dir, db_cache) = create_cache(1, 1);
    let (a, b_key) = (key(1), key(2));
    db_cache.put(&a, &sample_value(), TTL).unwrap();
    db_cache.put(&b_key, &sample_value(), TTL).unwrap();
    let mut flip = false;
    group.bench_function("db_hit", |b| {
        b.iter(|| {
            flip = !flip;
            let k = if flip { &a } else { &b_key };
            black_box(db_cache.get(k).unwrap())
        })
    });

    let (_miss_dir, miss_cache) = create_cache(1024, 16);
    let absent = key(3);
    group.bench_function("miss", |b| {
        b.iter(|| black_box(miss_cache.get(black_box(&absent)).unwrap()))
    });

    group.finish();
}

fn bench_put(c: &mut Criterion) {
    let (_dir, cache) = create_cache(1024, 16);
    let value = sample_value();
    let mut i = 0usize;
    c.bench_function("hybrid_cache_put", |b| {
        b.iter(|| {
            i = (i + 1) % 512;
            cache.put(&key(i), black_box(&value), TTL).unwrap()
        })
    });
}

fn bench_key_derivation(c: &mut Criterion) {
    let args = json!({ "query": "list products", "kwargs": { "sort": "name", "limit": 10, "filter": { "b": 1, "a": 2 } } });
    c.bench_function("cache_key_new", |b| {
        b.iter(|| black_box(CacheKey::new("shop", Method::Ask, black_box(&args))))
    });
}

criterion_group!(benches, bench_lookup_paths, bench_put, bench_key_derivation);
criterion_main!(benches);
