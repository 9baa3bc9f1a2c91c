use std::sync::Arc;
use std::time::Duration;

use cache_types::{ChunkId, ChunkPosition, QualityLevel};
use claim_cache::{
    BytesSerializer, CacheConfig, CacheTier, KeepBestCacheManager, LruCachePolicy, MemoryCacheManager, MemoryStorage,
};
use criterion::{criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;
use utils::ByteSize;

const SEED: u64 = 42;
const NUM_KEYS: usize = 1000;
const VALUE_LEN: usize = 16 << 10;

fn key(i: usize) -> ChunkId {
    ChunkId::new(ChunkPosition::new(i as f64 * 400., 0., 400., 400.), QualityLevel::HalfByHalf)
}

fn random_value(rng: &mut StdRng) -> Vec<u8> {
    (0..VALUE_LEN).map(|_| rng.random()).collect()
}

fn benchmark_claim_cycle(c: &mut Criterion) {
    let manager = MemoryCacheManager::<ChunkId, Vec<u8>>::new(MemoryStorage::new(), Arc::new(LruCachePolicy::new(i64::MAX)));
    let mut rng = StdRng::seed_from_u64(SEED);
    for i in 0..NUM_KEYS {
        let mut claim = manager.request_read_write(&key(i)).unwrap();
        claim.set(random_value(&mut rng)).unwrap();
        manager.release(claim).unwrap();
    }

    c.bench_function("memory_read_claim_cycle", |b| {
        b.iter(|| {
            let claim = manager.request_read(&key(rng.random_range(0..NUM_KEYS))).unwrap();
            let _ = claim.get();
            manager.release(claim).unwrap();
        })
    });
}

fn benchmark_eviction_churn(c: &mut Criterion) {
    let budget = (VALUE_LEN * NUM_KEYS / 10) as i64;
    let manager = MemoryCacheManager::<ChunkId, Vec<u8>>::new(MemoryStorage::new(), Arc::new(LruCachePolicy::new(budget)));
    let mut rng = StdRng::seed_from_u64(SEED);
    let value = Arc::new(random_value(&mut rng));

    c.bench_function("memory_write_with_eviction", |b| {
        b.iter(|| {
            let k = key(rng.random_range(0..NUM_KEYS));
            if let Some(mut claim) = manager.request_read_write(&k) {
                claim.set(value.clone()).unwrap();
                manager.release(claim).unwrap();
            }
        })
    });
}

fn benchmark_keep_best_disk(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut config = CacheConfig::new(dir.path());
    config.disk_capacity = ByteSize::mib(64);
    let cache = KeepBestCacheManager::from_config(&config, BytesSerializer);
    let mut rng = StdRng::seed_from_u64(SEED);
    for i in 0..NUM_KEYS / 10 {
        assert!(cache.put(&key(i), CacheTier::Disk, random_value(&mut rng)));
    }

    c.bench_function("keep_best_disk_get", |b| {
        b.iter(|| {
            let position = key(rng.random_range(0..NUM_KEYS / 10)).position;
            cache.get_from_disk(&position).unwrap();
        })
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(5));
    targets = benchmark_claim_cycle, benchmark_eviction_churn, benchmark_keep_best_disk
);
criterion_main!(benches);
