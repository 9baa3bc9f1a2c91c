use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cache_types::{ChunkId, ChunkPosition, QualityLevel};
use claim_cache::{CachePolicy, FileCacheManager, FileStorage, LruCachePolicy, MemoryCacheManager, MemoryStorage};
use more_asserts::assert_le;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

const THREADS: usize = 8;
const ROUNDS: usize = 200;

fn key(i: usize) -> ChunkId {
    ChunkId::new(ChunkPosition::new(i as f64, 0., 1., 1.), QualityLevel::Las)
}

fn memory_manager(budget: i64) -> MemoryCacheManager<ChunkId, Vec<u8>> {
    MemoryCacheManager::new(MemoryStorage::new(), Arc::new(LruCachePolicy::new(budget)))
}

#[test]
fn test_at_most_one_writer() {
    let manager = memory_manager(i64::MAX);
    let writers = AtomicUsize::new(0);
    let granted = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    let Some(mut claim) = manager.request_read_write(&key(0)) else {
                        continue;
                    };
                    assert_eq!(writers.fetch_add(1, Ordering::SeqCst), 0);
                    granted.fetch_add(1, Ordering::SeqCst);
                    claim.set(vec![1u8; 4]).unwrap();
                    std::thread::yield_now();
                    writers.fetch_sub(1, Ordering::SeqCst);
                    manager.release(claim).unwrap();
                }
            });
        }
    });

    assert!(granted.load(Ordering::SeqCst) > 0);
    assert!(manager.is_tracked(&key(0)));
}

#[test]
fn test_readers_and_writer_exclude_each_other() {
    let manager = memory_manager(i64::MAX);
    let mut seed = manager.request_read_write(&key(0)).unwrap();
    seed.set(vec![0u8; 8]).unwrap();
    manager.release(seed).unwrap();

    let readers = AtomicUsize::new(0);
    let writers = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let (manager, readers, writers) = (&manager, &readers, &writers);
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(t as u64);
                for _ in 0..ROUNDS {
                    if rng.random_bool(0.3) {
                        let Some(mut claim) = manager.request_read_write(&key(0)) else {
                            continue;
                        };
                        writers.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(readers.load(Ordering::SeqCst), 0);
                        claim.set(vec![t as u8; 8]).unwrap();
                        writers.fetch_sub(1, Ordering::SeqCst);
                        manager.release(claim).unwrap();
                    } else {
                        let Some(claim) = manager.request_read(&key(0)) else {
                            continue;
                        };
                        readers.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(writers.load(Ordering::SeqCst), 0);
                        assert_eq!(claim.get().unwrap().len(), 8);
                        readers.fetch_sub(1, Ordering::SeqCst);
                        manager.release(claim).unwrap();
                    }
                }
            });
        }
    });
}

#[test]
fn test_degrade_loses_no_updates() {
    let manager = memory_manager(i64::MAX);
    let mut seed = manager.request_read_write(&key(0)).unwrap();
    seed.set(0u64.to_be_bytes().to_vec()).unwrap();
    manager.release(seed).unwrap();

    let increments = AtomicUsize::new(0);
    let decode = |bytes: &[u8]| u64::from_be_bytes(bytes.try_into().unwrap());

    std::thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    let Some(mut claim) = manager.request_read_write(&key(0)) else {
                        continue;
                    };
                    let next = decode(claim.get().unwrap().as_slice()) + 1;
                    claim.set(next.to_be_bytes().to_vec()).unwrap();
                    let read = manager.degrade(claim).unwrap().unwrap();
                    std::thread::yield_now();
                    assert_eq!(decode(read.get().unwrap().as_slice()), next);
                    increments.fetch_add(1, Ordering::SeqCst);
                    manager.release(read).unwrap();
                }
            });
        }
    });

    let claim = manager.request_read(&key(0)).unwrap();
    assert_eq!(decode(claim.get().unwrap().as_slice()), increments.load(Ordering::SeqCst) as u64);
    manager.release(claim).unwrap();
}

#[test]
fn test_readers_never_see_evicted_data() {
    const KEYS: usize = 8;
    const FILE_LEN: usize = 600;

    let dir = TempDir::new().unwrap();
    let policy = Arc::new(LruCachePolicy::new(2 * FILE_LEN as i64));
    let manager = FileCacheManager::<ChunkId>::new(FileStorage::new(dir.path()), policy.clone());
    let reads = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let (manager, reads) = (&manager, &reads);
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(1000 + t as u64);
                for _ in 0..ROUNDS {
                    let k = key(rng.random_range(0..KEYS));
                    if t % 2 == 0 {
                        let Some(mut claim) = manager.request_read_write(&k) else {
                            continue;
                        };
                        let mut writer = claim.writer().unwrap();
                        writer.write_all(&[t as u8; FILE_LEN]).unwrap();
                        writer.close().unwrap();
                        manager.release(claim).unwrap();
                    } else {
                        let Some(claim) = manager.request_read(&k) else {
                            continue;
                        };
                        let mut reader = claim.reader().unwrap();
                        std::thread::sleep(Duration::from_micros(50));
                        assert!(claim.exists());
                        let mut data = Vec::new();
                        reader.read_to_end(&mut data).unwrap();
                        assert_eq!(data.len(), FILE_LEN);
                        drop(reader);
                        reads.fetch_add(1, Ordering::SeqCst);
                        manager.release(claim).unwrap();
                    }
                }
            });
        }
    });

    assert_le!(policy.current_size(), policy.max_size());
    assert!(reads.load(Ordering::SeqCst) > 0);
}

#[test]
fn test_budget_converges_under_concurrent_releases() {
    let policy = Arc::new(LruCachePolicy::new(1000));
    let manager = MemoryCacheManager::<ChunkId, Vec<u8>>::new(MemoryStorage::new(), policy.clone());

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let manager = &manager;
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(t as u64);
                for i in 0..ROUNDS {
                    let Some(mut claim) = manager.request_read_write(&key(t * ROUNDS + i)) else {
                        continue;
                    };
                    claim.set(vec![0u8; rng.random_range(1..300)]).unwrap();
                    manager.release(claim).unwrap();
                }
            });
        }
    });

    assert_le!(policy.current_size(), 1000);
    assert_eq!(policy.len(), manager.len());
    let tracked: i64 = manager.snapshot().iter().map(|e| e.size).sum();
    assert_eq!(tracked, policy.current_size());
}
