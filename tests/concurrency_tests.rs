// Copyright 2020 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;
use std::thread;

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use thmap::Map;

#[test]
fn create_insert_lookup_destroy() {
    let map = Map::new().unwrap();
    assert_eq!(map.insert(b"hello", 5), Some(5));
    assert_eq!(map.lookup(b"hello"), Some(5));
    assert_eq!(map.lookup(b"world"), None);
    map.remove(b"hello");
    map.drain();
    map.destroy();
}

#[test]
fn duplicate_insert_returns_first_value() {
    let map = Map::new().unwrap();
    assert_eq!(map.insert(b"a", 1), Some(1));
    assert_eq!(map.insert(b"a", 2), Some(1));
    assert_eq!(map.lookup(b"a"), Some(1));
    map.remove(b"a");
    map.drain();
    map.destroy();
}

#[test]
fn insert_remove_lookup_miss_cycle() {
    let map = Map::new().unwrap();
    map.insert(b"x", 1);
    assert_eq!(map.remove(b"x"), Some(1));
    assert_eq!(map.lookup(b"x"), None);
    assert_eq!(map.remove(b"x"), None);
    map.drain();
    map.destroy();
}

fn init_tracing() {
    // The expansion/contraction/backoff events this crate emits (see
    // `crate::node` and `crate::map`) are only interesting under real
    // contention; wire up a subscriber here so `cargo test -- --nocapture`
    // surfaces them for this specific stress test.
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[test]
fn concurrent_insert_lookup_remove_stress() {
    init_tracing();
    const THREADS: usize = 8;
    const PER_THREAD: usize = 1_250;

    let map = Arc::new(Map::new().unwrap());
    let mut handles = Vec::new();

    for t in 0..THREADS {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(t as u64);
            let mut keys: Vec<[u8; 16]> = Vec::with_capacity(PER_THREAD);
            for i in 0..PER_THREAD {
                let mut key = [0u8; 16];
                rng.fill(&mut key);
                let value = (t * PER_THREAD + i) as usize;
                assert_eq!(map.insert(&key, value), Some(value));
                keys.push(key);
            }
            for key in &keys {
                // Another thread's insert could theoretically race into the
                // same key space; what matters is the lookup never panics
                // and, for our own still-present keys, never misses.
                assert!(map.lookup(key).is_some());
            }
            for key in &keys {
                assert!(map.remove(key).is_some());
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    map.drain();

    // All threads used independently seeded RNGs over 16-byte keys; collisions
    // across threads are astronomically unlikely, so the tree should now be
    // back to an empty root.
    for t in 0..THREADS {
        let mut rng = StdRng::seed_from_u64(t as u64);
        for _ in 0..PER_THREAD {
            let mut key = [0u8; 16];
            rng.fill(&mut key);
            assert_eq!(map.lookup(&key), None);
        }
    }

    map.destroy();
}

#[test]
fn stress_contraction_returns_to_empty() {
    // Insert enough keys to force several levels of collision-driven
    // expansion, then remove every one of them. Contraction is internal
    // (see `map::tests::collision_forces_expansion` for a same-crate test
    // that inspects root occupancy directly); from outside, what's
    // observable is that every key goes back to a miss and no key outside
    // the set was ever disturbed.
    let map = Map::new().unwrap();
    let keys: Vec<[u8; 8]> = (0u64..64).map(|i| i.to_le_bytes()).collect();
    for (i, k) in keys.iter().enumerate() {
        assert_eq!(map.insert(k, i), Some(i));
    }
    for (i, k) in keys.iter().enumerate() {
        assert_eq!(map.lookup(k), Some(i));
    }
    for k in &keys {
        assert!(map.remove(k).is_some());
    }
    map.drain();
    for k in &keys {
        assert_eq!(map.lookup(k), None);
    }
    map.destroy();
}
