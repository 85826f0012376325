// Copyright 2020 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use thmap::Map;

const ITEM_COUNT: u32 = 2_000;

fn insert(c: &mut Criterion) {
    c.bench_function("trie bulk insert", |b| {
        b.iter(|| {
            let map = Map::new().unwrap();
            for i in 0..black_box(ITEM_COUNT) {
                map.insert(black_box(&i.to_le_bytes()), black_box(i as usize));
            }
            map.drain();
        })
    });
}

fn lookup(c: &mut Criterion) {
    let map = Map::new().unwrap();
    for i in 0..ITEM_COUNT {
        map.insert(&i.to_le_bytes(), i as usize);
    }

    c.bench_function("trie lookup hit", |b| {
        b.iter(|| {
            for i in 0..black_box(ITEM_COUNT) {
                black_box(map.lookup(&i.to_le_bytes()));
            }
        })
    });
}

fn remove(c: &mut Criterion) {
    c.bench_function("trie insert then remove all", |b| {
        b.iter(|| {
            let map = Map::new().unwrap();
            for i in 0..black_box(ITEM_COUNT) {
                map.insert(&i.to_le_bytes(), i as usize);
            }
            for i in 0..black_box(ITEM_COUNT) {
                map.remove(black_box(&i.to_le_bytes()));
            }
            map.drain();
        })
    });
}

criterion_group!(benches, insert, lookup, remove);
criterion_main!(benches);
