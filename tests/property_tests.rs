// Copyright 2020 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::HashMap;

use quickcheck_macros::quickcheck;
use thmap::Map;

#[derive(Clone, Debug)]
enum Op {
    Insert(Vec<u8>, usize),
    Remove(Vec<u8>),
    Lookup(Vec<u8>),
}

impl quickcheck::Arbitrary for Op {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        // Bias toward a small key alphabet so operations frequently revisit
        // the same keys, exercising duplicate-insert and collapse paths
        // rather than only ever touching fresh keys.
        let key_space: Vec<u8> = (0u8..6).collect();
        let key_len = 1 + (usize::arbitrary(g) % 3);
        let key: Vec<u8> = (0..key_len)
            .map(|_| *g.choose(&key_space).unwrap())
            .collect();
        match u8::arbitrary(g) % 3 {
            0 => Op::Insert(key, usize::arbitrary(g) % 1000),
            1 => Op::Remove(key),
            _ => Op::Lookup(key),
        }
    }
}

/// The trie's observable behavior under any sequence of insert/remove/
/// lookup calls must match a plain `HashMap` used as a shadow oracle, with
/// first-insert-wins semantics for duplicates.
#[quickcheck]
fn matches_hashmap_oracle(ops: Vec<Op>) -> bool {
    let map = Map::new().unwrap();
    let mut oracle: HashMap<Vec<u8>, usize> = HashMap::new();

    for op in ops {
        match op {
            Op::Insert(key, value) => {
                let expected = *oracle.entry(key.clone()).or_insert(value);
                let Some(actual) = map.insert(&key, value) else {
                    return false;
                };
                if actual != expected {
                    return false;
                }
            }
            Op::Remove(key) => {
                let expected = oracle.remove(&key);
                let actual = map.remove(&key);
                if actual != expected {
                    return false;
                }
            }
            Op::Lookup(key) => {
                let expected = oracle.get(&key).copied();
                if map.lookup(&key) != expected {
                    return false;
                }
            }
        }
    }

    map.drain();
    true
}
