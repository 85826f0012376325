// Copyright 2020 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use thmap::Map;

#[derive(Debug, Arbitrary)]
struct Operation {
    key: u64,
    method: Method,
}

#[derive(Debug, Arbitrary)]
enum Method {
    Insert(u64),
    Remove,
    Get,
}

fuzz_target!(|data: (u8, Vec<Operation>)| {
    let (drain_rate, operations) = data;
    let map = Map::new().unwrap();
    let mut elements = ahash::AHashMap::new();

    let drain_rate = (drain_rate as usize).saturating_add(5);
    for (i, Operation { key, method }) in operations.into_iter().enumerate() {
        if i % drain_rate == 0 {
            // Periodic draining between operations, so the retirement queue
            // is fuzzed too, not just the tree shape.
            map.drain();
        }

        let key = key.to_le_bytes();
        match method {
            Method::Insert(v) => {
                let v = v as usize;
                let expected = *elements.entry(key).or_insert(v);
                let actual = map.insert(&key, v).unwrap();
                assert_eq!(actual, expected);
            }
            Method::Remove => {
                let expected = elements.remove(&key);
                let actual = map.remove(&key);
                assert_eq!(actual, expected);
            }
            Method::Get => {
                let expected = elements.get(&key).copied();
                let actual = map.lookup(&key);
                assert_eq!(actual, expected);
            }
        }
    }
    map.drain();
});
