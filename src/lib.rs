// Copyright 2020 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! A concurrent, offset-addressed hash-trie mapping opaque byte-string keys
//! to opaque value handles.
//!
//! The trie is a hash-derived radix tree: the root consumes 6 bits of a
//! keyed 32-bit hash per lookup, every level below it consumes 4 bits, and
//! a colliding pair of keys grows the tree by one level rather than
//! resizing anything. Reads never take a lock; writers lock only the single
//! node they modify, with bounded backoff on contention. Deletes detach and
//! mark nodes rather than freeing them outright — freeing is deferred to an
//! explicit, caller-driven [`Map::drain`] call, since a concurrent reader
//! may still be part-way through a descent into memory a delete just
//! unlinked.
//!
//! ```
//! use thmap::Map;
//!
//! let map = Map::new().unwrap();
//! assert_eq!(map.insert(b"hello", 1), Some(1));
//! assert_eq!(map.lookup(b"hello"), Some(1));
//! assert_eq!(map.remove(b"hello"), Some(1));
//! map.drain();
//! ```

mod alloc;
mod error;
mod flags;
mod hash;
mod leaf;
mod map;
mod node;
mod offset;
mod retire;

pub use alloc::{AllocOps, HeapOps};
pub use error::{Error, Result};
pub use flags::{MapBuilder, MapFlags};
pub use map::Map;
