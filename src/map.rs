//! The public trie: descent (lookup), edge-locking write path with
//! collision-driven expansion (insert), and contracting delete path
//! (remove).
//!
//! The public surface (`create`/`lookup`/`insert`/`remove`/`drain`, plus a
//! builder for construction) takes its shape from `ipld_hamt::hamt::Hamt`
//! (`new`, `set`, `get`, `delete`, all doctested methods on one struct); the
//! algorithms themselves are `original_source` `thmap.c`'s `thmap_get`,
//! `thmap_put`, and `thmap_del`, ported to the node/leaf/offset types in
//! this crate.

use crate::alloc::{AllocOps, HeapOps};
use crate::error::{Error, Result};
use crate::flags::{MapBuilder, MapFlags};
use crate::hash::{fanout_at, HashQuery, ROOT_FANOUT};
use crate::leaf;
use crate::node;
use crate::offset::{is_aligned, is_leaf, untag};
use crate::retire::GcQueue;

/// A concurrent, offset-addressed hash-trie mapping byte-string keys to
/// opaque value handles.
///
/// Readers (`lookup`) never block. Writers (`insert`, `remove`) take a
/// per-node lock only on the single node they must modify. Deletes retire
/// memory onto a queue that is only released when the caller calls
/// [`Map::drain`], after establishing that no reader can still be
/// descending through it.
pub struct Map<A: AllocOps = HeapOps> {
    base: usize,
    root: usize,
    ops: A,
    flags: MapFlags,
    seed: u32,
    gc: GcQueue,
}

enum TryInsert {
    Inserted,
    Duplicate(usize),
    AllocFailed,
    Retry,
}

enum TryRemove {
    Removed(usize),
    Miss,
    Retry,
}

impl<A: AllocOps> Map<A> {
    pub(crate) fn create(baseptr: usize, ops: A, flags: MapFlags, seed: u32) -> Result<Self> {
        if !is_aligned(baseptr) {
            return Err(Error::Misaligned(baseptr));
        }
        let root_len = node::alloc_len(ROOT_FANOUT);
        let root =
            node::create(&ops, baseptr, 0, ROOT_FANOUT).ok_or(Error::AllocFailed(root_len))?;
        node::unlock(baseptr, root);
        tracing::debug!(baseptr, "created trie root node");
        Ok(Map {
            base: baseptr,
            root,
            ops,
            flags,
            seed,
            gc: GcQueue::new(),
        })
    }

    /// Looks up `key`, returning its stored value handle or `None` if
    /// absent. Wait-free: this never takes a lock.
    pub fn lookup(&self, key: &[u8]) -> Option<usize> {
        let mut node_off = self.root;
        let mut level = 0u32;
        let mut query = HashQuery::new();
        loop {
            let idx = query.slot(key, level, self.seed);
            // SAFETY: `node_off` denotes a live node: the root, or a child
            // observed through an acquire-fenced read of a live parent.
            let child = unsafe { node::read_slot(self.base, node_off, idx) };
            if child == 0 {
                return None;
            }
            if is_leaf(child) {
                // SAFETY: a leaf-tagged slot value denotes a live leaf,
                // consistent as of the acquire fence in `read_slot`.
                return unsafe {
                    if leaf::matches(self.base, child, key) {
                        Some(leaf::value(self.base, child))
                    } else {
                        None
                    }
                };
            }
            node_off = untag(child);
            level += 1;
        }
    }

    /// Inserts `key` with `value` if absent; otherwise leaves the map
    /// unchanged. Returns `Some(value)` on insertion, `Some(existing)` if
    /// the key was already present, or `None` on allocator failure.
    pub fn insert(&self, key: &[u8], value: usize) -> Option<usize> {
        let copy = !self.flags.contains(MapFlags::NOCOPY);
        let new_leaf = leaf::create(&self.ops, self.base, key, value, copy)?;
        loop {
            match self.try_insert(key, new_leaf) {
                TryInsert::Inserted => return Some(value),
                TryInsert::Duplicate(existing) => {
                    // SAFETY: `new_leaf` was never published into any slot;
                    // no reader can observe it.
                    unsafe { leaf::destroy(&self.ops, self.base, new_leaf) };
                    return Some(existing);
                }
                TryInsert::AllocFailed => {
                    // SAFETY: same as above.
                    unsafe { leaf::destroy(&self.ops, self.base, new_leaf) };
                    return None;
                }
                TryInsert::Retry => continue,
            }
        }
    }

    /// Removes `key` if present, returning its value handle, or `None` if
    /// absent.
    pub fn remove(&self, key: &[u8]) -> Option<usize> {
        loop {
            match self.try_remove(key) {
                TryRemove::Removed(value) => return Some(value),
                TryRemove::Miss => return None,
                TryRemove::Retry => continue,
            }
        }
    }

    /// Releases every allocation staged by completed removes so far.
    ///
    /// The caller must ensure no reader is still descending through any of
    /// the structure removed before this call (e.g. via an epoch counter or
    /// a stop-the-world barrier); this crate does not track reader
    /// quiescence itself.
    pub fn drain(&self) {
        // SAFETY: the caller's contract, documented above, is what makes
        // this safe; the trie itself cannot verify quiescence.
        let (count, bytes) =
            unsafe { self.gc.drain(|offset, len| unsafe { self.ops.free(offset, len) }) };
        tracing::trace!(count, bytes, "drained retirement queue");
    }

    /// Frees the root node and consumes the map. The caller must have
    /// already removed every entry and drained the retirement queue;
    /// `destroy` does not walk the tree (matching the reference
    /// implementation, which also leaves emptying the map to the caller).
    pub fn destroy(self) {
        // SAFETY: caller contract documented above.
        unsafe { node::destroy(&self.ops, self.base, self.root, ROOT_FANOUT) };
    }

    /// Descends, without locking, to the node whose target slot for `key`
    /// is either empty or a leaf — the node a write must lock.
    fn descend_to_edge(&self, key: &[u8]) -> (usize, usize, u32, HashQuery) {
        let mut node_off = self.root;
        let mut level = 0u32;
        let mut query = HashQuery::new();
        loop {
            let idx = query.slot(key, level, self.seed);
            // SAFETY: see `lookup`.
            let child = unsafe { node::read_slot(self.base, node_off, idx) };
            if child != 0 && !is_leaf(child) {
                node_off = untag(child);
                level += 1;
                continue;
            }
            return (node_off, idx, level, query);
        }
    }

    fn try_insert(&self, key: &[u8], new_leaf: usize) -> TryInsert {
        let (node_off, idx, level, query) = self.descend_to_edge(key);
        node::lock(self.base, node_off);
        // SAFETY: lock held on `node_off` for every access below.
        unsafe {
            if node::is_deleted(self.base, node_off) {
                node::unlock(self.base, node_off);
                return TryInsert::Retry;
            }
            let current = node::read_slot(self.base, node_off, idx);
            if current != 0 && !is_leaf(current) {
                // A concurrent writer expanded this slot into an inner node
                // since our unlocked descent; restart from the root.
                node::unlock(self.base, node_off);
                return TryInsert::Retry;
            }
            if current == 0 {
                node::insert_child(self.base, node_off, idx, new_leaf);
                node::unlock(self.base, node_off);
                return TryInsert::Inserted;
            }
            if leaf::matches(self.base, current, key) {
                let existing = leaf::value(self.base, current);
                node::unlock(self.base, node_off);
                return TryInsert::Duplicate(existing);
            }
            self.expand_and_insert(node_off, idx, level, current, new_leaf, key, query)
        }
    }

    /// Grows the trie by one or more levels to separate `key` from the
    /// colliding leaf `other`, then publishes both. `node_off` must already
    /// be locked by the caller; this method unlocks it before returning.
    ///
    /// # Safety
    /// Caller must hold `node_off`'s lock and must have already verified
    /// `other` is a live leaf colliding with `key` at `level`.
    unsafe fn expand_and_insert(
        &self,
        node_off: usize,
        idx: usize,
        level: u32,
        other: usize,
        new_leaf: usize,
        key: &[u8],
        mut query: HashQuery,
    ) -> TryInsert {
        let other_header = leaf::header(self.base, other);
        let other_key = leaf::key_bytes(other_header).to_vec();
        let mut other_query = HashQuery::new();

        let mut parent_off = node_off;
        let mut parent_idx = idx;
        let mut cur_level = level;
        // The very first publish into `parent_off`/`parent_idx` lands in the
        // edge node's slot that `other` already occupied, so it must replace
        // without touching occupancy; every subsequent level is a freshly
        // created, empty node, so it's a normal (count-incrementing) insert.
        let mut replacing_edge_slot = true;

        loop {
            let next_level = cur_level + 1;
            let fanout = fanout_at(next_level);
            let child = match node::create(&self.ops, self.base, parent_off, fanout) {
                Some(child) => child,
                None => {
                    node::unlock(self.base, parent_off);
                    return TryInsert::AllocFailed;
                }
            };
            let our_idx = query.slot(key, next_level, self.seed);
            let other_idx = other_query.slot(&other_key, next_level, self.seed);

            if our_idx != other_idx {
                node::insert_child(self.base, child, other_idx, other);
                node::insert_child(self.base, child, our_idx, new_leaf);
                node::unlock(self.base, child);
                if replacing_edge_slot {
                    node::replace_child(self.base, parent_off, parent_idx, child);
                } else {
                    node::insert_child(self.base, parent_off, parent_idx, child);
                }
                node::unlock(self.base, parent_off);
                tracing::debug!(depth = next_level, "collision triggered trie expansion");
                return TryInsert::Inserted;
            }

            // Still colliding at this depth: publish the new, still-empty
            // level and keep descending into it.
            if replacing_edge_slot {
                node::replace_child(self.base, parent_off, parent_idx, child);
            } else {
                node::insert_child(self.base, parent_off, parent_idx, child);
            }
            node::unlock(self.base, parent_off);
            tracing::debug!(depth = next_level, "collision triggered trie expansion");

            parent_off = child;
            parent_idx = our_idx;
            cur_level = next_level;
            replacing_edge_slot = false;
        }
    }

    fn try_remove(&self, key: &[u8]) -> TryRemove {
        let (node_off, idx, level, mut query) = self.descend_to_edge(key);
        node::lock(self.base, node_off);
        // SAFETY: lock held on `node_off` for every access below.
        let leaf_off = unsafe {
            if node::is_deleted(self.base, node_off) {
                node::unlock(self.base, node_off);
                return TryRemove::Retry;
            }
            let current = node::read_slot(self.base, node_off, idx);
            if current == 0 {
                node::unlock(self.base, node_off);
                return TryRemove::Miss;
            }
            if !is_leaf(current) {
                node::unlock(self.base, node_off);
                return TryRemove::Retry;
            }
            if !leaf::matches(self.base, current, key) {
                node::unlock(self.base, node_off);
                return TryRemove::Miss;
            }
            current
        };
        let value = unsafe { leaf::value(self.base, leaf_off) };
        unsafe { node::remove_child(self.base, node_off, idx) };

        let mut cur = node_off;
        let mut cur_level = level;
        // SAFETY: `cur` starts locked (from the lock above) and every loop
        // iteration re-locks the node it leaves locked before continuing.
        unsafe {
            while cur_level > 0 && node::occupancy(self.base, cur) == 0 {
                let par = node::parent_of(self.base, cur);
                let par_idx = query.slot(key, cur_level - 1, self.seed);
                node::lock(self.base, par);
                node::mark_deleted(self.base, cur);
                node::unlock(self.base, cur);
                node::remove_child(self.base, par, par_idx);
                let retired_len = node::alloc_len(fanout_at(cur_level));
                self.gc.stage(cur, retired_len);
                tracing::debug!(
                    depth = cur_level,
                    slot = par_idx,
                    "contraction retired an inner node"
                );
                cur = par;
                cur_level -= 1;
            }
            node::unlock(self.base, cur);
            leaf::stage(&self.gc, self.base, leaf_off);
        }

        TryRemove::Removed(value)
    }
}

impl Map<HeapOps> {
    /// Creates a map backed by the process heap, with default flags
    /// (key-copy mode) and hash seed `0`.
    pub fn new() -> Result<Self> {
        MapBuilder::new().build(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_round_trip() {
        let map = Map::new().unwrap();
        assert_eq!(map.lookup(b"hello"), None);
        assert_eq!(map.insert(b"hello", 5), Some(5));
        assert_eq!(map.lookup(b"hello"), Some(5));
        assert_eq!(map.lookup(b"world"), None);
    }

    #[test]
    fn duplicate_insert_keeps_first_value() {
        let map = Map::new().unwrap();
        assert_eq!(map.insert(b"a", 1), Some(1));
        assert_eq!(map.insert(b"a", 2), Some(1));
        assert_eq!(map.lookup(b"a"), Some(1));
    }

    #[test]
    fn remove_then_reinsert() {
        let map = Map::new().unwrap();
        map.insert(b"x", 10);
        assert_eq!(map.remove(b"x"), Some(10));
        assert_eq!(map.lookup(b"x"), None);
        assert_eq!(map.remove(b"x"), None);
        assert_eq!(map.insert(b"x", 20), Some(20));
        assert_eq!(map.lookup(b"x"), Some(20));
        map.drain();
    }

    #[test]
    fn occupancy_collapses_after_last_remove() {
        let map = Map::new().unwrap();
        map.insert(b"only", 1);
        assert_eq!(map.remove(b"only"), Some(1));
        map.drain();
        // SAFETY: single-threaded test, no concurrent accessors.
        unsafe {
            assert_eq!(node::occupancy(map.base, map.root), 0);
        }
    }

    #[test]
    fn collision_forces_expansion() {
        // Pigeonhole: only 64 * 16 = 1024 distinct (root, level-1) slot
        // pairs exist, so scanning candidates is guaranteed to turn up a
        // pair colliding on both levels well before 200_000 tries.
        let seed = 0u32;
        let mut seen: std::collections::HashMap<(usize, usize), u64> =
            std::collections::HashMap::new();
        let mut pair = None;
        for candidate in 0u64..200_000 {
            let bytes = candidate.to_le_bytes();
            let mut q = HashQuery::new();
            let key = (q.slot(&bytes, 0, seed), q.slot(&bytes, 1, seed));
            if let Some(&first) = seen.get(&key) {
                pair = Some((first, candidate));
                break;
            }
            seen.insert(key, candidate);
        }
        let (a, b) = pair.expect("pigeonhole guarantees a collision in this range");

        let map = Map::new().unwrap();
        let (ka, kb) = (a.to_le_bytes(), b.to_le_bytes());
        assert_eq!(map.insert(&ka, 100), Some(100));
        assert_eq!(map.insert(&kb, 200), Some(200));
        assert_eq!(map.lookup(&ka), Some(100));
        assert_eq!(map.lookup(&kb), Some(200));
        assert_eq!(map.remove(&ka), Some(100));
        assert_eq!(map.remove(&kb), Some(200));
        map.drain();
        // SAFETY: single-threaded test, no concurrent accessors.
        unsafe {
            assert_eq!(node::occupancy(map.base, map.root), 0);
        }
    }
}
