//! Leaf records: an immutable `{key, len, value}` triple, with two
//! key-ownership modes (copy-on-insert, matching `ipld_hamt::pointer`'s
//! `Pointer::Values(Vec<KeyValuePair<K, V>>)` owning its keys outright; or
//! borrowed, per `original_source` `thmap.c`'s `THMAP_NOCOPY`).
//!
//! A leaf is never mutated after it is published into a slot; replacing a
//! value means publishing a brand new leaf, never writing through the old
//! one (see `crate::map`'s write path).

use std::mem;

use crate::alloc::AllocOps;
use crate::offset::{tag_leaf, to_addr, to_offset, untag};

#[repr(C)]
pub(crate) struct LeafHeader {
    /// Absolute address of the key bytes: either a copy owned by this leaf
    /// or the caller's own buffer, depending on `owns_key`.
    pub(crate) key: usize,
    pub(crate) len: usize,
    pub(crate) val: usize,
    pub(crate) owns_key: bool,
}

const HEADER_LEN: usize = mem::size_of::<LeafHeader>();

/// Allocates and publishes a new leaf for `key`/`val`, returning a
/// leaf-tagged offset ready to be stored into a slot. Returns `None` on
/// allocator failure, freeing anything it had already allocated.
pub(crate) fn create<A: AllocOps>(
    ops: &A,
    base: usize,
    key: &[u8],
    val: usize,
    copy: bool,
) -> Option<usize> {
    let leaf_off = ops.alloc(HEADER_LEN);
    if leaf_off == 0 {
        return None;
    }

    let (key_addr, owns_key) = if copy {
        let key_off = ops.alloc(key.len().max(1));
        if key_off == 0 {
            // SAFETY: leaf_off was just allocated by this same `ops`.
            unsafe { ops.free(leaf_off, HEADER_LEN) };
            return None;
        }
        let addr = to_addr(base, key_off);
        // SAFETY: addr was just allocated with room for at least key.len() bytes.
        unsafe { std::ptr::copy_nonoverlapping(key.as_ptr(), addr as *mut u8, key.len()) };
        (addr, true)
    } else {
        (key.as_ptr() as usize, false)
    };

    let leaf_addr = to_addr(base, leaf_off);
    let header = LeafHeader {
        key: key_addr,
        len: key.len(),
        val,
        owns_key,
    };
    // SAFETY: leaf_addr is a fresh HEADER_LEN-byte allocation, uninitialized
    // until this write.
    unsafe { std::ptr::write(leaf_addr as *mut LeafHeader, header) };
    Some(tag_leaf(leaf_off))
}

/// Borrows the header for a leaf-tagged offset.
///
/// # Safety
/// `tagged_offset` must currently denote a live leaf allocated by
/// [`create`] under `base`, and must not be concurrently retired.
pub(crate) unsafe fn header<'a>(base: usize, tagged_offset: usize) -> &'a LeafHeader {
    &*(to_addr(base, tagged_offset) as *const LeafHeader)
}

/// # Safety
/// `leaf` must be a valid, currently-live leaf header.
pub(crate) unsafe fn key_bytes<'a>(leaf: &LeafHeader) -> &'a [u8] {
    std::slice::from_raw_parts(leaf.key as *const u8, leaf.len)
}

/// Whether the live leaf at `tagged_offset` holds exactly `key`.
///
/// # Safety
/// Same requirement as [`header`].
pub(crate) unsafe fn matches(base: usize, tagged_offset: usize, key: &[u8]) -> bool {
    let leaf = header(base, tagged_offset);
    leaf.len == key.len() && key_bytes(leaf) == key
}

/// # Safety
/// Same requirement as [`header`].
pub(crate) unsafe fn value(base: usize, tagged_offset: usize) -> usize {
    header(base, tagged_offset).val
}

/// Frees a leaf's own allocation and, in copy mode, its key buffer.
///
/// # Safety
/// Must only be called once the caller has established quiescence: no
/// reader may still hold a reference to this leaf.
pub(crate) unsafe fn destroy<A: AllocOps>(ops: &A, base: usize, tagged_offset: usize) {
    let leaf_off = untag(tagged_offset);
    let leaf = &*(to_addr(base, tagged_offset) as *const LeafHeader);
    if leaf.owns_key {
        let key_off = to_offset(base, leaf.key);
        ops.free(key_off, leaf.len.max(1));
    }
    ops.free(leaf_off, HEADER_LEN);
}

/// Stages a leaf's allocation(s) onto the retirement queue instead of
/// freeing them immediately, so a concurrent reader that is still
/// descending through it is not left with a dangling reference.
///
/// # Safety
/// `tagged_offset` must currently denote a live leaf that has just been
/// unlinked from the trie (no slot still points to it).
pub(crate) unsafe fn stage(gc: &crate::retire::GcQueue, base: usize, tagged_offset: usize) {
    let leaf_off = untag(tagged_offset);
    let leaf = &*(to_addr(base, tagged_offset) as *const LeafHeader);
    if leaf.owns_key {
        let key_off = to_offset(base, leaf.key);
        gc.stage(key_off, leaf.len.max(1));
    }
    gc.stage(leaf_off, HEADER_LEN);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::HeapOps;

    #[test]
    fn copy_mode_owns_its_key() {
        let ops = HeapOps;
        let leaf = create(&ops, 0, b"hello", 42, true).unwrap();
        unsafe {
            assert!(matches(0, leaf, b"hello"));
            assert!(!matches(0, leaf, b"world"));
            assert_eq!(value(0, leaf), 42);
            destroy(&ops, 0, leaf);
        }
    }

    #[test]
    fn nocopy_mode_borrows_caller_key() {
        let ops = HeapOps;
        let key = b"borrowed".to_vec();
        let leaf = create(&ops, 0, &key, 7, false).unwrap();
        unsafe {
            assert!(matches(0, leaf, &key));
            assert_eq!(value(0, leaf), 7);
            destroy(&ops, 0, leaf);
        }
    }
}
