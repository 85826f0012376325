//! Allocator injection: the two-operation vtable the trie allocates nodes
//! and leaves through, plus a default in-process implementation.
//!
//! The trait/default-impl split mirrors `ipld_hamt::block_store::BlockStore`
//! (a trait with default methods plus ready-made implementations over
//! `MemoryDB`/`RocksDb`); here the "store" is raw memory rather than a
//! key/value backend. The vtable shape itself (`alloc(len) -> offset`,
//! `free(offset, len)`) is taken directly from `original_source`
//! `thmap.c`'s `thmap_ops` struct.

use std::alloc::{alloc_zeroed, dealloc, Layout};

use crate::offset::MIN_ALIGN;

/// Caller-supplied (or default) memory source for nodes and leaves.
///
/// Implementations must be safe to call concurrently from any thread; the
/// trie never serializes calls to it. A successful `alloc` must return a
/// non-zero, 4-byte-aligned offset; `free` releases exactly the length
/// previously requested for that offset.
pub trait AllocOps: Send + Sync {
    /// Allocates `len` bytes, returning a non-zero aligned offset, or `0` on
    /// failure.
    fn alloc(&self, len: usize) -> usize;

    /// Releases a prior allocation of exactly `len` bytes at `offset`.
    ///
    /// # Safety
    /// `offset` must have been returned by a prior `alloc(len)` call on the
    /// same `AllocOps` instance, and must not have been freed already.
    unsafe fn free(&self, offset: usize, len: usize);
}

/// Default allocator: wraps the process heap. Pairs with `baseptr = 0`, so
/// offsets returned by this allocator are ordinary process addresses. This
/// mirrors the reference implementation's own default allocator, which
/// wraps `malloc`/`free` the same way.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapOps;

impl AllocOps for HeapOps {
    fn alloc(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let layout = match Layout::from_size_align(len, MIN_ALIGN) {
            Ok(layout) => layout,
            Err(_) => return 0,
        };
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            0
        } else {
            ptr as usize
        }
    }

    unsafe fn free(&self, offset: usize, len: usize) {
        if offset == 0 || len == 0 {
            return;
        }
        let layout = Layout::from_size_align(len, MIN_ALIGN)
            .expect("layout computed at alloc time must still be valid");
        // SAFETY: caller guarantees `offset` came from a matching `alloc(len)`.
        dealloc(offset as *mut u8, layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_alloc_is_aligned_and_roundtrips() {
        let ops = HeapOps;
        let off = ops.alloc(64);
        assert_ne!(off, 0);
        assert_eq!(off % MIN_ALIGN, 0);
        unsafe { ops.free(off, 64) };
    }

    #[test]
    fn zero_length_alloc_fails_closed() {
        let ops = HeapOps;
        assert_eq!(ops.alloc(0), 0);
    }
}
