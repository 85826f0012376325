//! Intermediate node layout and operations: a fixed header (lock/deleted
//! bits, occupancy count, parent back-link) followed by a trailing array of
//! atomic slots, accessed through raw pointer arithmetic in the style of a
//! C flexible array member.
//!
//! The node/slot/child vocabulary follows `ipld_hamt::node::Node`'s
//! `set`/`rm_value`/`insert_child` method shapes; the per-node spinlock with
//! bounded backoff and its explicit acquire/release fence discipline follow
//! the MCS lock in `other_examples`'
//! `asterinas-asterinas__ostd-src-sync-spin-mcs.rs` (CAS-based acquire,
//! `fence(Ordering::Acquire)` after a successful wait, `spin_loop` hints);
//! the lock-ordering used during contraction is `original_source`
//! `thmap.c`'s `thmap_del`.

use std::mem;
use std::sync::atomic::{fence, AtomicU32, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;
use static_assertions::const_assert_eq;

use crate::alloc::AllocOps;
use crate::offset::to_addr;

const LOCKED: u32 = 1 << 31;
const DELETED: u32 = 1 << 30;
const COUNT_MASK: u32 = 0x3FFF_FFFF;

/// Fixed portion of every intermediate node allocation. The slot array
/// (`fanout` atomic words) follows immediately after this header in the
/// same allocation.
#[repr(C)]
pub(crate) struct NodeHeader {
    /// Bit 31: locked. Bit 30: deleted. Bits 0..=29: live slot count.
    state: AtomicU32,
    /// Offset of the parent node; `0` for the root.
    parent: AtomicUsize,
}

const HEADER_LEN: usize = mem::size_of::<NodeHeader>();
const_assert_eq!(HEADER_LEN % mem::align_of::<AtomicUsize>(), 0);

#[inline]
pub(crate) fn alloc_len(fanout: usize) -> usize {
    HEADER_LEN + fanout * mem::size_of::<AtomicUsize>()
}

/// Allocates a new node, already locked (the caller is its exclusive
/// writer until it unlocks), with `parent` recorded and every slot zeroed.
pub(crate) fn create<A: AllocOps>(
    ops: &A,
    base: usize,
    parent: usize,
    fanout: usize,
) -> Option<usize> {
    let off = ops.alloc(alloc_len(fanout));
    if off == 0 {
        return None;
    }
    let addr = to_addr(base, off);
    let header = NodeHeader {
        state: AtomicU32::new(LOCKED),
        parent: AtomicUsize::new(parent),
    };
    // SAFETY: `addr` is a fresh allocation at least `alloc_len(fanout)` bytes
    // long. The allocator vtable only promises a non-zero aligned offset, not
    // zeroed memory, so the slot region is zeroed here explicitly rather than
    // assumed; all-zero is a valid `AtomicUsize` representation.
    unsafe {
        std::ptr::write(addr as *mut NodeHeader, header);
        std::ptr::write_bytes(
            (addr as *mut u8).add(HEADER_LEN),
            0,
            fanout * mem::size_of::<AtomicUsize>(),
        );
    }
    Some(off)
}

/// Frees a node's allocation. The node must already be unreachable from any
/// reader (staged on the retirement queue and drained).
///
/// # Safety
/// No reader may still hold a reference to this node.
pub(crate) unsafe fn destroy<A: AllocOps>(ops: &A, _base: usize, node_off: usize, fanout: usize) {
    ops.free(node_off, alloc_len(fanout));
}

/// # Safety
/// `node_off` must currently denote a live node allocated by [`create`].
pub(crate) unsafe fn header<'a>(base: usize, node_off: usize) -> &'a NodeHeader {
    &*(to_addr(base, node_off) as *const NodeHeader)
}

/// # Safety
/// Same requirement as [`header`]; `idx` must be within the node's fanout.
unsafe fn slot<'a>(base: usize, node_off: usize, idx: usize) -> &'a AtomicUsize {
    let base_ptr = (to_addr(base, node_off) as *const u8).add(HEADER_LEN) as *const AtomicUsize;
    &*base_ptr.add(idx)
}

/// Lock-free slot read for the descent path: a relaxed load followed by an
/// acquire fence, so a reader that follows this value into a child also
/// sees everything published before that child was linked in.
///
/// # Safety
/// Same requirement as [`header`].
pub(crate) unsafe fn read_slot(base: usize, node_off: usize, idx: usize) -> usize {
    let v = slot(base, node_off, idx).load(Ordering::Relaxed);
    fence(Ordering::Acquire);
    v
}

/// Spins, with bounded exponential backoff, until this node's lock is
/// acquired. The successful compare-exchange provides a full fence.
pub(crate) fn lock(base: usize, node_off: usize) {
    // SAFETY: caller holds a valid reference to a live node via `node_off`.
    let hdr = unsafe { header(base, node_off) };
    let backoff = Backoff::new();
    loop {
        let cur = hdr.state.load(Ordering::Relaxed);
        if cur & LOCKED == 0
            && hdr
                .state
                .compare_exchange_weak(cur, cur | LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        {
            return;
        }
        if backoff.is_completed() {
            tracing::trace!(node = node_off, "spinning past a contended node lock");
            std::thread::yield_now();
            backoff.reset();
        } else {
            backoff.spin();
        }
    }
}

/// Releases this node's lock, publishing every write made while it was
/// held.
pub(crate) fn unlock(base: usize, node_off: usize) {
    // SAFETY: caller holds a valid reference to a live, currently-locked node.
    let hdr = unsafe { header(base, node_off) };
    fence(Ordering::Release);
    hdr.state.fetch_and(!LOCKED, Ordering::Relaxed);
}

/// # Safety
/// Caller must hold `node_off`'s lock.
pub(crate) unsafe fn is_deleted(base: usize, node_off: usize) -> bool {
    header(base, node_off).state.load(Ordering::Relaxed) & DELETED != 0
}

/// # Safety
/// Caller must hold `node_off`'s lock.
pub(crate) unsafe fn occupancy(base: usize, node_off: usize) -> u32 {
    header(base, node_off).state.load(Ordering::Relaxed) & COUNT_MASK
}

/// # Safety
/// Caller must hold `node_off`'s lock, and the node's occupancy must
/// already be zero (the algorithm only marks empty nodes deleted).
pub(crate) unsafe fn mark_deleted(base: usize, node_off: usize) {
    let hdr = header(base, node_off);
    let cur = hdr.state.load(Ordering::Relaxed);
    debug_assert_eq!(cur & COUNT_MASK, 0);
    hdr.state.store(cur | DELETED, Ordering::Relaxed);
}

/// # Safety
/// Caller must hold `node_off`'s lock; `idx` must currently be empty.
pub(crate) unsafe fn insert_child(base: usize, node_off: usize, idx: usize, child: usize) {
    fence(Ordering::Release);
    slot(base, node_off, idx).store(child, Ordering::Relaxed);
    let hdr = header(base, node_off);
    let cur = hdr.state.load(Ordering::Relaxed);
    hdr.state.store(cur + 1, Ordering::Relaxed);
}

/// Publishes `child` into an already-occupied slot, without touching
/// occupancy. Used when an expansion replaces a colliding leaf with the new
/// inner node it was pushed down into; the slot was already counted.
///
/// # Safety
/// Caller must hold `node_off`'s lock; `idx` must currently be occupied.
pub(crate) unsafe fn replace_child(base: usize, node_off: usize, idx: usize, child: usize) {
    fence(Ordering::Release);
    slot(base, node_off, idx).store(child, Ordering::Relaxed);
}

/// # Safety
/// Caller must hold `node_off`'s lock; `idx` must currently be occupied.
pub(crate) unsafe fn remove_child(base: usize, node_off: usize, idx: usize) {
    fence(Ordering::Release);
    slot(base, node_off, idx).store(0, Ordering::Relaxed);
    let hdr = header(base, node_off);
    let cur = hdr.state.load(Ordering::Relaxed);
    hdr.state.store(cur - 1, Ordering::Relaxed);
}

/// # Safety
/// Caller must hold `node_off`'s lock.
pub(crate) unsafe fn parent_of(base: usize, node_off: usize) -> usize {
    header(base, node_off).parent.load(Ordering::Relaxed)
}
