//! Deferred reclamation: a lock-free LIFO of retired allocations, pushed by
//! deletes and drained only when the caller has established quiescence.
//!
//! The push/drain shape (an `AtomicPtr` head, `compare_exchange` to push,
//! `swap` to null to drain the whole list at once) follows the tagged-
//! pointer deferred-destroy idea in `other_examples`'
//! `skytable-skytable__server-src-engine-idx-mtchm-mod.rs` (`defer_destroy`),
//! adapted from epoch-based reclamation to an explicit caller-drained queue
//! since this container does not manage its own epochs (see the Open
//! Question resolution in `DESIGN.md`). Record bookkeeping is allocated on
//! the process heap rather than through the injected [`crate::alloc::AllocOps`],
//! matching `original_source` `thmap.c`'s `thmap_gc_t` staging nodes.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// One staged-for-release allocation: an offset and the length it was
/// originally allocated with.
struct Record {
    offset: usize,
    len: usize,
    next: *mut Record,
}

/// A lock-free LIFO of [`Record`]s, pushed by deletes and drained in bulk.
pub(crate) struct GcQueue {
    head: AtomicPtr<Record>,
}

impl GcQueue {
    pub(crate) fn new() -> Self {
        GcQueue {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Stages `(offset, len)` for later release. Never blocks.
    pub(crate) fn stage(&self, offset: usize, len: usize) {
        let record = Box::into_raw(Box::new(Record {
            offset,
            len,
            next: ptr::null_mut(),
        }));
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: `record` was just allocated by this call and is not
            // yet reachable from any other thread.
            unsafe { (*record).next = head };
            match self.head.compare_exchange_weak(
                head,
                record,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    /// Atomically takes the whole list and calls `free` on every record.
    /// Returns the number of records freed and their total byte count, for
    /// diagnostics.
    ///
    /// # Safety
    /// The caller must have established quiescence: no reader may still
    /// hold a reference into any allocation staged before this call.
    pub(crate) unsafe fn drain(&self, mut free: impl FnMut(usize, usize)) -> (usize, usize) {
        let mut node = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        let mut count = 0usize;
        let mut bytes = 0usize;
        while !node.is_null() {
            // SAFETY: `node` was pushed by `stage` and ownership transfers
            // to this drain via the swap above.
            let record = unsafe { Box::from_raw(node) };
            free(record.offset, record.len);
            count += 1;
            bytes += record.len;
            node = record.next;
        }
        (count, bytes)
    }
}

impl Drop for GcQueue {
    fn drop(&mut self) {
        // Any records left un-drained at this point belong to a map the
        // caller is tearing down without a final drain; leak rather than
        // free, since we cannot know whether readers are still quiescent.
        let mut node = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        while !node.is_null() {
            // SAFETY: reclaim the `Box` bookkeeping allocation only; the
            // staged offset/len it describes is intentionally leaked.
            let record = unsafe { Box::from_raw(node) };
            node = record.next;
        }
    }
}
