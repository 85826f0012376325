//! Construction-time configuration: key-ownership mode and an optional
//! adversarial-hash-resistance seed, sequenced through a small builder
//! rather than a long positional constructor (`ipld_hamt::Hamt::new` vs.
//! `Hamt::new_with_bit_width` is the sibling pattern this follows).

use bitflags::bitflags;

use crate::alloc::{AllocOps, HeapOps};
use crate::error::{Error, Result};
use crate::map::Map;

bitflags! {
    /// Behavioral flags recognized at construction time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MapFlags: u32 {
        /// Do not copy inserted keys; store the caller's pointer as-is.
        /// The caller must keep the key buffer alive and unmutated for the
        /// lifetime of the entry.
        const NOCOPY = 1 << 0;
    }
}

/// Builds a [`Map`], sequencing the allocator vtable, flags, and hash seed
/// before committing to `build`.
pub struct MapBuilder<A: AllocOps = HeapOps> {
    ops: A,
    flags: MapFlags,
    seed: u32,
}

impl Default for MapBuilder<HeapOps> {
    fn default() -> Self {
        Self::new()
    }
}

impl MapBuilder<HeapOps> {
    /// Starts a builder using the default in-process heap allocator.
    pub fn new() -> Self {
        MapBuilder {
            ops: HeapOps,
            flags: MapFlags::empty(),
            seed: 0,
        }
    }
}

impl<A: AllocOps> MapBuilder<A> {
    /// Replaces the allocator vtable, e.g. to place the trie in shared
    /// memory instead of the process heap.
    pub fn ops<B: AllocOps>(self, ops: B) -> MapBuilder<B> {
        MapBuilder {
            ops,
            flags: self.flags,
            seed: self.seed,
        }
    }

    /// Sets the construction flags (see [`MapFlags`]).
    pub fn flags(mut self, flags: MapFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Folds a caller-chosen seed into every hash computation, to resist
    /// crafted-collision inputs. Defaults to `0`.
    pub fn seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    /// Builds the map, rooted at `baseptr` in the allocator's address space.
    /// `baseptr` must be 4-byte aligned; `0` is the conventional choice when
    /// the allocator returns ordinary process addresses (the default
    /// [`HeapOps`] allocator does).
    pub fn build(self, baseptr: usize) -> Result<Map<A>> {
        if baseptr % 4 != 0 {
            return Err(Error::Misaligned(baseptr));
        }
        Map::create(baseptr, self.ops, self.flags, self.seed)
    }
}
