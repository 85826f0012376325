//! Error type for the handful of preconditions this crate enforces itself.
//!
//! Absence (`lookup`/`remove` miss) is not modeled here; it is part of the
//! normal `Option` return contract of [`crate::Map`]. See `ipld_hamt`'s own
//! `error.rs` for the sibling pattern of a small, flat error enum living
//! alongside an `Option`-based miss contract.

use thiserror::Error;

/// Failure modes that are this crate's own to report.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A base pointer, or an allocator-returned offset, was not aligned to
    /// the minimum 4-byte boundary the tagging scheme requires.
    #[error("address {0:#x} is not 4-byte aligned")]
    Misaligned(usize),

    /// The allocator vtable reported failure (returned a zero offset).
    #[error("allocator returned no memory for a {0}-byte request")]
    AllocFailed(usize),
}

pub type Result<T> = core::result::Result<T, Error>;
