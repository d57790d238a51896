//! Block allocators driven by a size-ordered max-heap.
//!
//! Two allocators share the bookkeeping of [`block_heap::BlockTable`]:
//!
//! - [`ArenaAllocator`] manages the bytes of a caller-supplied region. Each
//!   block payload is preceded by an inline header, and allocations are
//!   returned as [`ArenaHandle`]s that give access to the payload.
//! - [`MetaAllocator`] manages a purely numeric offset space, such as a GPU
//!   buffer or a vertex pool, and hands out offsets. It accepts any non-zero
//!   alignment.
//!
//! Both allocators serve a request from the largest tracked block only,
//! carving from its tail, and merge neighbouring free blocks on release.
//! Neither grows: a full block table or an undersized largest block is
//! reported as an [`AllocError`].
//!
//! # Examples
//!
//! ```
//! use slab_alloc::{AllocError, ArenaAllocator};
//!
//! let mut region = [0_u8; 512];
//! let mut arena = ArenaAllocator::new(&mut region)?;
//!
//! let big = arena.allocate(300)?;
//! // The largest block is now allocated, so even a small request fails.
//! assert!(matches!(
//!     arena.allocate(8),
//!     Err(AllocError::InsufficientSpace { .. })
//! ));
//!
//! arena.free(big)?;
//! arena.check()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub use block_heap::{BlockId, BlockState, BlockTable, DEFAULT_CAPACITY, TableStats};

pub use self::{
    arena::{ArenaAllocator, ArenaHandle},
    error::{AllocError, CheckError, FreeError, InitError},
    header::{ARENA_HEADER_SIZE, BLOCK_HEADER_SIZE},
    meta::MetaAllocator,
};

pub mod align;
mod arena;
mod error;
mod header;
mod meta;

/// Natural alignment of block offsets and arena payload sizes.
pub const WORD_SIZE: usize = size_of::<u64>();
