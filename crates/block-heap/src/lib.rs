//! Fixed-capacity block table: a size-ordered max-heap plus an
//! address-ordered chain over the same block records.
//!
//! A [`BlockTable`] tracks the ranges of one address space, free or
//! allocated. Two indices are kept over the same records:
//!
//! - **Size heap**: an array-backed max-heap ordered by block size. Slot 1
//!   always holds the largest tracked block, so the best allocation candidate
//!   is found in O(1) and any block is removed or resized in O(log n).
//! - **Address chain**: a doubly linked list threaded through the records in
//!   ascending offset order. Consecutive blocks are exactly adjacent, which
//!   makes neighbour lookup for coalescing O(1).
//!
//! Records live in a fixed pool of `CAP` entries and are named by
//! generational [`BlockId`]s. The table never touches the tracked space
//! itself; callers describe per-block header space with an `overhead` value
//! passed to [`split_tail`](BlockTable::split_tail),
//! [`release`](BlockTable::release) and [`validate`](BlockTable::validate).
//!
//! # Examples
//!
//! ```
//! use block_heap::{BlockState, BlockTable};
//!
//! let mut table = BlockTable::<8>::with_root(0, 100);
//! let root = table.root().unwrap();
//!
//! // Carve the last 30 units off the root.
//! let tail = table.split_tail(root, 70, 0).unwrap();
//! assert_eq!(table.get(root).unwrap().size(), 70);
//! assert_eq!(table.get(tail).unwrap().state(), BlockState::Allocated);
//!
//! // Releasing the tail merges it back into its free neighbour.
//! let merged = table.release(tail, 0).unwrap();
//! assert_eq!(merged, root);
//! assert_eq!(table.get(root).unwrap().size(), 100);
//! assert_eq!(table.len(), 1);
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use snafu::Snafu;
use snafu_utils::Location;

pub use self::{
    block::{Block, BlockId, BlockState},
    table::{BlockTable, HeapIter, Iter, TableStats},
};

mod block;
mod heap;
mod table;

/// Number of block records a table holds unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 512;

/// Invariant violations reported by [`BlockTable::validate`] and
/// [`BlockTable::validate_heap`].
#[derive(Debug, Snafu)]
pub enum TableError {
    #[snafu(display(
        "heap order violated at slot {slot}: parent size {parent_size} < size {size}"
    ))]
    HeapOrder {
        slot: usize,
        parent_size: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block in slot {slot} records heap index {recorded}"))]
    HeapIndex {
        slot: usize,
        recorded: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("address chain gap: block starts at {offset}, expected {expected}"))]
    ChainGap {
        offset: usize,
        expected: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("broken back link at offset {offset}"))]
    ChainLink {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("address chain links {linked} blocks, heap tracks {tracked}"))]
    ChainLength {
        linked: usize,
        tracked: usize,
        #[snafu(implicit)]
        location: Location,
    },
}
