//! Inline headers stored in an arena region.
//!
//! ```text
//! 0                      ARENA_HEADER_SIZE
//! ┌──────────────────────┬──────────────┬─────────────┬──────────────┬─────────
//! │ ArenaHeader          │ BlockHeader  │ payload ... │ BlockHeader  │ payload
//! └──────────────────────┴──────────────┴─────────────┴──────────────┴─────────
//!                                       ^ block offset               ^ block offset
//! ```
//!
//! Headers are accessed with unaligned reads and writes, so the region
//! itself carries no alignment requirement.

use block_heap::{Block, BlockId};
use dataview::Pod;
use platform_cast::CastFrom as _;

use crate::{WORD_SIZE, align::align_up};

const ARENA_MAGIC: u64 = 0x6172_656e_615f_7631;
const BLOCK_MAGIC: u32 = 0xb10c_4ead;

/// Bytes reserved at the start of an arena region for the arena header.
pub const ARENA_HEADER_SIZE: usize = word_aligned(size_of::<ArenaHeader>());

/// Bytes reserved in front of every block payload for its header.
pub const BLOCK_HEADER_SIZE: usize = word_aligned(size_of::<BlockHeader>());

const fn word_aligned(size: usize) -> usize {
    match align_up(size, WORD_SIZE) {
        Some(size) => size,
        None => panic!("header size overflow"),
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod)]
pub(crate) struct ArenaHeader {
    magic: u64,
    block_capacity: u64,
    usable_len: u64,
}

impl ArenaHeader {
    pub(crate) fn new(block_capacity: usize, usable_len: usize) -> Self {
        Self {
            magic: ARENA_MAGIC,
            block_capacity: u64::cast_from(block_capacity),
            usable_len: u64::cast_from(usable_len),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod)]
pub(crate) struct BlockHeader {
    magic: u32,
    generation: u32,
    index: u64,
    arena: u64,
    offset: u64,
}

impl BlockHeader {
    pub(crate) fn new(arena: u64, id: BlockId, block: &Block) -> Self {
        Self {
            magic: BLOCK_MAGIC,
            generation: id.generation(),
            index: u64::cast_from(id.index()),
            arena,
            offset: u64::cast_from(block.offset()),
        }
    }

    /// Returns `true` if the header was written for block `id` of `arena`.
    pub(crate) fn belongs_to(&self, arena: u64, id: BlockId) -> bool {
        self.magic == BLOCK_MAGIC
            && self.arena == arena
            && self.generation == id.generation()
            && self.index == u64::cast_from(id.index())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use block_heap::{BlockState, BlockTable};
    use dataview::DataView;

    use super::*;

    #[test]
    fn test_header_sizes_are_word_multiples() {
        assert_eq!(ARENA_HEADER_SIZE % WORD_SIZE, 0);
        assert_eq!(BLOCK_HEADER_SIZE % WORD_SIZE, 0);
        assert_eq!(ARENA_HEADER_SIZE, 24);
        assert_eq!(BLOCK_HEADER_SIZE, 32);
    }

    #[test]
    fn test_block_header_unaligned_round_trip() {
        let table = BlockTable::<2>::with_root(64, 128);
        let id = table.root().unwrap();
        let header = BlockHeader::new(7, id, table.get(id).unwrap());

        let mut bytes = [0_u8; 64];
        let view = DataView::from_mut(&mut bytes[..]);
        view.write(3, &header);
        let read: BlockHeader = view.read(3);
        assert_eq!(read, header);
        assert!(read.belongs_to(7, id));
    }

    #[test]
    fn test_block_header_rejects_other_block_or_arena() {
        let mut table = BlockTable::<4>::with_root(0, 128);
        let root = table.root().unwrap();
        let other = table.split_tail(root, 64, 0).unwrap();
        table.set_state(other, BlockState::Allocated);

        let header = BlockHeader::new(1, root, table.get(root).unwrap());
        assert!(header.belongs_to(1, root));
        assert!(!header.belongs_to(1, other));
        assert!(!header.belongs_to(2, root));
    }

    #[test]
    fn test_arena_header_fields() {
        let header = ArenaHeader::new(512, 4096);
        assert_eq!(header.magic, ARENA_MAGIC);
        assert_eq!(header.block_capacity, 512);
        assert_eq!(header.usable_len, 4096);
    }
}
