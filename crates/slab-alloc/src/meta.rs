//! Allocator over a numeric offset space.
//!
//! The managed resource lives elsewhere (a GPU buffer, a file, a vertex
//! pool), so nothing is written inline: blocks carry no header and the
//! allocator only hands out offsets. Allocation follows the same
//! largest-block-only policy as [`ArenaAllocator`](crate::ArenaAllocator).

use alloc::{boxed::Box, collections::BTreeMap};

use block_heap::{Block, BlockId, BlockState, BlockTable, DEFAULT_CAPACITY, TableStats};
use log::{debug, trace, warn};
use snafu::{OptionExt as _, ResultExt as _, ensure};

use crate::{
    WORD_SIZE,
    align::{align_down, align_up},
    error::{
        AllocError, CapacityExhaustedSnafu, CheckError, FreeError, InitError,
        InsufficientSpaceSnafu, InvalidAlignmentSnafu, OffsetIndexSnafu, TableSnafu,
        TooSmallSnafu, UnknownOffsetSnafu,
    },
};

/// Size-heap allocator handing out offsets into `0..size`.
///
/// # Examples
///
/// ```
/// use slab_alloc::MetaAllocator;
///
/// let mut meta = MetaAllocator::new(1000)?;
///
/// // Vertex strides need not be powers of two.
/// let a = meta.allocate_aligned(12, 100)?;
/// let b = meta.allocate_aligned(12, 50)?;
/// assert_eq!((a, b), (900, 840));
///
/// meta.free(a)?;
/// meta.free(b)?;
/// assert_eq!(meta.stats().largest_free, 1000);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct MetaAllocator<const CAP: usize = DEFAULT_CAPACITY> {
    table: Box<BlockTable<CAP>>,
    live: BTreeMap<usize, BlockId>,
    size: usize,
}

impl MetaAllocator {
    /// Creates an allocator with the default block capacity over `0..size`.
    pub fn new(size: usize) -> Result<Self, InitError> {
        Self::init(size)
    }
}

impl<const CAP: usize> MetaAllocator<CAP> {
    /// Creates an allocator over `0..size` seeded with one free block.
    pub fn init(size: usize) -> Result<Self, InitError> {
        ensure!(size > 0, TooSmallSnafu { size, required: 1_usize });
        debug!("meta allocator created over {size} units, capacity {CAP}");
        Ok(Self {
            table: Box::new(BlockTable::with_root(0, size)),
            live: BTreeMap::new(),
            size,
        })
    }

    /// Allocates `size` units at [`WORD_SIZE`] alignment.
    ///
    /// If the largest block matches the request exactly it is handed out
    /// whole, whatever its alignment.
    pub fn allocate(&mut self, size: usize) -> Result<usize, AllocError> {
        let size = size.max(1);
        let (root_id, root) = self.candidate(size)?;
        if size == root.size() {
            return Ok(self.take_whole(root_id, root.offset()));
        }
        self.carve(root_id, root, size, WORD_SIZE)
    }

    /// Allocates `size` units starting at a multiple of `alignment`.
    ///
    /// Any non-zero alignment is accepted. When the request plus the padding
    /// needed to align the largest block's start fills that block exactly,
    /// the padding is handed to the block in front of it.
    pub fn allocate_aligned(&mut self, alignment: usize, size: usize) -> Result<usize, AllocError> {
        ensure!(alignment > 0, InvalidAlignmentSnafu { alignment });
        let size = size.max(1);
        let (root_id, root) = self.candidate(size)?;

        let aligned_start = align_up(root.offset(), alignment).context(InsufficientSpaceSnafu {
            requested: size,
            available: root.size(),
        })?;
        let needed = (aligned_start - root.offset()).saturating_add(size);
        ensure!(
            needed <= root.size(),
            InsufficientSpaceSnafu {
                requested: needed,
                available: root.size(),
            }
        );

        if needed == root.size() {
            let pad = aligned_start - root.offset();
            ensure!(
                self.table.shift_start(root_id, pad),
                InsufficientSpaceSnafu {
                    requested: needed,
                    available: root.size(),
                }
            );
            trace!("folded {pad} units of padding in front of {root_id}");
            return Ok(self.take_whole(root_id, aligned_start));
        }
        self.carve(root_id, root, size, alignment)
    }

    /// Releases the allocation starting at `offset`.
    pub fn free(&mut self, offset: usize) -> Result<(), FreeError> {
        let Some(id) = self.live.remove(&offset) else {
            warn!("rejected free at {offset}: no live allocation starts there");
            return UnknownOffsetSnafu { offset }.fail();
        };
        let survivor = self
            .table
            .release(id, 0)
            .context(UnknownOffsetSnafu { offset })?;
        trace!("freed {id} at {offset}, now covered by {survivor}");
        Ok(())
    }

    /// Number of units managed.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of live allocations.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn table(&self) -> &BlockTable<CAP> {
        &self.table
    }

    #[must_use]
    pub fn stats(&self) -> TableStats {
        self.table.stats()
    }

    /// Verifies the table invariants and the offset index.
    pub fn check(&self) -> Result<(), CheckError> {
        self.table.validate(0).context(TableSnafu)?;
        for (&offset, &id) in &self.live {
            let indexed = self
                .table
                .get(id)
                .is_some_and(|block| !block.is_free() && block.offset() == offset);
            ensure!(indexed, OffsetIndexSnafu { offset });
        }
        if let Some((_, block)) = self
            .table
            .iter()
            .find(|(id, block)| !block.is_free() && self.live.get(&block.offset()) != Some(id))
        {
            return OffsetIndexSnafu {
                offset: block.offset(),
            }
            .fail();
        }
        Ok(())
    }

    fn candidate(&self, size: usize) -> Result<(BlockId, Block), AllocError> {
        let (root_id, root) = self
            .table
            .root_block()
            .map(|(id, block)| (id, *block))
            .context(InsufficientSpaceSnafu {
                requested: size,
                available: 0_usize,
            })?;
        if !root.is_free() || size > root.size() {
            debug!(
                "allocation of {size} refused: largest block {root_id} is {} with {} units",
                root.state(),
                root.size()
            );
            let available = if root.is_free() { root.size() } else { 0 };
            return InsufficientSpaceSnafu {
                requested: size,
                available,
            }
            .fail();
        }
        ensure!(
            !self.table.is_full(),
            CapacityExhaustedSnafu { capacity: CAP }
        );
        Ok((root_id, root))
    }

    /// Carves an aligned block off the tail of `root`.
    fn carve(
        &mut self,
        root_id: BlockId,
        root: Block,
        size: usize,
        alignment: usize,
    ) -> Result<usize, AllocError> {
        let start = align_down(root.end() - size, alignment);
        ensure!(
            start >= root.offset(),
            InsufficientSpaceSnafu {
                requested: size,
                available: root.size(),
            }
        );
        if start == root.offset() {
            return Ok(self.take_whole(root_id, start));
        }

        let carved = self
            .table
            .split_tail(root_id, start, 0)
            .context(CapacityExhaustedSnafu { capacity: CAP })?;
        self.live.insert(start, carved);
        Ok(start)
    }

    fn take_whole(&mut self, id: BlockId, offset: usize) -> usize {
        self.table.set_state(id, BlockState::Allocated);
        self.live.insert(offset, id);
        trace!("allocated whole block {id} at {offset}");
        offset
    }
}

impl<const CAP: usize> Drop for MetaAllocator<CAP> {
    fn drop(&mut self) {
        debug!(
            "meta allocator over {} units dropped with {} live allocations",
            self.size,
            self.live.len()
        );
    }
}
