//! Allocator over a caller-supplied byte region.
//!
//! # Algorithm
//!
//! Every byte range of the region is tracked by a block in a
//! [`BlockTable`]. Allocation only ever looks at the table's root, the
//! largest tracked block:
//!
//! - if the root is allocated or too small, the request fails, even when a
//!   smaller free block elsewhere could serve it;
//! - otherwise the request is carved off the **tail** of the root, or the
//!   whole root is handed out when the leftover could not hold another
//!   header plus one word.
//!
//! This is tuned for arena workloads where one large untouched region
//! dominates and fragmentation is resolved by coalescing on release rather
//! than by searching.
//!
//! # Memory Layout
//!
//! Each block payload is preceded by a [`BLOCK_HEADER_SIZE`]-byte header
//! naming the arena and the block record it belongs to; the region starts
//! with an [`ARENA_HEADER_SIZE`]-byte arena header. Block offsets are
//! payload offsets relative to the region start and are always multiples
//! of [`WORD_SIZE`].

use core::sync::atomic::{AtomicUsize, Ordering};

use block_heap::{Block, BlockId, BlockState, BlockTable, DEFAULT_CAPACITY, TableStats};
use dataview::DataView;
use log::{debug, trace, warn};
use platform_cast::CastFrom as _;
use snafu::{OptionExt as _, ResultExt as _, ensure};

use crate::{
    WORD_SIZE,
    align::{align_down, align_up},
    error::{
        AllocError, CapacityExhaustedSnafu, CheckError, CorruptedArenaHeaderSnafu,
        CorruptedBlockHeaderSnafu, CorruptedHeaderSnafu, FreeError, InitError,
        InsufficientSpaceSnafu, RegionCoverageSnafu, StaleHandleSnafu, TableSnafu,
        TooSmallSnafu,
    },
    header::{ARENA_HEADER_SIZE, ArenaHeader, BLOCK_HEADER_SIZE, BlockHeader},
};

/// Source of per-arena tags. Tags are never reused within a process.
static NEXT_ARENA_TAG: AtomicUsize = AtomicUsize::new(1);

/// A live allocation returned by [`ArenaAllocator::allocate`].
///
/// The handle is neither `Clone` nor `Copy`: [`ArenaAllocator::free`]
/// consumes it, so a block cannot be released twice through the same handle.
/// It records the arena that issued it; other arenas reject it.
#[must_use = "dropping a handle leaks its block until the arena is discarded"]
#[derive(Debug, PartialEq, Eq)]
pub struct ArenaHandle {
    arena: u64,
    id: BlockId,
    offset: usize,
    size: usize,
}

impl ArenaHandle {
    /// Block record backing the allocation.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Offset of the payload from the start of the region.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Requested size of the payload in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Size-heap allocator managing the bytes of one borrowed region.
///
/// `CAP` bounds the number of blocks, free or allocated, tracked at once.
///
/// # Examples
///
/// ```
/// use slab_alloc::ArenaAllocator;
///
/// let mut region = vec![0_u8; 4096];
/// let mut arena = ArenaAllocator::new(&mut region)?;
///
/// let first = arena.allocate(100)?;
/// let second = arena.allocate(200)?;
/// // Blocks are carved from the tail, so later allocations sit lower.
/// assert!(second.offset() < first.offset());
///
/// arena.bytes_mut(&first).unwrap().fill(0xab);
/// assert!(arena.bytes(&first).unwrap().iter().all(|&b| b == 0xab));
///
/// arena.free(first)?;
/// arena.free(second)?;
/// assert_eq!(arena.stats().blocks, 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct ArenaAllocator<'a, const CAP: usize = DEFAULT_CAPACITY> {
    tag: u64,
    region: &'a mut [u8],
    table: BlockTable<CAP>,
}

impl<'a> ArenaAllocator<'a> {
    /// Creates an allocator with the default block capacity over `region`.
    pub fn new(region: &'a mut [u8]) -> Result<Self, InitError> {
        Self::init(region)
    }
}

impl<'a, const CAP: usize> ArenaAllocator<'a, CAP> {
    /// Creates an allocator over `region`.
    ///
    /// The usable length is the region length rounded down to [`WORD_SIZE`].
    /// It must hold the arena header, one block header and one word of
    /// payload. The whole remaining space becomes a single free block.
    pub fn init(region: &'a mut [u8]) -> Result<Self, InitError> {
        let usable = align_down(region.len(), WORD_SIZE);
        let first_offset = ARENA_HEADER_SIZE + BLOCK_HEADER_SIZE;
        let required = first_offset + WORD_SIZE;
        ensure!(
            usable >= required,
            TooSmallSnafu {
                size: region.len(),
                required,
            }
        );

        let table = BlockTable::with_root(first_offset, usable - first_offset);
        let tag = u64::cast_from(NEXT_ARENA_TAG.fetch_add(1, Ordering::Relaxed));
        let mut arena = Self { tag, region, table };
        DataView::from_mut(&mut *arena.region).write(0, &ArenaHeader::new(CAP, usable));
        if let Some(root) = arena.table.root() {
            arena.write_header(root);
        }

        debug!(
            "arena {tag} created: {usable} usable bytes, first block {first_offset}+{}, capacity {CAP}",
            usable - first_offset
        );
        Ok(arena)
    }

    /// Allocates `size` bytes from the largest tracked block.
    ///
    /// A `size` of zero is served as one byte. Fails with
    /// [`AllocError::InsufficientSpace`] when the largest block is allocated
    /// or too small, and with [`AllocError::CapacityExhausted`] when no
    /// further block can be recorded.
    pub fn allocate(&mut self, size: usize) -> Result<ArenaHandle, AllocError> {
        let size = size.max(1);
        let (root_id, root) = self.candidate(size)?;

        let aligned = align_up(size, WORD_SIZE).context(InsufficientSpaceSnafu {
            requested: size,
            available: root.size(),
        })?;
        let split_threshold = aligned
            .saturating_add(BLOCK_HEADER_SIZE)
            .saturating_add(WORD_SIZE);

        let id = if root.size() < split_threshold {
            self.table.set_state(root_id, BlockState::Allocated);
            self.write_header(root_id);
            trace!("allocated whole block {root_id} at {} for {size}", root.offset());
            root_id
        } else {
            let start = root.end() - aligned;
            let carved = self
                .table
                .split_tail(root_id, start, BLOCK_HEADER_SIZE)
                .context(CapacityExhaustedSnafu { capacity: CAP })?;
            self.write_header(root_id);
            self.write_header(carved);
            carved
        };

        let offset = self.table.get(id).map_or(root.offset(), Block::offset);
        Ok(ArenaHandle {
            arena: self.tag,
            id,
            offset,
            size,
        })
    }

    /// Releases an allocation and merges it with free neighbours.
    ///
    /// The block is always marked free, also when neither neighbour is free;
    /// it becomes allocatable again once it is the largest tracked block.
    ///
    /// Handles issued by another arena, or naming a block that is no longer
    /// live, are rejected with [`FreeError::StaleHandle`]. If the header in
    /// front of the payload was overwritten, the free is rejected with
    /// [`FreeError::CorruptedHeader`]; the handle is consumed either way, so
    /// such a block stays allocated until the arena is discarded and
    /// [`check`](Self::check) keeps reporting it.
    pub fn free(&mut self, handle: ArenaHandle) -> Result<(), FreeError> {
        let id = handle.id;
        let offset = handle.offset;
        if self.live_block(&handle).is_none() {
            warn!("rejected free of {id} at {offset}: not a live allocation of this arena");
            return StaleHandleSnafu { id }.fail();
        }
        if !self.header_belongs_to(id, offset) {
            warn!("rejected free of {id} at {offset}: block header corrupted");
            return CorruptedHeaderSnafu { offset }.fail();
        }

        let survivor = self
            .table
            .release(id, BLOCK_HEADER_SIZE)
            .context(StaleHandleSnafu { id })?;
        self.write_header(survivor);
        trace!("freed {id} at {offset}, now covered by {survivor}");
        Ok(())
    }

    /// Payload bytes of a live allocation.
    #[must_use]
    pub fn bytes(&self, handle: &ArenaHandle) -> Option<&[u8]> {
        self.live_block(handle)?;
        self.region.get(handle.offset..handle.offset + handle.size)
    }

    /// Mutable payload bytes of a live allocation.
    #[must_use]
    pub fn bytes_mut(&mut self, handle: &ArenaHandle) -> Option<&mut [u8]> {
        self.live_block(handle)?;
        self.region.get_mut(handle.offset..handle.offset + handle.size)
    }

    /// Length of the borrowed region in bytes.
    #[must_use]
    pub fn region_len(&self) -> usize {
        self.region.len()
    }

    #[must_use]
    pub fn table(&self) -> &BlockTable<CAP> {
        &self.table
    }

    #[must_use]
    pub fn stats(&self) -> TableStats {
        self.table.stats()
    }

    /// Verifies the arena header, every block header and the table
    /// invariants.
    pub fn check(&self) -> Result<(), CheckError> {
        let usable = align_down(self.region.len(), WORD_SIZE);
        let header = DataView::from(&*self.region).try_read::<ArenaHeader>(0);
        ensure!(
            header == Some(ArenaHeader::new(CAP, usable)),
            CorruptedArenaHeaderSnafu
        );

        self.table.validate(BLOCK_HEADER_SIZE).context(TableSnafu)?;
        for (id, block) in &self.table {
            ensure!(
                self.header_belongs_to(id, block.offset()),
                CorruptedBlockHeaderSnafu {
                    offset: block.offset()
                }
            );
        }
        let end = self.table.iter().last().map_or(0, |(_, b)| b.end());
        ensure!(end == usable, RegionCoverageSnafu { end, usable });
        Ok(())
    }

    /// The root, if it is free and the table can record another block.
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
                "allocation of {size} refused: largest block {root_id} is {} with {} bytes",
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

    fn live_block(&self, handle: &ArenaHandle) -> Option<&Block> {
        if handle.arena != self.tag {
            return None;
        }
        self.table
            .get(handle.id)
            .filter(|block| !block.is_free() && block.offset() == handle.offset)
    }

    fn header_belongs_to(&self, id: BlockId, offset: usize) -> bool {
        offset
            .checked_sub(BLOCK_HEADER_SIZE)
            .and_then(|at| DataView::from(&*self.region).try_read::<BlockHeader>(at))
            .is_some_and(|header| header.belongs_to(self.tag, id))
    }

    fn write_header(&mut self, id: BlockId) {
        let Some(block) = self.table.get(id) else {
            return;
        };
        let header = BlockHeader::new(self.tag, id, block);
        DataView::from_mut(&mut *self.region).write(block.offset() - BLOCK_HEADER_SIZE, &header);
    }
}
