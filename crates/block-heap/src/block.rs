/// Whether a tracked range is available for allocation.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    derive_more::Display,
    derive_more::IsVariant,
)]
pub enum BlockState {
    #[default]
    #[display("free")]
    Free,
    #[display("allocated")]
    Allocated,
}

/// Identifier of a block record inside a [`BlockTable`](crate::BlockTable).
///
/// The generation is bumped every time a record is retired, so an id kept
/// across a coalesce no longer resolves once its block has been absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("#{index}@{generation}")]
pub struct BlockId {
    index: usize,
    generation: u32,
}

impl BlockId {
    pub(crate) fn new(index: usize, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Position of the record in the table's record pool.
    #[must_use]
    pub fn index(self) -> usize {
        self.index
    }

    #[must_use]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// One tracked range, free or allocated.
///
/// `prev`/`next` thread every block of a table in ascending offset order.
/// They are plain record indices and never own anything.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub(crate) state: BlockState,
    pub(crate) size: usize,
    pub(crate) offset: usize,
    pub(crate) heap_index: usize,
    pub(crate) prev: Option<usize>,
    pub(crate) next: Option<usize>,
}

impl Block {
    #[must_use]
    pub fn state(&self) -> BlockState {
        self.state
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        self.state.is_free()
    }

    /// Length of the range, excluding any header.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// One past the last unit of the range.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// 1-based slot currently holding this block in the size heap.
    #[must_use]
    pub fn heap_index(&self) -> usize {
        self.heap_index
    }
}
