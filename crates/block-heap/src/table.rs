use arrayvec::ArrayVec;
use log::trace;
use snafu::ensure;

use crate::{
    Block, BlockId, BlockState, ChainGapSnafu, ChainLengthSnafu, ChainLinkSnafu,
    DEFAULT_CAPACITY, HeapIndexSnafu, HeapOrderSnafu, TableError,
};

#[derive(Debug, Default, Clone, Copy)]
struct Entry {
    generation: u32,
    live: bool,
    block: Block,
}

/// Summary of the blocks tracked by a table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    /// Number of tracked blocks, free or allocated.
    pub blocks: usize,
    pub free_blocks: usize,
    /// Sum of the sizes of all free blocks, headers excluded.
    pub free_size: usize,
    pub largest_free: usize,
}

/// Block records of one address space, indexed by size and by address.
///
/// See the [crate documentation](crate) for the structure. All operations
/// that can run out of records report it through their return value; none of
/// them allocate.
#[derive(Debug, Clone)]
pub struct BlockTable<const CAP: usize = DEFAULT_CAPACITY> {
    entries: ArrayVec<Entry, CAP>,
    vacant: ArrayVec<usize, CAP>,
    pub(crate) heap: ArrayVec<usize, CAP>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<const CAP: usize> Default for BlockTable<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAP: usize> BlockTable<CAP> {
    /// Maximum number of blocks the table tracks at once.
    pub const CAPACITY: usize = CAP;

    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        const { assert!(CAP > 0, "block table needs at least one record") };
        Self {
            entries: ArrayVec::new_const(),
            vacant: ArrayVec::new_const(),
            heap: ArrayVec::new_const(),
            head: None,
            tail: None,
        }
    }

    /// Creates a table tracking a single free block `offset..offset + size`.
    ///
    /// ```
    /// use block_heap::BlockTable;
    ///
    /// let table = BlockTable::<4>::with_root(16, 240);
    /// let root = table.get(table.root().unwrap()).unwrap();
    /// assert!(root.is_free());
    /// assert_eq!((root.offset(), root.size()), (16, 240));
    /// ```
    #[must_use]
    pub fn with_root(offset: usize, size: usize) -> Self {
        let mut table = Self::new();
        let root = table.insert(BlockState::Free, offset, size);
        debug_assert!(root.is_some());
        table
    }

    /// Number of tracked blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Returns `true` if no further block can be recorded.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.heap.is_full()
    }

    /// The largest tracked block, free or not.
    #[must_use]
    pub fn root(&self) -> Option<BlockId> {
        self.at_slot(1)
    }

    /// The root together with its record.
    #[must_use]
    pub fn root_block(&self) -> Option<(BlockId, &Block)> {
        let index = *self.heap.first()?;
        Some((self.id_of(index), self.block(index)))
    }

    /// The block currently held by the 1-based heap `slot`.
    #[must_use]
    pub fn at_slot(&self, slot: usize) -> Option<BlockId> {
        let index = *self.heap.get(slot.checked_sub(1)?)?;
        Some(self.id_of(index))
    }

    #[must_use]
    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.index_of(id).map(|index| self.block(index))
    }

    /// The block with the lowest offset.
    #[must_use]
    pub fn head(&self) -> Option<BlockId> {
        self.head.map(|index| self.id_of(index))
    }

    /// The block immediately before `id` in address order.
    #[must_use]
    pub fn prev(&self, id: BlockId) -> Option<BlockId> {
        let index = self.index_of(id)?;
        self.block(index).prev.map(|prev| self.id_of(prev))
    }

    /// The block immediately after `id` in address order.
    #[must_use]
    pub fn next(&self, id: BlockId) -> Option<BlockId> {
        let index = self.index_of(id)?;
        self.block(index).next.map(|next| self.id_of(next))
    }

    /// Records a new block at the end of the address chain.
    ///
    /// The block enters the heap at the last slot and is sifted upward.
    /// Returns `None` if the table is full.
    pub fn insert(&mut self, state: BlockState, offset: usize, size: usize) -> Option<BlockId> {
        if self.is_full() {
            return None;
        }
        let index = self.acquire(Block {
            state,
            size,
            offset,
            ..Block::default()
        })?;
        match self.tail {
            Some(tail) => self.link_after(tail, index),
            None => {
                self.head = Some(index);
                self.tail = Some(index);
            }
        }
        self.heap_push(index);
        Some(self.id_of(index))
    }

    /// Removes the block held by the 1-based heap `slot` from the table.
    ///
    /// The block is unlinked from the address chain and its record retired;
    /// its former neighbours are not merged.
    pub fn remove_at(&mut self, slot: usize) -> Option<Block> {
        let index = self.heap_remove(slot)?;
        self.unlink(index);
        let block = *self.block(index);
        self.retire(index);
        Some(block)
    }

    /// Changes the size of a block in place, keeping its offset.
    ///
    /// Returns `false` if `id` does not name a tracked block.
    pub fn resize(&mut self, id: BlockId, size: usize) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        self.heap_resize(index, size);
        true
    }

    /// Changes the state of a block without touching its neighbours.
    pub fn set_state(&mut self, id: BlockId, state: BlockState) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        self.block_mut(index).state = state;
        true
    }

    /// Carves the tail `start..end` off block `id` as a new allocated block.
    ///
    /// `overhead` units in front of `start` are reserved for the new block's
    /// header; the split block keeps its offset and ends where that
    /// header begins. The new block is linked right after `id`.
    ///
    /// Returns `None` if the table is full or `start` does not leave room
    /// for the header inside the block.
    pub fn split_tail(&mut self, id: BlockId, start: usize, overhead: usize) -> Option<BlockId> {
        let index = self.index_of(id)?;
        let Block { offset, size, .. } = *self.block(index);
        let end = offset.checked_add(size)?;
        let remaining = start.checked_sub(overhead)?.checked_sub(offset)?;
        if start > end || self.is_full() {
            return None;
        }

        let carved = self.acquire(Block {
            state: BlockState::Allocated,
            size: end - start,
            offset: start,
            ..Block::default()
        })?;
        self.heap_resize(index, remaining);
        self.link_after(index, carved);
        self.heap_push(carved);

        let carved = self.id_of(carved);
        trace!(
            "split {id}: kept {offset}+{remaining}, carved {carved} at {start}+{}",
            end - start
        );
        Some(carved)
    }

    /// Marks block `id` free and merges it with free address neighbours.
    ///
    /// A free successor is absorbed first, then a free predecessor absorbs
    /// the result. Each merge also reclaims `overhead` header units. Returns
    /// the id of the block that now covers the released range, or `None` if
    /// `id` is stale or already free.
    pub fn release(&mut self, id: BlockId, overhead: usize) -> Option<BlockId> {
        let mut index = self.index_of(id)?;
        if self.block(index).is_free() {
            return None;
        }
        self.block_mut(index).state = BlockState::Free;

        if let Some(next) = self.block(index).next.filter(|&n| self.block(n).is_free()) {
            trace!("merge {} into {id}", self.id_of(next));
            self.absorb_next(index, overhead);
        }
        if let Some(prev) = self.block(index).prev.filter(|&p| self.block(p).is_free()) {
            trace!("merge {} into {}", self.id_of(index), self.id_of(prev));
            self.absorb_next(prev, overhead);
            index = prev;
        }

        Some(self.id_of(index))
    }

    /// Moves the start of block `id` forward by `pad` units.
    ///
    /// The skipped units are handed to the previous block so the chain stays
    /// gapless. Returns `false` if `id` is stale or smaller than `pad`.
    pub fn shift_start(&mut self, id: BlockId, pad: usize) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let block = *self.block(index);
        let Some(size) = block.size.checked_sub(pad) else {
            return false;
        };
        if pad == 0 {
            return true;
        }

        if let Some(prev) = block.prev {
            let grown = self.block(prev).size + pad;
            self.heap_resize(prev, grown);
        }
        self.block_mut(index).offset += pad;
        self.heap_resize(index, size);
        true
    }

    /// Iterates blocks in ascending offset order.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, CAP> {
        Iter {
            table: self,
            cursor: self.head,
        }
    }

    /// Iterates blocks in heap slot order, starting at slot 1.
    #[must_use]
    pub fn heap_iter(&self) -> HeapIter<'_, CAP> {
        HeapIter {
            table: self,
            slots: self.heap.iter(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> TableStats {
        self.heap_iter()
            .map(|(_, block)| block)
            .fold(TableStats::default(), |mut stats, block| {
                stats.blocks += 1;
                if block.is_free() {
                    stats.free_blocks += 1;
                    stats.free_size += block.size;
                    stats.largest_free = stats.largest_free.max(block.size);
                }
                stats
            })
    }

    /// Checks the heap order and the `heap_index` of every slot.
    pub fn validate_heap(&self) -> Result<(), TableError> {
        for (pos, &index) in self.heap.iter().enumerate() {
            let slot = pos + 1;
            let block = self.block(index);
            ensure!(
                block.heap_index == slot,
                HeapIndexSnafu {
                    slot,
                    recorded: block.heap_index,
                }
            );
            if slot > 1 {
                let parent_size = self.block(self.heap[slot / 2 - 1]).size;
                ensure!(
                    parent_size >= block.size,
                    HeapOrderSnafu {
                        slot,
                        parent_size,
                        size: block.size,
                    }
                );
            }
        }
        Ok(())
    }

    /// Checks every table invariant.
    ///
    /// In addition to [`validate_heap`](Self::validate_heap), the address
    /// chain must link every tracked block exactly once, with each block
    /// starting `overhead` units after the end of its predecessor.
    pub fn validate(&self, overhead: usize) -> Result<(), TableError> {
        self.validate_heap()?;

        let mut linked = 0;
        let mut prev: Option<usize> = None;
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let block = self.block(index);
            ensure!(
                block.prev == prev,
                ChainLinkSnafu {
                    offset: block.offset
                }
            );
            if let Some(prev) = prev {
                let expected = self.block(prev).end() + overhead;
                ensure!(
                    block.offset == expected,
                    ChainGapSnafu {
                        offset: block.offset,
                        expected,
                    }
                );
            }
            linked += 1;
            ensure!(
                linked <= self.len(),
                ChainLengthSnafu {
                    linked,
                    tracked: self.len(),
                }
            );
            prev = Some(index);
            cursor = block.next;
        }
        ensure!(
            linked == self.len(),
            ChainLengthSnafu {
                linked,
                tracked: self.len(),
            }
        );
        Ok(())
    }

    fn index_of(&self, id: BlockId) -> Option<usize> {
        let entry = self.entries.get(id.index())?;
        (entry.live && entry.generation == id.generation()).then_some(id.index())
    }

    fn id_of(&self, index: usize) -> BlockId {
        BlockId::new(index, self.entries[index].generation)
    }

    pub(crate) fn block(&self, index: usize) -> &Block {
        &self.entries[index].block
    }

    pub(crate) fn block_mut(&mut self, index: usize) -> &mut Block {
        &mut self.entries[index].block
    }

    fn acquire(&mut self, block: Block) -> Option<usize> {
        if let Some(index) = self.vacant.pop() {
            let entry = &mut self.entries[index];
            entry.live = true;
            entry.block = block;
            return Some(index);
        }
        let index = self.entries.len();
        self.entries
            .try_push(Entry {
                generation: 0,
                live: true,
                block,
            })
            .ok()?;
        Some(index)
    }

    fn retire(&mut self, index: usize) {
        let entry = &mut self.entries[index];
        entry.live = false;
        entry.generation = entry.generation.wrapping_add(1);
        entry.block = Block::default();
        self.vacant.push(index);
    }

    fn link_after(&mut self, anchor: usize, index: usize) {
        let next = self.block(anchor).next;
        {
            let block = self.block_mut(index);
            block.prev = Some(anchor);
            block.next = next;
        }
        self.block_mut(anchor).next = Some(index);
        match next {
            Some(next) => self.block_mut(next).prev = Some(index),
            None => self.tail = Some(index),
        }
    }

    fn unlink(&mut self, index: usize) {
        let Block { prev, next, .. } = *self.block(index);
        match prev {
            Some(prev) => self.block_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.block_mut(next).prev = prev,
            None => self.tail = prev,
        }
        let block = self.block_mut(index);
        block.prev = None;
        block.next = None;
    }

    /// Block `index` takes over the range and header of its successor.
    fn absorb_next(&mut self, index: usize, overhead: usize) {
        let Some(next) = self.block(index).next else {
            return;
        };
        let absorbed = *self.block(next);
        self.unlink(next);
        self.heap_remove(absorbed.heap_index);
        self.retire(next);
        let size = self.block(index).size + overhead + absorbed.size;
        self.heap_resize(index, size);
    }
}

/// Address-order iterator returned by [`BlockTable::iter`].
pub struct Iter<'a, const CAP: usize> {
    table: &'a BlockTable<CAP>,
    cursor: Option<usize>,
}

impl<'a, const CAP: usize> Iterator for Iter<'a, CAP> {
    type Item = (BlockId, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let block = self.table.block(index);
        self.cursor = block.next;
        Some((self.table.id_of(index), block))
    }
}

impl<'a, const CAP: usize> IntoIterator for &'a BlockTable<CAP> {
    type Item = (BlockId, &'a Block);
    type IntoIter = Iter<'a, CAP>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Slot-order iterator returned by [`BlockTable::heap_iter`].
pub struct HeapIter<'a, const CAP: usize> {
    table: &'a BlockTable<CAP>,
    slots: core::slice::Iter<'a, usize>,
}

impl<'a, const CAP: usize> Iterator for HeapIter<'a, CAP> {
    type Item = (BlockId, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        let &index = self.slots.next()?;
        Some((self.table.id_of(index), self.table.block(index)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.slots.size_hint()
    }
}

impl<const CAP: usize> ExactSizeIterator for HeapIter<'_, CAP> {}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic sizes with plenty of duplicates and inversions.
    fn sizes(count: usize) -> Vec<usize> {
        let mut state = 0x2545_f491_u32;
        (0..count)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state % 97) as usize
            })
            .collect()
    }

    fn filled(count: usize) -> BlockTable<64> {
        let mut table = BlockTable::new();
        let mut offset = 0;
        for size in sizes(count) {
            table.insert(BlockState::Allocated, offset, size).unwrap();
            offset += size;
        }
        table
    }

    fn layout<const CAP: usize>(table: &BlockTable<CAP>) -> Vec<(usize, usize, bool)> {
        table
            .iter()
            .map(|(_, b)| (b.offset(), b.size(), b.is_free()))
            .collect()
    }

    #[test]
    fn test_insert_keeps_largest_at_root() {
        let table = filled(40);
        table.validate(0).unwrap();
        let largest = sizes(40).into_iter().max().unwrap();
        let root = table.get(table.root().unwrap()).unwrap();
        assert_eq!(root.size(), largest);
        assert_eq!(root.heap_index(), 1);
    }

    #[test]
    fn test_remove_at_every_position_keeps_heap_order() {
        let mut table = filled(48);
        // Remove from the middle, the end and the root in turn.
        while !table.is_empty() {
            let len = table.len();
            let slot = [len / 2 + 1, len, 1][len % 3];
            table.remove_at(slot).unwrap();
            table.validate_heap().unwrap();
        }
        assert!(table.head().is_none());
    }

    #[test]
    fn test_remove_at_relocated_block_sifts_up() {
        // Slot layout: 1:[100] 2:[10] 3:[90] 4:[5] 5:[6] 6:[80]
        let mut table = BlockTable::<8>::new();
        for (offset, size) in [(0, 100), (100, 10), (110, 90), (200, 5), (205, 6), (211, 80)] {
            table.insert(BlockState::Allocated, offset, size).unwrap();
        }
        let slot_of_80 = table
            .heap_iter()
            .position(|(_, b)| b.size() == 80)
            .unwrap()
            + 1;
        assert_eq!(slot_of_80, 6);
        // Removing slot 4 moves the 80-block below the 10-block.
        table.remove_at(4).unwrap();
        table.validate_heap().unwrap();
        assert_eq!(table.get(table.at_slot(2).unwrap()).unwrap().size(), 80);
    }

    #[test]
    fn test_remove_at_lone_left_child() {
        let mut table = BlockTable::<4>::new();
        for (offset, size) in [(0, 50), (50, 40), (90, 30)] {
            table.insert(BlockState::Free, offset, size).unwrap();
        }
        // The relocated 30-block has only a left child once the root is gone.
        table.remove_at(1).unwrap();
        table.validate_heap().unwrap();
        assert_eq!(table.get(table.root().unwrap()).unwrap().size(), 40);
    }

    #[test]
    fn test_remove_at_out_of_range() {
        let mut table = filled(4);
        assert!(table.remove_at(0).is_none());
        assert!(table.remove_at(5).is_none());
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_resize_grow_and_shrink() {
        let mut table = filled(32);
        let ids: Vec<_> = table.iter().map(|(id, _)| id).collect();
        for (n, id) in ids.iter().enumerate() {
            let size = if n % 2 == 0 { 500 + n } else { n % 3 };
            assert!(table.resize(*id, size));
            table.validate_heap().unwrap();
        }
        let root = table.get(table.root().unwrap()).unwrap();
        assert_eq!(root.size(), 500 + 30);
    }

    #[test]
    fn test_insert_full_table() {
        let mut table = BlockTable::<2>::new();
        assert!(table.insert(BlockState::Free, 0, 1).is_some());
        assert!(table.insert(BlockState::Free, 1, 1).is_some());
        assert!(table.is_full());
        assert!(table.insert(BlockState::Free, 2, 1).is_none());
    }

    #[test]
    fn test_split_tail_with_overhead() {
        let mut table = BlockTable::<4>::with_root(48, 464);
        let root = table.root().unwrap();
        let carved = table.split_tail(root, 312, 32).unwrap();

        assert_eq!(layout(&table), [(48, 232, true), (312, 200, false)]);
        assert_eq!(table.next(root), Some(carved));
        assert_eq!(table.prev(carved), Some(root));
        table.validate(32).unwrap();
    }

    #[test]
    fn test_split_tail_rejects_bad_start() {
        let mut table = BlockTable::<4>::with_root(0, 100);
        let root = table.root().unwrap();
        assert!(table.split_tail(root, 101, 0).is_none());
        assert!(table.split_tail(root, 10, 16).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_split_tail_full_table() {
        let mut table = BlockTable::<1>::with_root(0, 100);
        let root = table.root().unwrap();
        assert!(table.split_tail(root, 50, 0).is_none());
        assert_eq!(table.get(root).unwrap().size(), 100);
    }

    #[test]
    fn test_release_isolated_block_stays_tracked() {
        let mut table = BlockTable::<4>::with_root(0, 100);
        let root = table.root().unwrap();
        let a = table.split_tail(root, 60, 0).unwrap();
        table.set_state(root, BlockState::Allocated);

        assert_eq!(table.release(a, 0), Some(a));
        assert_eq!(layout(&table), [(0, 60, false), (60, 40, true)]);
        table.validate(0).unwrap();
    }

    #[test]
    fn test_release_merges_both_sides() {
        let mut table = BlockTable::<8>::with_root(0, 90);
        let root = table.root().unwrap();
        let c = table.split_tail(root, 60, 0).unwrap();
        let b = table.split_tail(root, 30, 0).unwrap();
        table.set_state(root, BlockState::Allocated);
        assert_eq!(layout(&table), [(0, 30, false), (30, 30, false), (60, 30, false)]);

        table.release(root, 0).unwrap();
        table.release(c, 0).unwrap();
        let merged = table.release(b, 0).unwrap();

        assert_eq!(merged, root);
        assert!(table.get(b).is_none());
        assert!(table.get(c).is_none());
        assert_eq!(layout(&table), [(0, 90, true)]);
        table.validate(0).unwrap();
    }

    #[test]
    fn test_release_relinks_following_block() {
        let mut table = BlockTable::<8>::with_root(0, 90);
        let root = table.root().unwrap();
        let c = table.split_tail(root, 60, 0).unwrap();
        let b = table.split_tail(root, 30, 0).unwrap();
        // root(free) b c: releasing b merges into root; c must point back at root.
        table.release(b, 0).unwrap();
        assert_eq!(table.prev(c), Some(root));
        assert_eq!(table.next(root), Some(c));
        table.validate(0).unwrap();
    }

    #[test]
    fn test_release_reclaims_overhead() {
        let mut table = BlockTable::<4>::with_root(48, 464);
        let root = table.root().unwrap();
        let carved = table.split_tail(root, 312, 32).unwrap();
        table.release(carved, 32).unwrap();
        assert_eq!(layout(&table), [(48, 464, true)]);
    }

    #[test]
    fn test_release_twice_is_rejected() {
        let mut table = BlockTable::<4>::with_root(0, 100);
        let root = table.root().unwrap();
        let a = table.split_tail(root, 50, 0).unwrap();
        table.set_state(root, BlockState::Allocated);
        assert!(table.release(a, 0).is_some());
        assert!(table.release(a, 0).is_none());
    }

    #[test]
    fn test_retired_id_is_stale_after_reuse() {
        let mut table = BlockTable::<4>::with_root(0, 100);
        let root = table.root().unwrap();
        let a = table.split_tail(root, 50, 0).unwrap();
        table.release(a, 0).unwrap();
        assert!(table.get(a).is_none());

        let b = table.split_tail(root, 50, 0).unwrap();
        assert_eq!(b.index(), a.index());
        assert_ne!(b, a);
        assert!(table.get(a).is_none());
        assert!(table.get(b).is_some());
    }

    #[test]
    fn test_shift_start_feeds_previous_block() {
        let mut table = BlockTable::<4>::with_root(0, 100);
        let root = table.root().unwrap();
        let tail = table.split_tail(root, 40, 0).unwrap();
        assert!(table.shift_start(tail, 8));
        assert_eq!(layout(&table), [(0, 48, true), (48, 52, false)]);
        assert!(!table.shift_start(tail, 53));
        table.validate(0).unwrap();
    }

    #[test]
    fn test_stats() {
        let mut table = BlockTable::<8>::with_root(0, 100);
        let root = table.root().unwrap();
        table.split_tail(root, 80, 0).unwrap();
        let b = table.split_tail(root, 50, 0).unwrap();
        table.set_state(root, BlockState::Allocated);
        table.release(b, 0).unwrap();

        assert_eq!(
            table.stats(),
            TableStats {
                blocks: 3,
                free_blocks: 1,
                free_size: 30,
                largest_free: 30,
            }
        );
    }

    #[test]
    fn test_validate_detects_heap_order() {
        let mut table = filled(8);
        let root = table.heap[0];
        table.block_mut(root).size = 0;
        assert!(matches!(
            table.validate_heap(),
            Err(TableError::HeapOrder { .. })
        ));
    }

    #[test]
    fn test_validate_detects_chain_gap() {
        let mut table = BlockTable::<4>::with_root(0, 100);
        let root = table.root().unwrap();
        table.split_tail(root, 60, 0).unwrap();
        assert!(matches!(
            table.validate(8),
            Err(TableError::ChainGap {
                offset: 60,
                expected: 68,
                ..
            })
        ));
    }
}
