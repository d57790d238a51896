//! Max-heap maintenance over the table's slot array.
//!
//! Slots are 1-based: slot `s` lives at `heap[s - 1]`, its parent is
//! `s / 2` and its children are `2s` and `2s + 1`. Every move updates the
//! moved block's `heap_index`.

use crate::BlockTable;

impl<const CAP: usize> BlockTable<CAP> {
    /// Appends the record at `index` and sifts it upward.
    ///
    /// # Panics
    ///
    /// Panics if the heap is full. Callers check [`BlockTable::is_full`]
    /// before acquiring a record.
    pub(crate) fn heap_push(&mut self, index: usize) {
        self.heap.push(index);
        let slot = self.heap.len();
        self.block_mut(index).heap_index = slot;
        self.sift_up(slot);
    }

    /// Takes the record at `slot` out of the heap and returns its index.
    ///
    /// The last slot is moved into the hole and sifted in whichever direction
    /// restores the heap order.
    pub(crate) fn heap_remove(&mut self, slot: usize) -> Option<usize> {
        if slot == 0 || slot > self.heap.len() {
            return None;
        }

        let removed = self.heap.swap_remove(slot - 1);
        self.block_mut(removed).heap_index = 0;

        if slot <= self.heap.len() {
            let moved = self.heap[slot - 1];
            self.block_mut(moved).heap_index = slot;
            let slot = self.sift_up(slot);
            self.sift_down(slot);
        }

        Some(removed)
    }

    /// Changes the size of a heap-resident record and restores the order.
    pub(crate) fn heap_resize(&mut self, index: usize, size: usize) {
        let slot = self.block(index).heap_index;
        let removed = self.heap_remove(slot);
        debug_assert_eq!(removed, Some(index));
        self.block_mut(index).size = size;
        self.heap_push(index);
    }

    fn slot_size(&self, slot: usize) -> usize {
        self.block(self.heap[slot - 1]).size
    }

    fn swap_slots(&mut self, a: usize, b: usize) {
        self.heap.swap(a - 1, b - 1);
        let (ia, ib) = (self.heap[a - 1], self.heap[b - 1]);
        self.block_mut(ia).heap_index = a;
        self.block_mut(ib).heap_index = b;
    }

    fn sift_up(&mut self, mut slot: usize) -> usize {
        while slot > 1 {
            let parent = slot / 2;
            if self.slot_size(parent) >= self.slot_size(slot) {
                break;
            }
            self.swap_slots(parent, slot);
            slot = parent;
        }
        slot
    }

    fn sift_down(&mut self, mut slot: usize) -> usize {
        let len = self.heap.len();
        loop {
            let left = slot * 2;
            if left > len {
                break;
            }
            let right = left + 1;
            let larger = if right <= len && self.slot_size(right) > self.slot_size(left) {
                right
            } else {
                left
            };
            if self.slot_size(larger) <= self.slot_size(slot) {
                break;
            }
            self.swap_slots(slot, larger);
            slot = larger;
        }
        slot
    }
}
