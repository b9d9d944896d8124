//! One bump-allocated generation arena (`managedheap.h`/`gcgeneration.h`).

use super::{is_marked, survival_count, with_survival_count, CardTable, FORWARDED_HOLE_MARKER};
use crate::class::{OBJECT_HEADER_SIZE, OBJECT_SIZE_FIELD_OFFSET};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Young,
    Old,
}

/// A contiguous, bump-allocated arena. `mem` is heap-backed (not `mmap`'d
/// like C3's code pages, since managed objects are plain data, never
/// executed).
pub struct ManagedHeap {
    mem: Vec<u8>,
    next: usize,
    /// Allocations since the last collection; drives `needs_to_collect`.
    allocated_since_collection: usize,
    allocated_before_collection: usize,
    promotion_threshold: u8,
    cards: Option<CardTable>,
}

impl ManagedHeap {
    pub fn new(size: usize, allocated_before_collection: usize, promotion_threshold: u8, card_size: usize, kind: Generation) -> Self {
        let mem = vec![0u8; size];
        let base = mem.as_ptr() as usize;
        let cards = match kind {
            Generation::Old => Some(CardTable::new(base, size, card_size)),
            Generation::Young => None,
        };
        ManagedHeap {
            mem,
            next: 0,
            allocated_since_collection: 0,
            allocated_before_collection,
            promotion_threshold,
            cards,
        }
    }

    pub fn base(&self) -> usize {
        self.mem.as_ptr() as usize
    }

    pub fn end(&self) -> usize {
        self.base() + self.mem.len()
    }

    pub fn capacity(&self) -> usize {
        self.mem.len()
    }

    pub fn used(&self) -> usize {
        self.next
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.end()
    }

    pub fn needs_to_collect(&self) -> bool {
        self.allocated_since_collection >= self.allocated_before_collection
    }

    pub fn needs_to_promote(&self, survived: u8) -> bool {
        survived >= self.promotion_threshold
    }

    /// Bump-allocates `size` bytes, zero-initialized. Returns `None` if the
    /// arena has no room; the caller (runtime entrypoint) triggers a
    /// collection and retries.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        if self.next + size > self.mem.len() {
            return None;
        }
        let addr = self.base() + self.next;
        self.next += size;
        self.allocated_since_collection += size;
        Some(addr)
    }

    pub fn mark_card_for_store(&mut self, addr: usize) {
        if let Some(cards) = &mut self.cards {
            let end = self.end();
            cards.mark_dirty_if_in_range(addr, end);
        }
    }

    pub fn cards(&self) -> Option<&CardTable> {
        self.cards.as_ref()
    }

    /// Resets the bump pointer to the start of a fresh "to" space after a
    /// collection; survivors have already been copied out by the
    /// collector before this runs.
    pub fn reset(&mut self) {
        self.next = 0;
        self.allocated_since_collection = 0;
        if let Some(cards) = &mut self.cards {
            cards.clear_all();
        }
    }

    /// Walks live objects from the arena start, following each object's
    /// header to find the next one. A `0xFF` GC-info byte marks a
    /// forwarded/dead hole whose length is recorded in the following 8
    /// bytes, letting the walker skip it (§4.9).
    pub fn walk(&self) -> HeapWalker<'_> {
        HeapWalker { heap: self, offset: 0 }
    }

    pub fn gc_info_at(&self, offset: usize) -> u8 {
        self.mem[offset + 8]
    }

    pub fn set_gc_info_at(&mut self, offset: usize, info: u8) {
        self.mem[offset + 8] = info;
    }

    pub fn bump_survival_count(&mut self, offset: usize) -> u8 {
        let info = self.gc_info_at(offset);
        let count = survival_count(info).saturating_add(1);
        self.set_gc_info_at(offset, with_survival_count(info, count));
        count
    }

    /// Reads the total object size an allocator wrote at
    /// `OBJECT_SIZE_FIELD_OFFSET`. A stored `0` means nothing ever wrote
    /// the field (a bare header allocated directly for a test, or by code
    /// predating this field) and is treated as a header-only object, the
    /// walker's old fixed-size assumption.
    pub fn object_size_at(&self, offset: usize) -> usize {
        let start = offset + OBJECT_SIZE_FIELD_OFFSET;
        let size = u32::from_le_bytes(self.mem[start..start + 4].try_into().unwrap()) as usize;
        if size == 0 {
            OBJECT_HEADER_SIZE
        } else {
            size
        }
    }

    pub fn write_object_size_at(&mut self, offset: usize, size: u32) {
        let start = offset + OBJECT_SIZE_FIELD_OFFSET;
        self.mem[start..start + 4].copy_from_slice(&size.to_le_bytes());
    }

    pub fn copy_out(&self, offset: usize, size: usize) -> Vec<u8> {
        self.mem[offset..offset + size].to_vec()
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.mem[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

pub struct HeapWalker<'a> {
    heap: &'a ManagedHeap,
    offset: usize,
}

/// One live or dead object header seen during a linear heap walk.
pub struct WalkEntry {
    pub offset: usize,
    pub size: usize,
    pub marked: bool,
}

impl<'a> Iterator for HeapWalker<'a> {
    type Item = WalkEntry;

    fn next(&mut self) -> Option<WalkEntry> {
        if self.offset >= self.heap.used() {
            return None;
        }
        let info = self.heap.gc_info_at(self.offset);
        if info == FORWARDED_HOLE_MARKER {
            let len_bytes = &self.heap.mem[self.offset + OBJECT_HEADER_SIZE..self.offset + OBJECT_HEADER_SIZE + 8];
            let size = u64::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
            self.offset += size;
            return self.next();
        }
        let size = self.heap.object_size_at(self.offset);
        let entry = WalkEntry {
            offset: self.offset,
            size,
            marked: is_marked(info),
        };
        self.offset += size;
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocation_advances_and_refuses_overflow() {
        let mut heap = ManagedHeap::new(64, 32, 3, 16, Generation::Young);
        assert!(heap.allocate(32).is_some());
        assert!(heap.allocate(32).is_some());
        assert!(heap.allocate(8).is_none());
    }

    #[test]
    fn needs_to_collect_trips_at_threshold() {
        let mut heap = ManagedHeap::new(1024, 64, 3, 16, Generation::Young);
        assert!(!heap.needs_to_collect());
        heap.allocate(64);
        assert!(heap.needs_to_collect());
    }

    #[test]
    fn promotion_threshold_is_exclusive_below() {
        let heap = ManagedHeap::new(64, 32, 3, 16, Generation::Young);
        assert!(!heap.needs_to_promote(2));
        assert!(heap.needs_to_promote(3));
    }

    #[test]
    fn walker_steps_by_each_objects_own_recorded_size_not_a_fixed_header() {
        // A class instance with fields and a small array sit back to back;
        // the walker must step past each one by its own size, not assume
        // every object is header-only (§4.9).
        let mut heap = ManagedHeap::new(256, 128, 3, 16, Generation::Young);
        let first = heap.allocate(40).unwrap();
        heap.write_object_size_at(first - heap.base(), 40);
        let second = heap.allocate(24).unwrap();
        heap.write_object_size_at(second - heap.base(), 24);

        let entries: Vec<_> = heap.walk().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[0].size, 40);
        assert_eq!(entries[1].offset, 40);
        assert_eq!(entries[1].size, 24);
    }
}
