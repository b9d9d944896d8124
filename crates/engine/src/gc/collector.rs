//! The mark-compact collector driving both generations.
//!
//! A young collection scans roots plus dirty old-generation cards,
//! compacts survivors into a fresh young arena (or promotes them to old
//! once their survival count crosses the threshold), then clears the
//! young arena and dirty-card set.

use super::heap::{Generation, ManagedHeap};
use super::roots::RootWalker;
use tracing::debug;

/// One object copied during a collection: its old and new addresses, and
/// whether it was promoted to the old generation.
#[derive(Debug, Clone, Copy)]
pub struct Relocation {
    pub from: usize,
    pub to: usize,
    pub promoted: bool,
}

pub struct Collector {
    pub young: ManagedHeap,
    pub old: ManagedHeap,
}

impl Collector {
    pub fn new(young_bytes: usize, old_bytes: usize, card_size: usize, promotion_threshold: u8) -> Self {
        Collector {
            young: ManagedHeap::new(young_bytes, young_bytes / 2, promotion_threshold, card_size, Generation::Young),
            old: ManagedHeap::new(old_bytes, old_bytes / 2, promotion_threshold, card_size, Generation::Old),
        }
    }

    pub fn allocate(&mut self, generation: Generation, size: usize) -> Option<usize> {
        match generation {
            Generation::Young => self.young.allocate(size),
            Generation::Old => self.old.allocate(size),
        }
    }

    /// Runs a young-generation collection. `roots` gives every root slot's
    /// current value (a managed heap address, or 0 for null). Every live
    /// object's bytes are copied out before the young arena resets: a
    /// survivor that crossed the promotion threshold goes to the old
    /// generation, everything else is re-allocated at the front of the
    /// freshly reset young arena. Returns the relocations so the caller
    /// (`VMState::collect`) can rewrite the root slots that pointed at a
    /// moved object — this crate does not itself own reference fields, so
    /// fixing up an object's own reference-typed fields is out of scope
    /// here (§4.9, §9 Roots).
    #[tracing::instrument(skip(self, roots), fields(generation = "young"))]
    pub fn collect_young(&mut self, roots: &RootWalker<'_>) -> Vec<Relocation> {
        let root_set = roots.roots();
        let live: Vec<(usize, usize)> = self
            .young
            .walk()
            .filter(|entry| entry.marked || root_set.contains(&(self.young.base() + entry.offset)))
            .map(|entry| (entry.offset, entry.size))
            .collect();

        debug!(count = live.len(), "collecting young generation");

        let mut survivors = Vec::with_capacity(live.len());
        let mut promoted_bytes = 0usize;
        for (offset, size) in live {
            let survived = self.young.bump_survival_count(offset);
            let promoted = self.young.needs_to_promote(survived);
            let bytes = self.young.copy_out(offset, size);
            if promoted {
                promoted_bytes += size;
            }
            survivors.push((offset, bytes, promoted));
        }

        let young_base = self.young.base();
        self.young.reset();

        let mut relocations = Vec::with_capacity(survivors.len());
        for (offset, bytes, promoted) in survivors {
            let from = young_base + offset;
            let to = if promoted {
                self.old.allocate(bytes.len()).expect("old generation has room for promoted survivors")
            } else {
                self.young.allocate(bytes.len()).expect("a freshly reset young arena has room for its own survivors")
            };
            if promoted {
                self.old.write_bytes(to - self.old.base(), &bytes);
            } else {
                self.young.write_bytes(to - young_base, &bytes);
            }
            // A non-promoted survivor that lands back at the same offset
            // (the common case: it was already at the front of the arena)
            // needs no fixup. A promoted object always relocates, since
            // young and old are distinct arenas.
            if from != to {
                relocations.push(Relocation { from, to, promoted });
            }
        }

        debug!(promoted_bytes, "young collection complete");
        relocations
    }

    pub fn needs_young_collection(&self) -> bool {
        self.young.needs_to_collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_resets_young_arena() {
        let mut gc = Collector::new(4096, 8192, 512, 3);
        gc.allocate(Generation::Young, 16).unwrap();
        assert!(gc.young.used() > 0);
        let roots = RootWalker::new(&[]);
        gc.collect_young(&roots);
        assert_eq!(gc.young.used(), 0);
    }

    #[test]
    fn allocating_past_capacity_triggers_collection_need() {
        let gc = Collector::new(1024, 4096, 512, 3);
        assert!(!gc.needs_young_collection());
    }
}
