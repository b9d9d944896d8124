//! Young-generation collector invariants that the inline `gc::collector`/
//! `gc::heap` unit tests don't reach: root reachability deciding which
//! objects the collector touches at all, and survival counts crossing the
//! promotion threshold.

use stackjit_engine::class::OBJECT_HEADER_SIZE;
use stackjit_engine::gc::{mark, survival_count, with_survival_count, Collector, FrameDescriptor, Generation, RootWalker};
use stackjit_engine::types::Type;

/// A one-slot frame whose sole parameter is a reference pointing at `addr`,
/// matching C5/C6's `[rbp - 8*(1+i)]` slot layout.
fn frame_rooting(addr: usize) -> FrameDescriptor {
    FrameDescriptor {
        frame_base: addr + 8,
        param_types: vec![Type::Class("Widget".into())],
        local_types: vec![],
        operand_stack_depth: 0,
        operand_stack_types: vec![],
    }
}

#[test]
fn a_rooted_object_is_visited_but_an_unrooted_one_is_left_alone() {
    let mut gc = Collector::new(4096, 8192, 512, 3);
    let rooted = gc.allocate(Generation::Young, OBJECT_HEADER_SIZE).unwrap();
    let unrooted = gc.allocate(Generation::Young, OBJECT_HEADER_SIZE).unwrap();

    let frame = frame_rooting(rooted);
    let roots = RootWalker::new(std::slice::from_ref(&frame));
    gc.collect_young(&roots);

    let rooted_offset = rooted - gc.young.base();
    let unrooted_offset = unrooted - gc.young.base();

    // The rooted object was in the live set, so its survival count advanced.
    assert_eq!(survival_count(gc.young.gc_info_at(rooted_offset)), 1);
    // The unrooted, unmarked object was never in the live set.
    assert_eq!(survival_count(gc.young.gc_info_at(unrooted_offset)), 0);
}

#[test]
fn a_marked_object_is_visited_even_without_a_root() {
    let mut gc = Collector::new(4096, 8192, 512, 3);
    let addr = gc.allocate(Generation::Young, OBJECT_HEADER_SIZE).unwrap();
    let offset = addr - gc.young.base();
    gc.young.set_gc_info_at(offset, mark(0));

    let roots = RootWalker::new(&[]);
    gc.collect_young(&roots);

    assert_eq!(survival_count(gc.young.gc_info_at(offset)), 1);
}

#[test]
fn survival_count_crossing_the_threshold_promotes_to_the_old_generation() {
    let mut gc = Collector::new(4096, 8192, 512, 3);
    let addr = gc.allocate(Generation::Young, OBJECT_HEADER_SIZE).unwrap();
    let offset = addr - gc.young.base();
    // Already survived two prior collections; one more crosses threshold 3.
    gc.young.set_gc_info_at(offset, with_survival_count(mark(0), 2));

    let frame = frame_rooting(addr);
    let roots = RootWalker::new(std::slice::from_ref(&frame));
    let relocations = gc.collect_young(&roots);

    assert_eq!(relocations.len(), 1);
    assert!(relocations[0].promoted);
    assert_eq!(relocations[0].from, addr);
    assert!(gc.old.used() > 0);
}

#[test]
fn below_threshold_survivors_are_not_promoted() {
    let mut gc = Collector::new(4096, 8192, 512, 3);
    let addr = gc.allocate(Generation::Young, OBJECT_HEADER_SIZE).unwrap();

    let frame = frame_rooting(addr);
    let roots = RootWalker::new(std::slice::from_ref(&frame));
    let relocations = gc.collect_young(&roots);

    assert!(relocations.is_empty());
    assert_eq!(gc.old.used(), 0);
}

#[test]
fn collecting_reclaims_space_so_a_failed_allocation_can_retry() {
    let mut gc = Collector::new(64, 4096, 16, 3);
    assert!(gc.allocate(Generation::Young, 32).is_some());
    assert!(gc.allocate(Generation::Young, 32).is_some());
    assert!(gc.allocate(Generation::Young, 16).is_none(), "arena is full");

    let roots = RootWalker::new(&[]);
    gc.collect_young(&roots);

    assert!(gc.allocate(Generation::Young, 16).is_some(), "collection freed the arena");
}
