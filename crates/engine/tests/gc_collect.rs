//! `VMState::collect()` end to end: real call-stack frames rooting a real
//! heap object, and the live frame slot getting rewritten once that object
//! is relocated.

use stackjit_engine::class::OBJECT_HEADER_SIZE;
use stackjit_engine::gc::Generation;
use stackjit_engine::signature::{FunctionDefinition, ManagedFunction};
use stackjit_engine::types::Type;
use stackjit_engine::{VMState, VmConfig};

#[test]
fn a_promoted_object_is_relocated_and_the_live_frame_slot_is_rewritten() {
    // promotion_threshold: 1 so the object promotes on its very first collection.
    let config = VmConfig { promotion_threshold: 1, ..VmConfig::default() };
    let mut vm = VMState::new(config);

    let definition = FunctionDefinition::new("holder", vec![], Type::Void, true, false, None);
    let function = ManagedFunction::new(definition, vec![], vec![Type::Class("Widget".into())]);
    vm.define_function(function).expect("defines cleanly");
    let function_ptr: *const FunctionDefinition = &vm.functions.get("holder()").unwrap().definition;

    let addr = vm.allocate(Generation::Young, OBJECT_HEADER_SIZE).expect("young arena has room");

    // Stand-in for a real native frame: slot 0 (the function's one local)
    // holds the object reference, at the address `FrameDescriptor` expects.
    let mut frame_mem = [0i64; 2];
    let slot_addr = frame_mem.as_mut_ptr() as usize;
    let frame_base = slot_addr + 8;
    frame_mem[0] = addr as i64;

    assert!(vm.call_stack.push(function_ptr, frame_base));
    vm.collect();
    vm.call_stack.pop();

    let relocated = frame_mem[0] as usize;
    assert_ne!(relocated, addr, "the live slot was rewritten to the object's new address");
    assert!(vm.gc.old.contains(relocated), "a survivor crossing the promotion threshold moves to the old generation");
}

#[test]
fn an_unrooted_object_is_left_behind_and_the_young_arena_is_reclaimed() {
    let mut vm = VMState::new(VmConfig::default());
    vm.allocate(Generation::Young, OBJECT_HEADER_SIZE).expect("young arena has room");
    assert!(vm.gc.young.used() > 0);

    vm.collect();

    assert_eq!(vm.gc.young.used(), 0, "an object with no live root is not copied into the reset arena");
}
