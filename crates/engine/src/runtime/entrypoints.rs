//! Runtime callbacks invoked by emitted machine code (§4.6, §4.7, §7).
//!
//! Every function here is `extern "C"` because it is called from a raw
//! `call` instruction baked into a code page, never from ordinary Rust
//! control flow. Each receives the `VMState` pointer as its first
//! argument, placed in the host ABI's first integer register by the
//! emitter that materializes the call (§9 "Global singletons").

use super::VMState;
use crate::class::{array_element_offset, ARRAY_DATA_OFFSET};
use crate::error::RuntimeFault;
use crate::gc::Generation;
use crate::signature::{FunctionDefinition, ManagedFunction};
use std::rc::Rc;

/// Placeholder type-descriptor address for interned string literals. The
/// image loader assigns `String` a real class and type-descriptor address
/// once it exists; until then every interned literal shares this sentinel
/// (§4.6 LOAD_STRING).
pub const STRING_TYPE_DESCRIPTOR: i64 = 0;

/// Allocates a new array of `length` elements of `element_size` bytes
/// each, returning its object address or aborting on invalid length.
///
/// # Safety
/// `vm` must point at a live `VMState` for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn stackjit_new_array(vm: *mut VMState, type_descriptor: i64, length: i32, element_size: i32) -> i64 {
    if length < 0 {
        fault(RuntimeFault::InvalidArrayLength);
    }
    let vm = &mut *vm;
    let total = array_element_offset(length as i64, element_size as usize) as usize;
    let addr = vm.allocate(Generation::Young, total).unwrap_or_else(|| {
        vm.collect();
        vm.allocate(Generation::Young, total).expect("young collection freed enough space")
    });
    write_header(addr, type_descriptor, length, total as u32);
    addr as i64
}

/// Allocates a new instance of a class, zero-initializing its fields.
///
/// # Safety
/// `vm` must point at a live `VMState` for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn stackjit_new_class(vm: *mut VMState, type_descriptor: i64, instance_size: i32) -> i64 {
    let vm = &mut *vm;
    let size = instance_size as usize;
    let addr = vm.allocate(Generation::Young, size).unwrap_or_else(|| {
        vm.collect();
        vm.allocate(Generation::Young, size).expect("young collection freed enough space")
    });
    unsafe {
        std::ptr::write_bytes(addr as *mut u8, 0, size);
        (addr as *mut i64).write(type_descriptor);
        ((addr + crate::class::OBJECT_SIZE_FIELD_OFFSET) as *mut u32).write(size as u32);
    }
    addr as i64
}

unsafe fn write_header(addr: usize, type_descriptor: i64, length: i32, total_size: u32) {
    unsafe {
        (addr as *mut i64).write(type_descriptor);
        *((addr + 8) as *mut u8) = 0;
        ((addr + crate::class::OBJECT_SIZE_FIELD_OFFSET) as *mut u32).write(total_size);
        ((addr + 16) as *mut i32).write(length);
    }
}

/// Pushes a frame marker onto the runtime call stack (§4.6 prologue, §4.9
/// Roots): every compiled function's prologue calls this right after
/// zero-initializing its locals, passing its own `FunctionDefinition` and
/// the `rbp` value it just established. Returns `0` if the call stack is
/// already at capacity, in which case the caller's inline check branches to
/// `stackjit_fault_stack_overflow` instead of entering the function body.
///
/// # Safety
/// `vm` and `function` must both be valid for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn stackjit_push_call_frame(vm: *mut VMState, function: *const FunctionDefinition, frame_base: i64) -> i64 {
    let vm = &mut *vm;
    if vm.call_stack.push(function, frame_base as usize) {
        1
    } else {
        0
    }
}

/// Pops the frame marker a matching `stackjit_push_call_frame` pushed,
/// called from every compiled function's epilogue right before materializing
/// its return value (§4.6).
///
/// # Safety
/// `vm` must point at a live `VMState`.
#[no_mangle]
pub unsafe extern "C" fn stackjit_pop_call_frame(vm: *mut VMState) {
    let vm = &mut *vm;
    vm.call_stack.pop();
}

/// The write barrier emitted after every reference-typed store into a
/// heap object (§4.9 card marking).
///
/// # Safety
/// `vm` must point at a live `VMState`.
#[no_mangle]
pub unsafe extern "C" fn stackjit_write_barrier(vm: *mut VMState, object_addr: i64) {
    let vm = &mut *vm;
    vm.gc.old.mark_card_for_store(object_addr as usize);
}

/// The lazy-compilation trampoline a not-yet-compiled call site invokes
/// (§4.7). Compiles `target` if needed, then rewrites the 5-byte region
/// at `caller_base + patch_rel_offset` into a direct `call rel32`, so this
/// stub runs exactly once per call site.
///
/// # Safety
/// All pointers must be valid and `patch_rel_offset` must address a
/// 5-byte placeholder previously reserved by C6 inside `caller`'s code.
#[no_mangle]
pub unsafe extern "C" fn stackjit_compile_function_stub(
    vm: *mut VMState,
    caller: *const FunctionDefinition,
    target: *const FunctionDefinition,
    patch_rel_offset: i64,
) -> i64 {
    let vm = &mut *vm;
    let target_def = unsafe { &*target };
    let entry = vm
        .compile_by_signature(&target_def.signature())
        .unwrap_or_else(|e| fault_with_message(&e.to_string()));

    let caller_def = unsafe { &*caller };
    let caller_entry = caller_def.entry_point().expect("caller is executing, so it is compiled");
    let patch_addr = caller_entry + patch_rel_offset as usize;
    // `patch_addr` is the start of the 4-byte displacement field, not the
    // call opcode, so the end of the instruction is `patch_addr + 4` (same
    // convention as `codegen::patch_local`).
    let rel32 = (entry as i64) - (patch_addr as i64 + 4);
    vm.memory.patch_call_site(patch_addr, rel32 as i32);
    entry as i64
}

/// Shared choke point for every inline runtime check (§7). Prints a
/// diagnostic and terminates the process; there is no managed-code
/// exception model to unwind into.
pub fn fault(kind: RuntimeFault) -> ! {
    eprintln!("fatal: {kind}");
    std::process::exit(1);
}

fn fault_with_message(message: &str) -> ! {
    eprintln!("fatal: {message}");
    std::process::exit(1);
}

/// `extern "C"` wrappers around `fault`, one per inline runtime check C6
/// emits (§7 kind 4): `RuntimeFault` itself carries no fixed ABI, so
/// emitted code calls one of these fixed-address, zero-argument entry
/// points instead of passing the enum across the JIT boundary.
#[no_mangle]
pub extern "C" fn stackjit_fault_null_reference() -> ! {
    fault(RuntimeFault::NullReference)
}

#[no_mangle]
pub extern "C" fn stackjit_fault_index_out_of_bounds() -> ! {
    fault(RuntimeFault::IndexOutOfBounds)
}

#[no_mangle]
pub extern "C" fn stackjit_fault_invalid_array_length() -> ! {
    fault(RuntimeFault::InvalidArrayLength)
}

#[no_mangle]
pub extern "C" fn stackjit_fault_stack_overflow() -> ! {
    fault(RuntimeFault::StackOverflow)
}

pub fn rc_new_function(def: FunctionDefinition) -> Rc<FunctionDefinition> {
    Rc::new(def)
}

/// Materializes (and caches) the string literal at `function.string_table[index]`
/// as a managed object, returning its address. `function` is a raw pointer
/// into the `Rc<ManagedFunction>` already held by `vm.functions`, stable for
/// the process's lifetime (§4.6 LOAD_STRING).
///
/// # Safety
/// `vm` and `function` must both be valid for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn stackjit_load_string(vm: *mut VMState, function: *const ManagedFunction, index: i32) -> i64 {
    let vm = &mut *vm;
    let key = (function as usize, index as u32);
    if let Some(&addr) = vm.string_cache.get(&key) {
        return addr as i64;
    }
    let func = unsafe { &*function };
    let bytes = func.string_table[index as usize].as_bytes();
    let total = ARRAY_DATA_OFFSET + bytes.len();
    let addr = vm.allocate(Generation::Young, total).unwrap_or_else(|| {
        vm.collect();
        vm.allocate(Generation::Young, total).expect("young collection freed enough space")
    });
    unsafe {
        write_header(addr, STRING_TYPE_DESCRIPTOR, bytes.len() as i32, total as u32);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), (addr + ARRAY_DATA_OFFSET) as *mut u8, bytes.len());
    }
    vm.string_cache.insert(key, addr);
    addr as i64
}
