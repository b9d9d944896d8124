//! The fixed prologue/epilogue shape every compiled function shares
//! (§4.6): frame setup, ABI argument materialization, local
//! zero-initialization, the call-stack push, and a stack-overflow check.

use crate::abi::{ArgLocation, CallingConvention};
use crate::asm::{Assembler, DataSize, FloatReg, IntReg, IntRegister, MemoryOperand, Width};
use crate::signature::ManagedFunction;

use super::stack::OperandStack;

/// Emits `push rbp; mov rbp, rsp; sub rsp, frame_size` and returns the
/// total frame size in bytes so the epilogue and operand-stack slots agree
/// on layout.
pub fn emit_frame_setup(asm: &mut Assembler, num_params: usize, num_locals: usize, max_stack_depth: usize) -> i32 {
    asm.push(IntRegister::Base(IntReg::Bp));
    asm.mov_reg_reg(IntRegister::Base(IntReg::Bp), IntRegister::Base(IntReg::Sp), DataSize::Size64)
        .expect("Size64 move is implemented");
    let frame_size = 8 * (num_params + num_locals + max_stack_depth) as i32;
    if frame_size > 0 {
        asm.sub_reg_imm(IntRegister::Base(IntReg::Sp), frame_size, DataSize::Size64)
            .expect("Size64 sub is implemented");
    }
    frame_size
}

/// Reads each parameter out of its ABI location (register or incoming
/// stack slot) and stores it at `[rbp - 8*(1+i)]`, so the bytecode sees
/// every parameter as an ordinary stack slot from here on (§4.4 item 1).
pub fn emit_move_args_to_stack(asm: &mut Assembler, convention: &dyn CallingConvention, function: &ManagedFunction) {
    // `parameters` already includes the implicit `this` as element 0 for
    // member functions (§3), so the physical frame layout needs no special
    // case here.
    let locations = convention.classify(&function.definition.parameters);
    for (i, location) in locations.iter().enumerate() {
        let dest = MemoryOperand::with_offset(IntRegister::Base(IntReg::Bp), -8 * (1 + i) as i32);
        match location {
            ArgLocation::Int(reg) => {
                asm.mov_mem_reg(dest, *reg, DataSize::Size64).expect("Size64 move is implemented");
            }
            ArgLocation::Float(reg) => {
                asm.mov_mem_float_reg(dest, *reg);
            }
            ArgLocation::Stack(offset) => {
                // Incoming stack arguments sit above the return address,
                // at `[rbp + 16 + offset]` (the standard x86-64 frame:
                // `rbp` points just past the saved rbp and return addr).
                let src = MemoryOperand::with_offset(IntRegister::Base(IntReg::Bp), 16 + *offset as i32);
                let scratch = IntRegister::Base(IntReg::Ax);
                asm.mov_reg_mem(scratch, src, DataSize::Size64).expect("Size64 move is implemented");
                asm.mov_mem_reg(dest, scratch, DataSize::Size64).expect("Size64 move is implemented");
            }
        }
    }
}

/// Zero-initializes every local slot in one tight sequence (§4.6).
pub fn emit_zero_locals(asm: &mut Assembler, num_params: usize, num_locals: usize) {
    for i in 0..num_locals {
        let dest = MemoryOperand::with_offset(IntRegister::Base(IntReg::Bp), -8 * (1 + num_params + i) as i32);
        asm.mov_mem_imm(dest, 0, DataSize::Size64).expect("Size64 move is implemented");
    }
}

/// `leave; ret` — the matching epilogue for `emit_frame_setup`.
pub fn emit_epilogue(asm: &mut Assembler) {
    asm.mov_reg_reg(IntRegister::Base(IntReg::Sp), IntRegister::Base(IntReg::Bp), DataSize::Size64)
        .expect("Size64 move is implemented");
    asm.pop(IntRegister::Base(IntReg::Bp));
    asm.ret();
}

/// Spills the return value from the operand stack into the ABI return
/// register (§4.4 item 5), a no-op for `Void`-returning functions.
pub fn emit_make_return_value(asm: &mut Assembler, stack: &mut OperandStack, convention: &dyn CallingConvention, is_void: bool, is_float: bool) {
    if is_void {
        return;
    }
    if is_float {
        stack.pop_float(asm, convention.return_float_register());
    } else {
        stack.pop_reg(asm, IntRegister::Base(convention.return_int_register()));
    }
}

/// Equivalent for the float return register passed separately since
/// `CallingConvention::return_float_register` isn't an `IntReg`.
pub fn float_return_register(convention: &dyn CallingConvention) -> FloatReg {
    convention.return_float_register()
}

pub const CURRENT_WIDTH: Width = Width::W64;
