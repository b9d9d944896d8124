//! C5: the operand-stack materializer.
//!
//! The evaluation stack is not held in physical registers. Each push/pop
//! reads or writes a reserved frame slot at `[rbp - 8*(1 + numParams +
//! numLocals + i)]`, `i` zero-based from the bottom (§4.5). This layout
//! lets the GC walk a frame using only a descriptor (param count, local
//! count) with no live-register map.

use crate::asm::{Assembler, DataSize, FloatReg, IntReg, IntRegister, MemoryOperand};

pub struct OperandStack {
    /// Number of logical values currently pushed.
    top: usize,
    /// `numParams + numLocals`, fixed for the function's lifetime.
    base_slots: usize,
    /// High-water mark of `top`, becomes `max_stack_depth` once the
    /// function finishes generating (§3 ManagedFunction).
    max_depth: usize,
}

impl OperandStack {
    pub fn new(num_params: usize, num_locals: usize) -> Self {
        OperandStack {
            top: 0,
            base_slots: num_params + num_locals,
            max_depth: 0,
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn slot_offset(&self, i: usize) -> i32 {
        -8 * (1 + self.base_slots + i) as i32
    }

    fn bump(&mut self) {
        self.top += 1;
        self.max_depth = self.max_depth.max(self.top);
    }

    /// Advances the logical top without emitting code, for slots a caller
    /// fills in directly (e.g. the prologue materializing ABI arguments).
    pub fn reserve_space(&mut self) {
        self.bump();
    }

    pub fn assert_not_empty(&self) {
        assert!(self.top > 0, "operand stack underflow: verifier invariant violated");
    }

    /// Copies the top value into a new slot one past it, through RAX
    /// (§4.5 `duplicate`).
    pub fn duplicate(&mut self, asm: &mut Assembler) {
        self.assert_not_empty();
        let src = self.slot_offset(self.top - 1);
        let dst = self.slot_offset(self.top);
        let scratch = IntRegister::Base(IntReg::Ax);
        asm.mov_reg_mem(scratch, MemoryOperand::with_offset(IntRegister::Base(IntReg::Bp), src), DataSize::Size64)
            .expect("Size64 move is implemented");
        asm.mov_mem_reg(MemoryOperand::with_offset(IntRegister::Base(IntReg::Bp), dst), scratch, DataSize::Size64)
            .expect("Size64 move is implemented");
        self.bump();
    }

    pub fn pop_reg(&mut self, asm: &mut Assembler, reg: IntRegister) {
        self.assert_not_empty();
        self.top -= 1;
        let offset = self.slot_offset(self.top);
        asm.mov_reg_mem(reg, MemoryOperand::with_offset(IntRegister::Base(IntReg::Bp), offset), DataSize::Size64)
            .expect("Size64 move is implemented");
    }

    pub fn pop_float(&mut self, asm: &mut Assembler, reg: FloatReg) {
        self.assert_not_empty();
        self.top -= 1;
        let offset = self.slot_offset(self.top);
        asm.mov_float_reg_mem(reg, MemoryOperand::with_offset(IntRegister::Base(IntReg::Bp), offset));
    }

    pub fn push_reg(&mut self, asm: &mut Assembler, reg: IntRegister) {
        let offset = self.slot_offset(self.top);
        asm.mov_mem_reg(MemoryOperand::with_offset(IntRegister::Base(IntReg::Bp), offset), reg, DataSize::Size64)
            .expect("Size64 move is implemented");
        self.bump();
    }

    pub fn push_float(&mut self, asm: &mut Assembler, reg: FloatReg) {
        let offset = self.slot_offset(self.top);
        asm.mov_mem_float_reg(MemoryOperand::with_offset(IntRegister::Base(IntReg::Bp), offset), reg);
        self.bump();
    }

    /// Spills an immediate directly into the next slot. `increase_stack`
    /// is false when the caller already reserved the slot via
    /// `reserve_space` (§4.5).
    pub fn push_int(&mut self, asm: &mut Assembler, value: i32, increase_stack: bool) {
        let top = if increase_stack { self.top } else { self.top - 1 };
        let offset = self.slot_offset(top);
        asm.mov_mem_imm(MemoryOperand::with_offset(IntRegister::Base(IntReg::Bp), offset), value, DataSize::Size64)
            .expect("Size64 move is implemented");
        if increase_stack {
            self.bump();
        }
    }

    pub fn top_offset(&self) -> i32 {
        self.slot_offset(self.top.saturating_sub(1))
    }

    pub fn depth(&self) -> usize {
        self.top
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_round_trips_through_rax() {
        let mut asm = Assembler::new();
        let mut stack = OperandStack::new(0, 0);
        stack.push_reg(&mut asm, IntRegister::Base(IntReg::Ax));
        assert_eq!(stack.depth(), 1);
        stack.pop_reg(&mut asm, IntRegister::Base(IntReg::Cx));
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn duplicate_increments_depth_by_one() {
        let mut asm = Assembler::new();
        let mut stack = OperandStack::new(0, 0);
        stack.push_reg(&mut asm, IntRegister::Base(IntReg::Ax));
        stack.duplicate(&mut asm);
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.max_depth(), 2);
    }

    #[test]
    #[should_panic]
    fn pop_on_empty_stack_panics() {
        let mut asm = Assembler::new();
        let mut stack = OperandStack::new(0, 0);
        stack.pop_reg(&mut asm, IntRegister::Base(IntReg::Ax));
    }
}
