//! C2: the assembler façade. Dispatches typed operands onto C1 and hides
//! REX/SIB details from C6.

use crate::error::EncodeError;

use super::encoder::{self, Width};
use super::registers::{Condition, DataSize, FloatReg, IntRegister, MemoryOperand};

/// Accumulates native code for one function. Every method appends to the
/// internal buffer and returns the byte offset the instruction started at,
/// so C6 can record it for later branch/call patching.
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
}

impl Assembler {
    pub fn new() -> Self {
        Assembler { code: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.code
    }

    pub fn bytes(&self) -> &[u8] {
        &self.code
    }

    fn mark(&self) -> usize {
        self.code.len()
    }

    /// Overwrites a 4-byte little-endian relative displacement already
    /// emitted at `at`, used by C7 when patching a forward branch or a
    /// call to a function that was not yet compiled.
    pub fn patch_rel32(&mut self, at: usize, rel32: i32) {
        self.code[at..at + 4].copy_from_slice(&rel32.to_le_bytes());
    }

    fn width(size: DataSize) -> Result<Width, EncodeError> {
        match size {
            DataSize::Size32 => Ok(Width::W32),
            DataSize::Size64 => Ok(Width::W64),
            other => Err(EncodeError::NotImplemented(format!(
                "data size {other:?} is not implemented on the integer move path"
            ))),
        }
    }

    pub fn push(&mut self, reg: IntRegister) -> usize {
        let at = self.mark();
        encoder::push_reg(&mut self.code, reg);
        at
    }

    pub fn push_float(&mut self, reg: FloatReg) -> usize {
        let at = self.mark();
        encoder::push_float_reg(&mut self.code, reg);
        at
    }

    pub fn push_int(&mut self, value: i32) -> usize {
        let at = self.mark();
        encoder::push_int(&mut self.code, value);
        at
    }

    pub fn pop(&mut self, reg: IntRegister) -> usize {
        let at = self.mark();
        encoder::pop_reg(&mut self.code, reg);
        at
    }

    pub fn pop_float(&mut self, reg: FloatReg) -> usize {
        let at = self.mark();
        encoder::pop_float_reg(&mut self.code, reg);
        at
    }

    pub fn mov_reg_reg(&mut self, dest: IntRegister, src: IntRegister, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::move_reg_to_reg(&mut self.code, dest, src, width);
        Ok(at)
    }

    pub fn mov_mem_reg(&mut self, dest: MemoryOperand, src: IntRegister, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::move_reg_to_memory(&mut self.code, dest.register, dest.offset, src, width);
        Ok(at)
    }

    pub fn mov_reg_mem(&mut self, dest: IntRegister, src: MemoryOperand, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::move_memory_to_reg(&mut self.code, dest, src.register, src.offset, width);
        Ok(at)
    }

    pub fn mov_reg_imm(&mut self, dest: IntRegister, value: i32, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::move_int_to_reg(&mut self.code, dest, value, width);
        Ok(at)
    }

    pub fn mov_reg_imm64(&mut self, dest: IntRegister, value: i64) -> usize {
        let at = self.mark();
        encoder::move_long_to_reg(&mut self.code, dest, value);
        at
    }

    pub fn mov_mem_imm32(&mut self, dest: MemoryOperand, value: i32) -> usize {
        let at = self.mark();
        encoder::move_int_to_memory32(&mut self.code, dest.register, dest.offset, value);
        at
    }

    pub fn mov_mem_imm(&mut self, dest: MemoryOperand, value: i32, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::move_int_to_memory(&mut self.code, dest.register, dest.offset, value, width);
        Ok(at)
    }

    /// `mov [addr], rax` — only `AX` is supported as the source, matching
    /// the original's absolute-move restriction (§4.1).
    pub fn mov_absolute_from_ax(&mut self, addr: i64, src: IntRegister) -> usize {
        let at = self.mark();
        encoder::move_reg_to_memory_absolute(&mut self.code, addr, src);
        at
    }

    pub fn mov_ax_from_absolute(&mut self, dest: IntRegister, addr: i64) -> usize {
        let at = self.mark();
        encoder::move_memory_absolute_to_reg(&mut self.code, dest, addr);
        at
    }

    pub fn mov_float_reg_mem(&mut self, dest: FloatReg, src: MemoryOperand) -> usize {
        let at = self.mark();
        if src.offset == 0 {
            encoder::move_memory_by_reg_to_float_reg(&mut self.code, dest, src.register);
        } else {
            encoder::move_memory_with_offset_to_float_reg(&mut self.code, dest, src.register, src.offset);
        }
        at
    }

    pub fn mov_mem_float_reg(&mut self, dest: MemoryOperand, src: FloatReg) -> usize {
        let at = self.mark();
        encoder::move_float_reg_to_memory(&mut self.code, dest.register, dest.offset, src);
        at
    }

    pub fn mov_float_reg_reg(&mut self, dest: FloatReg, src: FloatReg) -> usize {
        let at = self.mark();
        encoder::move_float_reg_to_reg(&mut self.code, dest, src);
        at
    }

    pub fn add_reg_reg(&mut self, dest: IntRegister, src: IntRegister, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::add_reg_to_reg(&mut self.code, dest, src, width);
        Ok(at)
    }

    pub fn add_reg_imm(&mut self, dest: IntRegister, value: i32, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::add_const_to_reg(&mut self.code, dest, value, width);
        Ok(at)
    }

    pub fn sub_reg_reg(&mut self, dest: IntRegister, src: IntRegister, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::sub_reg_from_reg(&mut self.code, dest, src, width);
        Ok(at)
    }

    pub fn sub_reg_imm(&mut self, dest: IntRegister, value: i32, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::sub_const_from_reg(&mut self.code, dest, value, width);
        Ok(at)
    }

    pub fn mul_reg_reg(&mut self, dest: IntRegister, src: IntRegister, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::mult_reg_to_reg(&mut self.code, dest, src, width);
        Ok(at)
    }

    /// `idiv src`; the dividend/remainder pair is the fixed RAX:RDX and is
    /// the caller's responsibility to have arranged (C5 always spills
    /// through RAX, so this holds by construction).
    pub fn div_reg(&mut self, src: IntRegister, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::div_reg_from_reg(&mut self.code, IntRegister::Base(super::registers::IntReg::Ax), src, width);
        Ok(at)
    }

    pub fn and_reg_reg(&mut self, dest: IntRegister, src: IntRegister, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::and_reg_to_reg(&mut self.code, dest, src, width);
        Ok(at)
    }

    pub fn and_reg_imm(&mut self, dest: IntRegister, value: i32, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::and_int_to_reg(&mut self.code, dest, value, width);
        Ok(at)
    }

    pub fn or_reg_reg(&mut self, dest: IntRegister, src: IntRegister, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::or_reg_to_reg(&mut self.code, dest, src, width);
        Ok(at)
    }

    pub fn xor_reg_reg(&mut self, dest: IntRegister, src: IntRegister, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::xor_reg_to_reg(&mut self.code, dest, src, width);
        Ok(at)
    }

    pub fn not_reg(&mut self, reg: IntRegister, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::not_reg(&mut self.code, reg, width);
        Ok(at)
    }

    pub fn cmp_reg_reg(&mut self, a: IntRegister, b: IntRegister, size: DataSize) -> Result<usize, EncodeError> {
        let width = Self::width(size)?;
        let at = self.mark();
        encoder::compare_reg_to_reg(&mut self.code, a, b, width);
        Ok(at)
    }

    pub fn cmp_float_float(&mut self, a: FloatReg, b: FloatReg) -> usize {
        let at = self.mark();
        encoder::compare_float_to_float(&mut self.code, a, b);
        at
    }

    pub fn add_float_float(&mut self, dest: FloatReg, src: FloatReg) -> usize {
        let at = self.mark();
        encoder::add_float_to_float(&mut self.code, dest, src);
        at
    }

    pub fn sub_float_float(&mut self, dest: FloatReg, src: FloatReg) -> usize {
        let at = self.mark();
        encoder::sub_float_from_float(&mut self.code, dest, src);
        at
    }

    pub fn mul_float_float(&mut self, dest: FloatReg, src: FloatReg) -> usize {
        let at = self.mark();
        encoder::mult_float_to_float(&mut self.code, dest, src);
        at
    }

    pub fn div_float_float(&mut self, dest: FloatReg, src: FloatReg) -> usize {
        let at = self.mark();
        encoder::div_float_from_float(&mut self.code, dest, src);
        at
    }

    /// Emits a placeholder unconditional jump (`rel32` zeroed) and returns
    /// the offset of the displacement field for later patching.
    pub fn jmp_placeholder(&mut self) -> usize {
        encoder::jump(&mut self.code, 0);
        self.code.len() - 4
    }

    pub fn jcc_placeholder(&mut self, condition: Condition, unsigned: bool) -> usize {
        encoder::jump_conditional(&mut self.code, condition, unsigned, 0);
        self.code.len() - 4
    }

    pub fn call_reg(&mut self, target: IntRegister) -> usize {
        let at = self.mark();
        encoder::call_in_reg(&mut self.code, target);
        at
    }

    /// Emits a placeholder `call rel32` and returns the offset of the
    /// displacement field for later patching once the target's entry point
    /// is known (§4.7 compile-stub / lazy resolution).
    pub fn call_placeholder(&mut self) -> usize {
        encoder::call_relative(&mut self.code, 0);
        self.code.len() - 4
    }

    pub fn ret(&mut self) -> usize {
        let at = self.mark();
        encoder::ret(&mut self.code);
        at
    }

    pub fn sign_extend(&mut self, size: DataSize) -> Result<usize, EncodeError> {
        let at = self.mark();
        match size {
            DataSize::Size16 => encoder::sign_extend_16(&mut self.code),
            DataSize::Size32 => encoder::sign_extend_32(&mut self.code),
            DataSize::Size64 => encoder::sign_extend_64(&mut self.code),
            DataSize::Size8 => {
                return Err(EncodeError::NotImplemented(
                    "sign-extend is not implemented for 8-bit operands".into(),
                ))
            }
        }
        Ok(at)
    }

    pub fn convert_int_to_float(&mut self, dest: FloatReg, src: IntRegister) -> usize {
        let at = self.mark();
        encoder::convert_int_to_float(&mut self.code, dest, src);
        at
    }

    pub fn convert_float_to_int(&mut self, dest: IntRegister, src: FloatReg) -> usize {
        let at = self.mark();
        encoder::convert_float_to_int(&mut self.code, dest, src);
        at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::registers::IntReg;

    #[test]
    fn size16_move_is_not_implemented() {
        let mut asm = Assembler::new();
        let err = asm
            .mov_reg_reg(IntRegister::Base(IntReg::Ax), IntRegister::Base(IntReg::Cx), DataSize::Size16)
            .unwrap_err();
        assert!(matches!(err, EncodeError::NotImplemented(_)));
    }

    #[test]
    fn jmp_placeholder_records_patchable_offset() {
        let mut asm = Assembler::new();
        let at = asm.jmp_placeholder();
        assert_eq!(asm.bytes()[at - 1], 0xE9);
        asm.patch_rel32(at, 42);
        assert_eq!(&asm.bytes()[at..at + 4], &42i32.to_le_bytes());
    }

    #[test]
    fn call_placeholder_then_patch() {
        let mut asm = Assembler::new();
        let at = asm.call_placeholder();
        assert_eq!(asm.bytes()[at - 1], 0xE8);
        asm.patch_rel32(at, -10);
        assert_eq!(&asm.bytes()[at..at + 4], &(-10i32).to_le_bytes());
    }
}
