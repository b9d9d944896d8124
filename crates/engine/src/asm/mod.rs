//! The x86-64 assembler: C1's raw byte encoder plus C2's typed façade.

pub mod assembler;
pub mod encoder;
pub mod registers;

pub use assembler::Assembler;
pub use encoder::Width;
pub use registers::{Condition, DataSize, ExtReg, FloatReg, IntReg, IntRegister, MemoryOperand, Reg8};
