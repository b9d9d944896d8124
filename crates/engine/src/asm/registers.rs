//! Register files for the x86-64 subset this emitter targets.

/// The eight "base" general-purpose registers, encodable without a REX
/// prefix's extension bit. Discriminants are the 3-bit ModRM/opcode
/// register field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IntReg {
    Ax = 0b000,
    Cx = 0b001,
    Dx = 0b010,
    Bx = 0b011,
    Sp = 0b100,
    Bp = 0b101,
    Si = 0b110,
    Di = 0b111,
}

/// The extended registers R8-R15, requiring REX.R/B/X to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExtReg {
    R8 = 0b000,
    R9 = 0b001,
    R10 = 0b010,
    R11 = 0b011,
    R12 = 0b100,
    R13 = 0b101,
    R14 = 0b110,
    R15 = 0b111,
}

/// An 8-bit sub-register, used only for the narrow byte-move path (§4.2,
/// `Size8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg8 {
    Al = 0b000,
    Cl = 0b001,
    Dl = 0b010,
    Bl = 0b011,
    Ah = 0b100,
    Ch = 0b101,
    Dh = 0b110,
    Bh = 0b111,
}

/// The eight SSE scalar-float registers used by the calling convention and
/// arithmetic opcodes (XMM0-XMM7; no REX.R needed, this backend never
/// addresses XMM8-15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FloatReg {
    Xmm0 = 0,
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
    Xmm6 = 6,
    Xmm7 = 7,
}

/// A general-purpose integer register, tagged over the base/extended
/// register files (§4.2). This is the type C2's opcode methods are
/// overloaded on in spirit; in Rust it is one enum with a runtime match
/// instead of `O(k^2)` C++ overloads (§9 Design Notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntRegister {
    Base(IntReg),
    Extended(ExtReg),
}

impl IntRegister {
    pub fn is_base(self) -> bool {
        matches!(self, IntRegister::Base(_))
    }

    pub fn is_extended(self) -> bool {
        matches!(self, IntRegister::Extended(_))
    }

    /// The 3-bit field value used in ModRM/opcode-byte encoding, regardless
    /// of base/extended kind (the extension bit lives in the REX prefix).
    pub fn field(self) -> u8 {
        match self {
            IntRegister::Base(r) => r as u8,
            IntRegister::Extended(r) => r as u8,
        }
    }
}

impl From<IntReg> for IntRegister {
    fn from(r: IntReg) -> Self {
        IntRegister::Base(r)
    }
}

impl From<ExtReg> for IntRegister {
    fn from(r: ExtReg) -> Self {
        IntRegister::Extended(r)
    }
}

/// A memory operand: `[register]` or `[register + offset]`. Used by C2's
/// move/arithmetic opcodes; `register` may be base or extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOperand {
    pub register: IntRegister,
    pub offset: i32,
}

impl MemoryOperand {
    pub fn new(register: IntRegister) -> Self {
        MemoryOperand { register, offset: 0 }
    }

    pub fn with_offset(register: IntRegister, offset: i32) -> Self {
        MemoryOperand { register, offset }
    }
}

/// The data width selector for memory moves (§4.2). Only `Size32`/`Size64`
/// are fully implemented on the integer path; `Size8` is valid only through
/// `Reg8`, and `Size16` is rejected by the assembler façade with
/// `EncodeError::NotImplemented`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSize {
    Size8,
    Size16,
    Size32,
    Size64,
}

/// Jump/set condition codes (§4.2). `unsigned` selects `ja/jb/jae/jbe`
/// instead of `jg/jl/jge/jle` for the ordered comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Always,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

/// Returns true if `value` fits in a signed 8-bit immediate, the predicate
/// the encoder uses to pick the short `imm8` forms of add/sub (§4.1).
pub fn fits_in_signed_8(value: i32) -> bool {
    i8::try_from(value).is_ok()
}
