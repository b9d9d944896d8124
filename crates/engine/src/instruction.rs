//! The stack VM's instruction set.
//!
//! Mirrors the three dispatch tables of the original tool's bytecode parser:
//! no-operand instructions, branch instructions, and string-operand
//! instructions, plus the typed-literal and call families that need their
//! own payloads.

use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Nop,
    Pop,
    Duplicate,

    LoadInt,
    LoadFloat,
    LoadChar,
    LoadTrue,
    LoadFalse,
    LoadNull,
    LoadString,

    LoadLocal,
    StoreLocal,
    LoadArg,

    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Not,

    ConvertIntToFloat,
    ConvertFloatToInt,

    CompareEqual,
    CompareNotEqual,
    CompareGreaterThan,
    CompareGreaterThanOrEqual,
    CompareLessThan,
    CompareLessThanOrEqual,

    Branch,
    BranchEqual,
    BranchNotEqual,
    BranchGreaterThan,
    BranchGreaterThanOrEqual,
    BranchLessThan,
    BranchLessThanOrEqual,

    Call,
    CallInstance,
    CallVirtual,
    NewObject,

    NewArray,
    LoadArrayLength,
    LoadElement,
    StoreElement,

    LoadField,
    StoreField,

    Ret,
}

impl OpCode {
    /// True for the six `beq`/`bne`/... family members and plain `branch`.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            OpCode::Branch
                | OpCode::BranchEqual
                | OpCode::BranchNotEqual
                | OpCode::BranchGreaterThan
                | OpCode::BranchGreaterThanOrEqual
                | OpCode::BranchLessThan
                | OpCode::BranchLessThanOrEqual
        )
    }

    /// Net effect on logical operand-stack depth, used by the verifier to
    /// check the path-independence invariant (§3) and by the code generator
    /// to re-record depth between instructions. `None` for call-family
    /// opcodes, whose effect depends on the callee's signature.
    pub fn stack_effect(self) -> Option<i32> {
        use OpCode::*;
        Some(match self {
            Nop => 0,
            Pop => -1,
            Duplicate => 1,
            LoadInt | LoadFloat | LoadChar | LoadTrue | LoadFalse | LoadNull | LoadString => 1,
            LoadLocal | LoadArg => 1,
            StoreLocal => -1,
            Add | Sub | Mul | Div | And | Or => -1,
            Not => 0,
            ConvertIntToFloat | ConvertFloatToInt => 0,
            CompareEqual | CompareNotEqual | CompareGreaterThan | CompareGreaterThanOrEqual
            | CompareLessThan | CompareLessThanOrEqual => -1,
            Branch => 0,
            BranchEqual | BranchNotEqual | BranchGreaterThan | BranchGreaterThanOrEqual
            | BranchLessThan | BranchLessThanOrEqual => -2,
            NewObject => 1,
            NewArray => 0,
            LoadArrayLength => 0,
            LoadElement => -1,
            StoreElement => -3,
            LoadField => 0,
            StoreField => -2,
            Ret => 0,
            Call | CallInstance | CallVirtual => return None,
        })
    }
}

/// The kind of call target for a `Call`/`CallInstance`/`CallVirtual`
/// instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    pub name: String,
    pub class: Option<String>,
    pub parameters: Vec<Type>,
}

impl CallTarget {
    /// The canonical signature string this call resolves against (§3).
    pub fn signature(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        match &self.class {
            Some(class) => format!("{class}::{}({params})", self.name),
            None => format!("{}({params})", self.name),
        }
    }
}

/// The payload carried by an instruction, keyed to its opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int(i32),
    Float(f32),
    Char(u8),
    /// An index into the function's string-literal table, used by
    /// `LoadString` after the source/image loader interns literal text.
    StringConst(u32),
    /// A raw type-name string operand: `NewArray`'s element type, or the
    /// `Class::field` pair of a field access (field name only; the class is
    /// recovered from the static type of the popped reference during
    /// verification, matching the original's `stfield`/`ldfield` shape).
    Name(String),
    Call(CallTarget),
    NewObject(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: Operand,
}

impl Instruction {
    pub fn new(opcode: OpCode, operand: Operand) -> Self {
        Instruction { opcode, operand }
    }

    pub fn simple(opcode: OpCode) -> Self {
        Instruction::new(opcode, Operand::None)
    }

    /// The VM-index target of a branch instruction's operand, if this
    /// instruction is a branch. The operand for branches is stored as
    /// `Operand::Int` carrying the target instruction index.
    pub fn branch_target(&self) -> Option<usize> {
        if !self.opcode.is_branch() {
            return None;
        }
        match self.operand {
            Operand::Int(target) => Some(target as usize),
            _ => None,
        }
    }
}
