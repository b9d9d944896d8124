//! Function definitions and the canonical signature strings that identify
//! them uniquely across a loaded image.

use crate::instruction::Instruction;
use crate::types::Type;
use std::cell::Cell;

/// A function's static shape: name, parameters, return type, and whatever
/// is known before any body has been compiled.
///
/// `entry_point` uses `Cell` rather than an atomic: the runtime has exactly
/// one mutator thread (§5), so interior mutability without synchronization
/// is sufficient and matches the single-threaded execution model.
#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    /// Unqualified name; for member functions this is the method name only,
    /// the owning class is tracked separately in `owner`.
    pub name: String,
    /// Full parameter list, `this` included as element 0 for member
    /// functions. The signature string excludes it (§3).
    pub parameters: Vec<Type>,
    pub return_type: Type,
    pub is_managed: bool,
    pub is_member: bool,
    pub owner: Option<String>,
    /// Native entry point, populated once C7 finishes compiling this
    /// function. `None` until then.
    pub entry_point: Cell<usize>,
}

impl FunctionDefinition {
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<Type>,
        return_type: Type,
        is_managed: bool,
        is_member: bool,
        owner: Option<String>,
    ) -> Self {
        FunctionDefinition {
            name: name.into(),
            parameters,
            return_type,
            is_managed,
            is_member,
            owner,
            entry_point: Cell::new(0),
        }
    }

    /// Parameters as seen by a caller: excludes the implicit `this` for
    /// member functions.
    pub fn signature_parameters(&self) -> &[Type] {
        if self.is_member {
            &self.parameters[1..]
        } else {
            &self.parameters
        }
    }

    /// The canonical `name(Type1 Type2 ...)` signature string (§3). Member
    /// functions are additionally qualified `Class::member(...)` for display
    /// and lookup-by-owner purposes, but the *signature map key* used for
    /// uniqueness is this qualified form so that two classes may each define
    /// a method with the same unqualified name.
    pub fn signature(&self) -> String {
        let params = self
            .signature_parameters()
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        match &self.owner {
            Some(owner) => format!("{owner}::{}({params})", self.name),
            None => format!("{}({params})", self.name),
        }
    }

    pub fn entry_point(&self) -> Option<usize> {
        let ptr = self.entry_point.get();
        (ptr != 0).then_some(ptr)
    }

    pub fn set_entry_point(&self, ptr: usize) {
        self.entry_point.set(ptr);
    }

    pub fn is_compiled(&self) -> bool {
        self.entry_point.get() != 0
    }
}

/// A managed function's static shape plus its VM body and verification
/// results. Lives for the process once loaded (§3 Lifecycles).
#[derive(Debug, Clone)]
pub struct ManagedFunction {
    pub definition: FunctionDefinition,
    pub instructions: Vec<Instruction>,
    pub locals: Vec<Type>,
    /// String literals referenced by `LoadString`/`Operand::StringConst`,
    /// in declaration order.
    pub string_table: Vec<String>,
    /// Set once verification runs; the maximum operand-stack depth observed
    /// across all instruction boundaries, used to size the frame (§4.6).
    pub max_stack_depth: usize,
    /// Attribute container carried for parity with the original image
    /// format (§1 supplement); unread by the core.
    pub attributes: Vec<(String, Vec<(String, String)>)>,
}

impl ManagedFunction {
    pub fn new(definition: FunctionDefinition, instructions: Vec<Instruction>, locals: Vec<Type>) -> Self {
        ManagedFunction {
            definition,
            instructions,
            locals,
            string_table: Vec::new(),
            max_stack_depth: 0,
            attributes: Vec::new(),
        }
    }

    pub fn signature(&self) -> String {
        self.definition.signature()
    }
}
