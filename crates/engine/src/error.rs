//! Crate-facing error taxonomy.
//!
//! Load and verify errors are reported to the user and fail the process
//! cleanly (§7 kinds 1-2). Compile-time programming errors (`EncodeError`)
//! and runtime faults are programming bugs or machine-level traps
//! respectively; they are modeled here for documentation and testing but the
//! generated machine code never returns a `RuntimeFault` through Rust's
//! `Result` machinery — see `runtime::entrypoints`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("the function '{0}' is already defined")]
    DuplicateFunction(String),

    #[error("the class '{0}' is already defined")]
    DuplicateClass(String),

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("unknown class '{0}'")]
    UnknownClass(String),

    #[error("class '{0}' has a cyclic parent chain")]
    CyclicInheritance(String),

    #[error("malformed image: {0}")]
    MalformedImage(String),

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("function '{function}': operand stack underflow at instruction {index}")]
    StackUnderflow { function: String, index: usize },

    #[error(
        "function '{function}': operand stack depth mismatch at instruction {index}: {expected} along one path, {actual} along another"
    )]
    StackDepthMismatch {
        function: String,
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("function '{function}': branch at instruction {index} targets out-of-range index {target}")]
    InvalidBranchTarget {
        function: String,
        index: usize,
        target: usize,
    },

    #[error("function '{function}': instruction {index} references unknown local {local}")]
    UnknownLocal {
        function: String,
        index: usize,
        local: usize,
    },

    #[error("function '{function}': instruction {index} references unknown argument {argument}")]
    UnknownArgument {
        function: String,
        index: usize,
        argument: usize,
    },

    #[error("function '{function}': instruction {index} calls unresolved signature '{signature}'")]
    UnresolvedCall {
        function: String,
        index: usize,
        signature: String,
    },

    #[error("function '{function}': instruction {index} type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        function: String,
        index: usize,
        expected: String,
        found: String,
    },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("unimplemented operand combination: {0}")]
    NotImplemented(String),
}

/// A fault detected by an inline runtime check in emitted code (§7 kind 4).
/// Never constructed in normal Rust control flow; kept as a documented,
/// testable description of what each handler stub reports before
/// terminating the process.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFault {
    #[error("null reference")]
    NullReference,
    #[error("array index out of bounds")]
    IndexOutOfBounds,
    #[error("invalid array length")]
    InvalidArrayLength,
    #[error("call stack overflow")]
    StackOverflow,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
