//! C7: the JIT controller. Turns a verified, lowered function body into
//! code living in executable memory and reports its entry point.
//!
//! There is no separate cross-function symbol-resolution pass here: every
//! call site C6 emits is already a self-patching stub whose immediates
//! (VM pointer, caller pointer, callee pointer, patch offset) were baked
//! in at lowering time, since none of them depend on where the function
//! ends up placed (§4.7). Placement only has to resolve *this* function's
//! own local branches, which `compiler::generate` already does against
//! buffer-relative offsets before this module ever sees the bytes.

use crate::compiler;
use crate::error::EngineError;
use crate::runtime::VMState;
use crate::signature::ManagedFunction;
use std::rc::Rc;
use tracing::{debug, instrument};

/// Compiles `function`'s body and places it in executable memory,
/// returning its entry point. The caller (`VMState::compile_by_signature`)
/// is responsible for recording the entry point on the function's
/// `FunctionDefinition` and for flipping the containing page executable.
#[instrument(skip(vm, function), fields(function = %function.signature()))]
pub fn compile_function(vm: &mut VMState, function: &Rc<ManagedFunction>) -> Result<usize, EngineError> {
    let body = compiler::generate(vm, function)?;
    debug!(bytes = body.code.len(), stubs = body.stub_sites.len(), "compiled function body");
    let entry = vm
        .memory
        .emit(&body.code)
        .map_err(|e| crate::error::LoadError::MalformedImage(e.to_string()))?;
    Ok(entry as usize)
}
