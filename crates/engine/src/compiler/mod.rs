//! C5/C6: the operand-stack materializer and per-function code generator,
//! plus the verifier that feeds C6 its type information.

mod codegen;
mod prologue;
mod stack;
mod verify;

pub use stack::OperandStack;
pub use verify::{verify, Verified};

use crate::error::EngineError;
use crate::runtime::VMState;
use crate::signature::ManagedFunction;

/// One not-yet-compiled call site: the byte offset (relative to this
/// function's own code buffer, which becomes its entry point on
/// placement) of the 5-byte region the lazy-compile stub will overwrite
/// with a direct `call rel32` the first time it runs (§4.7).
#[derive(Debug, Clone)]
pub struct StubSite {
    pub patch_offset: usize,
    pub target_signature: String,
}

/// A forward reference to another VM instruction's native offset, filled
/// in once the whole function has been lowered (§3 CompilationData).
#[derive(Debug, Clone, Copy)]
pub struct BranchFixup {
    pub disp_offset: usize,
    pub target_vm_index: usize,
}

pub struct CompiledBody {
    pub code: Vec<u8>,
    pub vm_offsets: Vec<usize>,
    pub branch_fixups: Vec<BranchFixup>,
    pub stub_sites: Vec<StubSite>,
}

/// Lowers one function's VM body to native code, fully self-contained:
/// local branches are resolved in place before this returns (displacement
/// targets are buffer-relative, so the resolution is correct regardless
/// of where the buffer is eventually placed in memory). Call sites are
/// *not* resolved here — they remain self-patching stubs, resolved lazily
/// the first time each one executes (§4.7).
pub fn generate(vm: &VMState, function: &std::rc::Rc<ManagedFunction>) -> Result<CompiledBody, EngineError> {
    let verified = verify::verify(&vm.classes, &vm.functions, function)?;
    let mut body = codegen::lower_function(vm, function, &verified)?;
    resolve_local_branches(&mut body);
    Ok(body)
}

fn resolve_local_branches(body: &mut CompiledBody) {
    for fixup in &body.branch_fixups {
        let target_offset = body.vm_offsets[fixup.target_vm_index] as i32;
        let rel32 = target_offset - (fixup.disp_offset as i32 + 4);
        body.code[fixup.disp_offset..fixup.disp_offset + 4].copy_from_slice(&rel32.to_le_bytes());
    }
}
