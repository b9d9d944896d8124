//! C0: the textual assembly front end — lexer, recursive-descent parser,
//! and disassembler pretty-printer (§4.10). Not a hardened parser: error
//! recovery is a single `LoadError::Syntax` with a line number, matching
//! the original tool's `bytecodeparser.cpp`.

mod disasm;
mod lexer;
pub(crate) mod parser;

pub use disasm::disassemble;
pub use parser::parse;

use crate::error::EngineError;
use crate::image;
use crate::runtime::VMState;
use tracing::instrument;

/// Parses `source` and installs every class and function it declares into
/// `vm`, exactly as `image::load` does for the binary format.
#[instrument(skip(source, vm))]
pub fn load_source(source: &str, vm: &mut VMState) -> Result<(), EngineError> {
    let contents = parse(source)?;
    image::install(contents, vm)?;
    Ok(())
}
