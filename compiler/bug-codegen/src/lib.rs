//! The BUG EVM code generator.
//!
//! Each IR instruction lowers to a composition of branded stack transitions
//! (see [stack]) driven through the [pipe::Pipe] combinator. SSA temps live
//! in planner-assigned memory homes, so the operand stack is empty between
//! instructions; every block begins with a `JUMPDEST` and block ids resolve
//! to concrete program counters in the assembler's patch pass.

pub mod asm;
pub mod gen;
pub mod opcode;
pub mod pipe;
pub mod stack;

use std::fmt;

use asm::AnnotatedInstruction;
use bug_ir::Module;
use bug_layout::LayoutPlan;
use bug_reporting::{DiagnosticCode, Report};

/// A fatal code-generation failure. The generator never emits partial
/// output: on error the whole image is discarded.
#[derive(Debug, Clone)]
pub enum CodegenError {
    /// The abstract stack did not have the brands an operation declared.
    StackMismatch { expected: String, found: String },
    /// An operand would have to be reached beyond the 16-slot DUP/SWAP
    /// window.
    StackTooDeep { needed: usize },
    /// The construct has no code generation yet.
    Unsupported { what: String },
    /// An internal invariant failed.
    Internal { message: String },
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodegenError::StackMismatch { expected, found } => {
                write!(f, "expected {expected} on the stack, found {found}")
            }
            CodegenError::StackTooDeep { needed } => {
                write!(f, "operand at depth {needed} is beyond the 16-slot stack window")
            }
            CodegenError::Unsupported { what } => write!(f, "{what} is not supported"),
            CodegenError::Internal { message } => write!(f, "internal error: {message}"),
        }
    }
}

impl From<CodegenError> for Report {
    fn from(error: CodegenError) -> Self {
        let code = match &error {
            CodegenError::StackTooDeep { .. } => DiagnosticCode::MemoryStackTooDeep,
            CodegenError::Unsupported { .. } => DiagnosticCode::CodegenUnsupported,
            CodegenError::StackMismatch { .. } | CodegenError::Internal { .. } => {
                DiagnosticCode::CodegenInternal
            }
        };
        Report::error(code, error.to_string())
    }
}

/// The generator's output: the runtime image, the constructor image when a
/// `create` body exists, and the annotated instruction listings for both.
#[derive(Debug, Clone)]
pub struct EvmImage {
    pub runtime: Vec<u8>,
    pub create: Option<Vec<u8>>,
    pub runtime_listing: Vec<AnnotatedInstruction>,
    pub create_listing: Vec<AnnotatedInstruction>,
}

/// Generate the constructor and runtime images for a module.
pub fn generate_module(module: &Module, plan: &LayoutPlan) -> Result<EvmImage, Vec<Report>> {
    gen::generate(module, plan).map_err(|error| vec![error.into()])
}
