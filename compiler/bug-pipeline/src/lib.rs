//! The BUG compiler pipeline: settings, the pass interface, the sequence
//! driver and the result carrier that threads diagnostics between phases.

pub mod passes;
pub mod result;
pub mod settings;

pub use passes::{CompileOutcome, Context, Driver, Pass};
pub use result::PassResult;
pub use settings::{CompilerSettings, EmitKind, OptimisationLevel};
