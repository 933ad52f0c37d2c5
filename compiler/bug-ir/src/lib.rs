//! BUG compiler intermediate representation. The IR is a control-flow graph
//! of basic blocks whose instructions reference SSA temporaries and storage
//! slots. The builder produces a pre-SSA form that still contains `local`
//! reads and writes; the phi inserter replaces those with temporaries, and
//! from then on every value is a constant or a temp.

pub mod debug;
pub mod ir;
pub mod traversal;
pub mod write;

pub use debug::{DebugContext, DebugPointer, DebugValue, SourceContext, VariableLocation};
pub use ir::*;
