//! Memory and block layout planning.
//!
//! Memory is a linear arena. The low words follow the EVM convention: two
//! scratch words for hashing at `0x00..0x40`, the free-memory pointer word
//! at `0x40`, a reserved zero word at `0x60`. Everything the planner places
//! (SSA temp homes, `Allocate` regions) starts at [STATIC_BASE]; runtime
//! allocations bump the pointer stored at [FREE_PTR].
//!
//! The block plan records each block's expected operand-stack shape on
//! entry and exit. The code generator keeps the operand stack empty between
//! IR instructions (temps live in their memory homes), so every shape is
//! the empty sequence; the planner still verifies the shapes agree on every
//! CFG edge, which catches generator-discipline regressions.

pub mod plan;

pub use plan::{plan_module, BlockShape, FunctionLayout, LayoutPlan, StackShape};

/// Scratch word used for single-word hashing and the return-value handoff.
pub const SCRATCH_A: u64 = 0x00;
/// Second scratch word, used for two-word keccak inputs (mapping slots).
pub const SCRATCH_B: u64 = 0x20;
/// The word holding the runtime free-memory pointer.
pub const FREE_PTR: u64 = 0x40;
/// Reserved zero word.
pub const ZERO_SLOT: u64 = 0x60;
/// First byte the planner may assign.
pub const STATIC_BASE: u64 = 0x80;

/// The EVM's DUP/SWAP reach: an operand deeper than this cannot be
/// addressed.
pub const STACK_WINDOW: usize = 16;
