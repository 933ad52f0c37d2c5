//! The BUG type environment. Resolves named types, struct field layouts and
//! function signatures, and produces an id→type mapping over AST nodes. The
//! environment never aborts: every failure becomes a [`Ty::Failure`] attached
//! to the offending node plus a diagnostic, so later stages can keep going.

pub mod check;
pub mod env;
pub mod fmt;
pub mod symbol;
pub mod ty;

pub use check::typecheck;
pub use env::{FunctionSig, StorageSlot, TypeEnv};
pub use symbol::{ScopeStack, StorageClass, Symbol};
pub use ty::{StructField, StructTy, Ty};
