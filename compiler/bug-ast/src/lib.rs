//! The BUG abstract syntax tree. Nodes are created by the parser and never
//! mutated afterwards; every node carries a globally-unique [NodeId] and the
//! [Span] of the source text it was parsed from, which is how the type
//! environment attaches types and how diagnostics point back at source.

pub mod ast;

pub use ast::*;
