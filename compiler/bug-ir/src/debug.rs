//! Debug contexts carried by IR instructions and, eventually, by every
//! emitted EVM instruction. A context records the source span an instruction
//! came from and where the variables in scope live at runtime. When rewrites
//! merge instructions, their contexts are combined as a deduplicated `pick`
//! of the distinct alternatives so debuggers can present every origin.

use alloy_primitives::U256;
use bug_source::Span;
use smallvec::SmallVec;

use crate::ir::TempId;

/// A value a debug pointer can refer to: either a known constant or an SSA
/// temporary whose runtime location the consumer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugValue {
    Const(U256),
    Temp(TempId),
}

/// Where a source variable lives at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugPointer {
    /// A persistent storage slot.
    Storage { slot: U256 },
    /// An offset into linear memory.
    Memory { offset: DebugValue },
    /// A depth on the EVM operand stack, zero being the top.
    Stack { depth: usize },
    /// A region of the call's input data.
    Calldata { offset: DebugValue, length: DebugValue },
}

/// A source variable in scope and its runtime location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableLocation {
    pub name: String,
    pub pointer: DebugPointer,
}

/// One provenance record: a source span plus the variable-location map that
/// was in force there.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceContext {
    pub span: Option<Span>,
    pub variables: Vec<VariableLocation>,
}

impl SourceContext {
    pub fn at(span: Span) -> Self {
        Self { span: Some(span), variables: vec![] }
    }
}

/// The debug context of an instruction. Usually a single [SourceContext];
/// after merging rewrites it may hold several distinct alternatives, which
/// consumers present as a `pick`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DebugContext {
    contexts: SmallVec<[SourceContext; 1]>,
}

impl DebugContext {
    /// A context with no provenance at all.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn single(context: SourceContext) -> Self {
        Self { contexts: SmallVec::from_buf([context]) }
    }

    pub fn at(span: Span) -> Self {
        Self::single(SourceContext::at(span))
    }

    pub fn is_none(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Whether this context holds more than one alternative.
    pub fn is_pick(&self) -> bool {
        self.contexts.len() > 1
    }

    pub fn contexts(&self) -> &[SourceContext] {
        &self.contexts
    }

    /// The primary span, when one exists.
    pub fn span(&self) -> Option<Span> {
        self.contexts.iter().find_map(|context| context.span)
    }

    /// Merge two contexts into a deduplicated `pick` over their distinct
    /// alternatives. Structural duplicates collapse, so merging a context
    /// with itself is the identity.
    pub fn merge(&self, other: &DebugContext) -> DebugContext {
        let mut merged = self.clone();
        for context in &other.contexts {
            if !merged.contexts.contains(context) {
                merged.contexts.push(context.clone());
            }
        }
        merged
    }
}
