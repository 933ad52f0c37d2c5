//! Stable, machine-readable diagnostic codes. Callers key on these strings,
//! so renaming one is a breaking change to the compiler's interface.

use std::fmt;

/// Every diagnostic the compiler can produce carries one of these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    // Parser
    ParseUnexpectedToken,
    ParseUnexpectedEof,
    ParseInvalidLiteral,

    // Type environment
    TypeMismatch,
    TypeUnknownIdentifier,
    TypeUnknownType,
    TypeCyclicStruct,
    TypeArityMismatch,
    TypeNotAssignable,
    TypeNotComparable,
    TypeMissingInitializer,
    TypeInvalidMappingKey,
    TypeInvalidSlice,
    TypeReservedName,

    // IR builder
    IrUnknownIdentifier,
    IrUnsupportedStoragePattern,
    IrInvalidLvalue,
    IrLoopControlOutsideLoop,
    IrExhaustiveness,

    // Optimiser
    FoldDivisionByZero,

    // Memory and stack layout
    MemoryStackTooDeep,
    MemoryInvalidLayout,
    MemoryAllocationFailure,

    // Code generation
    CodegenUnsupported,
    CodegenInternal,
}

impl DiagnosticCode {
    /// The stable string form reported to callers.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::ParseUnexpectedToken => "PARSE_UNEXPECTED_TOKEN",
            DiagnosticCode::ParseUnexpectedEof => "PARSE_UNEXPECTED_EOF",
            DiagnosticCode::ParseInvalidLiteral => "PARSE_INVALID_LITERAL",
            DiagnosticCode::TypeMismatch => "TYPE_MISMATCH",
            DiagnosticCode::TypeUnknownIdentifier => "TYPE_UNKNOWN_IDENTIFIER",
            DiagnosticCode::TypeUnknownType => "TYPE_UNKNOWN_TYPE",
            DiagnosticCode::TypeCyclicStruct => "TYPE_CYCLIC_STRUCT",
            DiagnosticCode::TypeArityMismatch => "TYPE_ARITY_MISMATCH",
            DiagnosticCode::TypeNotAssignable => "TYPE_NOT_ASSIGNABLE",
            DiagnosticCode::TypeNotComparable => "TYPE_NOT_COMPARABLE",
            DiagnosticCode::TypeMissingInitializer => "TYPE_MISSING_INITIALIZER",
            DiagnosticCode::TypeInvalidMappingKey => "TYPE_INVALID_MAPPING_KEY",
            DiagnosticCode::TypeInvalidSlice => "TYPE_INVALID_SLICE",
            DiagnosticCode::TypeReservedName => "TYPE_RESERVED_NAME",
            DiagnosticCode::IrUnknownIdentifier => "IR_UNKNOWN_IDENTIFIER",
            DiagnosticCode::IrUnsupportedStoragePattern => "IR_UNSUPPORTED_STORAGE_PATTERN",
            DiagnosticCode::IrInvalidLvalue => "IR_INVALID_LVALUE",
            DiagnosticCode::IrLoopControlOutsideLoop => "IR_LOOP_CONTROL_OUTSIDE_LOOP",
            DiagnosticCode::IrExhaustiveness => "IR_EXHAUSTIVENESS",
            DiagnosticCode::FoldDivisionByZero => "FOLD_DIVISION_BY_ZERO",
            DiagnosticCode::MemoryStackTooDeep => "MEMORY_STACK_TOO_DEEP",
            DiagnosticCode::MemoryInvalidLayout => "MEMORY_INVALID_LAYOUT",
            DiagnosticCode::MemoryAllocationFailure => "MEMORY_ALLOCATION_FAILURE",
            DiagnosticCode::CodegenUnsupported => "CODEGEN_UNSUPPORTED",
            DiagnosticCode::CodegenInternal => "CODEGEN_INTERNAL",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
