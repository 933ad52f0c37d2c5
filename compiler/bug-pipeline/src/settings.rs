//! Settings applied to a compiler invocation.

use std::{fmt, str::FromStr};

/// What optimisation level the compiler should run at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum OptimisationLevel {
    /// No optimisation at all.
    O0,
    /// Constant folding and dead-code elimination.
    #[default]
    O1,
    /// Adds block-local common-subexpression elimination.
    O2,
    /// Adds cross-block common-subexpression elimination.
    O3,
}

impl OptimisationLevel {
    pub fn level(&self) -> u8 {
        match self {
            OptimisationLevel::O0 => 0,
            OptimisationLevel::O1 => 1,
            OptimisationLevel::O2 => 2,
            OptimisationLevel::O3 => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OptimisationLevel::O0 => "0",
            OptimisationLevel::O1 => "1",
            OptimisationLevel::O2 => "2",
            OptimisationLevel::O3 => "3",
        }
    }
}

impl fmt::Display for OptimisationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OptimisationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(OptimisationLevel::O0),
            "1" => Ok(OptimisationLevel::O1),
            "2" => Ok(OptimisationLevel::O2),
            "3" => Ok(OptimisationLevel::O3),
            _ => Err(format!("invalid optimisation level `{s}`, expected 0..3")),
        }
    }
}

/// Which image(s) the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitKind {
    /// The runtime image only.
    #[default]
    Runtime,
    /// The constructor image only.
    Create,
    /// Both images.
    Both,
}

impl FromStr for EmitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "runtime" => Ok(EmitKind::Runtime),
            "create" => Ok(EmitKind::Create),
            "both" => Ok(EmitKind::Both),
            _ => Err(format!("invalid emit kind `{s}`, expected runtime, create or both")),
        }
    }
}

/// Various settings that are present on the compiler pipeline when
/// launching a compilation.
#[derive(Debug, Clone, Default)]
pub struct CompilerSettings {
    /// The optimisation level that is to be performed.
    pub optimisation_level: OptimisationLevel,

    /// Whether to pretty-print the AST once parsing completes.
    pub dump_ast: bool,

    /// Whether to pretty-print the IR once SSA finalisation completes.
    pub dump_ir: bool,

    /// Which image(s) to emit.
    pub emit: EmitKind,
}

impl CompilerSettings {
    pub fn with_optimisation_level(mut self, level: OptimisationLevel) -> Self {
        self.optimisation_level = level;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_and_print() {
        assert_eq!("2".parse::<OptimisationLevel>().unwrap(), OptimisationLevel::O2);
        assert_eq!(OptimisationLevel::O3.level(), 3);
        assert!("4".parse::<OptimisationLevel>().is_err());
        assert_eq!(OptimisationLevel::default(), OptimisationLevel::O1);
    }

    #[test]
    fn emit_kinds_parse() {
        assert_eq!("both".parse::<EmitKind>().unwrap(), EmitKind::Both);
        assert!("neither".parse::<EmitKind>().is_err());
    }
}
