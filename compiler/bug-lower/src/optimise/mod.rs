//! Optimisation passes over the SSA IR. Each pass maps a module to a
//! module; the [Optimiser] applies them according to the configured level:
//!
//! - level 0: identity;
//! - level 1: constant folding and dead-instruction elimination;
//! - level 2: adds common-subexpression elimination within blocks;
//! - level 3: adds cross-block CSE for pure single-definition instructions.

mod cse;
mod dce;
mod fold;

use bug_ir::Module;
use bug_reporting::Report;

pub struct Optimiser {
    level: u8,
}

impl Optimiser {
    /// Create an [Optimiser] for a level in `0..=3`; higher values clamp.
    pub fn new(level: u8) -> Self {
        Self { level: level.min(3) }
    }

    /// Run the configured passes over every function body. Returns the
    /// warnings the passes produced (e.g. folding a division by zero).
    pub fn optimise(&self, module: &mut Module) -> Vec<Report> {
        if self.level == 0 {
            return vec![];
        }

        let mut reports = vec![];
        let level = self.level;

        module.for_each_function_mut(|function| {
            reports.extend(fold::fold_function(function));

            if level >= 2 {
                cse::local_cse(function);
            }
            if level >= 3 {
                cse::global_cse(function);
            }

            dce::eliminate_dead_code(function);
        });

        log::debug!("optimised module `{}` at level {}", module.name, self.level);
        reports
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use bug_ir::Module;
    use bug_source::Source;

    use super::*;

    /// Full front half of the pipeline plus optimisation.
    pub(crate) fn optimised(source: &str, level: u8) -> (Module, Vec<Report>) {
        let source = Source::new("test.bug", source);
        let (program, reports) = bug_parser::parse_source(&source);
        assert!(reports.is_empty(), "parse reports: {reports:?}");
        let program = program.unwrap();
        let (env, reports) = bug_types::typecheck(&program);
        assert!(!reports.iter().any(|r| r.is_error()), "typecheck reports: {reports:?}");
        let (mut module, reports) = crate::build::lower_module(&program, &env);
        assert!(!reports.iter().any(|r| r.is_error()), "lower reports: {reports:?}");
        let reports = crate::finalise_ssa(&mut module);
        assert!(reports.is_empty(), "ssa reports: {reports:?}");

        let warnings = Optimiser::new(level).optimise(&mut module);
        (module, warnings)
    }

    #[test]
    fn level_zero_is_identity() {
        let (unoptimised, _) = optimised(
            "name I; storage { [0] out: uint256; } code { out = 1 + 2; }",
            0,
        );
        let instruction_count: usize = unoptimised
            .main
            .blocks
            .values()
            .map(|block| block.instructions.len())
            .sum();
        // The addition is still there.
        assert!(instruction_count >= 2);
    }
}
