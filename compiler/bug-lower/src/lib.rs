//! BUG IR builder. This crate contains the functionality that converts the
//! typed AST into BUG IR, the phi inserter that finalises the IR into SSA
//! form, and the optimisation passes that run over the SSA IR (constant
//! folding, dead code elimination and common-subexpression elimination).

pub mod build;
pub mod optimise;
pub mod ssa;

use bug_ast::Program;
use bug_ir::Module;
use bug_reporting::Report;
use bug_types::TypeEnv;

/// Lower a typed program into a pre-SSA [Module]. Diagnostics accumulate
/// without aborting; a function with errors is still emitted and the caller
/// decides whether to proceed.
pub fn lower_module(program: &Program, env: &TypeEnv) -> (Module, Vec<Report>) {
    build::lower_module(program, env)
}

/// Finalise every function body of the module into SSA form: insert pruned
/// phi nodes and replace every `local` definition and use with temps.
pub fn finalise_ssa(module: &mut Module) -> Vec<Report> {
    let mut reports = vec![];
    module.for_each_function_mut(|function| {
        reports.extend(ssa::finalise_function(function));
    });
    reports
}
