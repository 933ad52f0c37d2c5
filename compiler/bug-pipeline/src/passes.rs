//! The pass interface and the sequence driver.
//!
//! Each pass is a uniform record: a name, declared input and output keys
//! into the [Context], and a run function. The driver runs the passes in
//! order, augmenting the context with each pass's outputs; warnings
//! accumulate across passes, non-fatal errors accumulate without stopping
//! the front half, and the first fatal failure (layout, codegen) terminates
//! the sequence. The accumulated context and diagnostics are surfaced
//! regardless of exit path.

use bug_ast::Program;
use bug_codegen::EvmImage;
use bug_ir::Module;
use bug_layout::LayoutPlan;
use bug_reporting::Report;
use bug_source::Source;
use bug_types::TypeEnv;

use crate::{result::PassResult, settings::CompilerSettings};

/// The artifact dictionary passed between phases. Each slot is filled by
/// the pass that declares it as an output.
#[derive(Default)]
pub struct Context {
    pub source: Option<Source>,
    pub program: Option<Program>,
    pub env: Option<TypeEnv>,
    pub module: Option<Module>,
    pub plan: Option<LayoutPlan>,
    pub image: Option<EvmImage>,
}

impl Context {
    pub fn for_source(source: Source) -> Self {
        Self { source: Some(source), ..Default::default() }
    }

    /// Whether the slot named `key` is filled.
    pub fn has(&self, key: &str) -> bool {
        match key {
            "source" => self.source.is_some(),
            "ast" => self.program.is_some(),
            "types" => self.env.is_some(),
            "ir" => self.module.is_some(),
            "layout" => self.plan.is_some(),
            "bytecode" => self.image.is_some(),
            _ => false,
        }
    }
}

pub trait Pass {
    fn name(&self) -> &'static str;

    /// The context keys this pass consumes.
    fn inputs(&self) -> &'static [&'static str];

    /// The context keys this pass fills.
    fn outputs(&self) -> &'static [&'static str];

    /// Whether this pass may only run on an error-free context; a fatal
    /// stage in the sense of the driver.
    fn requires_clean_context(&self) -> bool {
        false
    }

    fn run(&self, ctx: &mut Context, settings: &CompilerSettings) -> PassResult<()>;
}

/// Parse the source into the AST.
pub struct ParsePass;

impl Pass for ParsePass {
    fn name(&self) -> &'static str {
        "parse"
    }

    fn inputs(&self) -> &'static [&'static str] {
        &["source"]
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["ast"]
    }

    fn run(&self, ctx: &mut Context, _settings: &CompilerSettings) -> PassResult<()> {
        let source = ctx.source.as_ref().expect("declared input");
        let (program, reports) = bug_parser::parse_source(source);
        ctx.program = program;

        match (&ctx.program, reports.iter().any(|report| report.is_error())) {
            // A missing tree is fatal even if the parser was lenient about
            // classifying its reports.
            (None, false) => PassResult::err(
                vec![Report::error(
                    bug_reporting::DiagnosticCode::ParseUnexpectedEof,
                    "the unit could not be parsed",
                )],
                reports,
            ),
            _ => PassResult::from_reports((), reports),
        }
    }
}

/// Build the type environment over the AST.
pub struct TypecheckPass;

impl Pass for TypecheckPass {
    fn name(&self) -> &'static str {
        "typecheck"
    }

    fn inputs(&self) -> &'static [&'static str] {
        &["ast"]
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["types"]
    }

    fn run(&self, ctx: &mut Context, _settings: &CompilerSettings) -> PassResult<()> {
        let program = ctx.program.as_ref().expect("declared input");
        let (env, reports) = bug_types::typecheck(program);
        ctx.env = Some(env);
        PassResult::from_reports((), reports)
    }
}

/// Lower the typed AST into SSA IR: build, insert phis, rename.
pub struct LowerPass;

impl Pass for LowerPass {
    fn name(&self) -> &'static str {
        "lower"
    }

    fn inputs(&self) -> &'static [&'static str] {
        &["ast", "types"]
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["ir"]
    }

    fn run(&self, ctx: &mut Context, _settings: &CompilerSettings) -> PassResult<()> {
        let program = ctx.program.as_ref().expect("declared input");
        let env = ctx.env.as_ref().expect("declared input");

        let (mut module, mut reports) = bug_lower::lower_module(program, env);
        reports.extend(bug_lower::finalise_ssa(&mut module));
        ctx.module = Some(module);
        PassResult::from_reports((), reports)
    }
}

/// Run the configured optimisation passes over the IR.
pub struct OptimisePass;

impl Pass for OptimisePass {
    fn name(&self) -> &'static str {
        "optimise"
    }

    fn inputs(&self) -> &'static [&'static str] {
        &["ir"]
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["ir"]
    }

    fn run(&self, ctx: &mut Context, settings: &CompilerSettings) -> PassResult<()> {
        let module = ctx.module.as_mut().expect("declared input");
        let optimiser =
            bug_lower::optimise::Optimiser::new(settings.optimisation_level.level());
        let warnings = optimiser.optimise(module);
        PassResult::ok((), warnings)
    }
}

/// Plan memory homes and block stack shapes.
pub struct LayoutPass;

impl Pass for LayoutPass {
    fn name(&self) -> &'static str {
        "layout"
    }

    fn inputs(&self) -> &'static [&'static str] {
        &["ir"]
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["layout"]
    }

    fn requires_clean_context(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context, _settings: &CompilerSettings) -> PassResult<()> {
        let module = ctx.module.as_ref().expect("declared input");
        match bug_layout::plan_module(module) {
            Ok(plan) => {
                ctx.plan = Some(plan);
                PassResult::ok((), vec![])
            }
            Err(errors) => PassResult::err(errors, vec![]),
        }
    }
}

/// Generate the constructor and runtime images.
pub struct CodegenPass;

impl Pass for CodegenPass {
    fn name(&self) -> &'static str {
        "codegen"
    }

    fn inputs(&self) -> &'static [&'static str] {
        &["ir", "layout"]
    }

    fn outputs(&self) -> &'static [&'static str] {
        &["bytecode"]
    }

    fn requires_clean_context(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut Context, _settings: &CompilerSettings) -> PassResult<()> {
        let module = ctx.module.as_ref().expect("declared input");
        let plan = ctx.plan.as_ref().expect("declared input");
        match bug_codegen::generate_module(module, plan) {
            Ok(image) => {
                ctx.image = Some(image);
                PassResult::ok((), vec![])
            }
            Err(errors) => PassResult::err(errors, vec![]),
        }
    }
}

/// The outcome of a driver run: whatever artifacts were produced, plus
/// every accumulated diagnostic.
pub struct CompileOutcome {
    pub context: Context,
    pub reports: Vec<Report>,
}

impl CompileOutcome {
    pub fn succeeded(&self) -> bool {
        !self.reports.iter().any(|report| report.is_error())
    }

    pub fn image(&self) -> Option<&EvmImage> {
        self.context.image.as_ref()
    }
}

/// The sequence driver.
pub struct Driver {
    settings: CompilerSettings,
    passes: Vec<Box<dyn Pass>>,
}

impl Driver {
    /// The standard pipeline in dependency order.
    pub fn new(settings: CompilerSettings) -> Self {
        Self {
            settings,
            passes: vec![
                Box::new(ParsePass),
                Box::new(TypecheckPass),
                Box::new(LowerPass),
                Box::new(OptimisePass),
                Box::new(LayoutPass),
                Box::new(CodegenPass),
            ],
        }
    }

    /// Compile a source unit end to end.
    pub fn compile(&self, source: Source) -> CompileOutcome {
        let mut ctx = Context::for_source(source);
        let mut reports: Vec<Report> = vec![];

        for pass in &self.passes {
            // Every declared input must have been produced by an earlier
            // pass; a hole is a pipeline-ordering bug, except after a
            // non-fatal upstream failure that withheld its artifact.
            if pass.inputs().iter().any(|key| !ctx.has(key)) {
                log::debug!("pass `{}` skipped: missing inputs", pass.name());
                break;
            }

            let has_errors = reports.iter().any(|report| report.is_error());
            if pass.requires_clean_context() && has_errors {
                log::debug!("pass `{}` skipped: earlier errors", pass.name());
                break;
            }

            log::debug!("running pass `{}`", pass.name());
            let result = pass.run(&mut ctx, &self.settings);
            let fatal = !result.is_ok() && pass.requires_clean_context();
            let (_, mut errors, mut warnings) = result.into_parts();
            reports.append(&mut errors);
            reports.append(&mut warnings);

            if fatal {
                // Fatal stages terminate the sequence immediately; the
                // accumulated context and diagnostics still surface.
                break;
            }
        }

        CompileOutcome { context: ctx, reports }
    }
}

#[cfg(test)]
mod tests {
    use bug_reporting::DiagnosticCode;

    use super::*;
    use crate::settings::OptimisationLevel;

    fn compile(source: &str, level: OptimisationLevel) -> CompileOutcome {
        let driver =
            Driver::new(CompilerSettings::default().with_optimisation_level(level));
        driver.compile(Source::new("test.bug", source))
    }

    #[test]
    fn minimal_program_compiles_end_to_end() {
        let outcome = compile("name Minimal; code {}", OptimisationLevel::O1);
        assert!(outcome.succeeded(), "{:?}", outcome.reports);

        let image = outcome.image().expect("an image is produced");
        assert!(image.create.is_none());
        assert!(!image.runtime.is_empty());
    }

    #[test]
    fn type_errors_stop_before_layout_but_keep_artifacts() {
        let outcome = compile("name E; code { let x: uint8 = missing; }", OptimisationLevel::O1);
        assert!(!outcome.succeeded());
        assert!(outcome
            .reports
            .iter()
            .any(|report| report.code == DiagnosticCode::TypeUnknownIdentifier));

        // The front half still produced its artifacts; the back half never
        // ran.
        assert!(outcome.context.program.is_some());
        assert!(outcome.context.module.is_some());
        assert!(outcome.context.image.is_none());
    }

    #[test]
    fn warnings_accumulate_across_passes() {
        let outcome = compile(
            "name W; storage { [0] out: uint256; } code { out = 1 / 0; }",
            OptimisationLevel::O1,
        );
        // Folding the division by zero warns but compilation succeeds.
        assert!(outcome.succeeded(), "{:?}", outcome.reports);
        assert!(outcome
            .reports
            .iter()
            .any(|report| report.code == DiagnosticCode::FoldDivisionByZero));
        assert!(outcome.image().is_some());
    }

    #[test]
    fn parse_failure_is_fatal_for_the_tree() {
        let outcome = compile("nam Minimal; code {}", OptimisationLevel::O1);
        assert!(!outcome.succeeded());
        assert!(outcome.context.image.is_none());
    }

    #[test]
    fn optimisation_levels_change_the_image() {
        let source = "name O; storage { [0] x: uint256; [1] y: uint256; [2] z: uint256; } \
                      code { let a = x + y; let b = x + y; z = a + b; }";

        let o0 = compile(source, OptimisationLevel::O0);
        let o2 = compile(source, OptimisationLevel::O2);
        assert!(o0.succeeded() && o2.succeeded());
        let o0_len = o0.image().unwrap().runtime.len();
        let o2_len = o2.image().unwrap().runtime.len();
        assert!(o2_len < o0_len, "{o2_len} should be below {o0_len}");
    }
}
