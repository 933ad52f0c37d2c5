//! The IR builder: a state machine threaded through the lowering of each
//! function body. A block becomes visible to the function only once its
//! terminator is set, so half-formed blocks are never observable by later
//! lowering steps.

mod expr;
mod place;

use bug_ast::{AstNode, Block as AstBlock, Declaration, Program, Statement};
use bug_ir::{
    Block, BlockId, DataLocation, DebugContext, Function, Instruction, InstructionKind, Module,
    Param, TempId, Terminator, TerminatorKind, Value, traversal,
};
use bug_reporting::{DiagnosticCode, Report, Reporter};
use bug_source::Span;
use bug_types::{ScopeStack, Symbol, Ty, TypeEnv};
use indexmap::IndexMap;

/// Lower every function body of the program: user-defined functions first,
/// then the optional `create` block, then the required `main` block.
pub fn lower_module(program: &Program, env: &TypeEnv) -> (Module, Vec<Report>) {
    let mut reporter = Reporter::new();
    let mut functions = IndexMap::new();

    for declaration in &program.declarations {
        let Declaration::Function(decl) = declaration.body() else { continue };
        let Some(sig) = env.functions.get(&decl.name.ident) else { continue };

        let mut builder = Builder::new(env, &decl.name.ident, sig.returns.clone());
        builder.bind_params(&sig.params);
        builder.lower_body(&decl.body);
        let (function, reports) = builder.finish();
        reporter.add_all(reports);
        functions.insert(function.name.clone(), function);
    }

    let create = program.create.as_ref().map(|block| {
        let mut builder = Builder::new(env, "create", Ty::void());
        builder.lower_body(block);
        let (function, reports) = builder.finish();
        reporter.add_all(reports);
        function
    });

    let mut builder = Builder::new(env, "main", Ty::void());
    builder.lower_body(&program.main);
    let (main, reports) = builder.finish();
    reporter.add_all(reports);

    log::debug!(
        "lowered module `{}`: {} user function(s), create: {}",
        program.name.ident,
        functions.len(),
        create.is_some()
    );

    let module = Module {
        name: program.name.ident.clone(),
        storage: env.storage.clone(),
        functions,
        create,
        main,
    };
    (module, reporter.take_reports())
}

/// The innermost loop's control-transfer targets.
#[derive(Debug, Clone, Copy)]
struct LoopContext {
    continue_target: BlockId,
    break_target: BlockId,
}

/// A block that is still being filled. It holds instructions but no
/// terminator yet, and is invisible to the function until terminated.
struct OpenBlock {
    id: BlockId,
    instructions: Vec<Instruction>,
}

pub(crate) struct Builder<'tcx> {
    pub(crate) env: &'tcx TypeEnv,

    name: String,
    returns: Ty,
    params: Vec<Param>,
    entry: BlockId,

    /// Committed blocks, in the order their terminators were set.
    committed: IndexMap<BlockId, Block>,
    /// Blocks currently being filled.
    open: IndexMap<BlockId, OpenBlock>,
    /// The block new instructions go to. [None] after the current block was
    /// terminated and no successor has been opened yet.
    current: Option<BlockId>,

    pub(crate) scopes: ScopeStack,
    loop_stack: Vec<LoopContext>,

    temp_counter: u32,
    block_counter: u32,

    /// The span of the statement currently being lowered; attached to every
    /// emitted instruction.
    pub(crate) current_span: Option<Span>,

    pub(crate) reporter: Reporter,
}

impl<'tcx> Builder<'tcx> {
    fn new(env: &'tcx TypeEnv, name: &str, returns: Ty) -> Self {
        let mut builder = Self {
            env,
            name: name.to_string(),
            returns,
            params: vec![],
            entry: BlockId::from_raw(0),
            committed: IndexMap::new(),
            open: IndexMap::new(),
            current: None,
            scopes: env.module_scope.clone(),
            loop_stack: vec![],
            temp_counter: 0,
            block_counter: 0,
            current_span: None,
            reporter: Reporter::new(),
        };

        let entry = builder.new_block();
        builder.entry = entry;
        builder.current = Some(entry);
        builder
    }

    // ------------------------------------------------------------------
    // State machine primitives
    // ------------------------------------------------------------------

    pub(crate) fn new_temp(&mut self) -> TempId {
        let temp = TempId(self.temp_counter);
        self.temp_counter += 1;
        temp
    }

    /// Open a fresh block. It joins the function only when terminated.
    pub(crate) fn new_block(&mut self) -> BlockId {
        let id = BlockId::from_raw(self.block_counter);
        self.block_counter += 1;
        self.open.insert(id, OpenBlock { id, instructions: vec![] });
        id
    }

    pub(crate) fn switch_to_block(&mut self, block: BlockId) {
        debug_assert!(self.open.contains_key(&block), "cannot switch to a committed block");
        self.current = Some(block);
    }

    pub(crate) fn debug_here(&self) -> DebugContext {
        match self.current_span {
            Some(span) => DebugContext::at(span),
            None => DebugContext::none(),
        }
    }

    /// Append an instruction to the current block.
    pub(crate) fn emit(&mut self, kind: InstructionKind, dest: Option<TempId>) {
        let debug = self.debug_here();
        let Some(current) = self.current else { return };
        let block = self.open.get_mut(&current).expect("current block is always open");
        block.instructions.push(Instruction::new(kind, dest, debug));
    }

    /// Append an instruction that defines a fresh temp of type `ty` and
    /// return the temp as a [Value].
    pub(crate) fn emit_value(&mut self, kind: InstructionKind, ty: Ty) -> Value {
        let dest = self.new_temp();
        self.emit(kind, Some(dest));
        Value::Temp(dest, ty)
    }

    /// Set the terminator of the current block, committing it to the
    /// function. Afterwards there is no current block until the caller
    /// switches to one.
    pub(crate) fn terminate(&mut self, kind: TerminatorKind) {
        let Some(current) = self.current.take() else { return };
        let block = self.open.shift_remove(&current).expect("current block is always open");

        self.committed.insert(
            block.id,
            Block {
                id: block.id,
                phis: vec![],
                instructions: block.instructions,
                predecessors: Default::default(),
                terminator: Terminator::new(kind, self.debug_here()),
                debug: DebugContext::none(),
            },
        );
    }

    /// Whether the current position still accepts instructions; false once
    /// the block was terminated (e.g. after lowering a `return`).
    pub(crate) fn is_terminated(&self) -> bool {
        self.current.is_none()
    }

    /// If the current block is still open, jump to `target`.
    fn jump_if_open(&mut self, target: BlockId) {
        if !self.is_terminated() {
            self.terminate(TerminatorKind::Jump { target });
        }
    }

    pub(crate) fn report(&mut self, report: Report) {
        self.reporter.add(report);
    }

    /// Report the diagnostic and produce the zero sentinel that keeps the
    /// surrounding lowering coherent.
    pub(crate) fn report_and_zero(&mut self, report: Report) -> Value {
        self.report(report);
        Value::zero()
    }

    // ------------------------------------------------------------------
    // Function assembly
    // ------------------------------------------------------------------

    /// Bind function parameters: each parameter gets an entry temp and a
    /// local definition so the body can read and assign it like any other
    /// variable.
    fn bind_params(&mut self, params: &[(String, Ty)]) {
        for (name, ty) in params {
            let temp = self.new_temp();
            self.params.push(Param { name: name.clone(), ty: ty.clone(), temp });
            self.scopes.declare(Symbol::local(name.clone(), ty.clone()));
            self.emit(
                InstructionKind::Write {
                    location: DataLocation::Local,
                    slot: None,
                    offset: None,
                    length: None,
                    value: Value::Temp(temp, ty.clone()),
                    name: Some(name.clone()),
                },
                None,
            );
        }
    }

    fn lower_body(&mut self, body: &AstNode<AstBlock>) {
        self.scopes.enter();
        for statement in &body.statements {
            self.lower_statement(statement);
        }
        self.scopes.exit();

        // A body that falls off the end returns nothing.
        if !self.is_terminated() {
            self.terminate(TerminatorKind::Return { value: None });
        }
    }

    /// Finish the function: drop blocks that can never execute (a `return`
    /// mid-block leaves an unreachable continuation open) and compute
    /// predecessor sets.
    fn finish(mut self) -> (Function, Vec<Report>) {
        // Unterminated open blocks are unreachable continuations; give them
        // a terminator so they can be uniformly discarded below.
        let leftover: Vec<BlockId> = self.open.keys().copied().collect();
        for id in leftover {
            self.current = Some(id);
            self.terminate(TerminatorKind::Return { value: None });
        }

        let mut function = Function {
            name: self.name,
            params: self.params,
            returns: self.returns,
            entry: self.entry,
            blocks: self.committed,
            temp_count: self.temp_counter,
        };

        for id in traversal::unreachable_blocks(&function) {
            function.blocks.shift_remove(&id);
        }
        function.recompute_predecessors();

        (function, self.reporter.take_reports())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn lower_statement(&mut self, statement: &AstNode<Statement>) {
        if self.is_terminated() {
            // Code after a `return`/`break`/`continue` in the same source
            // block can never execute; open a detached block so lowering
            // stays coherent, then let `finish` discard it.
            let unreachable = self.new_block();
            self.switch_to_block(unreachable);
        }

        self.current_span = Some(statement.span());

        match statement.body() {
            Statement::Let { name, value, .. } => {
                let ty = self.env.ty_of(name.id());
                self.check_local_binding_ty(&ty, statement.span());

                let value = if matches!(ty, Ty::Struct(_) | Ty::Array { size: Some(_), .. }) {
                    // Aggregates live in memory behind a pointer-valued
                    // local; the declaration reserves their region.
                    if value.is_some() {
                        self.report(
                            Report::error(
                                DiagnosticCode::IrUnsupportedStoragePattern,
                                "aggregate locals cannot be initialised as a whole",
                            )
                            .with_span(statement.span()),
                        );
                    }
                    let size = ty.memory_size();
                    self.emit_value(
                        InstructionKind::Allocate {
                            size: Value::Const(bug_ir::ConstValue::uint(size)),
                        },
                        bug_types::Ty::UINT256,
                    )
                } else {
                    match value {
                        Some(value) => self.lower_expr(value),
                        None => Value::Const(bug_ir::ConstValue::number(
                            alloy_primitives::U256::ZERO,
                            ty.clone(),
                        )),
                    }
                };
                self.write_local(&name.ident, value);
                self.scopes.declare(Symbol::local(name.ident.clone(), ty));
            }
            Statement::Assign { target, value } => {
                let value = self.lower_expr(value);
                self.lower_assignment(target, value);
            }
            Statement::If { condition, then_block, else_block } => {
                self.lower_if(condition, then_block, else_block.as_ref());
            }
            Statement::While { condition, body } => self.lower_while(condition, body),
            Statement::For { init, condition, update, body } => {
                self.lower_for(init.as_ref(), condition.as_ref(), update.as_ref(), body);
            }
            Statement::Return { value } => {
                let value = value.as_ref().map(|value| self.lower_expr(value));
                self.terminate(TerminatorKind::Return { value });
            }
            Statement::Break => match self.loop_stack.last().copied() {
                Some(context) => self.terminate(TerminatorKind::Jump {
                    target: context.break_target,
                }),
                None => self.report(
                    Report::error(
                        DiagnosticCode::IrLoopControlOutsideLoop,
                        "`break` outside of a loop",
                    )
                    .with_span(statement.span()),
                ),
            },
            Statement::Continue => match self.loop_stack.last().copied() {
                Some(context) => self.terminate(TerminatorKind::Jump {
                    target: context.continue_target,
                }),
                None => self.report(
                    Report::error(
                        DiagnosticCode::IrLoopControlOutsideLoop,
                        "`continue` outside of a loop",
                    )
                    .with_span(statement.span()),
                ),
            },
            Statement::Expr(expr) => {
                self.lower_expr(expr);
            }
        }
    }

    /// Locals can only hold word values; storage aggregates reached through
    /// a local intermediate are an unsupported storage pattern.
    fn check_local_binding_ty(&mut self, ty: &Ty, span: Span) {
        if matches!(ty, Ty::Mapping { .. }) {
            self.report(
                Report::error(
                    DiagnosticCode::IrUnsupportedStoragePattern,
                    "storage mappings cannot be bound to local variables",
                )
                .with_span(span),
            );
        }
    }

    pub(crate) fn write_local(&mut self, name: &str, value: Value) {
        self.emit(
            InstructionKind::Write {
                location: DataLocation::Local,
                slot: None,
                offset: None,
                length: None,
                value,
                name: Some(name.to_string()),
            },
            None,
        );
    }

    fn lower_if(
        &mut self,
        condition: &AstNode<bug_ast::Expr>,
        then_block: &AstNode<AstBlock>,
        else_block: Option<&AstNode<AstBlock>>,
    ) {
        let condition = self.lower_expr(condition);

        let then_id = self.new_block();
        let merge_id = self.new_block();
        let else_id = match else_block {
            Some(_) => self.new_block(),
            None => merge_id,
        };

        self.terminate(TerminatorKind::Branch {
            condition,
            then_target: then_id,
            else_target: else_id,
        });

        self.switch_to_block(then_id);
        self.lower_nested_block(then_block);
        self.jump_if_open(merge_id);

        if let Some(else_block) = else_block {
            self.switch_to_block(else_id);
            self.lower_nested_block(else_block);
            self.jump_if_open(merge_id);
        }

        self.switch_to_block(merge_id);
    }

    fn lower_while(&mut self, condition: &AstNode<bug_ast::Expr>, body: &AstNode<AstBlock>) {
        let header_id = self.new_block();
        let body_id = self.new_block();
        let exit_id = self.new_block();

        self.terminate(TerminatorKind::Jump { target: header_id });

        self.switch_to_block(header_id);
        let condition = self.lower_expr(condition);
        self.terminate(TerminatorKind::Branch {
            condition,
            then_target: body_id,
            else_target: exit_id,
        });

        self.switch_to_block(body_id);
        self.loop_stack
            .push(LoopContext { continue_target: header_id, break_target: exit_id });
        self.lower_nested_block(body);
        self.loop_stack.pop();
        self.jump_if_open(header_id);

        self.switch_to_block(exit_id);
    }

    fn lower_for(
        &mut self,
        init: Option<&AstNode<Statement>>,
        condition: Option<&AstNode<bug_ast::Expr>>,
        update: Option<&AstNode<Statement>>,
        body: &AstNode<AstBlock>,
    ) {
        // The init binding is visible to the condition, update and body.
        self.scopes.enter();

        if let Some(init) = init {
            self.lower_statement(init);
        }

        let header_id = self.new_block();
        let body_id = self.new_block();
        let update_id = self.new_block();
        let exit_id = self.new_block();

        self.terminate(TerminatorKind::Jump { target: header_id });

        self.switch_to_block(header_id);
        let condition = match condition {
            Some(condition) => self.lower_expr(condition),
            None => Value::Const(bug_ir::ConstValue::bool(true)),
        };
        self.terminate(TerminatorKind::Branch {
            condition,
            then_target: body_id,
            else_target: exit_id,
        });

        self.switch_to_block(body_id);
        self.loop_stack
            .push(LoopContext { continue_target: update_id, break_target: exit_id });
        self.lower_nested_block(body);
        self.loop_stack.pop();
        self.jump_if_open(update_id);

        self.switch_to_block(update_id);
        if let Some(update) = update {
            self.lower_statement(update);
        }
        self.jump_if_open(header_id);

        self.switch_to_block(exit_id);
        self.scopes.exit();
    }

    fn lower_nested_block(&mut self, block: &AstNode<AstBlock>) {
        self.scopes.enter();
        for statement in &block.statements {
            self.lower_statement(statement);
        }
        self.scopes.exit();
    }

    /// Look up a name, reporting an unknown identifier when resolution
    /// fails. Scopes can diverge from the type checker's view after error
    /// recovery, so this has its own diagnostic.
    pub(crate) fn lookup(&mut self, name: &str, span: Span) -> Option<Symbol> {
        match self.scopes.lookup(name) {
            Some(symbol) => Some(symbol.clone()),
            None => {
                self.report(
                    Report::error(
                        DiagnosticCode::IrUnknownIdentifier,
                        format!("unknown identifier `{name}`"),
                    )
                    .with_span(span),
                );
                None
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use bug_ir::{InstructionKind, TerminatorKind, Value};
    use bug_source::Source;

    use super::*;

    pub(crate) fn lower(source: &str) -> (Module, Vec<Report>) {
        let source = Source::new("test.bug", source);
        let (program, reports) = bug_parser::parse_source(&source);
        assert!(reports.is_empty(), "parse reports: {reports:?}");
        let program = program.unwrap();
        let (env, reports) = bug_types::typecheck(&program);
        assert!(
            !reports.iter().any(|report| report.is_error()),
            "typecheck reports: {reports:?}"
        );
        lower_module(&program, &env)
    }

    #[test]
    fn minimal_module_is_a_single_return() {
        let (module, reports) = lower("name Minimal; code {}");
        assert!(reports.is_empty(), "{reports:?}");
        assert!(module.create.is_none());
        assert_eq!(module.main.blocks.len(), 1);

        let entry = module.main.block(module.main.entry);
        assert!(entry.instructions.is_empty());
        assert!(matches!(entry.terminator.kind, TerminatorKind::Return { value: None }));
    }

    #[test]
    fn every_block_is_terminated_and_reachable() {
        let (module, reports) = lower(
            "name T; code { \
                let x = 0; \
                if (x < 3) { x = 1; } else { x = 2; return; } \
                while (x < 10) { x = x + 1; } \
             }",
        );
        assert!(reports.is_empty(), "{reports:?}");

        let function = &module.main;
        let reachable = bug_ir::traversal::postorder(function);
        assert_eq!(reachable.len(), function.blocks.len());
        assert!(function.blocks.contains_key(&function.entry));
    }

    #[test]
    fn counter_branch_shape() {
        let (module, reports) = lower(
            "name Counter;\n\
             storage { [0] count: uint256; [1] owner: address; }\n\
             code { if (msg.sender != owner) { return; } count = count + 1; }",
        );
        assert!(reports.is_empty(), "{reports:?}");

        let entry = module.main.block(module.main.entry);
        // Entry evaluates `msg.sender != owner` and branches on it.
        assert!(entry
            .instructions
            .iter()
            .any(|i| matches!(i.kind, InstructionKind::Env { op: bug_ir::EnvOp::MsgSender })));
        assert!(entry
            .instructions
            .iter()
            .any(|i| matches!(&i.kind, InstructionKind::Read { location: DataLocation::Storage, .. })));
        assert!(entry
            .instructions
            .iter()
            .any(|i| matches!(&i.kind, InstructionKind::BinaryOp { op: bug_ir::BinOp::Ne, .. })));
        let TerminatorKind::Branch { then_target, else_target, .. } = entry.terminator.kind
        else {
            panic!("expected a branch, got {:?}", entry.terminator.kind)
        };

        // The then branch returns; the else branch increments slot 0.
        let then_block = module.main.block(then_target);
        assert!(matches!(then_block.terminator.kind, TerminatorKind::Return { .. }));

        let else_block = module.main.block(else_target);
        let has_store = else_block.instructions.iter().any(|i| {
            matches!(
                &i.kind,
                InstructionKind::Write { location: DataLocation::Storage, slot: Some(slot), .. }
                    if slot.as_const_word() == Some(alloy_primitives::U256::ZERO)
            )
        });
        assert!(has_store, "else branch should store to slot 0: {else_block:?}");
    }

    #[test]
    fn break_outside_loop_is_reported() {
        let (_, reports) = lower("name B; code { break; }");
        assert!(reports
            .iter()
            .any(|report| report.code == DiagnosticCode::IrLoopControlOutsideLoop));
    }

    #[test]
    fn for_loop_shape() {
        let (module, reports) =
            lower("name F; code { for (let i = 0; i < 4; i = i + 1) { continue; } }");
        assert!(reports.is_empty(), "{reports:?}");

        // entry, header, body, update, exit.
        assert_eq!(module.main.blocks.len(), 5);

        // The body's `continue` jumps to the update block, which jumps back
        // to the header.
        let header = module
            .main
            .blocks
            .values()
            .find(|block| matches!(block.terminator.kind, TerminatorKind::Branch { .. }))
            .expect("header must branch");
        let TerminatorKind::Branch { then_target: body, .. } = header.terminator.kind else {
            unreachable!()
        };
        let TerminatorKind::Jump { target: update } = module.main.block(body).terminator.kind
        else {
            panic!("body should jump to update")
        };
        let TerminatorKind::Jump { target: back } = module.main.block(update).terminator.kind
        else {
            panic!("update should jump to header")
        };
        assert_eq!(back, header.id);
    }

    #[test]
    fn unreachable_code_after_return_is_dropped() {
        let (module, reports) = lower("name U; code { return; let x = 1; }");
        // The dangling statement lowers into a detached block that finish()
        // discards.
        assert!(reports.is_empty(), "{reports:?}");
        assert_eq!(module.main.blocks.len(), 1);
    }

    #[test]
    fn mapping_cannot_be_bound_to_local() {
        let (_, reports) = lower(
            "name M;\n\
             storage { [0] balances: mapping<address,uint256>; }\n\
             code { let b = balances; }",
        );
        assert!(reports
            .iter()
            .any(|report| report.code == DiagnosticCode::IrUnsupportedStoragePattern));
    }

    #[test]
    fn params_are_bound_to_entry_temps() {
        let (module, reports) = lower(
            "name P;\n\
             define function add(a: uint256, b: uint256) returns uint256 { return a + b; }\n\
             code { let r = add(1, 2); }",
        );
        assert!(reports.is_empty(), "{reports:?}");

        let function = module.functions.get("add").unwrap();
        assert_eq!(function.params.len(), 2);

        // Entry block stores both params into locals.
        let entry = function.block(function.entry);
        let param_writes = entry
            .instructions
            .iter()
            .filter(|i| {
                matches!(
                    &i.kind,
                    InstructionKind::Write { location: DataLocation::Local, value: Value::Temp(..), .. }
                )
            })
            .count();
        assert_eq!(param_writes, 2);

        // The call site terminates with a Call into a continuation block.
        let has_call = module.main.blocks.values().any(|block| {
            matches!(&block.terminator.kind, TerminatorKind::Call { function, dest: Some(_), .. } if function == "add")
        });
        assert!(has_call);
    }
}
