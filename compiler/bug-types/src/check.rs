//! The type checker. Three ordered passes build the environment: struct and
//! function headers first (so declaration order does not matter), then
//! storage slots, then function bodies. Failures annotate the offending node
//! with a [`Ty::Failure`] and keep going.

use std::sync::Arc;

use alloy_primitives::U256;
use bug_ast::{
    AstNode, BinOp, Block, Declaration, EnvOp, Expr, FunctionDecl, Literal, Name, Program,
    Statement, StorageEntry, TyExpr, UnOp,
};
use bug_reporting::{DiagnosticCode, Report, Reporter};
use bug_source::Span;
use indexmap::IndexMap;

use crate::{
    env::{FunctionSig, StorageSlot, TypeEnv},
    symbol::{ScopeStack, StorageClass, Symbol},
    ty::{StructField, StructTy, Ty},
};

/// Type-check a program. Returns the populated [TypeEnv] and every
/// diagnostic produced along the way; the caller decides whether errors are
/// fatal for the rest of the pipeline.
pub fn typecheck(program: &Program) -> (TypeEnv, Vec<Report>) {
    let mut checker = Checker::new(program);
    checker.collect_headers();
    checker.register_storage();
    checker.check_bodies();

    log::debug!(
        "typecheck: {} struct(s), {} storage slot(s), {} function(s)",
        checker.env.structs.len(),
        checker.env.storage.len(),
        checker.env.functions.len()
    );

    let Checker { env, mut reporter, scopes, .. } = checker;
    let mut env = env;
    env.module_scope = scopes;
    (env, reporter.take_reports())
}

struct Checker<'p> {
    program: &'p Program,
    env: TypeEnv,
    reporter: Reporter,
    /// Working scopes; the bottom scope becomes the module scope.
    scopes: ScopeStack,
    /// Raw struct declarations by name, for lazy resolution.
    raw_structs: IndexMap<String, &'p AstNode<Declaration>>,
    /// The declared return type of the function body being checked.
    current_return: Ty,
}

impl<'p> Checker<'p> {
    fn new(program: &'p Program) -> Self {
        Self {
            program,
            env: TypeEnv::default(),
            reporter: Reporter::new(),
            scopes: ScopeStack::new(),
            raw_structs: IndexMap::new(),
            current_return: Ty::void(),
        }
    }

    fn report(&mut self, report: Report) {
        self.reporter.add(report);
    }

    // ------------------------------------------------------------------
    // Phase 1: struct and function headers
    // ------------------------------------------------------------------

    fn collect_headers(&mut self) {
        // Index the raw struct declarations first so references resolve
        // regardless of declaration order.
        for declaration in &self.program.declarations {
            if let Declaration::Struct(decl) = declaration.body() {
                self.raw_structs.insert(decl.name.ident.clone(), declaration);
            }
        }

        let struct_names: Vec<String> = self.raw_structs.keys().cloned().collect();
        for name in struct_names {
            let mut visiting = vec![];
            self.resolve_struct(&name, &mut visiting);
        }

        // Function headers: resolve parameter and return types.
        for declaration in &self.program.declarations {
            if let Declaration::Function(decl) = declaration.body() {
                if matches!(decl.name.ident.as_str(), "create" | "main") {
                    let span = decl.name.span();
                    self.report(
                        Report::error(
                            DiagnosticCode::TypeReservedName,
                            format!("`{}` names an entry body and cannot be redefined", decl.name.ident),
                        )
                        .with_span(span),
                    );
                    continue;
                }
                let sig = self.function_header(decl, declaration.span());
                self.scopes.declare(Symbol {
                    name: sig.name.clone(),
                    ty: Ty::Function {
                        params: sig.params.iter().map(|(_, ty)| ty.clone()).collect(),
                        returns: match &sig.returns {
                            Ty::Failure(_) => None,
                            ty => Some(Box::new(ty.clone())),
                        },
                    },
                    mutable: false,
                    class: StorageClass::Builtin,
                    slot: None,
                });
                self.env.functions.insert(sig.name.clone(), sig);
            }
        }
    }

    fn function_header(&mut self, decl: &FunctionDecl, span: Span) -> FunctionSig {
        let params = decl
            .params
            .iter()
            .map(|param| {
                let ty = self.resolve_ty(&param.ty, &mut vec![]);
                (param.name.ident.clone(), ty)
            })
            .collect();

        let returns = match &decl.returns {
            Some(ty) => self.resolve_ty(ty, &mut vec![]),
            None => Ty::void(),
        };

        FunctionSig { name: decl.name.ident.clone(), params, returns, span }
    }

    /// Resolve (and memoise) the struct named `name`. `visiting` is the
    /// in-progress resolution stack used as the cycle witness.
    fn resolve_struct(&mut self, name: &str, visiting: &mut Vec<String>) -> Ty {
        if let Some(resolved) = self.env.structs.get(name) {
            return Ty::Struct(resolved.clone());
        }

        if visiting.iter().any(|seen| seen == name) {
            let witness = visiting.join(" -> ");
            let span = self.raw_structs.get(name).map(|node| node.span());
            self.report(
                Report::error(
                    DiagnosticCode::TypeCyclicStruct,
                    format!("struct `{name}` is defined in terms of itself: {witness} -> {name}"),
                )
                .with_opt_span(span),
            );
            return Ty::failure(format!("cyclic struct `{name}`"));
        }

        let Some(declaration) = self.raw_structs.get(name).copied() else {
            return Ty::failure(format!("unknown struct `{name}`"));
        };
        let Declaration::Struct(decl) = declaration.body() else { unreachable!() };

        visiting.push(name.to_string());

        let mut fields = vec![];
        let mut offset = 0u64;
        for field in &decl.fields {
            let ty = self.resolve_ty_inner(&field.ty, visiting);
            self.env.set_ty(field.ty.id(), ty.clone());
            let size = ty.storage_slots() * 32;
            fields.push(StructField { name: field.name.ident.clone(), ty, offset });
            offset += size;
        }

        visiting.pop();

        let resolved = StructTy { name: name.to_string(), fields: Arc::new(fields) };
        self.env.structs.insert(name.to_string(), resolved.clone());
        self.env.set_ty(declaration.id(), Ty::Struct(resolved.clone()));
        Ty::Struct(resolved)
    }

    /// Resolve a surface type expression, recording the result on the node.
    fn resolve_ty(&mut self, node: &AstNode<TyExpr>, visiting: &mut Vec<String>) -> Ty {
        let ty = self.resolve_ty_inner(node, visiting);
        self.env.set_ty(node.id(), ty.clone());
        ty
    }

    fn resolve_ty_inner(&mut self, node: &AstNode<TyExpr>, visiting: &mut Vec<String>) -> Ty {
        match node.body() {
            TyExpr::Named(name) => {
                if let Some(ty) = elementary_ty(&name.ident) {
                    return ty;
                }

                if self.raw_structs.contains_key(&name.ident)
                    || self.env.structs.contains_key(&name.ident)
                {
                    return self.resolve_struct(&name.ident, visiting);
                }

                self.report(
                    Report::error(
                        DiagnosticCode::TypeUnknownType,
                        format!("unknown type `{}`", name.ident),
                    )
                    .with_span(node.span()),
                );
                Ty::failure(format!("unknown type `{}`", name.ident))
            }
            TyExpr::Array { element, size } => {
                let element = self.resolve_ty(element, visiting);
                Ty::Array { element: Box::new(element), size: *size }
            }
            TyExpr::Mapping { key, value } => {
                let key_ty = self.resolve_ty(key, visiting);
                if !key_ty.is_failure() && !key_ty.is_hashable_key() {
                    self.report(
                        Report::error(
                            DiagnosticCode::TypeInvalidMappingKey,
                            format!("`{key_ty}` cannot be used as a mapping key"),
                        )
                        .with_span(key.span()),
                    );
                }
                let value_ty = self.resolve_ty(value, visiting);
                Ty::Mapping { key: Box::new(key_ty), value: Box::new(value_ty) }
            }
        }
    }

    // ------------------------------------------------------------------
    // Phase 2: storage slots
    // ------------------------------------------------------------------

    fn register_storage(&mut self) {
        let mut next_slot = 0u64;

        for declaration in &self.program.declarations {
            let Declaration::Storage(decl) = declaration.body() else { continue };

            for entry in &decl.entries {
                self.register_storage_entry(entry, &mut next_slot);
            }
        }
    }

    fn register_storage_entry(&mut self, entry: &AstNode<StorageEntry>, next_slot: &mut u64) {
        let ty = self.resolve_ty(&entry.ty, &mut vec![]);

        if entry.slot != *next_slot {
            self.report(
                Report::error(
                    DiagnosticCode::MemoryInvalidLayout,
                    format!(
                        "storage slot for `{}` must follow declaration order",
                        entry.name.ident
                    ),
                )
                .with_span(entry.span())
                .with_expected_actual(next_slot.to_string(), entry.slot.to_string()),
            );
        }

        let slot = *next_slot;
        *next_slot += ty.storage_slots();

        self.env.set_ty(entry.id(), ty.clone());
        self.env.storage.push(StorageSlot {
            slot,
            name: entry.name.ident.clone(),
            ty: ty.clone(),
            span: entry.span(),
        });
        self.scopes.declare(Symbol::storage(entry.name.ident.clone(), ty, slot));
    }

    // ------------------------------------------------------------------
    // Phase 3: bodies
    // ------------------------------------------------------------------

    fn check_bodies(&mut self) {
        let declarations = self.program.declarations.iter().collect::<Vec<_>>();
        for declaration in declarations {
            if let Declaration::Function(decl) = declaration.body() {
                self.check_function_body(decl);
            }
        }

        self.current_return = Ty::void();
        if let Some(create) = &self.program.create {
            self.check_block(create);
        }
        self.check_block(&self.program.main);
    }

    fn check_function_body(&mut self, decl: &FunctionDecl) {
        let sig = self.env.functions.get(&decl.name.ident).cloned();
        let Some(sig) = sig else { return };

        self.current_return = sig.returns.clone();
        self.scopes.enter();
        for (name, ty) in &sig.params {
            self.scopes.declare(Symbol::local(name.clone(), ty.clone()));
        }
        self.check_block(&decl.body);
        self.scopes.exit();
        self.current_return = Ty::void();
    }

    fn check_block(&mut self, block: &AstNode<Block>) {
        self.scopes.enter();
        for statement in &block.statements {
            self.check_statement(statement);
        }
        self.scopes.exit();
    }

    fn check_statement(&mut self, statement: &AstNode<Statement>) {
        match statement.body() {
            Statement::Let { name, ty, value } => {
                let declared = ty.as_ref().map(|ty| self.resolve_ty(ty, &mut vec![]));
                let value_ty =
                    value.as_ref().map(|value| self.check_expr(value, declared.as_ref()));

                let binding = match (declared, value_ty) {
                    (Some(declared), Some(value_ty)) => {
                        if !declared.assignable_from(&value_ty) {
                            self.report(
                                Report::error(
                                    DiagnosticCode::TypeNotAssignable,
                                    format!("`{value_ty}` cannot initialise `{declared}`"),
                                )
                                .with_span(statement.span())
                                .with_expected_actual(declared.to_string(), value_ty.to_string()),
                            );
                        }
                        declared
                    }
                    (Some(declared), None) => declared,
                    (None, Some(value_ty)) => value_ty,
                    (None, None) => {
                        self.report(
                            Report::error(
                                DiagnosticCode::TypeMissingInitializer,
                                format!(
                                    "`{}` needs a type annotation or an initialiser",
                                    name.ident
                                ),
                            )
                            .with_span(statement.span()),
                        );
                        Ty::failure("missing initialiser")
                    }
                };

                self.env.set_ty(name.id(), binding.clone());
                self.scopes.declare(Symbol::local(name.ident.clone(), binding));
            }
            Statement::Assign { target, value } => {
                let target_ty = self.check_expr(target, None);
                let value_ty = self.check_expr(value, Some(&target_ty));

                if !target_ty.assignable_from(&value_ty) {
                    self.report(
                        Report::error(
                            DiagnosticCode::TypeNotAssignable,
                            format!("`{value_ty}` cannot be assigned to `{target_ty}`"),
                        )
                        .with_span(statement.span())
                        .with_expected_actual(target_ty.to_string(), value_ty.to_string()),
                    );
                }
            }
            Statement::If { condition, then_block, else_block } => {
                self.check_condition(condition);
                self.check_block(then_block);
                if let Some(else_block) = else_block {
                    self.check_block(else_block);
                }
            }
            Statement::While { condition, body } => {
                self.check_condition(condition);
                self.check_block(body);
            }
            Statement::For { init, condition, update, body } => {
                // The init binding is visible to the condition, update and
                // body, so the whole construct gets a scope.
                self.scopes.enter();
                if let Some(init) = init {
                    self.check_statement(init);
                }
                if let Some(condition) = condition {
                    self.check_condition(condition);
                }
                if let Some(update) = update {
                    self.check_statement(update);
                }
                self.check_block(body);
                self.scopes.exit();
            }
            Statement::Return { value } => {
                let expected = self.current_return.clone();
                match (value, expected.is_failure()) {
                    (Some(value), true) => {
                        let actual = self.check_expr(value, None);
                        self.report(
                            Report::error(
                                DiagnosticCode::TypeMismatch,
                                "cannot return a value from a void context",
                            )
                            .with_span(statement.span())
                            .with_expected_actual("nothing", actual.to_string()),
                        );
                    }
                    (Some(value), false) => {
                        let actual = self.check_expr(value, Some(&expected));
                        if !expected.assignable_from(&actual) {
                            self.report(
                                Report::error(
                                    DiagnosticCode::TypeMismatch,
                                    "return value does not match the declared return type",
                                )
                                .with_span(value.span())
                                .with_expected_actual(expected.to_string(), actual.to_string()),
                            );
                        }
                    }
                    (None, false) => {
                        self.report(
                            Report::error(
                                DiagnosticCode::TypeMismatch,
                                format!("expected a return value of type `{expected}`"),
                            )
                            .with_span(statement.span()),
                        );
                    }
                    (None, true) => {}
                }
            }
            Statement::Break | Statement::Continue => {
                // Loop context is validated during lowering, where the loop
                // stack lives.
            }
            Statement::Expr(expr) => {
                self.check_expr(expr, None);
            }
        }
    }

    fn check_condition(&mut self, condition: &AstNode<Expr>) {
        let ty = self.check_expr(condition, Some(&Ty::Bool));
        if !ty.is_failure() && ty != Ty::Bool {
            self.report(
                Report::error(DiagnosticCode::TypeMismatch, "condition must be a boolean")
                    .with_span(condition.span())
                    .with_expected_actual("bool", ty.to_string()),
            );
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Check an expression against an optional expected type (used to give
    /// number literals their context's width) and record its type.
    fn check_expr(&mut self, node: &AstNode<Expr>, expected: Option<&Ty>) -> Ty {
        let ty = self.check_expr_inner(node, expected);
        self.env.set_ty(node.id(), ty.clone());
        ty
    }

    fn check_expr_inner(&mut self, node: &AstNode<Expr>, expected: Option<&Ty>) -> Ty {
        match node.body() {
            Expr::Literal(literal) => self.literal_ty(literal, expected),
            Expr::Ident(name) => self.ident_ty(name, node.span()),
            Expr::Binary { op, lhs, rhs } => self.binary_ty(*op, lhs, rhs, node.span()),
            Expr::Unary { op, operand } => {
                let operand_ty = self.check_expr(operand, None);
                if operand_ty.is_failure() {
                    return operand_ty;
                }
                match op {
                    UnOp::Not if operand_ty == Ty::Bool => Ty::Bool,
                    UnOp::Neg if operand_ty.is_numeric() => operand_ty,
                    _ => {
                        self.report(
                            Report::error(
                                DiagnosticCode::TypeMismatch,
                                format!("`{op}` cannot be applied to `{operand_ty}`"),
                            )
                            .with_span(node.span()),
                        );
                        Ty::failure(format!("bad operand for `{op}`"))
                    }
                }
            }
            Expr::Index { object, index } => self.index_ty(object, index, node.span()),
            Expr::Slice { object, start, end } => {
                let object_ty = self.check_expr(object, None);
                self.check_numeric(start);
                self.check_numeric(end);

                match object_ty {
                    Ty::Bytes { size: None } => Ty::Bytes { size: None },
                    ty if ty.is_failure() => ty,
                    ty => {
                        self.report(
                            Report::error(
                                DiagnosticCode::TypeInvalidSlice,
                                format!("only `bytes` can be sliced, not `{ty}`"),
                            )
                            .with_span(node.span()),
                        );
                        Ty::failure("invalid slice")
                    }
                }
            }
            Expr::Field { object, name } => {
                let object_ty = self.check_expr(object, None);
                match &object_ty {
                    Ty::Struct(def) => match def.field(&name.ident) {
                        Some(field) => field.ty.clone(),
                        None => {
                            self.report(
                                Report::error(
                                    DiagnosticCode::TypeUnknownIdentifier,
                                    format!(
                                        "`{}` has no field named `{}`",
                                        def.name, name.ident
                                    ),
                                )
                                .with_span(name.span()),
                            );
                            Ty::failure(format!("unknown field `{}`", name.ident))
                        }
                    },
                    ty if ty.is_failure() => object_ty.clone(),
                    ty => {
                        self.report(
                            Report::error(
                                DiagnosticCode::TypeMismatch,
                                format!("`{ty}` has no fields"),
                            )
                            .with_span(node.span()),
                        );
                        Ty::failure("field access on non-struct")
                    }
                }
            }
            Expr::Call { callee, args } => self.call_ty(callee, args, node.span()),
            Expr::Cast { ty, value } => {
                let target = self.resolve_ty(ty, &mut vec![]);
                let source = self.check_expr(value, None);

                if !source.is_failure()
                    && !target.is_failure()
                    && !(source.is_word() && target.is_word())
                {
                    self.report(
                        Report::error(
                            DiagnosticCode::TypeMismatch,
                            format!("cannot cast `{source}` to `{target}`"),
                        )
                        .with_span(node.span()),
                    );
                }
                target
            }
            Expr::Keccak { value } => {
                self.check_expr(value, None);
                Ty::BYTES32
            }
            Expr::Env(op) => match op {
                EnvOp::MsgSender => Ty::Address,
                EnvOp::MsgValue | EnvOp::BlockNumber | EnvOp::BlockTimestamp => Ty::UINT256,
                EnvOp::MsgData => Ty::Bytes { size: None },
            },
        }
    }

    fn literal_ty(&mut self, literal: &Literal, expected: Option<&Ty>) -> Ty {
        match literal {
            Literal::Number(value) => {
                // A number literal adopts the expected word type when the
                // value fits; otherwise it is a uint256.
                if let Some(expected) = expected {
                    if literal_fits(value, expected) {
                        return expected.clone();
                    }
                }
                Ty::UINT256
            }
            Literal::Bool(_) => Ty::Bool,
            Literal::String(_) => Ty::String,
        }
    }

    fn ident_ty(&mut self, name: &Name, span: Span) -> Ty {
        match self.scopes.lookup(&name.ident) {
            Some(symbol) => symbol.ty.clone(),
            None => {
                self.report(
                    Report::error(
                        DiagnosticCode::TypeUnknownIdentifier,
                        format!("unknown identifier `{}`", name.ident),
                    )
                    .with_span(span),
                );
                Ty::failure(format!("unknown identifier `{}`", name.ident))
            }
        }
    }

    fn binary_ty(
        &mut self,
        op: BinOp,
        lhs: &AstNode<Expr>,
        rhs: &AstNode<Expr>,
        span: Span,
    ) -> Ty {
        let lhs_ty = self.check_expr(lhs, None);
        let rhs_ty = self.check_expr(rhs, Some(&lhs_ty));

        if lhs_ty.is_failure() || rhs_ty.is_failure() {
            return Ty::failure("operand failed to check");
        }

        let result = binary_result_ty(op, &lhs_ty, &rhs_ty);
        match result {
            Some(ty) => ty,
            None => {
                let code = if op.is_comparison() {
                    DiagnosticCode::TypeNotComparable
                } else {
                    DiagnosticCode::TypeMismatch
                };
                self.report(
                    Report::error(
                        code,
                        format!("`{op}` cannot be applied to `{lhs_ty}` and `{rhs_ty}`"),
                    )
                    .with_span(span)
                    .with_expected_actual(lhs_ty.to_string(), rhs_ty.to_string()),
                );
                Ty::failure(format!("bad operands for `{op}`"))
            }
        }
    }

    fn index_ty(&mut self, object: &AstNode<Expr>, index: &AstNode<Expr>, span: Span) -> Ty {
        let object_ty = self.check_expr(object, None);

        match &object_ty {
            Ty::Mapping { key, value } => {
                let index_ty = self.check_expr(index, Some(key));
                if !key.assignable_from(&index_ty) && !index_ty.is_failure() {
                    self.report(
                        Report::error(
                            DiagnosticCode::TypeMismatch,
                            format!("mapping key must be `{key}`"),
                        )
                        .with_span(index.span())
                        .with_expected_actual(key.to_string(), index_ty.to_string()),
                    );
                }
                (**value).clone()
            }
            Ty::Array { element, .. } => {
                self.check_numeric(index);
                (**element).clone()
            }
            Ty::Bytes { size: None } => {
                self.check_numeric(index);
                Ty::Bytes { size: Some(1) }
            }
            ty if ty.is_failure() => object_ty.clone(),
            ty => {
                self.report(
                    Report::error(
                        DiagnosticCode::TypeMismatch,
                        format!("`{ty}` cannot be indexed"),
                    )
                    .with_span(span),
                );
                Ty::failure("index on non-indexable")
            }
        }
    }

    fn call_ty(&mut self, callee: &AstNode<Name>, args: &[AstNode<Expr>], span: Span) -> Ty {
        let Some(sig) = self.env.functions.get(&callee.ident).cloned() else {
            self.report(
                Report::error(
                    DiagnosticCode::TypeUnknownIdentifier,
                    format!("unknown function `{}`", callee.ident),
                )
                .with_span(callee.span()),
            );
            for arg in args {
                self.check_expr(arg, None);
            }
            return Ty::failure(format!("unknown function `{}`", callee.ident));
        };

        if args.len() != sig.params.len() {
            self.report(
                Report::error(
                    DiagnosticCode::TypeArityMismatch,
                    format!(
                        "`{}` takes {} argument(s), {} given",
                        sig.name,
                        sig.params.len(),
                        args.len()
                    ),
                )
                .with_span(span)
                .with_expected_actual(sig.params.len().to_string(), args.len().to_string()),
            );
        }

        for (arg, (param_name, param_ty)) in args.iter().zip(sig.params.iter()) {
            let arg_ty = self.check_expr(arg, Some(param_ty));
            if !param_ty.assignable_from(&arg_ty) {
                self.report(
                    Report::error(
                        DiagnosticCode::TypeNotAssignable,
                        format!("argument `{param_name}` expects `{param_ty}`"),
                    )
                    .with_span(arg.span())
                    .with_expected_actual(param_ty.to_string(), arg_ty.to_string()),
                );
            }
        }
        // Any surplus arguments still get checked so their sub-errors
        // surface.
        for arg in args.iter().skip(sig.params.len()) {
            self.check_expr(arg, None);
        }

        sig.returns.clone()
    }

    fn check_numeric(&mut self, node: &AstNode<Expr>) {
        let ty = self.check_expr(node, Some(&Ty::UINT256));
        if !ty.is_failure() && !ty.is_numeric() {
            self.report(
                Report::error(DiagnosticCode::TypeMismatch, "expected a numeric value")
                    .with_span(node.span())
                    .with_expected_actual("uint256", ty.to_string()),
            );
        }
    }
}

/// The result type of a binary operation, or [None] when the operands are
/// incompatible.
fn binary_result_ty(op: BinOp, lhs: &Ty, rhs: &Ty) -> Option<Ty> {
    use BinOp::*;

    match (lhs, rhs) {
        (Ty::Int { signed: ls, bits: lb }, Ty::Int { signed: rs, bits: rb }) if ls == rs => {
            match op {
                Add | Sub | Mul | Div | Mod | Shl | Shr => {
                    Some(Ty::Int { signed: *ls, bits: (*lb).max(*rb) })
                }
                Eq | Neq | Lt | LtEq | Gt | GtEq => Some(Ty::Bool),
                And | Or => None,
            }
        }
        (Ty::Bytes { size: Some(lw) }, Ty::Bytes { size: Some(rw) }) => match op {
            // Bytes support equality at equal widths, never arithmetic.
            Eq | Neq if lw == rw => Some(Ty::Bool),
            _ => None,
        },
        (Ty::Address, Ty::Address) => match op {
            Eq | Neq => Some(Ty::Bool),
            _ => None,
        },
        (Ty::Bool, Ty::Bool) => match op {
            And | Or | Eq | Neq => Some(Ty::Bool),
            _ => None,
        },
        _ => None,
    }
}

/// Whether `value` fits within the word type `ty`.
fn literal_fits(value: &U256, ty: &Ty) -> bool {
    let bits = match ty {
        Ty::Int { bits, .. } => *bits as usize,
        Ty::Bytes { size: Some(size) } => *size as usize * 8,
        _ => return false,
    };

    bits == 256 || *value < (U256::from(1u64) << bits)
}

/// Parse an elementary type name into its [Ty], if it is one.
pub fn elementary_ty(ident: &str) -> Option<Ty> {
    match ident {
        "address" => return Some(Ty::Address),
        "bool" => return Some(Ty::Bool),
        "bytes" => return Some(Ty::Bytes { size: None }),
        "string" => return Some(Ty::String),
        _ => {}
    }

    if let Some(suffix) = ident.strip_prefix("bytes") {
        if let Ok(size) = suffix.parse::<u8>() {
            if (1..=32).contains(&size) {
                return Some(Ty::Bytes { size: Some(size) });
            }
        }
        return None;
    }

    for (prefix, signed) in [("uint", false), ("int", true)] {
        if let Some(suffix) = ident.strip_prefix(prefix) {
            if let Ok(bits) = suffix.parse::<u16>() {
                if matches!(bits, 8 | 16 | 32 | 64 | 128 | 256) {
                    return Some(Ty::Int { signed, bits });
                }
            }
            return None;
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use bug_ast::Program;
    use bug_source::Source;

    use super::*;

    fn check(source: &str) -> (Program, TypeEnv, Vec<Report>) {
        let source = Source::new("test.bug", source);
        let (program, reports) = bug_parser::parse_source(&source);
        assert!(reports.is_empty(), "parse reports: {reports:?}");
        let program = program.unwrap();
        let (env, reports) = typecheck(&program);
        (program, env, reports)
    }

    #[test]
    fn counter_storage_layout() {
        let (_, env, reports) = check(
            "name Counter;\n\
             storage { [0] count: uint256; [1] owner: address; }\n\
             code { if (msg.sender != owner) { return; } count = count + 1; }",
        );

        assert!(reports.is_empty(), "{reports:?}");
        assert_eq!(env.storage.len(), 2);
        assert_eq!(env.storage[0].slot, 0);
        assert_eq!(env.storage[0].ty, Ty::UINT256);
        assert_eq!(env.storage[1].slot, 1);
        assert_eq!(env.storage[1].ty, Ty::Address);
    }

    #[test]
    fn struct_field_offsets() {
        let (_, env, reports) = check(
            "name S;\n\
             struct Account { balance: uint256; holder: address; tag: bytes4; }\n\
             storage { [0] account: Account; }\n\
             code {}",
        );

        assert!(reports.is_empty(), "{reports:?}");
        let def = env.structs.get("Account").unwrap();
        assert_eq!(def.fields[0].offset, 0);
        assert_eq!(def.fields[1].offset, 32);
        assert_eq!(def.fields[2].offset, 64);
        assert_eq!(env.storage[0].ty.storage_slots(), 3);
    }

    #[test]
    fn forward_struct_references_resolve() {
        let (_, env, reports) = check(
            "name F;\n\
             struct Outer { inner: Inner; }\n\
             struct Inner { value: uint256; }\n\
             code {}",
        );

        assert!(reports.is_empty(), "{reports:?}");
        let outer = env.structs.get("Outer").unwrap();
        assert!(matches!(outer.fields[0].ty, Ty::Struct(_)));
    }

    #[test]
    fn cyclic_struct_reported_with_witness() {
        let (_, _, reports) = check(
            "name C;\n\
             struct A { b: B; }\n\
             struct B { a: A; }\n\
             code {}",
        );

        let cyclic: Vec<_> =
            reports.iter().filter(|r| r.code == DiagnosticCode::TypeCyclicStruct).collect();
        assert!(!cyclic.is_empty());
        assert!(cyclic[0].message.contains("A -> B -> A") || cyclic[0].message.contains("B -> A -> B"));
    }

    #[test]
    fn void_function_returns_failure_sentinel() {
        let (_, env, reports) = check(
            "name V;\n\
             define function poke() { return; }\n\
             code { poke(); }",
        );

        assert!(reports.is_empty(), "{reports:?}");
        let sig = env.functions.get("poke").unwrap();
        assert!(sig.returns.is_failure());
    }

    #[test]
    fn type_mismatch_is_reported_but_checking_continues() {
        let (_, _, reports) = check(
            "name M;\n\
             storage { [0] flag: bool; }\n\
             code { flag = 1 + 2; let x = missing; }",
        );

        assert!(reports.iter().any(|r| r.code == DiagnosticCode::TypeNotAssignable));
        // The unknown identifier after the first error still surfaces.
        assert!(reports.iter().any(|r| r.code == DiagnosticCode::TypeUnknownIdentifier));
    }

    #[test]
    fn widening_and_literals() {
        let (_, _, reports) = check(
            "name W;\n\
             code { let a: uint8 = 7; let b: uint256 = 1; let c = b + a; }",
        );
        // `b + a` mixes widths of the same signedness, widening to uint256;
        // the literal 7 adopts uint8.
        assert!(reports.is_empty(), "{reports:?}");
    }

    #[test]
    fn mapping_key_restrictions() {
        let (_, _, reports) = check(
            "name K;\n\
             storage { [0] bad: mapping<string,uint256>; }\n\
             code {}",
        );
        assert!(reports.iter().any(|r| r.code == DiagnosticCode::TypeInvalidMappingKey));
    }

    #[test]
    fn call_arity_and_argument_checking() {
        let (_, _, reports) = check(
            "name A;\n\
             define function f(x: uint256) returns uint256 { return x; }\n\
             code { let y = f(1, 2); let z = f(true); }",
        );
        assert!(reports.iter().any(|r| r.code == DiagnosticCode::TypeArityMismatch));
        assert!(reports.iter().any(|r| r.code == DiagnosticCode::TypeNotAssignable));
    }

    #[test]
    fn elementary_names() {
        assert_eq!(elementary_ty("uint256"), Some(Ty::UINT256));
        assert_eq!(elementary_ty("int64"), Some(Ty::Int { signed: true, bits: 64 }));
        assert_eq!(elementary_ty("bytes32"), Some(Ty::BYTES32));
        assert_eq!(elementary_ty("uint24"), None);
        assert_eq!(elementary_ty("bytes0"), None);
        assert_eq!(elementary_ty("Point"), None);
    }
}
