//! Expression lowering. Every step takes the builder state and produces an
//! IR [Value]; failed expressions produce the zero sentinel so the rest of
//! the function keeps lowering coherently.

use bug_ast::{AstNode, EnvOp as AstEnvOp, Expr, Literal};
use bug_ir::{
    BinOp as IrBinOp, ConstLiteral, ConstValue, EnvOp, InstructionKind, TerminatorKind, UnOp,
    Value,
};
use bug_reporting::{DiagnosticCode, Report};
use bug_types::Ty;

use super::Builder;
use crate::build::place::Place;

impl Builder<'_> {
    pub(crate) fn lower_expr(&mut self, node: &AstNode<Expr>) -> Value {
        match node.body() {
            Expr::Literal(literal) => self.lower_literal(literal, node),
            Expr::Ident(_) | Expr::Index { .. } | Expr::Slice { .. } => {
                match self.lower_place_expr(node) {
                    Some(place) => self.read_place(place),
                    None => Value::zero(),
                }
            }
            Expr::Field { object, name } => {
                // `.length` is an operation, not a field projection.
                if name.ident == "length" && is_measurable(self.env_ty(object)) {
                    return self.lower_length(object, node);
                }
                match self.lower_place_expr(node) {
                    Some(place) => self.read_place(place),
                    None => Value::zero(),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let ty = self.env.ty_of(node.id());
                let lhs = self.lower_expr(lhs);
                let rhs = self.lower_expr(rhs);
                self.emit_value(
                    InstructionKind::BinaryOp { op: lower_bin_op(*op), lhs, rhs },
                    ty,
                )
            }
            Expr::Unary { op, operand } => {
                let ty = self.env.ty_of(node.id());
                let operand = self.lower_expr(operand);
                let op = match op {
                    bug_ast::UnOp::Not => UnOp::Not,
                    bug_ast::UnOp::Neg => UnOp::Neg,
                };
                self.emit_value(InstructionKind::UnaryOp { op, operand }, ty)
            }
            Expr::Call { callee, args } => self.lower_call(callee, args, node),
            Expr::Cast { value, .. } => {
                let ty = self.env.ty_of(node.id());
                let value = self.lower_expr(value);
                self.emit_value(InstructionKind::Cast { value, ty: ty.clone() }, ty)
            }
            Expr::Keccak { value } => {
                let value = self.lower_expr(value);
                self.emit_value(InstructionKind::Hash { value }, Ty::BYTES32)
            }
            Expr::Env(op) => {
                let (op, ty) = lower_env_op(*op);
                self.emit_value(InstructionKind::Env { op }, ty)
            }
        }
    }

    fn lower_literal(&mut self, literal: &Literal, node: &AstNode<Expr>) -> Value {
        let ty = self.env.ty_of(node.id());
        match literal {
            Literal::Number(value) => Value::Const(ConstValue::number(*value, ty)),
            Literal::Bool(value) => Value::Const(ConstValue::bool(*value)),
            Literal::String(value) => Value::Const(ConstValue {
                literal: ConstLiteral::String(value.clone()),
                ty: Ty::String,
            }),
        }
    }

    /// Lower a call expression: evaluate the arguments, terminate the block
    /// with a `Call` and continue in the continuation block with the result
    /// temp bound.
    fn lower_call(
        &mut self,
        callee: &AstNode<bug_ast::Name>,
        args: &[AstNode<Expr>],
        node: &AstNode<Expr>,
    ) -> Value {
        let Some(sig) = self.env.functions.get(&callee.ident).cloned() else {
            return self.report_and_zero(
                Report::error(
                    DiagnosticCode::IrUnknownIdentifier,
                    format!("unknown function `{}`", callee.ident),
                )
                .with_span(callee.span()),
            );
        };

        let args: Vec<Value> = args.iter().map(|arg| self.lower_expr(arg)).collect();

        let dest = if sig.returns.is_failure() { None } else { Some(self.new_temp()) };
        let continuation = self.new_block();
        self.terminate(TerminatorKind::Call {
            function: sig.name.clone(),
            args,
            dest,
            continuation,
        });
        self.switch_to_block(continuation);

        match dest {
            Some(dest) => Value::Temp(dest, sig.returns),
            None => {
                // A void call used for effect; its "value" never survives
                // type checking, so the sentinel is fine.
                let _ = node;
                Value::zero()
            }
        }
    }

    /// Lower `object.length`.
    fn lower_length(&mut self, object: &AstNode<Expr>, node: &AstNode<Expr>) -> Value {
        let object_ty = self.env.ty_of(object.id());
        let result_ty = self.env.ty_of(node.id());

        // For storage-resident dynamic data the operand is the raw slot
        // word; for everything else it is the object value itself.
        let operand = match self.lower_place_expr(object) {
            Some(Place::Storage { slot, ty }) => self.emit_value(
                InstructionKind::Read {
                    location: bug_ir::DataLocation::Storage,
                    slot: Some(slot),
                    offset: Some(Value::Const(ConstValue::uint(0))),
                    length: Some(Value::Const(ConstValue::uint(32))),
                    name: None,
                    ty,
                },
                object_ty,
            ),
            Some(place) => self.read_place(place),
            None => return Value::zero(),
        };

        self.emit_value(InstructionKind::Length { object: operand }, result_ty)
    }

    pub(crate) fn env_ty(&self, node: &AstNode<Expr>) -> Ty {
        self.env.ty_of(node.id())
    }
}

fn lower_bin_op(op: bug_ast::BinOp) -> IrBinOp {
    match op {
        bug_ast::BinOp::Add => IrBinOp::Add,
        bug_ast::BinOp::Sub => IrBinOp::Sub,
        bug_ast::BinOp::Mul => IrBinOp::Mul,
        bug_ast::BinOp::Div => IrBinOp::Div,
        bug_ast::BinOp::Mod => IrBinOp::Mod,
        bug_ast::BinOp::Shl => IrBinOp::Shl,
        bug_ast::BinOp::Shr => IrBinOp::Shr,
        bug_ast::BinOp::Eq => IrBinOp::Eq,
        bug_ast::BinOp::Neq => IrBinOp::Ne,
        bug_ast::BinOp::Lt => IrBinOp::Lt,
        bug_ast::BinOp::LtEq => IrBinOp::Le,
        bug_ast::BinOp::Gt => IrBinOp::Gt,
        bug_ast::BinOp::GtEq => IrBinOp::Ge,
        bug_ast::BinOp::And => IrBinOp::And,
        bug_ast::BinOp::Or => IrBinOp::Or,
    }
}

fn lower_env_op(op: AstEnvOp) -> (EnvOp, Ty) {
    match op {
        AstEnvOp::MsgSender => (EnvOp::MsgSender, Ty::Address),
        AstEnvOp::MsgValue => (EnvOp::MsgValue, Ty::UINT256),
        AstEnvOp::MsgData => (EnvOp::MsgData, Ty::Bytes { size: None }),
        AstEnvOp::BlockNumber => (EnvOp::BlockNumber, Ty::UINT256),
        AstEnvOp::BlockTimestamp => (EnvOp::BlockTimestamp, Ty::UINT256),
    }
}

/// Types whose `.length` is defined.
fn is_measurable(ty: Ty) -> bool {
    matches!(
        ty,
        Ty::Array { .. } | Ty::Bytes { .. } | Ty::String
    )
}
