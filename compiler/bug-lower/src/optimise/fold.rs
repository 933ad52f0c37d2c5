//! Constant folding and propagation. Arithmetic is evaluated in the 256-bit
//! word domain and reduced modulo `2^bits` of the result type. Division and
//! modulus by zero fold to zero, matching what the EVM computes at runtime,
//! but a warning is recorded.

use std::collections::HashMap;

use alloy_primitives::U256;
use bug_ir::{
    traversal, BinOp, ConstValue, Function, InstructionKind, TempId, UnOp, Value,
};
use bug_reporting::{DiagnosticCode, Report};
use bug_types::Ty;

pub fn fold_function(function: &mut Function) -> Vec<Report> {
    let mut reports = vec![];
    // Every temp has a single definition, so a function-wide map from temp
    // to known constant is sound; blocks are visited in reverse postorder so
    // definitions are seen before forward uses.
    let mut known: HashMap<TempId, ConstValue> = HashMap::new();

    for id in traversal::reverse_postorder(function) {
        let block = function.block_mut(id);

        for instruction in &mut block.instructions {
            instruction.kind.for_each_operand_mut(|value| propagate(value, &known));

            let folded = match &instruction.kind {
                InstructionKind::Const { value } => Some(value.clone()),
                InstructionKind::BinaryOp { op, lhs, rhs } => {
                    try_fold_bin_op(*op, lhs, rhs, &mut reports)
                }
                InstructionKind::UnaryOp { op, operand } => try_fold_un_op(*op, operand),
                InstructionKind::Cast { value, ty } => try_fold_cast(value, ty),
                _ => None,
            };

            if let Some(value) = folded {
                if let Some(dest) = instruction.dest {
                    known.insert(dest, value.clone());
                }
                if !matches!(instruction.kind, InstructionKind::Const { .. }) {
                    instruction.kind = InstructionKind::Const { value };
                }
            }
        }

        for phi in &mut block.phis {
            for source in phi.sources.values_mut() {
                propagate(source, &known);
            }
        }

        block.terminator.for_each_operand_mut(|value| propagate(value, &known));
    }

    reports
}

fn propagate(value: &mut Value, known: &HashMap<TempId, ConstValue>) {
    if let Value::Temp(temp, _) = value {
        if let Some(constant) = known.get(temp) {
            *value = Value::Const(constant.clone());
        }
    }
}

/// Attempt to evaluate a binary operation over two constants.
fn try_fold_bin_op(
    op: BinOp,
    lhs: &Value,
    rhs: &Value,
    reports: &mut Vec<Report>,
) -> Option<ConstValue> {
    let left = lhs.as_const_word()?;
    let right = rhs.as_const_word()?;

    let result = match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Shl
        | BinOp::Shr => {
            let ty = arithmetic_result_ty(lhs.ty(), rhs.ty())?;
            let bits = int_bits(&ty)?;

            let raw = match op {
                BinOp::Add => left.wrapping_add(right),
                BinOp::Sub => left.wrapping_sub(right),
                BinOp::Mul => left.wrapping_mul(right),
                BinOp::Div | BinOp::Mod if right.is_zero() => {
                    reports.push(Report::warning(
                        DiagnosticCode::FoldDivisionByZero,
                        format!(
                            "constant {} by zero folds to zero",
                            if op == BinOp::Div { "division" } else { "modulus" }
                        ),
                    ));
                    U256::ZERO
                }
                BinOp::Div => left / right,
                BinOp::Mod => left % right,
                BinOp::Shl => {
                    if right >= U256::from(256u64) {
                        U256::ZERO
                    } else {
                        left << right.to::<usize>()
                    }
                }
                BinOp::Shr => {
                    if right >= U256::from(256u64) {
                        U256::ZERO
                    } else {
                        left >> right.to::<usize>()
                    }
                }
                _ => unreachable!(),
            };

            ConstValue::number(truncate(raw, bits), ty)
        }
        BinOp::Eq => ConstValue::bool(left == right),
        BinOp::Ne => ConstValue::bool(left != right),
        BinOp::Lt => ConstValue::bool(left < right),
        BinOp::Le => ConstValue::bool(left <= right),
        BinOp::Gt => ConstValue::bool(left > right),
        BinOp::Ge => ConstValue::bool(left >= right),
        BinOp::And => ConstValue::bool(!left.is_zero() && !right.is_zero()),
        BinOp::Or => ConstValue::bool(!left.is_zero() || !right.is_zero()),
    };

    Some(result)
}

fn try_fold_un_op(op: UnOp, operand: &Value) -> Option<ConstValue> {
    let word = operand.as_const_word()?;
    match op {
        UnOp::Not => Some(ConstValue::bool(word.is_zero())),
        UnOp::Neg => {
            let bits = int_bits(operand.ty())?;
            Some(ConstValue::number(
                truncate(U256::ZERO.wrapping_sub(word), bits),
                operand.ty().clone(),
            ))
        }
    }
}

/// Casting between integer widths folds by masking to the target width.
fn try_fold_cast(value: &Value, ty: &Ty) -> Option<ConstValue> {
    let word = value.as_const_word()?;
    let bits = match ty {
        Ty::Int { bits, .. } => *bits,
        Ty::Address => 160,
        Ty::Bytes { size: Some(size) } => *size as u16 * 8,
        Ty::Bool => return Some(ConstValue::bool(!word.is_zero())),
        _ => return None,
    };
    Some(ConstValue::number(truncate(word, bits), ty.clone()))
}

fn arithmetic_result_ty(lhs: &Ty, rhs: &Ty) -> Option<Ty> {
    match (lhs, rhs) {
        (Ty::Int { signed, bits: lb }, Ty::Int { bits: rb, .. }) => {
            Some(Ty::Int { signed: *signed, bits: (*lb).max(*rb) })
        }
        _ => None,
    }
}

fn int_bits(ty: &Ty) -> Option<u16> {
    match ty {
        Ty::Int { bits, .. } => Some(*bits),
        _ => None,
    }
}

/// Reduce `value` modulo `2^bits`.
fn truncate(value: U256, bits: u16) -> U256 {
    if bits >= 256 {
        value
    } else {
        value & ((U256::from(1u64) << bits as usize) - U256::from(1u64))
    }
}

#[cfg(test)]
mod tests {
    use bug_ir::{DataLocation, TerminatorKind};

    use super::*;
    use crate::optimise::tests::optimised;

    fn stored_words(module: &bug_ir::Module) -> Vec<U256> {
        module
            .main
            .blocks
            .values()
            .flat_map(|block| &block.instructions)
            .filter_map(|instruction| match &instruction.kind {
                InstructionKind::Write { location: DataLocation::Storage, value, .. } => {
                    value.as_const_word()
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn arithmetic_folds_to_a_constant_store() {
        let (module, warnings) = optimised(
            "name F; storage { [0] out: uint256; } code { out = (2 + 3) * 7 - 1; }",
            1,
        );
        assert!(warnings.is_empty());
        assert_eq!(stored_words(&module), vec![U256::from(34u64)]);
    }

    #[test]
    fn division_by_zero_folds_to_zero_with_warning() {
        let (module, warnings) = optimised(
            "name Z; storage { [0] out: uint256; } code { out = 7 / 0; }",
            1,
        );
        assert_eq!(stored_words(&module), vec![U256::ZERO]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, DiagnosticCode::FoldDivisionByZero);
        assert!(warnings[0].is_warning());
    }

    #[test]
    fn narrow_width_arithmetic_wraps() {
        // 200 + 100 in uint8 wraps to 44.
        let (module, _) = optimised(
            "name W; storage { [0] out: uint256; } code { \
                let a: uint8 = 200; let b: uint8 = 100; \
                out = uint256(a + b); \
             }",
            1,
        );
        assert_eq!(stored_words(&module), vec![U256::from(44u64)]);
    }

    #[test]
    fn infinite_precision_matches_mod_2w() {
        for (lhs, rhs, bits, expected) in [
            (255u64, 1u64, 8u16, 0u64),
            (65535, 2, 16, 1),
            (100, 50, 8, 150),
        ] {
            let l = Value::Const(ConstValue::number(U256::from(lhs), Ty::uint(bits)));
            let r = Value::Const(ConstValue::number(U256::from(rhs), Ty::uint(bits)));
            let folded = try_fold_bin_op(BinOp::Add, &l, &r, &mut vec![]).unwrap();
            assert_eq!(folded.as_word(), Some(U256::from(expected)));
        }
    }

    #[test]
    fn comparisons_fold_to_bools() {
        let (module, _) = optimised(
            "name C; storage { [0] out: uint256; } code { \
                if (3 < 5) { out = 1; } else { out = 2; } \
             }",
            1,
        );
        // The branch condition becomes a constant true.
        let entry = module.main.block(module.main.entry);
        let TerminatorKind::Branch { condition, .. } = &entry.terminator.kind else {
            panic!("expected branch")
        };
        assert_eq!(condition.as_const_word(), Some(U256::from(1u64)));
    }

    #[test]
    fn cast_folds_by_masking() {
        let (module, _) = optimised(
            "name M; storage { [0] out: uint256; } code { \
                let wide: uint256 = 511; \
                out = uint256(uint8(wide)); \
             }",
            1,
        );
        assert_eq!(stored_words(&module), vec![U256::from(255u64)]);
    }
}
