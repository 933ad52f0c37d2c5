//! The typed abstract stack.
//!
//! Every EVM operation the generator emits is modelled as a [Transition]:
//! the brands it pops (top first) and the brands it pushes. Brands are
//! compile-time labels describing what a stack slot means (`"slot"`,
//! `"offset"`, `"value"`); they never exist at runtime. The [rebrand]
//! transition renames top-of-stack brands without emitting a byte, which is
//! how a value changes role between operations at zero cost.

use alloy_primitives::U256;
use smallvec::{smallvec, SmallVec};

use crate::{asm::Label, opcode::Op, CodegenError};

/// A compile-time label on a stack slot.
pub type Brand = &'static str;

/// How many slots DUP/SWAP can reach.
pub const STACK_WINDOW: u8 = 16;

#[derive(Debug, Clone)]
pub enum TransitionKind {
    /// Emit a plain opcode.
    Op(Op),
    /// Emit the smallest PUSH fitting the value.
    Push(U256),
    /// Emit a PUSH with a fixed immediate width, for positions whose byte
    /// length must not depend on the value.
    PushFixed(U256, u8),
    /// Emit a label-sized PUSH to be back-patched.
    PushLabel(Label),
    /// Emit nothing; only the brands change.
    Rebrand,
}

/// A stack transition: what is consumed, what is produced, and what (if
/// anything) is emitted.
#[derive(Debug, Clone)]
pub struct Transition {
    pub kind: TransitionKind,
    /// Expected brands popped, top of stack first.
    pub pops: SmallVec<[Brand; 4]>,
    /// Brands pushed; the last entry becomes the new top.
    pub pushes: SmallVec<[Brand; 2]>,
}

impl Transition {
    fn op(op: Op, pops: SmallVec<[Brand; 4]>, pushes: SmallVec<[Brand; 2]>) -> Self {
        Self { kind: TransitionKind::Op(op), pops, pushes }
    }
}

/// The abstract stack the generator threads through every emission. The
/// concrete EVM stack at runtime always has exactly these slots.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AbstractStack {
    brands: Vec<Brand>,
}

impl AbstractStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.brands.len()
    }

    pub fn brands(&self) -> &[Brand] {
        &self.brands
    }

    pub fn is_empty(&self) -> bool {
        self.brands.is_empty()
    }

    /// Push a brand directly; used when a caller transfers an existing
    /// runtime value into the generator's view (function entry).
    pub fn push_brand(&mut self, brand: Brand) {
        self.brands.push(brand);
    }

    /// Hand the top slot to another owner (a callee consuming the pushed
    /// return pc): pops the brand without emitting anything.
    pub fn transfer(&mut self, brand: Brand) -> Result<(), CodegenError> {
        match self.brands.pop() {
            Some(found) if found == brand => Ok(()),
            Some(found) => Err(CodegenError::StackMismatch {
                expected: brand.to_string(),
                found: format!("`{found}`"),
            }),
            None => Err(CodegenError::StackMismatch {
                expected: brand.to_string(),
                found: "an empty stack".to_string(),
            }),
        }
    }

    /// Apply a transition, verifying the declared pops against the actual
    /// top of stack.
    pub fn apply(&mut self, transition: &Transition) -> Result<(), CodegenError> {
        // DUP and SWAP read deeper than their pop list expresses; handle
        // them structurally.
        if let TransitionKind::Op(op) = transition.kind {
            if (0x80..=0x8f).contains(&op.0) {
                return self.apply_dup((op.0 - 0x7f) as usize);
            }
            if (0x90..=0x9f).contains(&op.0) {
                return self.apply_swap((op.0 - 0x8f) as usize);
            }
        }

        if let TransitionKind::Rebrand = transition.kind {
            return self.apply_rebrand(&transition.pushes);
        }

        for expected in &transition.pops {
            let Some(found) = self.brands.pop() else {
                return Err(CodegenError::StackMismatch {
                    expected: expected.to_string(),
                    found: "an empty stack".to_string(),
                });
            };
            if *expected != "_" && found != *expected {
                return Err(CodegenError::StackMismatch {
                    expected: expected.to_string(),
                    found: format!("`{found}`"),
                });
            }
        }

        self.brands.extend(transition.pushes.iter().copied());
        Ok(())
    }

    fn apply_dup(&mut self, position: usize) -> Result<(), CodegenError> {
        if position > STACK_WINDOW as usize {
            return Err(CodegenError::StackTooDeep { needed: position });
        }
        if position > self.brands.len() {
            return Err(CodegenError::StackMismatch {
                expected: format!("at least {position} slot(s)"),
                found: format!("{} slot(s)", self.brands.len()),
            });
        }
        let brand = self.brands[self.brands.len() - position];
        self.brands.push(brand);
        Ok(())
    }

    fn apply_swap(&mut self, position: usize) -> Result<(), CodegenError> {
        if position > STACK_WINDOW as usize {
            return Err(CodegenError::StackTooDeep { needed: position });
        }
        let len = self.brands.len();
        if position + 1 > len {
            return Err(CodegenError::StackMismatch {
                expected: format!("at least {} slot(s)", position + 1),
                found: format!("{len} slot(s)"),
            });
        }
        self.brands.swap(len - 1, len - 1 - position);
        Ok(())
    }

    fn apply_rebrand(&mut self, to: &[Brand]) -> Result<(), CodegenError> {
        let len = self.brands.len();
        if to.len() > len {
            return Err(CodegenError::StackMismatch {
                expected: format!("at least {} slot(s) to rebrand", to.len()),
                found: format!("{len} slot(s)"),
            });
        }
        for (index, brand) in to.iter().enumerate() {
            self.brands[len - to.len() + index] = brand;
        }
        Ok(())
    }
}

/// The raw operation surface: one constructor per opcode, each returning
/// its stack transition. Pops are declared top-of-stack first, matching the
/// EVM's operand order.
pub mod ops {
    use super::*;

    pub fn stop() -> Transition {
        Transition::op(Op::STOP, smallvec![], smallvec![])
    }

    pub fn add() -> Transition {
        Transition::op(Op::ADD, smallvec!["a", "b"], smallvec!["value"])
    }

    pub fn mul() -> Transition {
        Transition::op(Op::MUL, smallvec!["a", "b"], smallvec!["value"])
    }

    pub fn sub() -> Transition {
        Transition::op(Op::SUB, smallvec!["a", "b"], smallvec!["value"])
    }

    pub fn div() -> Transition {
        Transition::op(Op::DIV, smallvec!["a", "b"], smallvec!["value"])
    }

    pub fn r#mod() -> Transition {
        Transition::op(Op::MOD, smallvec!["a", "b"], smallvec!["value"])
    }

    pub fn lt() -> Transition {
        Transition::op(Op::LT, smallvec!["a", "b"], smallvec!["value"])
    }

    pub fn gt() -> Transition {
        Transition::op(Op::GT, smallvec!["a", "b"], smallvec!["value"])
    }

    pub fn eq() -> Transition {
        Transition::op(Op::EQ, smallvec!["a", "b"], smallvec!["value"])
    }

    pub fn iszero() -> Transition {
        Transition::op(Op::ISZERO, smallvec!["value"], smallvec!["value"])
    }

    pub fn and() -> Transition {
        Transition::op(Op::AND, smallvec!["a", "b"], smallvec!["value"])
    }

    pub fn or() -> Transition {
        Transition::op(Op::OR, smallvec!["a", "b"], smallvec!["value"])
    }

    pub fn shl() -> Transition {
        Transition::op(Op::SHL, smallvec!["shift", "value"], smallvec!["value"])
    }

    pub fn shr() -> Transition {
        Transition::op(Op::SHR, smallvec!["shift", "value"], smallvec!["value"])
    }

    pub fn keccak256() -> Transition {
        Transition::op(Op::KECCAK256, smallvec!["offset", "length"], smallvec!["hash"])
    }

    pub fn caller() -> Transition {
        Transition::op(Op::CALLER, smallvec![], smallvec!["value"])
    }

    pub fn callvalue() -> Transition {
        Transition::op(Op::CALLVALUE, smallvec![], smallvec!["value"])
    }

    pub fn calldataload() -> Transition {
        Transition::op(Op::CALLDATALOAD, smallvec!["offset"], smallvec!["value"])
    }

    pub fn calldatasize() -> Transition {
        Transition::op(Op::CALLDATASIZE, smallvec![], smallvec!["value"])
    }

    pub fn calldatacopy() -> Transition {
        Transition::op(
            Op::CALLDATACOPY,
            smallvec!["dest_offset", "offset", "length"],
            smallvec![],
        )
    }

    pub fn codecopy() -> Transition {
        Transition::op(
            Op::CODECOPY,
            smallvec!["dest_offset", "offset", "length"],
            smallvec![],
        )
    }

    pub fn timestamp() -> Transition {
        Transition::op(Op::TIMESTAMP, smallvec![], smallvec!["value"])
    }

    pub fn number() -> Transition {
        Transition::op(Op::NUMBER, smallvec![], smallvec!["value"])
    }

    pub fn pop() -> Transition {
        Transition::op(Op::POP, smallvec!["_"], smallvec![])
    }

    pub fn mload() -> Transition {
        Transition::op(Op::MLOAD, smallvec!["offset"], smallvec!["value"])
    }

    pub fn mstore() -> Transition {
        Transition::op(Op::MSTORE, smallvec!["offset", "value"], smallvec![])
    }

    pub fn sload() -> Transition {
        Transition::op(Op::SLOAD, smallvec!["slot"], smallvec!["value"])
    }

    pub fn sstore() -> Transition {
        Transition::op(Op::SSTORE, smallvec!["slot", "value"], smallvec![])
    }

    pub fn jump() -> Transition {
        Transition::op(Op::JUMP, smallvec!["target"], smallvec![])
    }

    pub fn jumpi() -> Transition {
        Transition::op(Op::JUMPI, smallvec!["target", "condition"], smallvec![])
    }

    pub fn jumpdest() -> Transition {
        Transition::op(Op::JUMPDEST, smallvec![], smallvec![])
    }

    pub fn r#return() -> Transition {
        Transition::op(Op::RETURN, smallvec!["offset", "length"], smallvec![])
    }

    pub fn revert() -> Transition {
        Transition::op(Op::REVERT, smallvec!["offset", "length"], smallvec![])
    }

    /// The smallest PUSH fitting `value`, branded `brand`.
    pub fn push(value: U256, brand: Brand) -> Transition {
        Transition {
            kind: TransitionKind::Push(value),
            pops: smallvec![],
            pushes: smallvec![brand],
        }
    }

    /// A PUSH with a fixed immediate width, branded `brand`.
    pub fn push_fixed(value: U256, width: u8, brand: Brand) -> Transition {
        Transition {
            kind: TransitionKind::PushFixed(value, width),
            pops: smallvec![],
            pushes: smallvec![brand],
        }
    }

    /// A label-target PUSH, branded `brand`.
    pub fn push_label(label: Label, brand: Brand) -> Transition {
        Transition {
            kind: TransitionKind::PushLabel(label),
            pops: smallvec![],
            pushes: smallvec![brand],
        }
    }

    /// `DUP1`..`DUP16`; rejects out-of-window positions.
    pub fn dup(position: usize) -> Result<Transition, CodegenError> {
        if !(1..=STACK_WINDOW as usize).contains(&position) {
            return Err(CodegenError::StackTooDeep { needed: position });
        }
        Ok(Transition::op(Op::dup(position as u8), smallvec![], smallvec![]))
    }

    /// `SWAP1`..`SWAP16`; rejects out-of-window positions.
    pub fn swap(position: usize) -> Result<Transition, CodegenError> {
        if !(1..=STACK_WINDOW as usize).contains(&position) {
            return Err(CodegenError::StackTooDeep { needed: position });
        }
        Ok(Transition::op(Op::swap(position as u8), smallvec![], smallvec![]))
    }

    /// Rename the top brands without emitting anything. The last entry in
    /// `to` becomes the brand of the top slot.
    pub fn rebrand<const N: usize>(to: [Brand; N]) -> Transition {
        Transition {
            kind: TransitionKind::Rebrand,
            pops: smallvec![],
            pushes: SmallVec::from_slice(&to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_thread_brands() {
        let mut stack = AbstractStack::new();
        stack.apply(&ops::push(U256::from(1u64), "b")).unwrap();
        stack.apply(&ops::push(U256::from(2u64), "a")).unwrap();
        stack.apply(&ops::add()).unwrap();
        assert_eq!(stack.brands(), &["value"]);
    }

    #[test]
    fn mismatched_brand_is_rejected() {
        let mut stack = AbstractStack::new();
        stack.apply(&ops::push(U256::from(1u64), "slot")).unwrap();
        let error = stack.apply(&ops::mload()).unwrap_err();
        assert!(matches!(error, CodegenError::StackMismatch { .. }));
    }

    #[test]
    fn rebrand_changes_labels_only() {
        let mut stack = AbstractStack::new();
        stack.apply(&ops::push(U256::from(5u64), "field_offset")).unwrap();
        stack.apply(&ops::rebrand(["slot"])).unwrap();
        assert_eq!(stack.brands(), &["slot"]);
        // Depth unchanged; nothing was emitted (kind is Rebrand).
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn dup_copies_and_swap_permutes() {
        let mut stack = AbstractStack::new();
        stack.apply(&ops::push(U256::from(1u64), "slot")).unwrap();
        stack.apply(&ops::push(U256::from(2u64), "value")).unwrap();

        stack.apply(&ops::dup(2).unwrap()).unwrap();
        assert_eq!(stack.brands(), &["slot", "value", "slot"]);

        stack.apply(&ops::swap(1).unwrap()).unwrap();
        assert_eq!(stack.brands(), &["slot", "slot", "value"]);
    }

    #[test]
    fn out_of_window_dup_is_stack_too_deep() {
        assert!(matches!(ops::dup(17), Err(CodegenError::StackTooDeep { needed: 17 })));
        assert!(matches!(ops::swap(0), Err(CodegenError::StackTooDeep { .. })));
    }

    #[test]
    fn underflow_is_reported() {
        let mut stack = AbstractStack::new();
        assert!(stack.apply(&ops::add()).is_err());
    }
}
