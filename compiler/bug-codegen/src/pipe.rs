//! The `pipe` combinator: composes stack transitions, verifying brands and
//! emitting bytes as it goes. An error poisons the pipe; later steps are
//! skipped and `done` surfaces the first failure, so the generator never
//! emits partial nonsense beyond the poisoned instruction (the caller
//! discards the whole image on error).

use crate::{
    asm::Assembler,
    stack::{AbstractStack, Brand, Transition, TransitionKind},
    CodegenError,
};

pub struct Pipe<'e> {
    asm: &'e mut Assembler,
    stack: &'e mut AbstractStack,
    error: Option<CodegenError>,
}

impl<'e> Pipe<'e> {
    pub fn new(asm: &'e mut Assembler, stack: &'e mut AbstractStack) -> Self {
        Self { asm, stack, error: None }
    }

    /// Apply a transition: verify and update the abstract stack, then emit.
    pub fn then(mut self, transition: Transition) -> Self {
        if self.error.is_some() {
            return self;
        }

        if let Err(error) = self.stack.apply(&transition) {
            self.error = Some(error);
            return self;
        }

        match transition.kind {
            TransitionKind::Op(op) => self.asm.emit_op(op),
            TransitionKind::Push(value) => self.asm.emit_push(value),
            TransitionKind::PushFixed(value, width) => self.asm.emit_push_fixed(value, width),
            TransitionKind::PushLabel(label) => self.asm.emit_push_label(label),
            TransitionKind::Rebrand => {}
        }

        self
    }

    /// Apply a fallible transition constructor (`dup`, `swap`).
    pub fn then_try(mut self, transition: Result<Transition, CodegenError>) -> Self {
        match transition {
            Ok(transition) => self.then(transition),
            Err(error) => {
                if self.error.is_none() {
                    self.error = Some(error);
                }
                self
            }
        }
    }

    /// Apply a transition and rename the resulting top-of-stack brand.
    pub fn then_as(self, transition: Transition, brand: Brand) -> Self {
        self.then(transition).then(crate::stack::ops::rebrand([brand]))
    }

    /// Branch on the current abstract stack without abandoning the typed
    /// style: the closure receives the pipe and a view of the brands.
    pub fn peek(self, f: impl FnOnce(Self, &[Brand]) -> Self) -> Self {
        if self.error.is_some() {
            return self;
        }
        let brands: Vec<Brand> = self.stack.brands().to_vec();
        f(self, &brands)
    }

    /// Finish the composition.
    pub fn done(self) -> Result<(), CodegenError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;

    use super::*;
    use crate::{opcode::Op, stack::ops};

    #[test]
    fn pipe_emits_and_tracks() {
        let mut asm = Assembler::new();
        let mut stack = AbstractStack::new();

        Pipe::new(&mut asm, &mut stack)
            .then(ops::push(U256::from(1u64), "b"))
            .then(ops::push(U256::from(2u64), "a"))
            .then(ops::add())
            .then(ops::pop())
            .done()
            .unwrap();

        assert!(stack.is_empty());
        let assembly = asm.assemble();
        assert_eq!(assembly.bytecode, vec![0x60, 0x01, 0x60, 0x02, 0x01, 0x50]);
    }

    #[test]
    fn rebrand_emits_no_bytes() {
        let mut asm = Assembler::new();
        let mut stack = AbstractStack::new();

        Pipe::new(&mut asm, &mut stack)
            .then(ops::push(U256::from(3u64), "field_offset"))
            .then(ops::rebrand(["a"]))
            .then(ops::push(U256::from(4u64), "b"))
            .then(ops::rebrand(["a", "b"]))
            .done()
            .unwrap();

        // Only the two pushes hit the buffer.
        let assembly = asm.assemble();
        assert_eq!(assembly.bytecode, vec![0x60, 0x03, 0x60, 0x04]);
        assert_eq!(stack.brands(), &["a", "b"]);
    }

    #[test]
    fn errors_poison_the_rest() {
        let mut asm = Assembler::new();
        let mut stack = AbstractStack::new();

        let result = Pipe::new(&mut asm, &mut stack)
            .then(ops::push(U256::from(1u64), "slot"))
            .then(ops::mload()) // expects "offset": poisoned here
            .then(ops::pop())
            .done();

        assert!(result.is_err());
        // The failing MLOAD and the POP after it were not emitted.
        assert_eq!(asm.assemble().bytecode, vec![0x60, 0x01]);
    }

    #[test]
    fn peek_allows_state_dependent_emission() {
        let mut asm = Assembler::new();
        let mut stack = AbstractStack::new();

        Pipe::new(&mut asm, &mut stack)
            .then(ops::push(U256::from(8u64), "offset"))
            .peek(|pipe, brands| {
                if brands.last() == Some(&"offset") {
                    pipe.then(ops::mload())
                } else {
                    pipe.then(ops::sload())
                }
            })
            .then(ops::pop())
            .done()
            .unwrap();

        assert_eq!(asm.assemble().bytecode, vec![0x60, 0x08, Op::MLOAD.0, 0x50]);
    }
}
