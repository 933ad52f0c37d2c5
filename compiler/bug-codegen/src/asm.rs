//! The assembler: a growing byte buffer with label-based jump targets.
//! Emission is two-pass in effect: the first pass writes placeholder
//! `PUSH2` immediates for labels and records back-patch sites; `assemble`
//! assigns final program counters and rewrites the placeholders.

use alloy_primitives::U256;
use bug_ir::DebugContext;

use crate::opcode::Op;

/// A forward-referencable position in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

/// One emitted instruction with its resolved pc, for the annotated listing.
#[derive(Debug, Clone)]
pub struct AnnotatedInstruction {
    pub pc: usize,
    pub op: Op,
    pub immediate: Option<Vec<u8>>,
    pub debug: DebugContext,
}

/// The assembled result: raw bytecode plus the instruction listing.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub bytecode: Vec<u8>,
    pub listing: Vec<AnnotatedInstruction>,
}

#[derive(Debug, Default)]
pub struct Assembler {
    bytecode: Vec<u8>,
    listing: Vec<AnnotatedInstruction>,
    /// Resolved label positions, indexed by label id.
    label_positions: Vec<Option<usize>>,
    /// (byte offset of a 2-byte immediate, label) pairs to rewrite.
    patches: Vec<(usize, Label)>,
    /// The debug context attached to instructions emitted next.
    context: DebugContext,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debug context attached to subsequently emitted instructions.
    pub fn set_context(&mut self, context: DebugContext) {
        self.context = context;
    }

    pub fn new_label(&mut self) -> Label {
        self.label_positions.push(None);
        Label(self.label_positions.len() - 1)
    }

    /// Pin `label` to the current position.
    pub fn define_label(&mut self, label: Label) {
        debug_assert!(
            self.label_positions[label.0].is_none(),
            "label defined twice"
        );
        self.label_positions[label.0] = Some(self.bytecode.len());
    }

    /// Current byte offset.
    pub fn position(&self) -> usize {
        self.bytecode.len()
    }

    /// Emit a plain opcode.
    pub fn emit_op(&mut self, op: Op) {
        debug_assert_eq!(op.immediate_len(), 0, "PUSH needs emit_push");
        self.listing.push(AnnotatedInstruction {
            pc: self.bytecode.len(),
            op,
            immediate: None,
            debug: self.context.clone(),
        });
        self.bytecode.push(op.0);
    }

    /// Emit the smallest `PUSH` that fits `value`; `PUSH0` for zero.
    pub fn emit_push(&mut self, value: U256) {
        let bytes = value.to_be_bytes::<32>();
        let skip = bytes.iter().take_while(|byte| **byte == 0).count();
        let immediate = &bytes[skip..];

        let op = Op::push(immediate.len() as u8);
        self.listing.push(AnnotatedInstruction {
            pc: self.bytecode.len(),
            op,
            immediate: (!immediate.is_empty()).then(|| immediate.to_vec()),
            debug: self.context.clone(),
        });
        self.bytecode.push(op.0);
        self.bytecode.extend_from_slice(immediate);
    }

    /// Emit a PUSH with a fixed immediate width, regardless of how small
    /// the value is. Used where surrounding code sizes must not depend on
    /// the value.
    pub fn emit_push_fixed(&mut self, value: U256, width: u8) {
        let bytes = value.to_be_bytes::<32>();
        let immediate = &bytes[32 - width as usize..];
        debug_assert!(
            bytes[..32 - width as usize].iter().all(|byte| *byte == 0),
            "value does not fit the fixed push width"
        );

        let op = Op::push(width);
        self.listing.push(AnnotatedInstruction {
            pc: self.bytecode.len(),
            op,
            immediate: Some(immediate.to_vec()),
            debug: self.context.clone(),
        });
        self.bytecode.push(op.0);
        self.bytecode.extend_from_slice(immediate);
    }

    /// Emit a `PUSH2` whose immediate is the final pc of `label`, patched in
    /// by [`Self::assemble`].
    pub fn emit_push_label(&mut self, label: Label) {
        let op = Op::push(2);
        self.listing.push(AnnotatedInstruction {
            pc: self.bytecode.len(),
            op,
            immediate: Some(vec![0, 0]),
            debug: self.context.clone(),
        });
        self.bytecode.push(op.0);
        self.patches.push((self.bytecode.len(), label));
        self.bytecode.extend_from_slice(&[0, 0]);
    }

    /// Append raw bytes (an already-assembled image).
    pub fn emit_raw(&mut self, bytes: &[u8]) {
        self.bytecode.extend_from_slice(bytes);
    }

    /// Resolve labels and produce the final image. Panics if a label was
    /// never defined; that is a generator bug, not a user error.
    pub fn assemble(mut self) -> Assembly {
        for (offset, label) in &self.patches {
            let position = self.label_positions[label.0]
                .expect("every referenced label must be defined");
            assert!(position <= u16::MAX as usize, "jump target exceeds PUSH2 range");
            let bytes = (position as u16).to_be_bytes();
            self.bytecode[*offset] = bytes[0];
            self.bytecode[*offset + 1] = bytes[1];

            // Mirror the patch into the listing so the annotated view shows
            // final targets.
            if let Some(entry) =
                self.listing.iter_mut().find(|entry| entry.pc == offset - 1)
            {
                entry.immediate = Some(bytes.to_vec());
            }
        }

        Assembly { bytecode: self.bytecode, listing: self.listing }
    }
}
