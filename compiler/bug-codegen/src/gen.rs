//! Module-level emission: function bodies, phi reconciliation, the call
//! convention, and the constructor/runtime image split.

use std::collections::HashMap;

use alloy_primitives::U256;
use bug_ir::{
    BinOp, Block, BlockId, ConstLiteral, DataLocation, DebugContext, EnvOp, Function,
    Instruction, InstructionKind, Module, OffsetKind, SlotKind, SourceContext, TempId,
    Terminator, TerminatorKind, UnOp, Value, VariableLocation,
};
use bug_layout::{FunctionLayout, LayoutPlan, FREE_PTR, SCRATCH_A, SCRATCH_B};
use bug_types::Ty;
use indexmap::IndexMap;

use crate::{
    asm::{Assembler, Assembly, Label},
    opcode::Op,
    pipe::Pipe,
    stack::{ops, AbstractStack, Brand},
    CodegenError, EvmImage,
};

/// What kind of body is being emitted; decides what `Return` means.
#[derive(Clone, Copy)]
enum BodyKind {
    /// The runtime entry body: `Return` produces `RETURN`/`STOP`.
    Main,
    /// The constructor body: `Return` jumps to the deploy tail.
    Create { deploy: Label },
    /// A user-defined function: `Return` hands the value back through
    /// scratch memory and jumps to the stored return pc.
    Function { return_pc_home: u64 },
}

/// Where a dynamic-length operand's bytes live, inferred from its defining
/// instruction.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Provenance {
    /// The temp holds the raw storage slot word of a dynamic value.
    StorageRaw,
    /// The temp was defined by `msg.data` itself.
    MsgData,
    /// The temp holds a pointer to a `[length][bytes…]` memory block.
    Pointer,
}

pub fn generate(module: &Module, plan: &LayoutPlan) -> Result<EvmImage, CodegenError> {
    let runtime = assemble_image(module, plan, false)?;

    let create = match &module.create {
        Some(_) => Some(assemble_image(module, plan, true)?),
        None => None,
    };

    log::debug!(
        "generated `{}`: runtime {} byte(s), create {} byte(s)",
        module.name,
        runtime.bytecode.len(),
        create.as_ref().map(|assembly| assembly.bytecode.len()).unwrap_or(0)
    );

    let (create_bytes, create_listing) = match create {
        Some(assembly) => (Some(assembly.bytecode), assembly.listing),
        None => (None, vec![]),
    };

    Ok(EvmImage {
        runtime: runtime.bytecode,
        create: create_bytes,
        runtime_listing: runtime.listing,
        create_listing,
    })
}

/// Assemble one image. The runtime image is the main body plus every user
/// function; the constructor image is the create body plus the user
/// functions, a deploy tail that `CODECOPY`s the runtime image, and the
/// runtime image appended verbatim.
fn assemble_image(
    module: &Module,
    plan: &LayoutPlan,
    constructor: bool,
) -> Result<Assembly, CodegenError> {
    let runtime_bytes = if constructor {
        // The runtime image must exist before the deploy tail can size it.
        Some(assemble_image(module, plan, false)?.bytecode)
    } else {
        None
    };

    let mut emitter = ImageEmitter::new(module, plan);

    let body = if constructor {
        module.create.as_ref().expect("constructor images need a create body")
    } else {
        &module.main
    };

    let deploy = constructor.then(|| emitter.asm.new_label());
    let kind = match deploy {
        Some(deploy) => BodyKind::Create { deploy },
        None => BodyKind::Main,
    };

    emitter.emit_function(body, kind, true)?;

    for function in module.functions.values() {
        let return_pc_home = emitter
            .plan
            .function(&function.name)
            .return_pc_offset
            .ok_or_else(|| CodegenError::Internal {
                message: format!("function `{}` has no return pc home", function.name),
            })?;
        emitter.emit_function(function, BodyKind::Function { return_pc_home }, false)?;
    }

    if let (Some(deploy), Some(runtime_bytes)) = (deploy, runtime_bytes.as_ref()) {
        emitter.emit_deploy_tail(deploy, runtime_bytes)?;
    }

    let mut assembly = emitter.asm.assemble();
    if let Some(runtime_bytes) = runtime_bytes {
        assembly.bytecode.extend_from_slice(&runtime_bytes);
    }
    Ok(assembly)
}

struct ImageEmitter<'g> {
    module: &'g Module,
    plan: &'g LayoutPlan,
    asm: Assembler,
    stack: AbstractStack,
    /// Entry labels of user functions, for call sites.
    function_labels: IndexMap<String, Label>,
}

impl<'g> ImageEmitter<'g> {
    fn new(module: &'g Module, plan: &'g LayoutPlan) -> Self {
        let mut asm = Assembler::new();
        let function_labels =
            module.functions.keys().map(|name| (name.clone(), asm.new_label())).collect();
        Self { module, plan, asm, stack: AbstractStack::new(), function_labels }
    }

    fn pipe(&mut self) -> Pipe<'_> {
        Pipe::new(&mut self.asm, &mut self.stack)
    }

    /// Emit one function body. `is_entry` marks the image's first body,
    /// whose entry block starts at pc 0 and initialises the free-memory
    /// pointer.
    fn emit_function(
        &mut self,
        function: &Function,
        kind: BodyKind,
        is_entry: bool,
    ) -> Result<(), CodegenError> {
        if function.blocks.keys().next() != Some(&function.entry) {
            return Err(CodegenError::Internal {
                message: format!("function `{}` does not start with its entry block", function.name),
            });
        }

        let layout = self.plan.function(&function.name);
        let provenance = collect_provenance(function);
        let variables = self.variable_locations(function, layout);

        // One label per block, plus the call-continuation result bindings.
        let mut labels: HashMap<BlockId, Label> = HashMap::new();
        for id in function.blocks.keys() {
            labels.insert(*id, self.asm.new_label());
        }
        let mut continuation_dests: HashMap<BlockId, (TempId, Ty)> = HashMap::new();
        for block in function.blocks.values() {
            if let TerminatorKind::Call { dest: Some(dest), continuation, .. } =
                &block.terminator.kind
            {
                continuation_dests.insert(*continuation, (*dest, Ty::UINT256));
            }
        }

        // A called function's prologue captures the pushed return pc.
        if let BodyKind::Function { return_pc_home } = kind {
            let label = self.function_labels[&function.name];
            self.asm.set_context(DebugContext::none());
            self.asm.define_label(label);
            self.stack.push_brand("return_pc");
            self.pipe()
                .then(ops::jumpdest())
                .then(ops::rebrand(["value"]))
                .then(ops::push(U256::from(return_pc_home), "offset"))
                .then(ops::mstore())
                .done()?;
        }

        for (index, block) in function.blocks.values().enumerate() {
            debug_assert!(self.stack.is_empty(), "stack must be empty between blocks");

            self.asm.set_context(block_context(block, &variables));
            self.asm.define_label(labels[&block.id]);
            self.pipe().then(ops::jumpdest()).done()?;

            // The image entry also sets up the free-memory pointer, right
            // after the leading JUMPDEST.
            if is_entry && index == 0 {
                let free = U256::from(self.plan.free_memory_start);
                self.pipe()
                    .then(ops::push(free, "value"))
                    .then(ops::push(U256::from(FREE_PTR), "offset"))
                    .then(ops::mstore())
                    .done()?;
            }

            // Bind the result of the call that continues here.
            if let Some((dest, _)) = continuation_dests.get(&block.id) {
                let home = temp_home(layout, *dest)?;
                self.pipe()
                    .then(ops::push(U256::from(SCRATCH_A), "offset"))
                    .then(ops::mload())
                    .then(ops::push(U256::from(home), "offset"))
                    .then(ops::mstore())
                    .done()?;
            }

            for instruction in &block.instructions {
                self.asm.set_context(instruction_context(instruction, &variables));
                self.emit_instruction(instruction, layout, &provenance)?;
                debug_assert!(
                    self.stack.is_empty(),
                    "instruction emission must leave the stack empty"
                );
            }

            self.asm.set_context(terminator_context(&block.terminator, &variables));
            self.emit_phi_copies(function, block, layout)?;
            self.emit_terminator(&block.terminator, kind, layout, &labels)?;
        }

        Ok(())
    }

    /// The deploy tail: copy the runtime image (appended right after this
    /// tail) into memory and return it.
    fn emit_deploy_tail(&mut self, deploy: Label, runtime: &[u8]) -> Result<(), CodegenError> {
        self.asm.set_context(DebugContext::none());
        self.asm.define_label(deploy);

        // JUMPDEST + PUSH2 + DUP1 + PUSH2 + PUSH0 + CODECOPY + PUSH0 +
        // RETURN is 12 bytes; the runtime starts right after.
        let offset = self.asm.position() + 12;

        self.pipe()
            .then(ops::jumpdest())
            .then(ops::push_fixed(U256::from(runtime.len()), 2, "length"))
            .then_try(ops::dup(1))
            .then(ops::push_fixed(U256::from(offset), 2, "offset"))
            .then(ops::push(U256::ZERO, "dest_offset"))
            .then(ops::codecopy())
            .then(ops::push(U256::ZERO, "offset"))
            .then(ops::r#return())
            .done()
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Push a value onto the runtime stack, branding it `brand`: constants
    /// are immediates, temps load from their memory homes.
    fn load_value(
        &mut self,
        value: &Value,
        brand: Brand,
        layout: &FunctionLayout,
    ) -> Result<(), CodegenError> {
        match value {
            Value::Const(constant) => match constant.as_word() {
                Some(word) => self.pipe().then(ops::push(word, brand)).done(),
                None => Err(CodegenError::Unsupported {
                    what: "string constants outside storage writes".to_string(),
                }),
            },
            Value::Temp(temp, _) => {
                let home = temp_home(layout, *temp)?;
                self.pipe()
                    .then(ops::push(U256::from(home), "offset"))
                    .then_as(ops::mload(), brand)
                    .done()
            }
            Value::Local(name, _) => Err(CodegenError::Internal {
                message: format!("local `{name}` survived SSA"),
            }),
        }
    }

    /// Store the branded top of stack into a temp's memory home.
    fn store_temp(
        &mut self,
        dest: Option<TempId>,
        layout: &FunctionLayout,
    ) -> Result<(), CodegenError> {
        let Some(dest) = dest else {
            // No destination: drop the produced value.
            return self.pipe().then(ops::pop()).done();
        };
        let home = temp_home(layout, dest)?;
        self.pipe()
            .then(ops::rebrand(["value"]))
            .then(ops::push(U256::from(home), "offset"))
            .then(ops::mstore())
            .done()
    }

    // ------------------------------------------------------------------
    // Instructions
    // ------------------------------------------------------------------

    fn emit_instruction(
        &mut self,
        instruction: &Instruction,
        layout: &FunctionLayout,
        provenance: &HashMap<TempId, Provenance>,
    ) -> Result<(), CodegenError> {
        match &instruction.kind {
            InstructionKind::Const { value } => {
                let word = value.as_word().ok_or_else(|| CodegenError::Unsupported {
                    what: "string constants outside storage writes".to_string(),
                })?;
                self.pipe().then(ops::push(word, "value")).done()?;
                self.store_temp(instruction.dest, layout)
            }

            InstructionKind::BinaryOp { op, lhs, rhs } => {
                self.emit_binary_op(*op, lhs, rhs, layout)?;
                self.mask_result(binary_mask_bits(*op, lhs, rhs))?;
                self.store_temp(instruction.dest, layout)
            }

            InstructionKind::UnaryOp { op, operand } => {
                match op {
                    UnOp::Not => {
                        self.load_value(operand, "value", layout)?;
                        self.pipe().then(ops::iszero()).done()?;
                    }
                    UnOp::Neg => {
                        self.load_value(operand, "b", layout)?;
                        self.pipe()
                            .then(ops::push(U256::ZERO, "a"))
                            .then(ops::sub())
                            .done()?;
                        self.mask_result(int_bits(operand.ty()))?;
                    }
                }
                self.store_temp(instruction.dest, layout)
            }

            InstructionKind::Env { op } => {
                match op {
                    EnvOp::MsgSender => self.pipe().then(ops::caller()).done()?,
                    EnvOp::MsgValue => self.pipe().then(ops::callvalue()).done()?,
                    EnvOp::BlockNumber => self.pipe().then(ops::number()).done()?,
                    EnvOp::BlockTimestamp => self.pipe().then(ops::timestamp()).done()?,
                    EnvOp::MsgData => {
                        // Materialise the whole calldata as a
                        // `[length][bytes…]` block and produce the pointer.
                        self.materialise_calldata(None, None, layout)?;
                    }
                }
                self.store_temp(instruction.dest, layout)
            }

            InstructionKind::Hash { value } => {
                self.emit_hash(value, layout, provenance)?;
                self.store_temp(instruction.dest, layout)
            }

            InstructionKind::Cast { value, ty } => {
                self.load_value(value, "value", layout)?;
                match ty {
                    Ty::Bool => {
                        self.pipe().then(ops::iszero()).then(ops::iszero()).done()?;
                    }
                    _ => self.mask_result(cast_bits(ty))?,
                }
                self.store_temp(instruction.dest, layout)
            }

            InstructionKind::Length { object } => {
                self.emit_length(object, layout, provenance)?;
                self.store_temp(instruction.dest, layout)
            }

            InstructionKind::Read { location, slot, offset, length, ty, .. } => {
                match location {
                    DataLocation::Storage => {
                        let slot = require(slot, "storage read slot")?;
                        self.load_value(slot, "slot", layout)?;
                        self.pipe().then(ops::sload()).done()?;
                    }
                    DataLocation::Memory => {
                        let offset = require(offset, "memory read offset")?;
                        self.load_value(offset, "offset", layout)?;
                        self.pipe().then(ops::mload()).done()?;
                    }
                    DataLocation::Calldata => {
                        self.emit_calldata_read(offset, length, ty, layout)?;
                    }
                    DataLocation::Transient
                    | DataLocation::Returndata
                    | DataLocation::Code => {
                        // Reserved surface; no source-level syntax reaches
                        // these yet.
                        return Err(CodegenError::Unsupported {
                            what: format!("reads from {}", location.as_str()),
                        });
                    }
                    DataLocation::Local => {
                        return Err(CodegenError::Internal {
                            message: "local reads must be renamed away".to_string(),
                        })
                    }
                }
                self.store_temp(instruction.dest, layout)
            }

            InstructionKind::Write { location, slot, offset, value, .. } => match location {
                DataLocation::Storage => {
                    let slot = require(slot, "storage write slot")?;
                    if let Value::Const(constant) = value {
                        if let ConstLiteral::String(string) = &constant.literal {
                            return self.emit_storage_string_write(slot, string, layout);
                        }
                    }
                    self.load_value(value, "value", layout)?;
                    self.load_value(slot, "slot", layout)?;
                    self.pipe().then(ops::sstore()).done()
                }
                DataLocation::Memory => {
                    let offset = require(offset, "memory write offset")?;
                    self.load_value(value, "value", layout)?;
                    self.load_value(offset, "offset", layout)?;
                    self.pipe().then(ops::mstore()).done()
                }
                DataLocation::Transient => Err(CodegenError::Unsupported {
                    what: "writes to transient storage".to_string(),
                }),
                _ => Err(CodegenError::Internal {
                    message: format!("write to read-only region {}", location.as_str()),
                }),
            },

            InstructionKind::ComputeSlot { kind, base } => {
                match kind {
                    SlotKind::Mapping { key, .. } => {
                        // keccak256(pad32(key) ++ pad32(base)) over the
                        // scratch words.
                        self.load_value(key, "value", layout)?;
                        self.pipe()
                            .then(ops::push(U256::from(SCRATCH_A), "offset"))
                            .then(ops::mstore())
                            .done()?;
                        self.load_value(base, "value", layout)?;
                        self.pipe()
                            .then(ops::push(U256::from(SCRATCH_B), "offset"))
                            .then(ops::mstore())
                            .then(ops::push(U256::from(0x40u64), "length"))
                            .then(ops::push(U256::from(SCRATCH_A), "offset"))
                            .then(ops::keccak256())
                            .done()?;
                    }
                    SlotKind::Array => {
                        self.load_value(base, "value", layout)?;
                        self.pipe()
                            .then(ops::push(U256::from(SCRATCH_A), "offset"))
                            .then(ops::mstore())
                            .then(ops::push(U256::from(0x20u64), "length"))
                            .then(ops::push(U256::from(SCRATCH_A), "offset"))
                            .then(ops::keccak256())
                            .done()?;
                    }
                    SlotKind::Field { offset } => {
                        self.load_value(base, "b", layout)?;
                        self.pipe()
                            .then(ops::push(U256::from(offset / 32), "field_offset"))
                            .then(ops::rebrand(["a"]))
                            .then(ops::add())
                            .done()?;
                    }
                }
                self.store_temp(instruction.dest, layout)
            }

            InstructionKind::ComputeOffset { kind, base, .. } => {
                match kind {
                    OffsetKind::Array { index, stride } => {
                        self.load_value(index, "b", layout)?;
                        self.pipe()
                            .then(ops::push(U256::from(*stride), "a"))
                            .then(ops::mul())
                            .then(ops::rebrand(["b"]))
                            .done()?;
                        self.load_value(base, "a", layout)?;
                        self.pipe().then(ops::add()).done()?;
                    }
                    OffsetKind::Field { offset, .. } => {
                        self.load_value(base, "b", layout)?;
                        self.pipe()
                            .then(ops::push(U256::from(*offset), "field_offset"))
                            .then(ops::rebrand(["a"]))
                            .then(ops::add())
                            .done()?;
                    }
                    OffsetKind::Byte { offset } => {
                        self.load_value(base, "b", layout)?;
                        self.load_value(offset, "a", layout)?;
                        self.pipe().then(ops::add()).done()?;
                    }
                }
                self.store_temp(instruction.dest, layout)
            }

            InstructionKind::Allocate { .. } => {
                let dest = instruction.dest.ok_or_else(|| CodegenError::Internal {
                    message: "allocation without a destination".to_string(),
                })?;
                let base = layout.allocations.get(&dest).copied().ok_or_else(|| {
                    CodegenError::Internal {
                        message: "allocation was never planned".to_string(),
                    }
                })?;
                self.pipe().then(ops::push(U256::from(base), "value")).done()?;
                self.store_temp(instruction.dest, layout)
            }
        }
    }

    fn emit_binary_op(
        &mut self,
        op: BinOp,
        lhs: &Value,
        rhs: &Value,
        layout: &FunctionLayout,
    ) -> Result<(), CodegenError> {
        // Shifts place the shift amount on top; everything else places the
        // left operand on top.
        if matches!(op, BinOp::Shl | BinOp::Shr) {
            self.load_value(lhs, "value", layout)?;
            self.load_value(rhs, "shift", layout)?;
            let transition = if op == BinOp::Shl { ops::shl() } else { ops::shr() };
            return self.pipe().then(transition).done();
        }

        self.load_value(rhs, "b", layout)?;
        self.load_value(lhs, "a", layout)?;

        let pipe = self.pipe();
        match op {
            BinOp::Add => pipe.then(ops::add()),
            BinOp::Sub => pipe.then(ops::sub()),
            BinOp::Mul => pipe.then(ops::mul()),
            BinOp::Div => pipe.then(ops::div()),
            BinOp::Mod => pipe.then(ops::r#mod()),
            BinOp::Eq => pipe.then(ops::eq()),
            BinOp::Ne => pipe.then(ops::eq()).then(ops::iszero()),
            BinOp::Lt => pipe.then(ops::lt()),
            BinOp::Gt => pipe.then(ops::gt()),
            BinOp::Le => pipe.then(ops::gt()).then(ops::iszero()),
            BinOp::Ge => pipe.then(ops::lt()).then(ops::iszero()),
            BinOp::And => pipe.then(ops::and()),
            BinOp::Or => pipe.then(ops::or()),
            BinOp::Shl | BinOp::Shr => unreachable!("handled above"),
        }
        .done()
    }

    /// Mask the value on top of the stack down to `bits` when narrower than
    /// a full word.
    fn mask_result(&mut self, bits: Option<u16>) -> Result<(), CodegenError> {
        let Some(bits) = bits else { return Ok(()) };
        if bits >= 256 {
            return Ok(());
        }
        let mask = (U256::from(1u64) << bits as usize) - U256::from(1u64);
        self.pipe()
            .then(ops::rebrand(["b"]))
            .then(ops::push(mask, "a"))
            .then(ops::and())
            .done()
    }

    fn emit_hash(
        &mut self,
        value: &Value,
        layout: &FunctionLayout,
        provenance: &HashMap<TempId, Provenance>,
    ) -> Result<(), CodegenError> {
        let dynamic = matches!(
            value.ty(),
            Ty::String | Ty::Bytes { size: None } | Ty::Array { size: None, .. }
        );

        if !dynamic {
            // Word operand: hash its 32-byte representation from scratch.
            self.load_value(value, "value", layout)?;
            return self
                .pipe()
                .then(ops::push(U256::from(SCRATCH_A), "offset"))
                .then(ops::mstore())
                .then(ops::push(U256::from(0x20u64), "length"))
                .then(ops::push(U256::from(SCRATCH_A), "offset"))
                .then(ops::keccak256())
                .done();
        }

        match value.as_temp().and_then(|temp| provenance.get(&temp)) {
            Some(Provenance::StorageRaw) => Err(CodegenError::Unsupported {
                what: "hashing storage-resident dynamic values".to_string(),
            }),
            _ => {
                // A `[length][bytes…]` pointer: hash the payload.
                self.load_value(value, "ptr", layout)?;
                self.pipe()
                    .then_try(ops::dup(1))
                    .then(ops::rebrand(["ptr", "offset"]))
                    .then_as(ops::mload(), "length")
                    .then_try(ops::swap(1))
                    .then(ops::rebrand(["b"]))
                    .then(ops::push(U256::from(0x20u64), "a"))
                    .then(ops::add())
                    .then(ops::rebrand(["offset"]))
                    .then(ops::keccak256())
                    .done()
            }
        }
    }

    fn emit_length(
        &mut self,
        object: &Value,
        layout: &FunctionLayout,
        provenance: &HashMap<TempId, Provenance>,
    ) -> Result<(), CodegenError> {
        // Fixed-size objects have constant lengths.
        match object.ty() {
            Ty::Bytes { size: Some(size) } => {
                return self.pipe().then(ops::push(U256::from(*size), "value")).done();
            }
            Ty::Array { size: Some(size), .. } => {
                return self.pipe().then(ops::push(U256::from(*size), "value")).done();
            }
            _ => {}
        }

        match object.as_temp().and_then(|temp| provenance.get(&temp)) {
            Some(Provenance::MsgData) => self.pipe().then(ops::calldatasize()).done(),
            Some(Provenance::StorageRaw) => self.emit_storage_length_decode(object, layout),
            _ => {
                // A memory `[length][bytes…]` pointer.
                self.load_value(object, "offset", layout)?;
                self.pipe().then(ops::mload()).done()
            }
        }
    }

    /// Decode a dynamic value's length from its raw storage slot word `v`:
    /// the long form stores `2·len + 1` (odd), the short form keeps the
    /// length in the low byte as `2·len` (even). Branchless select:
    /// `bit·(v−1)/2 + (1−bit)·(v%256)/2` with `bit = v & 1`.
    fn emit_storage_length_decode(
        &mut self,
        object: &Value,
        layout: &FunctionLayout,
    ) -> Result<(), CodegenError> {
        self.load_value(object, "v", layout)?;

        self.pipe()
            // bit = v & 1
            .then_try(ops::dup(1))
            .then(ops::rebrand(["v", "b"]))
            .then(ops::push(U256::from(1u64), "a"))
            .then(ops::and())
            .then(ops::rebrand(["v", "bit"]))
            // long = (v - 1) / 2
            .then_try(ops::dup(2))
            .then(ops::rebrand(["a"]))
            .then(ops::push(U256::from(1u64), "b"))
            .then_try(ops::swap(1))
            .then(ops::rebrand(["b", "a"]))
            .then(ops::sub())
            .then(ops::rebrand(["a"]))
            .then(ops::push(U256::from(2u64), "b"))
            .then_try(ops::swap(1))
            .then(ops::rebrand(["b", "a"]))
            .then(ops::div())
            .then(ops::rebrand(["long"]))
            // long' = bit * long
            .then_try(ops::dup(2))
            .then(ops::rebrand(["long", "b"]))
            .then_try(ops::swap(1))
            .then(ops::rebrand(["b", "a"]))
            .then(ops::mul())
            .then(ops::rebrand(["v", "bit", "scaled_long"]))
            // short = (v % 256) / 2, scaled by (1 - bit)
            .then_try(ops::swap(2))
            .then(ops::rebrand(["scaled_long", "bit", "v"]))
            .then(ops::rebrand(["b"]))
            .then(ops::push(U256::from(0xffu64), "a"))
            .then(ops::and())
            .then(ops::rebrand(["a"]))
            .then(ops::push(U256::from(2u64), "b"))
            .then_try(ops::swap(1))
            .then(ops::rebrand(["b", "a"]))
            .then(ops::div())
            .then(ops::rebrand(["scaled_long", "bit", "short"]))
            // 1 - bit
            .then_try(ops::swap(1))
            .then(ops::rebrand(["short", "bit"]))
            .then(ops::rebrand(["b"]))
            .then(ops::push(U256::from(1u64), "a"))
            .then(ops::sub())
            .then(ops::rebrand(["a"]))
            // short' = (1 - bit) * short
            .then_try(ops::swap(1))
            .then(ops::rebrand(["a", "b"]))
            .then(ops::mul())
            .then(ops::rebrand(["b"]))
            // len = long' + short'
            .then_try(ops::swap(1))
            .then(ops::rebrand(["b", "a"]))
            .then(ops::add())
            .then(ops::rebrand(["value"]))
            .done()
    }

    /// Store a constant string into storage in the long form: the slot
    /// holds `2·len + 1` and the payload starts at `keccak256(slot)` in
    /// 32-byte chunks.
    fn emit_storage_string_write(
        &mut self,
        slot: &Value,
        string: &str,
        layout: &FunctionLayout,
    ) -> Result<(), CodegenError> {
        let bytes = string.as_bytes();
        let encoded_length = U256::from(bytes.len() as u64 * 2 + 1);

        // Length word at the declared slot.
        self.load_value(slot, "slot", layout)?;
        self.pipe()
            .then_try(ops::dup(1))
            .then(ops::rebrand(["slot", "slot"]))
            .then(ops::push(encoded_length, "value"))
            .then_try(ops::swap(1))
            .then(ops::rebrand(["slot", "value", "slot"]))
            .then(ops::sstore())
            .done()?;

        // Payload base: keccak256(slot).
        self.pipe()
            .then(ops::rebrand(["value"]))
            .then(ops::push(U256::from(SCRATCH_A), "offset"))
            .then(ops::mstore())
            .then(ops::push(U256::from(0x20u64), "length"))
            .then(ops::push(U256::from(SCRATCH_A), "offset"))
            .then(ops::keccak256())
            .then(ops::rebrand(["data"]))
            .done()?;

        for (index, chunk) in bytes.chunks(32).enumerate() {
            let mut padded = [0u8; 32];
            padded[..chunk.len()].copy_from_slice(chunk);
            let word = U256::from_be_bytes(padded);

            self.pipe()
                .then_try(ops::dup(1))
                .then(ops::rebrand(["data", "b"]))
                .then(ops::push(U256::from(index as u64), "a"))
                .then(ops::add())
                .then(ops::rebrand(["data", "slot"]))
                .then(ops::push(word, "value"))
                .then_try(ops::swap(1))
                .then(ops::rebrand(["data", "value", "slot"]))
                .then(ops::sstore())
                .done()?;
        }

        self.pipe().then(ops::pop()).done()
    }

    fn emit_calldata_read(
        &mut self,
        offset: &Option<Value>,
        length: &Option<Value>,
        ty: &Ty,
        layout: &FunctionLayout,
    ) -> Result<(), CodegenError> {
        match ty {
            // A single byte, right-aligned.
            Ty::Bytes { size: Some(1) } => {
                let offset = require(offset, "calldata read offset")?;
                self.load_value(offset, "offset", layout)?;
                self.pipe()
                    .then(ops::calldataload())
                    .then(ops::push(U256::from(248u64), "shift"))
                    .then(ops::shr())
                    .done()
            }
            // A whole word.
            ty if ty.is_word() => {
                let offset = require(offset, "calldata read offset")?;
                self.load_value(offset, "offset", layout)?;
                self.pipe().then(ops::calldataload()).done()
            }
            // A byte range, materialised into memory.
            _ => self.materialise_calldata(offset.as_ref(), length.as_ref(), layout),
        }
    }

    /// Copy a calldata range into a fresh `[length][bytes…]` memory block
    /// from the free-memory pointer, leaving the block pointer on the
    /// stack. A missing offset means 0; a missing length means the whole
    /// calldata.
    fn materialise_calldata(
        &mut self,
        offset: Option<&Value>,
        length: Option<&Value>,
        layout: &FunctionLayout,
    ) -> Result<(), CodegenError> {
        // ptr = MLOAD(0x40)
        self.pipe()
            .then(ops::push(U256::from(FREE_PTR), "offset"))
            .then(ops::mload())
            .then(ops::rebrand(["ptr"]))
            .done()?;

        // MSTORE(ptr, length)
        self.load_length(length, layout)?;
        self.pipe()
            .then_try(ops::dup(2))
            .then(ops::rebrand(["ptr", "value", "offset"]))
            .then(ops::mstore())
            .done()?;

        // CALLDATACOPY(ptr + 32, offset, length)
        self.load_length(length, layout)?;
        self.pipe().then(ops::rebrand(["length"])).done()?;
        match offset {
            Some(offset) => self.load_value(offset, "offset", layout)?,
            None => self.pipe().then(ops::push(U256::ZERO, "offset")).done()?,
        }
        self.pipe()
            .then_try(ops::dup(3))
            .then(ops::rebrand(["b"]))
            .then(ops::push(U256::from(0x20u64), "a"))
            .then(ops::add())
            .then(ops::rebrand(["dest_offset"]))
            .then(ops::calldatacopy())
            .done()?;

        // MSTORE(0x40, ptr + 32 + length)
        self.pipe().then_try(ops::dup(1)).then(ops::rebrand(["ptr", "b"])).done()?;
        self.load_length(length, layout)?;
        self.pipe()
            .then(ops::rebrand(["a"]))
            .then(ops::add())
            .then(ops::rebrand(["b"]))
            .then(ops::push(U256::from(0x20u64), "a"))
            .then(ops::add())
            .then(ops::rebrand(["value"]))
            .then(ops::push(U256::from(FREE_PTR), "offset"))
            .then(ops::mstore())
            .done()?;

        self.pipe().then(ops::rebrand(["value"])).done()
    }

    fn load_length(
        &mut self,
        length: Option<&Value>,
        layout: &FunctionLayout,
    ) -> Result<(), CodegenError> {
        match length {
            Some(length) => self.load_value(length, "value", layout),
            None => self.pipe().then(ops::calldatasize()).done(),
        }
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    /// Reconcile successor phis: batch-load every source, then store into
    /// the phi homes in reverse, so a home that doubles as a source is read
    /// before it is clobbered.
    fn emit_phi_copies(
        &mut self,
        function: &Function,
        block: &Block,
        layout: &FunctionLayout,
    ) -> Result<(), CodegenError> {
        let mut copies: Vec<(Value, u64)> = vec![];
        for successor in block.terminator.successors() {
            for phi in &function.block(successor).phis {
                let source =
                    phi.sources.get(&block.id).cloned().ok_or_else(|| CodegenError::Internal {
                        message: format!(
                            "phi for `{}` has no source for {}",
                            phi.local, block.id
                        ),
                    })?;
                copies.push((source, temp_home(layout, phi.dest)?));
            }
        }

        if copies.is_empty() {
            return Ok(());
        }
        // Loading a temp source needs one extra slot for its home offset.
        if copies.len() + 1 > bug_layout::STACK_WINDOW {
            return Err(CodegenError::StackTooDeep { needed: copies.len() + 1 });
        }

        for (source, _) in &copies {
            let source = source.clone();
            self.load_value(&source, "value", layout)?;
        }
        for (_, home) in copies.iter().rev() {
            self.pipe()
                .then(ops::push(U256::from(*home), "offset"))
                .then(ops::mstore())
                .done()?;
        }
        Ok(())
    }

    fn emit_terminator(
        &mut self,
        terminator: &Terminator,
        kind: BodyKind,
        layout: &FunctionLayout,
        labels: &HashMap<BlockId, Label>,
    ) -> Result<(), CodegenError> {
        match &terminator.kind {
            TerminatorKind::Jump { target } => self
                .pipe()
                .then(ops::push_label(labels[target], "target"))
                .then(ops::jump())
                .done(),

            TerminatorKind::Branch { condition, then_target, else_target } => {
                self.load_value(condition, "condition", layout)?;
                self.pipe()
                    .then(ops::push_label(labels[then_target], "target"))
                    .then(ops::jumpi())
                    .then(ops::push_label(labels[else_target], "target"))
                    .then(ops::jump())
                    .done()
            }

            TerminatorKind::Return { value } => self.emit_return(value.as_ref(), kind, layout),

            TerminatorKind::Call { function: callee, args, continuation, .. } => {
                self.emit_call(callee, args, *continuation, layout, labels)
            }
        }
    }

    fn emit_return(
        &mut self,
        value: Option<&Value>,
        kind: BodyKind,
        layout: &FunctionLayout,
    ) -> Result<(), CodegenError> {
        match kind {
            BodyKind::Main => match value {
                Some(value) => {
                    // Write the value at offset 0 and return the word.
                    self.load_value(value, "value", layout)?;
                    self.pipe()
                        .then(ops::push(U256::ZERO, "offset"))
                        .then(ops::mstore())
                        .then(ops::push(U256::from(0x20u64), "length"))
                        .then(ops::push(U256::ZERO, "offset"))
                        .then(ops::r#return())
                        .done()
                }
                None => self.pipe().then(ops::stop()).done(),
            },
            BodyKind::Create { deploy } => self
                .pipe()
                .then(ops::push_label(deploy, "target"))
                .then(ops::jump())
                .done(),
            BodyKind::Function { return_pc_home } => {
                if let Some(value) = value {
                    self.load_value(value, "value", layout)?;
                    self.pipe()
                        .then(ops::push(U256::from(SCRATCH_A), "offset"))
                        .then(ops::mstore())
                        .done()?;
                }
                self.pipe()
                    .then(ops::push(U256::from(return_pc_home), "offset"))
                    .then(ops::mload())
                    .then(ops::rebrand(["target"]))
                    .then(ops::jump())
                    .done()
            }
        }
    }

    /// The call convention: write the arguments into the callee's parameter
    /// homes, push the continuation pc and jump to the callee. The callee
    /// returns through scratch memory; the continuation block loads it.
    fn emit_call(
        &mut self,
        callee: &str,
        args: &[Value],
        continuation: BlockId,
        layout: &FunctionLayout,
        labels: &HashMap<BlockId, Label>,
    ) -> Result<(), CodegenError> {
        let target = self.module.functions.get(callee).ok_or_else(|| {
            CodegenError::Internal { message: format!("call to unknown function `{callee}`") }
        })?;
        let callee_layout = self.plan.function(callee);

        for (arg, param) in args.iter().zip(target.params.iter()) {
            let home = temp_home(callee_layout, param.temp)?;
            self.load_value(arg, "value", layout)?;
            self.pipe()
                .then(ops::push(U256::from(home), "offset"))
                .then(ops::mstore())
                .done()?;
        }

        let entry = self.function_labels[callee];
        self.pipe()
            .then(ops::push_label(labels[&continuation], "return_pc"))
            .then(ops::push_label(entry, "target"))
            .then(ops::jump())
            .done()?;

        // The pushed return pc is consumed by the callee's prologue.
        self.stack.transfer("return_pc")
    }

    // ------------------------------------------------------------------
    // Debug information
    // ------------------------------------------------------------------

    /// The variables in scope for a function body: module storage slots
    /// plus parameters and phi-carried locals with their memory homes.
    fn variable_locations(
        &self,
        function: &Function,
        layout: &FunctionLayout,
    ) -> Vec<VariableLocation> {
        let mut variables: Vec<VariableLocation> = self
            .module
            .storage
            .iter()
            .map(|slot| VariableLocation {
                name: slot.name.clone(),
                pointer: bug_ir::DebugPointer::Storage { slot: U256::from(slot.slot) },
            })
            .collect();

        for param in &function.params {
            if let Some(home) = layout.temp_offset(param.temp) {
                variables.push(VariableLocation {
                    name: param.name.clone(),
                    pointer: bug_ir::DebugPointer::Memory {
                        offset: bug_ir::DebugValue::Const(U256::from(home)),
                    },
                });
            }
        }

        for block in function.blocks.values() {
            for phi in &block.phis {
                if variables.iter().any(|variable| variable.name == phi.local) {
                    continue;
                }
                if let Some(home) = layout.temp_offset(phi.dest) {
                    variables.push(VariableLocation {
                        name: phi.local.clone(),
                        pointer: bug_ir::DebugPointer::Memory {
                            offset: bug_ir::DebugValue::Const(U256::from(home)),
                        },
                    });
                }
            }
        }

        variables
    }
}

/// A context that pairs an IR node's provenance with the variable map in
/// scope.
fn with_variables(debug: &DebugContext, variables: &[VariableLocation]) -> DebugContext {
    if debug.is_none() {
        let mut context = SourceContext::default();
        context.variables = variables.to_vec();
        return DebugContext::single(context);
    }

    let contexts: Vec<SourceContext> = debug
        .contexts()
        .iter()
        .map(|context| {
            let mut context = context.clone();
            context.variables = variables.to_vec();
            context
        })
        .collect();

    let mut merged = DebugContext::none();
    for context in contexts {
        merged = merged.merge(&DebugContext::single(context));
    }
    merged
}

fn instruction_context(
    instruction: &Instruction,
    variables: &[VariableLocation],
) -> DebugContext {
    with_variables(&instruction.debug, variables)
}

fn terminator_context(terminator: &Terminator, variables: &[VariableLocation]) -> DebugContext {
    with_variables(&terminator.debug, variables)
}

fn block_context(block: &Block, variables: &[VariableLocation]) -> DebugContext {
    with_variables(&block.debug, variables)
}

/// Infer, for every temp, whether it carries raw storage words, the
/// calldata itself, or a memory pointer; used by `Hash` and `Length`.
fn collect_provenance(function: &Function) -> HashMap<TempId, Provenance> {
    let mut provenance = HashMap::new();

    for block in function.blocks.values() {
        for instruction in &block.instructions {
            let Some(dest) = instruction.dest else { continue };
            match &instruction.kind {
                InstructionKind::Read { location: DataLocation::Storage, ty, .. }
                    if !ty.is_word() =>
                {
                    provenance.insert(dest, Provenance::StorageRaw);
                }
                InstructionKind::Env { op: EnvOp::MsgData } => {
                    provenance.insert(dest, Provenance::MsgData);
                }
                InstructionKind::Read {
                    location: DataLocation::Calldata,
                    length: None,
                    ty,
                    ..
                } if !ty.is_word() => {
                    provenance.insert(dest, Provenance::MsgData);
                }
                InstructionKind::Read { location: DataLocation::Calldata, ty, .. }
                    if !ty.is_word() =>
                {
                    provenance.insert(dest, Provenance::Pointer);
                }
                _ => {}
            }
        }
    }

    provenance
}

fn temp_home(layout: &FunctionLayout, temp: TempId) -> Result<u64, CodegenError> {
    layout.temp_offset(temp).ok_or_else(|| CodegenError::Internal {
        message: format!("temp {temp} has no memory home"),
    })
}

fn require<'v>(value: &'v Option<Value>, what: &str) -> Result<&'v Value, CodegenError> {
    value.as_ref().ok_or_else(|| CodegenError::Internal { message: format!("missing {what}") })
}

/// The width results must be masked to, when the operation can exceed it.
fn binary_mask_bits(op: BinOp, lhs: &Value, rhs: &Value) -> Option<u16> {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Shl => {
            let bits = int_bits(lhs.ty())?.max(int_bits(rhs.ty())?);
            (bits < 256).then_some(bits)
        }
        // Division, modulus and right shifts cannot grow; comparisons and
        // logical operators produce 0/1.
        _ => None,
    }
}

fn int_bits(ty: &Ty) -> Option<u16> {
    match ty {
        Ty::Int { bits, .. } => Some(*bits),
        _ => None,
    }
}

fn cast_bits(ty: &Ty) -> Option<u16> {
    match ty {
        Ty::Int { bits, .. } => Some(*bits),
        Ty::Address => Some(160),
        Ty::Bytes { size: Some(size) } => Some(*size as u16 * 8),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use bug_source::Source;

    use super::*;
    use crate::EvmImage;

    pub(crate) fn compile(source: &str, level: u8) -> EvmImage {
        let source = Source::new("test.bug", source);
        let (program, reports) = bug_parser::parse_source(&source);
        assert!(reports.is_empty(), "parse reports: {reports:?}");
        let program = program.unwrap();
        let (env, reports) = bug_types::typecheck(&program);
        assert!(!reports.iter().any(|r| r.is_error()), "typecheck reports: {reports:?}");
        let (mut module, reports) = bug_lower::lower_module(&program, &env);
        assert!(!reports.iter().any(|r| r.is_error()), "lower reports: {reports:?}");
        let reports = bug_lower::finalise_ssa(&mut module);
        assert!(reports.is_empty(), "ssa reports: {reports:?}");
        let _ = bug_lower::optimise::Optimiser::new(level).optimise(&mut module);

        let plan = bug_layout::plan_module(&module).expect("layout must succeed");
        crate::generate_module(&module, &plan).expect("codegen must succeed")
    }

    fn count_op(bytes: &[u8], op: Op) -> usize {
        // Walk the instruction stream so PUSH immediates are not miscounted
        // as opcodes.
        let mut count = 0;
        let mut pc = 0;
        while pc < bytes.len() {
            let current = Op(bytes[pc]);
            if current == op {
                count += 1;
            }
            pc += 1 + current.immediate_len();
        }
        count
    }

    #[test]
    fn minimal_image_is_tiny_and_starts_with_jumpdest() {
        let image = compile("name Minimal; code {}", 1);

        assert!(image.create.is_none());
        assert!(image.runtime.len() <= 10, "runtime is {} bytes", image.runtime.len());
        assert_eq!(image.runtime[0], Op::JUMPDEST.0);
        assert_eq!(*image.runtime.last().unwrap(), Op::STOP.0);
    }

    #[test]
    fn counter_uses_caller_sload_sstore() {
        let image = compile(
            "name Counter;\n\
             storage { [0] count: uint256; [1] owner: address; }\n\
             code { if (msg.sender != owner) { return; } count = count + 1; }",
            1,
        );

        assert_eq!(count_op(&image.runtime, Op::CALLER), 1);
        assert!(count_op(&image.runtime, Op::SLOAD) >= 2);
        assert_eq!(count_op(&image.runtime, Op::SSTORE), 1);
        assert!(count_op(&image.runtime, Op::JUMPI) >= 1);
        // ne lowers to EQ ISZERO.
        assert!(count_op(&image.runtime, Op::EQ) >= 1);
        assert!(count_op(&image.runtime, Op::ISZERO) >= 1);
    }

    #[test]
    fn cse_leaves_one_add_for_the_shared_expression() {
        let source = "name C; storage { [0] x: uint256; [1] y: uint256; [2] z: uint256; } code { \
                let a = x + y; \
                let b = x + y; \
                z = a + b; \
             }";

        // Level 2 merges the repeated x+y; one ADD remains for it plus the
        // final a+b.
        let merged = compile(source, 2);
        assert_eq!(count_op(&merged.runtime, Op::ADD), 2);

        let unmerged = compile(source, 1);
        assert_eq!(count_op(&unmerged.runtime, Op::ADD), 3);
    }

    #[test]
    fn mapping_write_hashes_key_then_base() {
        let image = compile(
            "name M;\n\
             storage { [0] balances: mapping<address,uint256>; }\n\
             code { balances[msg.sender] = 42; }",
            1,
        );

        assert_eq!(count_op(&image.runtime, Op::KECCAK256), 1);
        assert_eq!(count_op(&image.runtime, Op::SSTORE), 1);
        assert_eq!(count_op(&image.runtime, Op::CALLER), 1);
    }

    #[test]
    fn constructor_image_wraps_the_runtime() {
        let image = compile(
            "name D;\n\
             storage { [0] owner: address; }\n\
             create { owner = address(msg.sender); }\n\
             code {}",
            1,
        );

        let create = image.create.expect("a create body produces a constructor image");
        // The runtime image is appended verbatim at the end.
        assert!(create.len() > image.runtime.len());
        assert_eq!(&create[create.len() - image.runtime.len()..], &image.runtime[..]);
        // The deploy tail copies and returns it.
        assert_eq!(count_op(&create, Op::CODECOPY), 1);
        assert!(count_op(&create, Op::RETURN) >= 1);
    }

    #[test]
    fn every_block_starts_with_jumpdest() {
        let image = compile(
            "name B;\n\
             storage { [0] n: uint256; }\n\
             code { let i = 0; while (i < n) { i = i + 1; } n = i; }",
            1,
        );

        // Every JUMP/JUMPI target in the stream must be a JUMPDEST.
        let bytes = &image.runtime;
        let mut pc = 0;
        let mut last_push: Option<usize> = None;
        while pc < bytes.len() {
            let op = Op(bytes[pc]);
            if op == Op::JUMP || op == Op::JUMPI {
                let target = last_push.expect("jumps are preceded by a pushed target");
                assert_eq!(bytes[target], Op::JUMPDEST.0, "jump target {target} in {bytes:?}");
            }
            if op.is_push() && op.immediate_len() > 0 {
                let immediate = &bytes[pc + 1..pc + 1 + op.immediate_len()];
                let mut value = 0usize;
                for byte in immediate {
                    value = (value << 8) | *byte as usize;
                }
                last_push = Some(value);
            }
            pc += 1 + op.immediate_len();
        }
    }

    #[test]
    fn annotated_listing_tracks_pcs_and_spans() {
        let image = compile(
            "name L;\n\
             storage { [0] x: uint256; }\n\
             code { x = x + 1; }",
            0,
        );

        assert!(!image.runtime_listing.is_empty());
        // pcs are strictly increasing and match the byte stream.
        for pair in image.runtime_listing.windows(2) {
            assert!(pair[0].pc < pair[1].pc);
        }
        // The store carries a source span and the storage variable map.
        let store = image
            .runtime_listing
            .iter()
            .find(|entry| entry.op == Op::SSTORE)
            .expect("an SSTORE is emitted");
        assert!(store.debug.span().is_some());
        let has_storage_pointer = store.debug.contexts().iter().any(|context| {
            context.variables.iter().any(|variable| {
                variable.name == "x"
                    && matches!(
                        variable.pointer,
                        bug_ir::DebugPointer::Storage { slot } if slot == U256::ZERO
                    )
            })
        });
        assert!(has_storage_pointer);
    }

    #[test]
    fn user_function_calls_round_trip_through_scratch() {
        let image = compile(
            "name F;\n\
             define function double(v: uint256) returns uint256 { return v + v; }\n\
             storage { [0] out: uint256; }\n\
             code { out = double(21); }",
            1,
        );

        // The callee body is present exactly once and the call plumbing
        // produced at least: arg store, return-pc store, result load.
        assert!(count_op(&image.runtime, Op::JUMP) >= 2);
        assert!(count_op(&image.runtime, Op::MSTORE) >= 3);
        assert_eq!(count_op(&image.runtime, Op::SSTORE), 1);
    }
}
