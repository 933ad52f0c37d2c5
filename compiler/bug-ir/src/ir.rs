//! IR node definitions: values, instructions, terminators, blocks,
//! functions and modules.

use std::fmt;

use alloy_primitives::U256;
use bug_types::{StorageSlot, Ty};
use indexmap::{IndexMap, IndexSet};

use crate::debug::DebugContext;

index_vec::define_index_type! {
    /// Index of a basic block within its function.
    pub struct BlockId = u32;

    MAX_INDEX = i32::max_value() as usize;
    DISABLE_MAX_INDEX_CHECK = cfg!(not(debug_assertions));
    DEBUG_FORMAT = "bb{}";
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.raw())
    }
}

/// An SSA temporary. Ids are allocated per function; after phi insertion
/// every temp has exactly one defining site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(pub u32);

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A constant literal together with its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstValue {
    pub literal: ConstLiteral,
    pub ty: Ty,
}

impl ConstValue {
    pub fn number(value: U256, ty: Ty) -> Self {
        Self { literal: ConstLiteral::Number(value), ty }
    }

    pub fn uint(value: u64) -> Self {
        Self::number(U256::from(value), Ty::UINT256)
    }

    pub fn bool(value: bool) -> Self {
        Self { literal: ConstLiteral::Bool(value), ty: Ty::Bool }
    }

    /// The word form of the constant, where it has one.
    pub fn as_word(&self) -> Option<U256> {
        match &self.literal {
            ConstLiteral::Number(value) => Some(*value),
            ConstLiteral::Bool(value) => Some(U256::from(*value as u64)),
            ConstLiteral::String(_) => None,
        }
    }
}

/// A literal carried by a [`ConstValue`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstLiteral {
    /// An integer in the 256-bit word domain.
    Number(U256),
    Bool(bool),
    /// A string payload; materialised into memory by the code generator.
    String(String),
}

/// An IR value. After phi insertion every value is `Const` or `Temp`;
/// `Local` appears only in the pre-SSA form the builder produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Const(ConstValue),
    Temp(TempId, Ty),
    /// A named block-local variable. Pre-SSA only.
    Local(String, Ty),
}

impl Value {
    pub fn ty(&self) -> &Ty {
        match self {
            Value::Const(value) => &value.ty,
            Value::Temp(_, ty) => ty,
            Value::Local(_, ty) => ty,
        }
    }

    pub fn as_temp(&self) -> Option<TempId> {
        match self {
            Value::Temp(temp, _) => Some(*temp),
            _ => None,
        }
    }

    pub fn as_const_word(&self) -> Option<U256> {
        match self {
            Value::Const(value) => value.as_word(),
            _ => None,
        }
    }

    /// The zero sentinel substituted for failed expressions.
    pub fn zero() -> Value {
        Value::Const(ConstValue::uint(0))
    }
}

/// Binary operators over word values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    /// Whether operand order does not affect the result.
    pub fn is_commutative(&self) -> bool {
        matches!(self, BinOp::Add | BinOp::Mul | BinOp::Eq | BinOp::Ne | BinOp::And | BinOp::Or)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Mod => "mod",
            BinOp::Shl => "shl",
            BinOp::Shr => "shr",
            BinOp::Eq => "eq",
            BinOp::Ne => "ne",
            BinOp::Lt => "lt",
            BinOp::Le => "le",
            BinOp::Gt => "gt",
            BinOp::Ge => "ge",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnOp {
    Not,
    Neg,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnOp::Not => write!(f, "not"),
            UnOp::Neg => write!(f, "neg"),
        }
    }
}

/// Execution-environment reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnvOp {
    MsgSender,
    MsgValue,
    MsgData,
    BlockNumber,
    BlockTimestamp,
}

impl EnvOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvOp::MsgSender => "msg.sender",
            EnvOp::MsgValue => "msg.value",
            EnvOp::MsgData => "msg.data",
            EnvOp::BlockNumber => "block.number",
            EnvOp::BlockTimestamp => "block.timestamp",
        }
    }
}

/// A data region a [`InstructionKind::Read`] or [`InstructionKind::Write`]
/// touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataLocation {
    Storage,
    Transient,
    Memory,
    Calldata,
    Returndata,
    Code,
    Local,
}

impl DataLocation {
    /// Whether the region can be written.
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            DataLocation::Storage
                | DataLocation::Transient
                | DataLocation::Memory
                | DataLocation::Local
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataLocation::Storage => "storage",
            DataLocation::Transient => "transient",
            DataLocation::Memory => "memory",
            DataLocation::Calldata => "calldata",
            DataLocation::Returndata => "returndata",
            DataLocation::Code => "code",
            DataLocation::Local => "local",
        }
    }
}

/// How a [`InstructionKind::ComputeSlot`] derives a storage key from its
/// base.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// `keccak256(pad32(key) ++ pad32(base))`.
    Mapping { key: Value, key_ty: Ty },
    /// `keccak256(pad32(base))`, the first element slot of a dynamic array.
    Array,
    /// `base + offset / 32`, a struct field at a declared byte offset.
    Field { offset: u64 },
}

/// How a [`InstructionKind::ComputeOffset`] derives a memory-region offset
/// from its base.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OffsetKind {
    /// `base + index * stride`.
    Array { index: Value, stride: u64 },
    /// `base + offset`, a struct field at a declared byte offset.
    Field { name: String, offset: u64 },
    /// `base + offset` for raw byte arithmetic.
    Byte { offset: Value },
}

/// The operation an [Instruction] performs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    /// Materialise a constant.
    Const { value: ConstValue },
    /// A binary operation over two word values.
    BinaryOp { op: BinOp, lhs: Value, rhs: Value },
    /// A unary operation.
    UnaryOp { op: UnOp, operand: Value },
    /// Read from the execution environment.
    Env { op: EnvOp },
    /// keccak256 of the value's byte representation.
    Hash { value: Value },
    /// Reinterpret / truncate a value into a target type.
    Cast { value: Value, ty: Ty },
    /// The length of an array, byte string or calldata object.
    Length { object: Value },
    /// Read from a data region.
    Read {
        location: DataLocation,
        slot: Option<Value>,
        offset: Option<Value>,
        length: Option<Value>,
        name: Option<String>,
        ty: Ty,
    },
    /// Write to a data region.
    Write {
        location: DataLocation,
        slot: Option<Value>,
        offset: Option<Value>,
        length: Option<Value>,
        value: Value,
        name: Option<String>,
    },
    /// Derive a 256-bit storage key from a base slot.
    ComputeSlot { kind: SlotKind, base: Value },
    /// Derive an offset within a linear data region.
    ComputeOffset { kind: OffsetKind, location: DataLocation, base: Value },
    /// Reserve a memory region of the given byte size.
    Allocate { size: Value },
}

impl InstructionKind {
    /// Whether the instruction has an observable effect beyond producing its
    /// destination. These are the roots dead-code elimination keeps.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            InstructionKind::Write { .. }
                | InstructionKind::Hash { .. }
                | InstructionKind::Env { .. }
                | InstructionKind::Allocate { .. }
        )
    }

    /// Whether the instruction's result depends only on its operands,
    /// making it a candidate for common-subexpression elimination across
    /// blocks.
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            InstructionKind::Const { .. }
                | InstructionKind::BinaryOp { .. }
                | InstructionKind::UnaryOp { .. }
                | InstructionKind::Cast { .. }
                | InstructionKind::ComputeSlot { .. }
                | InstructionKind::ComputeOffset { .. }
        )
    }

    /// Whether the instruction observes a mutable data region, pinning it
    /// against reordering across writes.
    pub fn reads_data(&self) -> bool {
        matches!(
            self,
            InstructionKind::Read { .. }
                | InstructionKind::Length { .. }
                | InstructionKind::Hash { .. }
        )
    }

    pub fn is_write(&self) -> bool {
        matches!(self, InstructionKind::Write { .. })
    }

    /// Visit every operand [Value] of the instruction.
    pub fn for_each_operand<'a>(&'a self, mut visit: impl FnMut(&'a Value)) {
        match self {
            InstructionKind::Const { .. } | InstructionKind::Env { .. } => {}
            InstructionKind::BinaryOp { lhs, rhs, .. } => {
                visit(lhs);
                visit(rhs);
            }
            InstructionKind::UnaryOp { operand, .. } => visit(operand),
            InstructionKind::Hash { value } => visit(value),
            InstructionKind::Cast { value, .. } => visit(value),
            InstructionKind::Length { object } => visit(object),
            InstructionKind::Read { slot, offset, length, .. } => {
                slot.iter().chain(offset.iter()).chain(length.iter()).for_each(visit);
            }
            InstructionKind::Write { slot, offset, length, value, .. } => {
                slot.iter().chain(offset.iter()).chain(length.iter()).for_each(&mut visit);
                visit(value);
            }
            InstructionKind::ComputeSlot { kind, base } => {
                if let SlotKind::Mapping { key, .. } = kind {
                    visit(key);
                }
                visit(base);
            }
            InstructionKind::ComputeOffset { kind, base, .. } => {
                match kind {
                    OffsetKind::Array { index, .. } => visit(index),
                    OffsetKind::Byte { offset } => visit(offset),
                    OffsetKind::Field { .. } => {}
                }
                visit(base);
            }
            InstructionKind::Allocate { size } => visit(size),
        }
    }

    /// Visit every operand [Value] mutably, for substitution passes.
    pub fn for_each_operand_mut(&mut self, mut visit: impl FnMut(&mut Value)) {
        match self {
            InstructionKind::Const { .. } | InstructionKind::Env { .. } => {}
            InstructionKind::BinaryOp { lhs, rhs, .. } => {
                visit(lhs);
                visit(rhs);
            }
            InstructionKind::UnaryOp { operand, .. } => visit(operand),
            InstructionKind::Hash { value } => visit(value),
            InstructionKind::Cast { value, .. } => visit(value),
            InstructionKind::Length { object } => visit(object),
            InstructionKind::Read { slot, offset, length, .. } => {
                slot.iter_mut()
                    .chain(offset.iter_mut())
                    .chain(length.iter_mut())
                    .for_each(visit);
            }
            InstructionKind::Write { slot, offset, length, value, .. } => {
                slot.iter_mut()
                    .chain(offset.iter_mut())
                    .chain(length.iter_mut())
                    .for_each(&mut visit);
                visit(value);
            }
            InstructionKind::ComputeSlot { kind, base } => {
                if let SlotKind::Mapping { key, .. } = kind {
                    visit(key);
                }
                visit(base);
            }
            InstructionKind::ComputeOffset { kind, base, .. } => {
                match kind {
                    OffsetKind::Array { index, .. } => visit(index),
                    OffsetKind::Byte { offset } => visit(offset),
                    OffsetKind::Field { .. } => {}
                }
                visit(base);
            }
            InstructionKind::Allocate { size } => visit(size),
        }
    }
}

/// A straight-line instruction: its operation, the temp it defines (when it
/// defines one) and the debug context it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub dest: Option<TempId>,
    pub debug: DebugContext,
}

impl Instruction {
    pub fn new(kind: InstructionKind, dest: Option<TempId>, debug: DebugContext) -> Self {
        Self { kind, dest, debug }
    }
}

/// A join-point instruction producing a value whose concrete source depends
/// on which predecessor transferred control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phi {
    /// The source-level variable the phi merges.
    pub local: String,
    pub dest: TempId,
    pub ty: Ty,
    /// One source per predecessor, keyed by predecessor block id.
    pub sources: IndexMap<BlockId, Value>,
    pub debug: DebugContext,
}

/// The control transfer that ends a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminatorKind {
    /// An unconditional jump.
    Jump { target: BlockId },
    /// A two-way conditional branch.
    Branch { condition: Value, then_target: BlockId, else_target: BlockId },
    /// Return from the current function, optionally with a value.
    Return { value: Option<Value> },
    /// Call a user-defined function and continue at `continuation` with the
    /// result bound to `dest`.
    Call {
        function: String,
        args: Vec<Value>,
        dest: Option<TempId>,
        continuation: BlockId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminator {
    pub kind: TerminatorKind,
    pub debug: DebugContext,
}

impl Terminator {
    pub fn new(kind: TerminatorKind, debug: DebugContext) -> Self {
        Self { kind, debug }
    }

    /// The blocks this terminator can transfer control to.
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        let (a, b) = match &self.kind {
            TerminatorKind::Jump { target } => (Some(*target), None),
            TerminatorKind::Branch { then_target, else_target, .. } => {
                (Some(*then_target), Some(*else_target))
            }
            TerminatorKind::Return { .. } => (None, None),
            TerminatorKind::Call { continuation, .. } => (Some(*continuation), None),
        };
        a.into_iter().chain(b)
    }

    /// Visit every [Value] the terminator uses.
    pub fn for_each_operand<'a>(&'a self, mut visit: impl FnMut(&'a Value)) {
        match &self.kind {
            TerminatorKind::Jump { .. } => {}
            TerminatorKind::Branch { condition, .. } => visit(condition),
            TerminatorKind::Return { value } => {
                if let Some(value) = value {
                    visit(value);
                }
            }
            TerminatorKind::Call { args, .. } => args.iter().for_each(visit),
        }
    }

    pub fn for_each_operand_mut(&mut self, mut visit: impl FnMut(&mut Value)) {
        match &mut self.kind {
            TerminatorKind::Jump { .. } => {}
            TerminatorKind::Branch { condition, .. } => visit(condition),
            TerminatorKind::Return { value } => {
                if let Some(value) = value {
                    visit(value);
                }
            }
            TerminatorKind::Call { args, .. } => args.iter_mut().for_each(visit),
        }
    }

    /// Rewrite successor block ids through `map`.
    pub fn map_successors(&mut self, mut map: impl FnMut(BlockId) -> BlockId) {
        match &mut self.kind {
            TerminatorKind::Jump { target } => *target = map(*target),
            TerminatorKind::Branch { then_target, else_target, .. } => {
                *then_target = map(*then_target);
                *else_target = map(*else_target);
            }
            TerminatorKind::Return { .. } => {}
            TerminatorKind::Call { continuation, .. } => *continuation = map(*continuation),
        }
    }
}

/// A basic block. Blocks are committed to their function only once their
/// terminator is set, so a block in a [Function] always has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    /// Join-point phi nodes. Empty until the phi inserter runs.
    pub phis: Vec<Phi>,
    pub instructions: Vec<Instruction>,
    /// Predecessor blocks, maintained by the builder and passes.
    pub predecessors: IndexSet<BlockId>,
    pub terminator: Terminator,
    pub debug: DebugContext,
}

/// A function parameter and the temp its value is bound to on entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: Ty,
    pub temp: TempId,
}

/// A lowered function: parameters, the entry block and the committed block
/// map.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    /// The declared return type, or the void sentinel.
    pub returns: Ty,
    pub entry: BlockId,
    /// Blocks in the order their terminators were set.
    pub blocks: IndexMap<BlockId, Block>,
    /// The number of temp ids allocated so far; later passes allocate fresh
    /// temps from here.
    pub temp_count: u32,
}

impl Function {
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[&id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        self.blocks.get_mut(&id).expect("block id out of range")
    }

    /// Allocate a fresh [TempId].
    pub fn fresh_temp(&mut self) -> TempId {
        let temp = TempId(self.temp_count);
        self.temp_count += 1;
        temp
    }

    /// Recompute every block's predecessor set from the terminators.
    pub fn recompute_predecessors(&mut self) {
        let edges: Vec<(BlockId, BlockId)> = self
            .blocks
            .values()
            .flat_map(|block| {
                block.terminator.successors().map(move |successor| (block.id, successor))
            })
            .collect();

        for block in self.blocks.values_mut() {
            block.predecessors.clear();
        }
        for (from, to) in edges {
            if let Some(block) = self.blocks.get_mut(&to) {
                block.predecessors.insert(from);
            }
        }
    }
}

/// A compiled module: the storage layout, the user-defined functions, the
/// optional constructor body and the required runtime body.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    /// Storage layout in slot order: (slot index, name, type, source range).
    pub storage: Vec<StorageSlot>,
    pub functions: IndexMap<String, Function>,
    pub create: Option<Function>,
    pub main: Function,
}

impl Module {
    /// Iterate over every function body in the module: user functions, the
    /// constructor (when present) and main.
    pub fn for_each_function(&self, mut visit: impl FnMut(&Function)) {
        for function in self.functions.values() {
            visit(function);
        }
        if let Some(create) = &self.create {
            visit(create);
        }
        visit(&self.main);
    }

    pub fn for_each_function_mut(&mut self, mut visit: impl FnMut(&mut Function)) {
        for function in self.functions.values_mut() {
            visit(function);
        }
        if let Some(create) = &mut self.create {
            visit(create);
        }
        visit(&mut self.main);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugContext;

    fn jump(target: BlockId) -> Terminator {
        Terminator::new(TerminatorKind::Jump { target }, DebugContext::none())
    }

    #[test]
    fn terminator_successors() {
        let branch = Terminator::new(
            TerminatorKind::Branch {
                condition: Value::zero(),
                then_target: BlockId::from_raw(1),
                else_target: BlockId::from_raw(2),
            },
            DebugContext::none(),
        );
        let successors: Vec<_> = branch.successors().collect();
        assert_eq!(successors, vec![BlockId::from_raw(1), BlockId::from_raw(2)]);

        let ret = Terminator::new(TerminatorKind::Return { value: None }, DebugContext::none());
        assert_eq!(ret.successors().count(), 0);
    }

    #[test]
    fn predecessor_recompute() {
        let entry = BlockId::from_raw(0);
        let exit = BlockId::from_raw(1);

        let mut function = Function {
            name: "test".to_string(),
            params: vec![],
            returns: Ty::void(),
            entry,
            blocks: IndexMap::new(),
            temp_count: 0,
        };
        function.blocks.insert(
            entry,
            Block {
                id: entry,
                phis: vec![],
                instructions: vec![],
                predecessors: IndexSet::new(),
                terminator: jump(exit),
                debug: DebugContext::none(),
            },
        );
        function.blocks.insert(
            exit,
            Block {
                id: exit,
                phis: vec![],
                instructions: vec![],
                predecessors: IndexSet::new(),
                terminator: Terminator::new(
                    TerminatorKind::Return { value: None },
                    DebugContext::none(),
                ),
                debug: DebugContext::none(),
            },
        );

        function.recompute_predecessors();
        assert!(function.block(exit).predecessors.contains(&entry));
        assert!(function.block(entry).predecessors.is_empty());
    }

    #[test]
    fn purity_classification() {
        let add = InstructionKind::BinaryOp { op: BinOp::Add, lhs: Value::zero(), rhs: Value::zero() };
        assert!(add.is_pure());
        assert!(!add.has_side_effects());

        let write = InstructionKind::Write {
            location: DataLocation::Storage,
            slot: Some(Value::zero()),
            offset: None,
            length: None,
            value: Value::zero(),
            name: None,
        };
        assert!(write.has_side_effects());
        assert!(!write.is_pure());

        let read = InstructionKind::Read {
            location: DataLocation::Storage,
            slot: Some(Value::zero()),
            offset: None,
            length: None,
            name: None,
            ty: Ty::UINT256,
        };
        assert!(read.reads_data());
        assert!(!read.is_pure());
    }
}
