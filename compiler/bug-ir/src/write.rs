//! Pretty-printing of IR bodies, used by `--dump-ir` and by tests asserting
//! on IR shape.

use std::fmt;

use itertools::Itertools;

use crate::ir::{
    Block, ConstLiteral, Function, Instruction, InstructionKind, Module, OffsetKind, Phi,
    SlotKind, Terminator, TerminatorKind, Value,
};

pub struct ModuleWriter<'ir>(pub &'ir Module);

impl fmt::Display for ModuleWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let module = self.0;
        writeln!(f, "module {}", module.name)?;

        if !module.storage.is_empty() {
            writeln!(f, "storage {{")?;
            for slot in &module.storage {
                writeln!(f, "    [{}] {}: {}", slot.slot, slot.name, slot.ty)?;
            }
            writeln!(f, "}}")?;
        }

        for function in module.functions.values() {
            write!(f, "{}", FunctionWriter(function))?;
        }
        if let Some(create) = &module.create {
            write!(f, "{}", FunctionWriter(create))?;
        }
        write!(f, "{}", FunctionWriter(&module.main))
    }
}

pub struct FunctionWriter<'ir>(pub &'ir Function);

impl fmt::Display for FunctionWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let function = self.0;

        let params = function
            .params
            .iter()
            .map(|param| format!("{}: {} = {}", param.name, param.ty, param.temp))
            .join(", ");
        writeln!(f, "fn {}({params}) {{", function.name)?;

        for block in function.blocks.values() {
            write!(f, "{}", BlockWriter(block))?;
        }
        writeln!(f, "}}")
    }
}

pub struct BlockWriter<'ir>(pub &'ir Block);

impl fmt::Display for BlockWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let block = self.0;
        writeln!(f, "  {}:", block.id)?;

        for phi in &block.phis {
            writeln!(f, "    {}", PhiWriter(phi))?;
        }
        for instruction in &block.instructions {
            writeln!(f, "    {}", InstructionWriter(instruction))?;
        }
        writeln!(f, "    {}", TerminatorWriter(&block.terminator))
    }
}

pub struct PhiWriter<'ir>(pub &'ir Phi);

impl fmt::Display for PhiWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phi = self.0;
        let sources = phi
            .sources
            .iter()
            .map(|(pred, value)| format!("{pred}: {}", ValueWriter(value)))
            .join(", ");
        write!(f, "{} = phi {}({sources}) : {}", phi.dest, phi.local, phi.ty)
    }
}

pub struct ValueWriter<'ir>(pub &'ir Value);

impl fmt::Display for ValueWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::Const(value) => match &value.literal {
                ConstLiteral::Number(number) => write!(f, "const {number}: {}", value.ty),
                ConstLiteral::Bool(boolean) => write!(f, "const {boolean}"),
                ConstLiteral::String(string) => write!(f, "const {string:?}"),
            },
            Value::Temp(temp, _) => write!(f, "{temp}"),
            Value::Local(name, _) => write!(f, "${name}"),
        }
    }
}

pub struct InstructionWriter<'ir>(pub &'ir Instruction);

impl fmt::Display for InstructionWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let instruction = self.0;
        if let Some(dest) = instruction.dest {
            write!(f, "{dest} = ")?;
        }

        match &instruction.kind {
            InstructionKind::Const { value } => {
                write!(f, "{}", ValueWriter(&Value::Const(value.clone())))
            }
            InstructionKind::BinaryOp { op, lhs, rhs } => {
                write!(f, "{op} {}, {}", ValueWriter(lhs), ValueWriter(rhs))
            }
            InstructionKind::UnaryOp { op, operand } => {
                write!(f, "{op} {}", ValueWriter(operand))
            }
            InstructionKind::Env { op } => write!(f, "env {}", op.as_str()),
            InstructionKind::Hash { value } => write!(f, "keccak256 {}", ValueWriter(value)),
            InstructionKind::Cast { value, ty } => {
                write!(f, "cast {} to {ty}", ValueWriter(value))
            }
            InstructionKind::Length { object } => write!(f, "length {}", ValueWriter(object)),
            InstructionKind::Read { location, slot, offset, length, name, ty } => {
                write!(f, "read {}", location.as_str())?;
                if let Some(name) = name {
                    write!(f, " ${name}")?;
                }
                if let Some(slot) = slot {
                    write!(f, " slot {}", ValueWriter(slot))?;
                }
                if let Some(offset) = offset {
                    write!(f, " offset {}", ValueWriter(offset))?;
                }
                if let Some(length) = length {
                    write!(f, " len {}", ValueWriter(length))?;
                }
                write!(f, " : {ty}")
            }
            InstructionKind::Write { location, slot, offset, length, value, name } => {
                write!(f, "write {}", location.as_str())?;
                if let Some(name) = name {
                    write!(f, " ${name}")?;
                }
                if let Some(slot) = slot {
                    write!(f, " slot {}", ValueWriter(slot))?;
                }
                if let Some(offset) = offset {
                    write!(f, " offset {}", ValueWriter(offset))?;
                }
                if let Some(length) = length {
                    write!(f, " len {}", ValueWriter(length))?;
                }
                write!(f, " <- {}", ValueWriter(value))
            }
            InstructionKind::ComputeSlot { kind, base } => match kind {
                SlotKind::Mapping { key, .. } => {
                    write!(f, "slot mapping[{}] of {}", ValueWriter(key), ValueWriter(base))
                }
                SlotKind::Array => write!(f, "slot array of {}", ValueWriter(base)),
                SlotKind::Field { offset } => {
                    write!(f, "slot field+{offset} of {}", ValueWriter(base))
                }
            },
            InstructionKind::ComputeOffset { kind, location, base } => match kind {
                OffsetKind::Array { index, stride } => write!(
                    f,
                    "offset {} array[{}]*{stride} of {}",
                    location.as_str(),
                    ValueWriter(index),
                    ValueWriter(base)
                ),
                OffsetKind::Field { name, offset } => write!(
                    f,
                    "offset {} .{name}+{offset} of {}",
                    location.as_str(),
                    ValueWriter(base)
                ),
                OffsetKind::Byte { offset } => write!(
                    f,
                    "offset {} +{} of {}",
                    location.as_str(),
                    ValueWriter(offset),
                    ValueWriter(base)
                ),
            },
            InstructionKind::Allocate { size } => write!(f, "alloc {}", ValueWriter(size)),
        }
    }
}

pub struct TerminatorWriter<'ir>(pub &'ir Terminator);

impl fmt::Display for TerminatorWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            TerminatorKind::Jump { target } => write!(f, "jump {target}"),
            TerminatorKind::Branch { condition, then_target, else_target } => {
                write!(f, "branch {}, {then_target}, {else_target}", ValueWriter(condition))
            }
            TerminatorKind::Return { value: Some(value) } => {
                write!(f, "return {}", ValueWriter(value))
            }
            TerminatorKind::Return { value: None } => write!(f, "return"),
            TerminatorKind::Call { function, args, dest, continuation } => {
                if let Some(dest) = dest {
                    write!(f, "{dest} = ")?;
                }
                write!(f, "call {function}(")?;
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", ValueWriter(arg))?;
                }
                write!(f, ") -> {continuation}")
            }
        }
    }
}
