//! The planning pass: assign memory homes and verify block stack shapes.

use bug_ir::{BlockId, Function, InstructionKind, Module, TempId, Value};
use bug_reporting::{DiagnosticCode, Report};
use bug_utils::round_up;
use indexmap::IndexMap;

use crate::STATIC_BASE;

/// The brands of the values on the operand stack at a block boundary, top
/// last.
pub type StackShape = Vec<&'static str>;

/// A basic block's expected stack shapes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockShape {
    pub entry: StackShape,
    pub exit: StackShape,
}

/// Memory assignments for one function body.
#[derive(Debug, Default)]
pub struct FunctionLayout {
    /// The memory home of every SSA temp (params, phi dests, instruction
    /// dests).
    pub temp_offsets: IndexMap<TempId, u64>,
    /// The base offset of the region reserved by each `Allocate`, keyed by
    /// the defining temp.
    pub allocations: IndexMap<TempId, u64>,
    /// Where a called function stores the return pc its caller pushed.
    /// Only user-defined functions get one.
    pub return_pc_offset: Option<u64>,
    /// Per-block stack shapes on entry and exit.
    pub blocks: IndexMap<BlockId, BlockShape>,
}

impl FunctionLayout {
    pub fn temp_offset(&self, temp: TempId) -> Option<u64> {
        self.temp_offsets.get(&temp).copied()
    }
}

/// The module's memory plan.
#[derive(Debug, Default)]
pub struct LayoutPlan {
    /// Keyed by function name; the constructor body plans under `create`
    /// and the runtime body under `main`.
    pub functions: IndexMap<String, FunctionLayout>,
    /// The initial value of the runtime free-memory pointer: the first byte
    /// past everything the planner reserved.
    pub free_memory_start: u64,
}

impl LayoutPlan {
    pub fn function(&self, name: &str) -> &FunctionLayout {
        &self.functions[name]
    }
}

/// Plan the whole module. Layout failures are fatal for the module, so
/// errors are returned instead of a plan.
pub fn plan_module(module: &Module) -> Result<LayoutPlan, Vec<Report>> {
    let mut plan = LayoutPlan::default();
    let mut errors = vec![];
    let mut cursor = STATIC_BASE;

    let mut visit =
        |function: &Function, callee: bool, cursor: &mut u64, errors: &mut Vec<Report>| {
            match plan_function(function, callee, cursor) {
                Ok(layout) => {
                    plan.functions.insert(function.name.clone(), layout);
                }
                Err(mut function_errors) => errors.append(&mut function_errors),
            }
        };

    for function in module.functions.values() {
        visit(function, true, &mut cursor, &mut errors);
    }
    if let Some(create) = &module.create {
        visit(create, false, &mut cursor, &mut errors);
    }
    visit(&module.main, false, &mut cursor, &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    plan.free_memory_start = cursor;
    log::debug!(
        "planned module `{}`: static memory ends at {:#x}",
        module.name,
        plan.free_memory_start
    );
    Ok(plan)
}

fn plan_function(
    function: &Function,
    callee: bool,
    cursor: &mut u64,
) -> Result<FunctionLayout, Vec<Report>> {
    let mut layout = FunctionLayout::default();
    let mut errors = vec![];

    if callee {
        layout.return_pc_offset = Some(*cursor);
        *cursor += 32;
    }

    // Every temp gets a 32-byte home: parameters first, then phi and
    // instruction destinations in block order.
    let mut place_temp = |temp: TempId, layout: &mut FunctionLayout, cursor: &mut u64| {
        if layout.temp_offsets.contains_key(&temp) {
            return;
        }
        layout.temp_offsets.insert(temp, *cursor);
        *cursor += 32;
    };

    for param in &function.params {
        place_temp(param.temp, &mut layout, cursor);
    }

    for block in function.blocks.values() {
        for phi in &block.phis {
            place_temp(phi.dest, &mut layout, cursor);
        }
        for instruction in &block.instructions {
            if let Some(dest) = instruction.dest {
                place_temp(dest, &mut layout, cursor);
            }

            if let InstructionKind::Allocate { size } = &instruction.kind {
                match (instruction.dest, size.as_const_word()) {
                    (Some(dest), Some(size)) => {
                        let size = round_up(size.saturating_to::<u64>() as usize, 32) as u64;
                        layout.allocations.insert(dest, *cursor);
                        *cursor += size;
                    }
                    (_, None) => errors.push(
                        Report::error(
                            DiagnosticCode::MemoryAllocationFailure,
                            "allocation size must be known at compile time",
                        )
                        .with_opt_span(instruction.debug.span()),
                    ),
                    (None, _) => errors.push(Report::error(
                        DiagnosticCode::MemoryInvalidLayout,
                        "allocation without a destination",
                    )),
                }
            }
        }

        // A call's result temp is defined by the terminator.
        if let bug_ir::TerminatorKind::Call { dest: Some(dest), .. } = &block.terminator.kind {
            place_temp(*dest, &mut layout, cursor);
        }

        layout.blocks.insert(block.id, BlockShape::default());
    }

    verify_shapes(function, &layout, &mut errors);

    if errors.is_empty() {
        Ok(layout)
    } else {
        Err(errors)
    }
}

/// Check that on every CFG edge the successor's expected entry shape equals
/// the predecessor's exit shape. Phi reconciliation happens through memory
/// homes, so it does not alter the operand stack.
fn verify_shapes(function: &Function, layout: &FunctionLayout, errors: &mut Vec<Report>) {
    for block in function.blocks.values() {
        let exit = &layout.blocks[&block.id].exit;
        for successor in block.terminator.successors() {
            let entry = &layout.blocks[&successor].entry;
            if exit != entry {
                errors.push(Report::error(
                    DiagnosticCode::MemoryInvalidLayout,
                    format!(
                        "stack shape mismatch on edge {} -> {successor}: {exit:?} vs {entry:?}",
                        block.id
                    ),
                ));
            }
        }
    }

    // Every operand the generator will touch must have a home.
    for block in function.blocks.values() {
        for instruction in &block.instructions {
            instruction.kind.for_each_operand(|value| {
                if let Value::Temp(temp, _) = value {
                    if layout.temp_offset(*temp).is_none() {
                        errors.push(Report::error(
                            DiagnosticCode::MemoryInvalidLayout,
                            format!("temp {temp} is used but never given a memory home"),
                        ));
                    }
                }
            });
        }
    }
}
