//! SSA finalisation: pruned phi insertion and renaming.
//!
//! The builder's output defines each variable with `Write` instructions on
//! the `local` location and uses it through `Local` values. This pass
//! computes the dominator tree and dominance frontiers, inserts phi nodes at
//! join points where the variable is live on entry, and renames every
//! definition and use so that afterwards each temp has exactly one defining
//! site and no `Local` value remains.

pub mod dominators;
pub mod liveness;

use std::collections::HashMap;

use bug_ir::{
    BlockId, DataLocation, DebugContext, Function, InstructionKind, Phi, Value,
};
use bug_reporting::{DiagnosticCode, Report};
use bug_types::Ty;
use indexmap::{IndexMap, IndexSet};

use self::{dominators::Dominators, liveness::Liveness};

/// Finalise one function into SSA form.
pub fn finalise_function(function: &mut Function) -> Vec<Report> {
    let dominators = Dominators::compute(function);
    let frontier = dominators.dominance_frontier(function);
    let liveness = Liveness::compute(function);

    // Per-variable definition sites and types.
    let (def_blocks, local_tys) = collect_defs(function);

    // Pruned phi insertion: iterate a worklist per variable, seeding it with
    // the defining blocks; a placed phi is itself a definition.
    for (local, blocks) in &def_blocks {
        let ty = local_tys[local].clone();
        let mut worklist: Vec<BlockId> = blocks.iter().copied().collect();
        let mut placed: IndexSet<BlockId> = IndexSet::new();

        while let Some(block) = worklist.pop() {
            let Some(frontier_blocks) = frontier.get(&block) else { continue };

            for &join in frontier_blocks {
                if placed.contains(&join) || !liveness.live_in(join, local) {
                    continue;
                }

                let dest = function.fresh_temp();
                function.block_mut(join).phis.push(Phi {
                    local: local.clone(),
                    dest,
                    ty: ty.clone(),
                    sources: IndexMap::new(),
                    debug: DebugContext::none(),
                });

                placed.insert(join);
                worklist.push(join);
            }
        }
    }

    log::trace!(
        "ssa `{}`: {} phi(s) inserted",
        function.name,
        function.blocks.values().map(|block| block.phis.len()).sum::<usize>()
    );

    // Renaming: walk the dominator tree pre-order with a stack of current
    // versions per variable.
    let mut renamer = Renamer {
        stacks: HashMap::new(),
        children: dominators.children(),
        reports: vec![],
    };
    let entry = function.entry;
    renamer.rename_block(function, entry);

    let reports = validate(function, renamer.reports);
    reports
}

fn collect_defs(
    function: &Function,
) -> (IndexMap<String, IndexSet<BlockId>>, IndexMap<String, Ty>) {
    let mut def_blocks: IndexMap<String, IndexSet<BlockId>> = IndexMap::new();
    let mut local_tys: IndexMap<String, Ty> = IndexMap::new();

    for block in function.blocks.values() {
        for instruction in &block.instructions {
            if let InstructionKind::Write {
                location: DataLocation::Local,
                name: Some(name),
                value,
                ..
            } = &instruction.kind
            {
                def_blocks.entry(name.clone()).or_default().insert(block.id);
                local_tys.entry(name.clone()).or_insert_with(|| value.ty().clone());
            }
        }
    }

    (def_blocks, local_tys)
}

struct Renamer {
    /// Current version per variable; the top of each stack is the reaching
    /// definition.
    stacks: HashMap<String, Vec<Value>>,
    children: IndexMap<BlockId, Vec<BlockId>>,
    reports: Vec<Report>,
}

impl Renamer {
    fn current(&mut self, name: &str) -> Value {
        match self.stacks.get(name).and_then(|stack| stack.last()) {
            Some(value) => value.clone(),
            None => {
                // A use with no reaching definition; the builder substitutes
                // zero so lowering stays coherent, and we report once.
                self.reports.push(Report::error(
                    DiagnosticCode::IrUnknownIdentifier,
                    format!("`{name}` is used before it is assigned"),
                ));
                Value::zero()
            }
        }
    }

    fn rename_block(&mut self, function: &mut Function, id: BlockId) {
        // Names whose stacks this block pushed; popped on exit.
        let mut pushed: Vec<String> = vec![];

        // Phis define at the top of the block.
        {
            let block = function.block_mut(id);
            for phi in &block.phis {
                self.stacks
                    .entry(phi.local.clone())
                    .or_default()
                    .push(Value::Temp(phi.dest, phi.ty.clone()));
                pushed.push(phi.local.clone());
            }
        }

        // Rewrite instruction operands to the reaching version; a local
        // write pushes a new version and disappears.
        {
            let block = function.block_mut(id);
            let instructions = std::mem::take(&mut block.instructions);
            let mut kept = Vec::with_capacity(instructions.len());

            for mut instruction in instructions {
                substitute_kind(&mut instruction.kind, self);

                if let InstructionKind::Write {
                    location: DataLocation::Local,
                    name: Some(name),
                    value,
                    ..
                } = &instruction.kind
                {
                    self.stacks.entry(name.clone()).or_default().push(value.clone());
                    pushed.push(name.clone());
                    // The definition is now carried by the version stack;
                    // the instruction itself vanishes.
                    continue;
                }

                kept.push(instruction);
            }

            let block = function.block_mut(id);
            block.instructions = kept;

            let mut terminator = block.terminator.clone();
            terminator.for_each_operand_mut(|value| {
                if let Value::Local(name, _) = value {
                    let name = name.clone();
                    *value = match self.stacks.get(&name).and_then(|stack| stack.last()) {
                        Some(current) => current.clone(),
                        None => Value::zero(),
                    };
                }
            });
            function.block_mut(id).terminator = terminator;
        }

        // Fill phi sources of every successor with the versions reaching the
        // end of this block.
        let successors: Vec<BlockId> =
            function.block(id).terminator.successors().collect();
        for successor in successors {
            let sources: Vec<(usize, Value)> = {
                let block = function.block(successor);
                block
                    .phis
                    .iter()
                    .enumerate()
                    .map(|(index, phi)| {
                        let value = self
                            .stacks
                            .get(&phi.local)
                            .and_then(|stack| stack.last())
                            .cloned()
                            .unwrap_or_else(Value::zero);
                        (index, value)
                    })
                    .collect()
            };

            let block = function.block_mut(successor);
            for (index, value) in sources {
                block.phis[index].sources.insert(id, value);
            }
        }

        // Continue down the dominator tree.
        let children = self.children.get(&id).cloned().unwrap_or_default();
        for child in children {
            self.rename_block(function, child);
        }

        // Pop this block's versions.
        for name in pushed.into_iter().rev() {
            if let Some(stack) = self.stacks.get_mut(&name) {
                stack.pop();
            }
        }
    }
}

/// Substitute `Local` operands in `kind` with the renamer's current
/// versions.
fn substitute_kind(kind: &mut InstructionKind, renamer: &mut Renamer) {
    // Collect the names first so the closure does not need `&mut renamer`.
    let mut replacements: Vec<(String, Value)> = vec![];
    kind.for_each_operand(|value| {
        if let Value::Local(name, _) = value {
            if !replacements.iter().any(|(seen, _)| seen == name) {
                replacements.push((name.clone(), Value::zero()));
            }
        }
    });
    for (name, replacement) in &mut replacements {
        *replacement = renamer.current(name);
    }

    kind.for_each_operand_mut(|value| {
        if let Value::Local(name, _) = value {
            let replacement = replacements
                .iter()
                .find(|(seen, _)| seen == name)
                .map(|(_, replacement)| replacement.clone())
                .expect("every local was collected above");
            *value = replacement;
        }
    });
}

/// Post-pass validation of the SSA correctness properties. Violations are
/// compiler bugs, reported as internal errors rather than panics so the
/// driver can surface them.
fn validate(function: &Function, mut reports: Vec<Report>) -> Vec<Report> {
    let mut defined: IndexSet<bug_ir::TempId> = IndexSet::new();
    for param in &function.params {
        defined.insert(param.temp);
    }

    for block in function.blocks.values() {
        for phi in &block.phis {
            if !defined.insert(phi.dest) {
                reports.push(Report::error(
                    DiagnosticCode::IrExhaustiveness,
                    format!("temp {} has more than one definition", phi.dest),
                ));
            }

            let source_keys: IndexSet<BlockId> = phi.sources.keys().copied().collect();
            let preds: IndexSet<BlockId> = block.predecessors.iter().copied().collect();
            if source_keys != preds {
                reports.push(Report::error(
                    DiagnosticCode::IrExhaustiveness,
                    format!(
                        "phi for `{}` in {} does not cover its predecessors",
                        phi.local, block.id
                    ),
                ));
            }
        }

        for instruction in &block.instructions {
            if let Some(dest) = instruction.dest {
                if !defined.insert(dest) {
                    reports.push(Report::error(
                        DiagnosticCode::IrExhaustiveness,
                        format!("temp {dest} has more than one definition"),
                    ));
                }
            }

            instruction.kind.for_each_operand(|value| {
                if let Value::Local(name, _) = value {
                    reports.push(Report::error(
                        DiagnosticCode::IrExhaustiveness,
                        format!("local `{name}` survived SSA renaming"),
                    ));
                }
            });
        }
    }

    reports
}

#[cfg(test)]
mod tests {
    use bug_ir::{BinOp, Module, TerminatorKind};
    use bug_source::Source;

    use super::*;

    fn lower_to_ssa(source: &str) -> Module {
        let source = Source::new("test.bug", source);
        let (program, reports) = bug_parser::parse_source(&source);
        assert!(reports.is_empty(), "parse reports: {reports:?}");
        let program = program.unwrap();
        let (env, reports) = bug_types::typecheck(&program);
        assert!(!reports.iter().any(|r| r.is_error()), "typecheck reports: {reports:?}");
        let (mut module, reports) = crate::build::lower_module(&program, &env);
        assert!(!reports.iter().any(|r| r.is_error()), "lower reports: {reports:?}");
        let reports = crate::finalise_ssa(&mut module);
        assert!(reports.is_empty(), "ssa reports: {reports:?}");
        module
    }

    fn phi_count(function: &Function) -> usize {
        function.blocks.values().map(|block| block.phis.len()).sum()
    }

    #[test]
    fn join_gets_exactly_one_phi() {
        let module = lower_to_ssa(
            "name J;\n\
             storage { [0] x: uint256; [1] y: uint256; }\n\
             code { \
                let r = 0; \
                let dead = 5; \
                if (x > 5) { r = 20; } else { r = 30; } \
                y = r; \
             }",
        );

        // Pruned insertion: one phi for `r` at the join; none for `dead`,
        // which is never redefined, and none elsewhere.
        let main = &module.main;
        assert_eq!(phi_count(main), 1);

        let (join, phi) = main
            .blocks
            .values()
            .find_map(|block| block.phis.first().map(|phi| (block, phi)))
            .expect("expected one phi");
        assert_eq!(phi.local, "r");
        assert_eq!(phi.sources.len(), 2);
        assert_eq!(
            phi.sources.keys().copied().collect::<IndexSet<_>>(),
            join.predecessors.iter().copied().collect::<IndexSet<_>>()
        );

        // Both sources are the constants assigned in the branches.
        let words: Vec<_> =
            phi.sources.values().filter_map(|value| value.as_const_word()).collect();
        assert!(words.contains(&alloy_primitives::U256::from(20u64)));
        assert!(words.contains(&alloy_primitives::U256::from(30u64)));
    }

    #[test]
    fn no_locals_remain_after_renaming() {
        let module = lower_to_ssa(
            "name L; code { \
                let i = 0; \
                while (i < 10) { i = i + 1; } \
                let done = i; \
             }",
        );

        module.for_each_function(|function| {
            for block in function.blocks.values() {
                for instruction in &block.instructions {
                    instruction.kind.for_each_operand(|value| {
                        assert!(
                            !matches!(value, Value::Local(..)),
                            "local survived: {instruction:?}"
                        );
                    });
                    assert!(
                        !matches!(
                            instruction.kind,
                            InstructionKind::Write { location: DataLocation::Local, .. }
                        ),
                        "local write survived: {instruction:?}"
                    );
                }
            }
        });
    }

    #[test]
    fn loop_variable_gets_header_phi() {
        let module = lower_to_ssa(
            "name W;\n\
             storage { [0] out: uint256; }\n\
             code { let i = 0; while (i < 10) { i = i + 1; } out = i; }",
        );

        let main = &module.main;
        // `i` needs exactly one phi, at the loop header (the only join).
        assert_eq!(phi_count(main), 1);

        let header = main
            .blocks
            .values()
            .find(|block| !block.phis.is_empty())
            .expect("loop header must carry the phi");
        assert_eq!(header.phis[0].local, "i");
        assert!(matches!(header.terminator.kind, TerminatorKind::Branch { .. }));
        // The header has two predecessors: entry and the loop body.
        assert_eq!(header.predecessors.len(), 2);
    }

    #[test]
    fn straight_line_code_needs_no_phis() {
        let module = lower_to_ssa(
            "name S;\n\
             storage { [0] a: uint256; }\n\
             code { let x = 1; let y = x + 2; a = y; }",
        );
        assert_eq!(phi_count(&module.main), 0);
    }

    #[test]
    fn counter_needs_no_phis() {
        let module = lower_to_ssa(
            "name Counter;\n\
             storage { [0] count: uint256; [1] owner: address; }\n\
             code { if (msg.sender != owner) { return; } count = count + 1; }",
        );
        // No variable is redefined across the branch.
        assert_eq!(phi_count(&module.main), 0);
    }

    #[test]
    fn every_temp_has_one_definition() {
        let module = lower_to_ssa(
            "name D;\n\
             storage { [0] out: uint256; }\n\
             code { \
                let acc = 0; \
                for (let i = 0; i < 4; i = i + 1) { acc = acc + i; } \
                out = acc; \
             }",
        );

        let main = &module.main;
        let mut seen = IndexSet::new();
        for block in main.blocks.values() {
            for phi in &block.phis {
                assert!(seen.insert(phi.dest), "duplicate def of {}", phi.dest);
            }
            for instruction in &block.instructions {
                if let Some(dest) = instruction.dest {
                    assert!(seen.insert(dest), "duplicate def of {dest}");
                }
            }
        }

        // Both loop-carried variables need a header phi.
        assert_eq!(phi_count(main), 2);

        // The addition feeding the store uses phi-defined temps.
        let has_add = main.blocks.values().any(|block| {
            block
                .instructions
                .iter()
                .any(|i| matches!(i.kind, InstructionKind::BinaryOp { op: BinOp::Add, .. }))
        });
        assert!(has_add);
    }
}
