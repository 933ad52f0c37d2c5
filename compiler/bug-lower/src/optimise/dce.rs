//! Dead-code elimination: delete every defining instruction whose dest is
//! not transitively used by a terminator or a side-effecting instruction.

use std::collections::{HashMap, HashSet, VecDeque};

use bug_ir::{BlockId, Function, TempId, Value};

/// Where a temp is defined.
enum DefSite {
    Instruction(BlockId, usize),
    Phi(BlockId, usize),
}

pub fn eliminate_dead_code(function: &mut Function) {
    let mut defs: HashMap<TempId, DefSite> = HashMap::new();
    for block in function.blocks.values() {
        for (index, phi) in block.phis.iter().enumerate() {
            defs.insert(phi.dest, DefSite::Phi(block.id, index));
        }
        for (index, instruction) in block.instructions.iter().enumerate() {
            if let Some(dest) = instruction.dest {
                defs.insert(dest, DefSite::Instruction(block.id, index));
            }
        }
    }

    // Seed the worklist with the temps used by terminators and by
    // side-effecting instructions, then chase definitions transitively.
    let mut used: HashSet<TempId> = HashSet::new();
    let mut worklist: VecDeque<TempId> = VecDeque::new();
    let mut mark = |value: &Value, used: &mut HashSet<TempId>, worklist: &mut VecDeque<TempId>| {
        if let Value::Temp(temp, _) = value {
            if used.insert(*temp) {
                worklist.push_back(*temp);
            }
        }
    };

    for block in function.blocks.values() {
        block.terminator.for_each_operand(|value| mark(value, &mut used, &mut worklist));
        for instruction in &block.instructions {
            if instruction.kind.has_side_effects() {
                instruction.kind.for_each_operand(|value| mark(value, &mut used, &mut worklist));
            }
        }
    }

    while let Some(temp) = worklist.pop_front() {
        match defs.get(&temp) {
            Some(DefSite::Instruction(block, index)) => {
                let instruction = &function.block(*block).instructions[*index];
                instruction.kind.for_each_operand(|value| mark(value, &mut used, &mut worklist));
            }
            Some(DefSite::Phi(block, index)) => {
                let phi = &function.block(*block).phis[*index];
                for source in phi.sources.values() {
                    mark(source, &mut used, &mut worklist);
                }
            }
            None => {}
        }
    }

    // Delete dead definitions. Side-effecting instructions stay regardless
    // of their dest.
    let mut removed = 0usize;
    for block in function.blocks.values_mut() {
        let before = block.instructions.len() + block.phis.len();
        block.instructions.retain(|instruction| {
            instruction.kind.has_side_effects()
                || match instruction.dest {
                    Some(dest) => used.contains(&dest),
                    None => true,
                }
        });
        block.phis.retain(|phi| used.contains(&phi.dest));
        removed += before - (block.instructions.len() + block.phis.len());
    }

    if removed > 0 {
        log::trace!("dce `{}`: removed {removed} dead definition(s)", function.name);
    }
}

#[cfg(test)]
mod tests {
    use bug_ir::InstructionKind;

    use crate::optimise::tests::optimised;

    #[test]
    fn unused_computations_are_removed() {
        let (module, _) = optimised(
            "name D; storage { [0] out: uint256; } code { \
                let unused = out + 5; \
                out = 1; \
             }",
            1,
        );

        // The read and the addition feeding only `unused` are gone.
        let adds = module
            .main
            .blocks
            .values()
            .flat_map(|block| &block.instructions)
            .filter(|i| matches!(i.kind, InstructionKind::BinaryOp { .. }))
            .count();
        assert_eq!(adds, 0);

        let reads = module
            .main
            .blocks
            .values()
            .flat_map(|block| &block.instructions)
            .filter(|i| matches!(i.kind, InstructionKind::Read { .. }))
            .count();
        assert_eq!(reads, 0);
    }

    #[test]
    fn stores_and_their_inputs_survive() {
        let (module, _) = optimised(
            "name S; storage { [0] a: uint256; [1] b: uint256; } code { \
                b = a + 1; \
             }",
            1,
        );

        let kinds: Vec<_> = module
            .main
            .blocks
            .values()
            .flat_map(|block| &block.instructions)
            .map(|i| &i.kind)
            .collect();
        assert!(kinds.iter().any(|k| matches!(k, InstructionKind::Read { .. })));
        assert!(kinds.iter().any(|k| matches!(k, InstructionKind::BinaryOp { .. })));
        assert!(kinds.iter().any(|k| matches!(k, InstructionKind::Write { .. })));
    }

    #[test]
    fn dead_phis_are_pruned() {
        let (module, _) = optimised(
            "name P; storage { [0] c: uint256; } code { \
                let r = 0; \
                if (c > 1) { r = 1; } else { r = 2; } \
             }",
            1,
        );

        // `r` is never used after the join, so its phi dies.
        let phis: usize = module.main.blocks.values().map(|block| block.phis.len()).sum();
        assert_eq!(phis, 0);
    }
}
