//! Common-subexpression elimination.
//!
//! Within a block, a map from canonicalised operation to the earliest dest
//! temp merges repeated pure computations and repeated reads (the read table
//! is invalidated by any write). Across blocks (level 3), a dominator-tree
//! walk makes pure single-definition computations available to every
//! dominated block. Merged instructions contribute their debug contexts to
//! the survivor as a deduplicated pick.

use std::collections::HashMap;

use bug_ir::{BinOp, BlockId, Function, Instruction, InstructionKind, TempId, Value};

use crate::ssa::dominators::Dominators;

/// Replacements recorded while merging: a deleted dest maps to the
/// surviving temp.
type Replacements = HashMap<TempId, TempId>;

pub fn local_cse(function: &mut Function) {
    let mut replacements: Replacements = HashMap::new();

    for block in function.blocks.values_mut() {
        let mut pure_seen: HashMap<InstructionKind, usize> = HashMap::new();
        let mut reads_seen: HashMap<InstructionKind, usize> = HashMap::new();

        let instructions = std::mem::take(&mut block.instructions);
        let mut kept: Vec<Instruction> = Vec::with_capacity(instructions.len());

        for mut instruction in instructions {
            apply_to_kind(&mut instruction.kind, &replacements);
            let canonical = canonicalise(&instruction.kind);

            let table = if instruction.kind.is_pure() && instruction.dest.is_some() {
                Some(&mut pure_seen)
            } else if instruction.kind.reads_data() && instruction.dest.is_some() {
                Some(&mut reads_seen)
            } else {
                None
            };

            if let Some(table) = table {
                if let Some(&survivor_index) = table.get(&canonical) {
                    let survivor = &mut kept[survivor_index];
                    if let (Some(old), Some(new)) = (instruction.dest, survivor.dest) {
                        replacements.insert(old, new);
                        survivor.debug = survivor.debug.merge(&instruction.debug);
                        continue;
                    }
                }
                table.insert(canonical, kept.len());
            }

            // A write invalidates every remembered read: reads are never
            // merged across other writes.
            if instruction.kind.is_write()
                || matches!(instruction.kind, InstructionKind::Allocate { .. })
            {
                reads_seen.clear();
            }

            kept.push(instruction);
        }

        block.instructions = kept;
    }

    apply_replacements(function, &replacements);
}

/// Cross-block CSE, restricted to pure instructions (arithmetic, casts,
/// slot and offset computation). A dominator's computation is available to
/// every block it dominates.
pub fn global_cse(function: &mut Function) {
    let dominators = Dominators::compute(function);
    let children = dominators.children();

    let mut replacements: Replacements = HashMap::new();
    let mut available: HashMap<InstructionKind, TempId> = HashMap::new();

    let entry = function.entry;
    walk(function, entry, &children, &mut available, &mut replacements);

    apply_replacements(function, &replacements);

    fn walk(
        function: &mut Function,
        id: BlockId,
        children: &indexmap::IndexMap<BlockId, Vec<BlockId>>,
        available: &mut HashMap<InstructionKind, TempId>,
        replacements: &mut Replacements,
    ) {
        // Track what this block added so the scope unwinds on exit.
        let mut added: Vec<InstructionKind> = vec![];

        let block = function.block_mut(id);
        let instructions = std::mem::take(&mut block.instructions);
        let mut kept: Vec<Instruction> = Vec::with_capacity(instructions.len());
        let mut merged_debug: Vec<(TempId, bug_ir::DebugContext)> = vec![];

        for mut instruction in instructions {
            apply_to_kind(&mut instruction.kind, replacements);

            if instruction.kind.is_pure() && instruction.dest.is_some() {
                let canonical = canonicalise(&instruction.kind);

                if let Some(&survivor) = available.get(&canonical) {
                    let old = instruction.dest.unwrap();
                    replacements.insert(old, survivor);
                    merged_debug.push((survivor, instruction.debug.clone()));
                    continue;
                }

                available.insert(canonical.clone(), instruction.dest.unwrap());
                added.push(canonical);
            }

            kept.push(instruction);
        }

        function.block_mut(id).instructions = kept;

        // Fold merged contexts into the surviving definitions, wherever
        // they live.
        for (survivor, debug) in merged_debug {
            merge_debug_into(function, survivor, &debug);
        }

        for child in children.get(&id).cloned().unwrap_or_default() {
            walk(function, child, children, available, replacements);
        }

        for canonical in added {
            available.remove(&canonical);
        }
    }
}

fn merge_debug_into(function: &mut Function, dest: TempId, debug: &bug_ir::DebugContext) {
    for block in function.blocks.values_mut() {
        for instruction in &mut block.instructions {
            if instruction.dest == Some(dest) {
                instruction.debug = instruction.debug.merge(debug);
                return;
            }
        }
    }
}

/// Canonicalise an instruction for value numbering: commutative binary
/// operands sort by (kind, id/value) so `a + b` and `b + a` collide.
fn canonicalise(kind: &InstructionKind) -> InstructionKind {
    let mut canonical = kind.clone();
    if let InstructionKind::BinaryOp { op, lhs, rhs } = &mut canonical {
        if op.is_commutative() && value_sort_key(lhs) > value_sort_key(rhs) {
            std::mem::swap(lhs, rhs);
        }
    }
    canonical
}

/// An ordering key over values: temps first by id, then constant words,
/// then anything else.
fn value_sort_key(value: &Value) -> (u8, alloy_primitives::U256) {
    match value {
        Value::Temp(temp, _) => (0, alloy_primitives::U256::from(temp.0)),
        Value::Const(constant) => match constant.as_word() {
            Some(word) => (1, word),
            None => (2, alloy_primitives::U256::ZERO),
        },
        Value::Local(..) => (3, alloy_primitives::U256::ZERO),
    }
}

fn resolve(map: &Replacements, mut temp: TempId) -> TempId {
    while let Some(&next) = map.get(&temp) {
        temp = next;
    }
    temp
}

fn apply_to_kind(kind: &mut InstructionKind, map: &Replacements) {
    if map.is_empty() {
        return;
    }
    kind.for_each_operand_mut(|value| {
        if let Value::Temp(temp, _) = value {
            *temp = resolve(map, *temp);
        }
    });
}

/// Rewrite every use in the function through the replacement map; merged
/// temps may be referenced from phis and terminators in other blocks.
fn apply_replacements(function: &mut Function, map: &Replacements) {
    if map.is_empty() {
        return;
    }

    for block in function.blocks.values_mut() {
        for phi in &mut block.phis {
            for source in phi.sources.values_mut() {
                if let Value::Temp(temp, _) = source {
                    *temp = resolve(map, *temp);
                }
            }
        }
        for instruction in &mut block.instructions {
            apply_to_kind(&mut instruction.kind, map);
        }
        block.terminator.for_each_operand_mut(|value| {
            if let Value::Temp(temp, _) = value {
                *temp = resolve(map, *temp);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use bug_ir::{BinOp, DataLocation, InstructionKind};

    use crate::optimise::tests::optimised;

    fn count_binary(module: &bug_ir::Module, op: BinOp) -> usize {
        module
            .main
            .blocks
            .values()
            .flat_map(|block| &block.instructions)
            .filter(|i| matches!(&i.kind, InstructionKind::BinaryOp { op: o, .. } if *o == op))
            .count()
    }

    #[test]
    fn repeated_addition_merges_within_a_block() {
        // `x + y` is computed twice from storage reads; at level 2 the two
        // additions merge to one, leaving one ADD for x+y plus the final one.
        let (module, _) = optimised(
            "name C; storage { [0] x: uint256; [1] y: uint256; [2] z: uint256; } code { \
                let a = x + y; \
                let b = x + y; \
                z = a + b; \
             }",
            2,
        );
        assert_eq!(count_binary(&module, BinOp::Add), 2);
    }

    #[test]
    fn level_one_keeps_duplicates() {
        let (module, _) = optimised(
            "name K; storage { [0] x: uint256; [1] y: uint256; [2] z: uint256; } code { \
                let a = x + y; \
                let b = x + y; \
                z = a + b; \
             }",
            1,
        );
        assert_eq!(count_binary(&module, BinOp::Add), 3);
    }

    #[test]
    fn commutative_operands_canonicalise() {
        let (module, _) = optimised(
            "name O; storage { [0] x: uint256; [1] y: uint256; [2] z: uint256; } code { \
                let a = x + y; \
                let b = y + x; \
                z = a + b; \
             }",
            2,
        );
        // `x + y` and `y + x` hash identically.
        assert_eq!(count_binary(&module, BinOp::Add), 2);
    }

    #[test]
    fn reads_do_not_merge_across_writes() {
        let (module, _) = optimised(
            "name R; storage { [0] x: uint256; [1] a: uint256; [2] b: uint256; } code { \
                a = x; \
                x = 9; \
                b = x; \
             }",
            2,
        );

        // The second load of `x` observes the store and must stay.
        let reads = module
            .main
            .blocks
            .values()
            .flat_map(|block| &block.instructions)
            .filter(|i| {
                matches!(&i.kind, InstructionKind::Read { location: DataLocation::Storage, .. })
            })
            .count();
        assert_eq!(reads, 2);
    }

    #[test]
    fn repeated_reads_merge_when_nothing_intervenes() {
        let (module, _) = optimised(
            "name M; storage { [0] x: uint256; [1] a: uint256; [2] b: uint256; } code { \
                let first = x; \
                let second = x; \
                a = first; \
                b = second; \
             }",
            2,
        );
        let reads = module
            .main
            .blocks
            .values()
            .flat_map(|block| &block.instructions)
            .filter(|i| {
                matches!(&i.kind, InstructionKind::Read { location: DataLocation::Storage, .. })
            })
            .count();
        assert_eq!(reads, 1);
    }

    #[test]
    fn cross_block_merge_at_level_three() {
        // The addition in the branch arm recomputes `a + b` over the same
        // SSA temps as the entry block; the entry dominates the arm, so
        // level 3 merges the two. Level 2 (block-local only) keeps both.
        let source = "name G; storage { [0] x: uint256; [1] y: uint256; [2] z: uint256; } code { \
                let a = x; \
                let b = y; \
                let s = a + b; \
                if (s > 1) { z = a + b; } \
             }";

        let (module, _) = optimised(source, 3);
        assert_eq!(count_binary(&module, BinOp::Add), 1);

        let (unmerged, _) = optimised(source, 2);
        assert_eq!(count_binary(&unmerged, BinOp::Add), 2);
    }

    #[test]
    fn merged_instruction_debug_becomes_a_pick() {
        let (module, _) = optimised(
            "name P; storage { [0] x: uint256; [1] y: uint256; [2] z: uint256; } code { \
                let a = x + y; \
                let b = x + y; \
                z = a + b; \
             }",
            2,
        );

        // The surviving addition carries both source contexts.
        let survivor = module
            .main
            .blocks
            .values()
            .flat_map(|block| &block.instructions)
            .find(|i| matches!(&i.kind, InstructionKind::BinaryOp { op: BinOp::Add, .. }))
            .expect("one add survives");
        assert!(survivor.debug.is_pick());
    }
}
