//! Backward liveness over pre-SSA local variables. Used to prune phi
//! insertion: a phi is only placed where the variable is actually live on
//! entry.

use bug_ir::{DataLocation, Function, InstructionKind, Value};
use indexmap::{IndexMap, IndexSet};

pub struct Liveness {
    live_in: IndexMap<bug_ir::BlockId, IndexSet<String>>,
}

impl Liveness {
    /// Compute per-block live-in sets to a fixed point:
    /// `live_out(b) = ⋃ live_in(succ)`,
    /// `live_in(b) = uses(b) ∪ (live_out(b) − defs(b))`.
    pub fn compute(function: &Function) -> Self {
        // Per-block upward-exposed uses and definitions.
        let mut uses: IndexMap<bug_ir::BlockId, IndexSet<String>> = IndexMap::new();
        let mut defs: IndexMap<bug_ir::BlockId, IndexSet<String>> = IndexMap::new();

        for block in function.blocks.values() {
            let block_uses = uses.entry(block.id).or_default();
            let mut block_defs = IndexSet::new();

            let mut record_use = |value: &Value, block_defs: &IndexSet<String>,
                                  block_uses: &mut IndexSet<String>| {
                if let Value::Local(name, _) = value {
                    if !block_defs.contains(name) {
                        block_uses.insert(name.clone());
                    }
                }
            };

            for instruction in &block.instructions {
                // Operands are read before the instruction's own effect, so
                // a write's value can expose the same variable upwards.
                instruction
                    .kind
                    .for_each_operand(|value| record_use(value, &block_defs, block_uses));

                if let InstructionKind::Write {
                    location: DataLocation::Local,
                    name: Some(name),
                    ..
                } = &instruction.kind
                {
                    block_defs.insert(name.clone());
                }
            }

            block
                .terminator
                .for_each_operand(|value| record_use(value, &block_defs, block_uses));

            defs.insert(block.id, block_defs);
        }

        // Backward dataflow to a fixed point.
        let mut live_in: IndexMap<bug_ir::BlockId, IndexSet<String>> =
            function.blocks.keys().map(|id| (*id, IndexSet::new())).collect();

        let mut changed = true;
        while changed {
            changed = false;

            for block in function.blocks.values() {
                let mut live_out: IndexSet<String> = IndexSet::new();
                for successor in block.terminator.successors() {
                    if let Some(successor_in) = live_in.get(&successor) {
                        live_out.extend(successor_in.iter().cloned());
                    }
                }

                let block_defs = &defs[&block.id];
                let mut new_in: IndexSet<String> = uses[&block.id].clone();
                new_in.extend(
                    live_out.into_iter().filter(|name| !block_defs.contains(name)),
                );

                if new_in != live_in[&block.id] {
                    live_in.insert(block.id, new_in);
                    changed = true;
                }
            }
        }

        Self { live_in }
    }

    pub fn live_in(&self, block: bug_ir::BlockId, name: &str) -> bool {
        self.live_in.get(&block).map(|set| set.contains(name)).unwrap_or(false)
    }
}
