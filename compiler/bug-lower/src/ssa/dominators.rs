//! Dominator tree and dominance frontier computation, using the
//! Cooper–Harvey–Kennedy iterative intersection scheme over reverse
//! postorder.

use std::collections::HashMap;

use bug_ir::{traversal, BlockId, Function};
use indexmap::{IndexMap, IndexSet};

/// The immediate-dominator relation of a function's CFG. The entry block is
/// its own idom.
pub struct Dominators {
    idom: HashMap<BlockId, BlockId>,
    /// Position of each block in reverse postorder; used both by the
    /// intersection walk and to order tree children deterministically.
    rpo_index: HashMap<BlockId, usize>,
    rpo: Vec<BlockId>,
}

impl Dominators {
    pub fn compute(function: &Function) -> Self {
        let rpo = traversal::reverse_postorder(function);
        let rpo_index: HashMap<BlockId, usize> =
            rpo.iter().enumerate().map(|(index, block)| (*block, index)).collect();

        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        idom.insert(function.entry, function.entry);

        let mut changed = true;
        while changed {
            changed = false;

            for &block in rpo.iter().skip(1) {
                // Pick any predecessor whose idom is already known, then
                // intersect with every other known predecessor.
                let preds = &function.block(block).predecessors;
                let mut new_idom = None;

                for &pred in preds {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &rpo_index, pred, current),
                    });
                }

                let Some(new_idom) = new_idom else { continue };
                if idom.get(&block) != Some(&new_idom) {
                    idom.insert(block, new_idom);
                    changed = true;
                }
            }
        }

        Self { idom, rpo_index, rpo }
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied()
    }

    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    /// Whether `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            let Some(parent) = self.idom(current) else { return false };
            if parent == current {
                return false;
            }
            current = parent;
        }
    }

    /// The dominator-tree children of every block, ordered by reverse
    /// postorder so tree walks are deterministic.
    pub fn children(&self) -> IndexMap<BlockId, Vec<BlockId>> {
        let mut children: IndexMap<BlockId, Vec<BlockId>> = IndexMap::new();
        for &block in &self.rpo {
            let Some(parent) = self.idom(block) else { continue };
            if parent != block {
                children.entry(parent).or_default().push(block);
            }
        }
        children
    }

    /// The dominance frontier of every block: for every join block `Y`
    /// (two or more predecessors), a runner walks up from each predecessor
    /// via idom, adding `Y` to the frontier of every block visited, and
    /// stops at `idom(Y)`.
    pub fn dominance_frontier(&self, function: &Function) -> IndexMap<BlockId, IndexSet<BlockId>> {
        let mut frontier: IndexMap<BlockId, IndexSet<BlockId>> = IndexMap::new();

        for &block in &self.rpo {
            let preds = &function.block(block).predecessors;
            if preds.len() < 2 {
                continue;
            }
            let Some(idom_block) = self.idom(block) else { continue };

            for &pred in preds {
                let mut runner = pred;
                while runner != idom_block {
                    frontier.entry(runner).or_default().insert(block);
                    let Some(next) = self.idom(runner) else { break };
                    if next == runner {
                        break;
                    }
                    runner = next;
                }
            }
        }

        frontier
    }
}

fn intersect(
    idom: &HashMap<BlockId, BlockId>,
    rpo_index: &HashMap<BlockId, usize>,
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[&a];
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[&b];
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use bug_ir::{Block, DebugContext, Terminator, TerminatorKind, Value};
    use bug_types::Ty;
    use indexmap::IndexMap;

    use super::*;

    fn raw(id: u32) -> BlockId {
        BlockId::from_raw(id)
    }

    fn block(id: u32, terminator: TerminatorKind) -> Block {
        Block {
            id: raw(id),
            phis: vec![],
            instructions: vec![],
            predecessors: Default::default(),
            terminator: Terminator::new(terminator, DebugContext::none()),
            debug: DebugContext::none(),
        }
    }

    fn function_of(blocks: Vec<Block>) -> Function {
        let entry = blocks[0].id;
        let mut map = IndexMap::new();
        for block in blocks {
            map.insert(block.id, block);
        }
        let mut function = Function {
            name: "test".to_string(),
            params: vec![],
            returns: Ty::void(),
            entry,
            blocks: map,
            temp_count: 0,
        };
        function.recompute_predecessors();
        function
    }

    fn branch(t: u32, e: u32) -> TerminatorKind {
        TerminatorKind::Branch {
            condition: Value::zero(),
            then_target: raw(t),
            else_target: raw(e),
        }
    }

    /// Diamond: 0 -> {1,2} -> 3.
    fn diamond() -> Function {
        function_of(vec![
            block(0, branch(1, 2)),
            block(1, TerminatorKind::Jump { target: raw(3) }),
            block(2, TerminatorKind::Jump { target: raw(3) }),
            block(3, TerminatorKind::Return { value: None }),
        ])
    }

    /// Loop: 0 -> 1(header) -> {2(body), 3(exit)}, 2 -> 1.
    fn looped() -> Function {
        function_of(vec![
            block(0, TerminatorKind::Jump { target: raw(1) }),
            block(1, branch(2, 3)),
            block(2, TerminatorKind::Jump { target: raw(1) }),
            block(3, TerminatorKind::Return { value: None }),
        ])
    }

    #[test]
    fn diamond_idoms() {
        let function = diamond();
        let dominators = Dominators::compute(&function);

        assert_eq!(dominators.idom(raw(0)), Some(raw(0)));
        assert_eq!(dominators.idom(raw(1)), Some(raw(0)));
        assert_eq!(dominators.idom(raw(2)), Some(raw(0)));
        // The join is dominated by the fork, not by either arm.
        assert_eq!(dominators.idom(raw(3)), Some(raw(0)));
        assert!(dominators.dominates(raw(0), raw(3)));
        assert!(!dominators.dominates(raw(1), raw(3)));
    }

    #[test]
    fn diamond_frontier() {
        let function = diamond();
        let dominators = Dominators::compute(&function);
        let frontier = dominators.dominance_frontier(&function);

        // Each arm has the join in its frontier; the fork does not (it
        // dominates the join).
        assert!(frontier[&raw(1)].contains(&raw(3)));
        assert!(frontier[&raw(2)].contains(&raw(3)));
        assert!(frontier.get(&raw(0)).is_none());
    }

    #[test]
    fn loop_frontier_contains_header() {
        let function = looped();
        let dominators = Dominators::compute(&function);
        let frontier = dominators.dominance_frontier(&function);

        assert_eq!(dominators.idom(raw(1)), Some(raw(0)));
        assert_eq!(dominators.idom(raw(2)), Some(raw(1)));
        // The back edge puts the header in its own frontier and in the
        // body's frontier.
        assert!(frontier[&raw(2)].contains(&raw(1)));
        assert!(frontier[&raw(1)].contains(&raw(1)));
    }

    #[test]
    fn children_are_deterministic() {
        let function = diamond();
        let dominators = Dominators::compute(&function);
        let children = dominators.children();
        assert_eq!(children[&raw(0)], vec![raw(1), raw(2), raw(3)]);
    }
}
