//! Control-flow graph traversal orders.

use indexmap::IndexSet;

use crate::ir::{BlockId, Function};

/// Depth-first postorder over the blocks reachable from the entry.
pub fn postorder(function: &Function) -> Vec<BlockId> {
    let mut order = vec![];
    let mut visited = IndexSet::new();
    visit(function, function.entry, &mut visited, &mut order);
    order
}

fn visit(
    function: &Function,
    block: BlockId,
    visited: &mut IndexSet<BlockId>,
    order: &mut Vec<BlockId>,
) {
    if !visited.insert(block) {
        return;
    }

    for successor in function.block(block).terminator.successors() {
        visit(function, successor, visited, order);
    }
    order.push(block);
}

/// Reverse postorder: a topological-like order in which every block is
/// visited before its successors on forward edges. The entry comes first.
pub fn reverse_postorder(function: &Function) -> Vec<BlockId> {
    let mut order = postorder(function);
    order.reverse();
    order
}

/// Block ids unreachable from the entry.
pub fn unreachable_blocks(function: &Function) -> Vec<BlockId> {
    let reachable: IndexSet<BlockId> = postorder(function).into_iter().collect();
    function.blocks.keys().copied().filter(|id| !reachable.contains(id)).collect()
}

#[cfg(test)]
mod tests {
    use bug_types::Ty;
    use indexmap::{IndexMap, IndexSet};

    use super::*;
    use crate::{
        debug::DebugContext,
        ir::{Block, Function, Terminator, TerminatorKind, Value},
    };

    fn block(id: u32, terminator: TerminatorKind) -> Block {
        Block {
            id: BlockId::from_raw(id),
            phis: vec![],
            instructions: vec![],
            predecessors: IndexSet::new(),
            terminator: Terminator::new(terminator, DebugContext::none()),
            debug: DebugContext::none(),
        }
    }

    /// A diamond: 0 -> {1, 2} -> 3.
    fn diamond() -> Function {
        let mut blocks = IndexMap::new();
        blocks.insert(
            BlockId::from_raw(0),
            block(
                0,
                TerminatorKind::Branch {
                    condition: Value::zero(),
                    then_target: BlockId::from_raw(1),
                    else_target: BlockId::from_raw(2),
                },
            ),
        );
        blocks
            .insert(BlockId::from_raw(1), block(1, TerminatorKind::Jump { target: BlockId::from_raw(3) }));
        blocks
            .insert(BlockId::from_raw(2), block(2, TerminatorKind::Jump { target: BlockId::from_raw(3) }));
        blocks.insert(BlockId::from_raw(3), block(3, TerminatorKind::Return { value: None }));

        let mut function = Function {
            name: "diamond".to_string(),
            params: vec![],
            returns: Ty::void(),
            entry: BlockId::from_raw(0),
            blocks,
            temp_count: 0,
        };
        function.recompute_predecessors();
        function
    }

    #[test]
    fn reverse_postorder_starts_at_entry() {
        let function = diamond();
        let order = reverse_postorder(&function);

        assert_eq!(order.len(), 4);
        assert_eq!(order[0], BlockId::from_raw(0));
        // The join block comes after both arms.
        let join_pos = order.iter().position(|id| *id == BlockId::from_raw(3)).unwrap();
        assert_eq!(join_pos, 3);
    }

    #[test]
    fn unreachable_blocks_found() {
        let mut function = diamond();
        function
            .blocks
            .insert(BlockId::from_raw(9), block(9, TerminatorKind::Return { value: None }));
        assert_eq!(unreachable_blocks(&function), vec![BlockId::from_raw(9)]);
    }
}
