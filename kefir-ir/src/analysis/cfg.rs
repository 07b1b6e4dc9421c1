//! Control flow structure: successor derivation and predecessor sets.

use crate::code::Code;
use crate::error::{IrError, IrResult};
use crate::id::BlockId;
use crate::operation::Operation;
use std::collections::{BTreeMap, BTreeSet};

/// Successor blocks of `block`, derived lazily from its terminator.
/// Inline assembly terminators contribute their default jump target
/// followed by the labeled targets; returns, tail calls and indirect
/// jumps have no static successors.
pub fn block_successors(code: &Code, block: BlockId) -> IrResult<Vec<BlockId>> {
    let terminator = code
        .block_terminator(block)?
        .ok_or(IrError::InvariantViolation("block has no terminator"))?;
    let mut successors = Vec::new();
    match *code.instr(terminator)?.operation() {
        Operation::Jump { target } => successors.push(target),
        Operation::Branch {
            target,
            alternative,
            ..
        }
        | Operation::BranchCompare {
            target,
            alternative,
            ..
        } => {
            successors.push(target);
            successors.push(alternative);
        }
        Operation::InlineAsm { asm } => {
            let node = code.inline_assembly(asm)?;
            if node.has_jump_targets() {
                if let Some(default) = node.default_jump_target() {
                    successors.push(default);
                }
                for (_label, target) in node.jump_targets() {
                    successors.push(target);
                }
            }
        }
        Operation::Return { .. } | Operation::TailCall { .. } | Operation::IndirectJump { .. } => {}
        ref op => {
            debug_assert!(!op.is_terminator(), "unhandled terminator {op:?}");
        }
    }
    Ok(successors)
}

/// Reverse post-order of the blocks reachable from the entry point.
pub fn reverse_post_order(code: &Code) -> IrResult<Vec<BlockId>> {
    let entry = code
        .entry_point()
        .ok_or(IrError::InvalidArgument("code container has no entry point"))?;
    let mut postorder = Vec::new();
    let mut visited = BTreeSet::new();
    // Iterative DFS; the second stack element tracks whether the node's
    // successors were already expanded.
    let mut stack = vec![(entry, false)];
    while let Some((block, expanded)) = stack.pop() {
        if expanded {
            postorder.push(block);
            continue;
        }
        if !visited.insert(block) {
            continue;
        }
        stack.push((block, true));
        let successors = block_successors(code, block)?;
        for succ in successors.into_iter().rev() {
            if !visited.contains(&succ) {
                stack.push((succ, false));
            }
        }
    }
    postorder.reverse();
    Ok(postorder)
}

/// Predecessor sets of every block, including inline assembly jump
/// targets. Blocks without incoming edges map to an empty set.
#[derive(Debug, Default)]
pub struct Predecessors {
    preds: BTreeMap<BlockId, BTreeSet<BlockId>>,
}

impl Predecessors {
    pub fn compute(code: &Code) -> IrResult<Self> {
        let mut preds: BTreeMap<BlockId, BTreeSet<BlockId>> = BTreeMap::new();
        for block in code.block_ids() {
            preds.entry(block).or_default();
        }
        for block in code.block_ids() {
            for succ in block_successors(code, block)? {
                preds.entry(succ).or_default().insert(block);
            }
        }
        Ok(Self { preds })
    }

    pub fn of(&self, block: BlockId) -> IrResult<&BTreeSet<BlockId>> {
        self.preds
            .get(&block)
            .ok_or(IrError::InvalidBlock(block))
    }

    pub fn is_predecessor(&self, block: BlockId, pred: BlockId) -> bool {
        self.preds
            .get(&block)
            .map(|set| set.contains(&pred))
            .unwrap_or(false)
    }
}
