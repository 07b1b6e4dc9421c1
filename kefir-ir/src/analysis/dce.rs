//! Dead code index.
//!
//! Liveness here is structural: a block is alive when it is reachable
//! from the entry point; an instruction is alive when it is a
//! side-effecting root of a reachable block or is transitively required
//! by one. Phi outputs only require link values flowing in from alive
//! predecessors. The result implements the container's removal oracle.

use super::cfg::{block_successors, Predecessors};
use crate::code::{Code, DeadCodeIndex};
use crate::error::{IrError, IrResult};
use crate::id::{BlockId, InstrRef};
use crate::operation::Operation;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug)]
pub struct DeadCodeAnalysis {
    alive_blocks: BTreeSet<BlockId>,
    alive_instrs: BTreeSet<InstrRef>,
    preds: BTreeMap<BlockId, BTreeSet<BlockId>>,
}

/// Whether the instruction anchors liveness by itself: terminators and
/// operations with memory or external effects. Non-volatile loads and
/// local allocations sit on the control flow list but are collectible
/// when nothing consumes them.
fn is_root(code: &Code, instr: InstrRef) -> IrResult<bool> {
    let operation = code.instr(instr)?.operation();
    Ok(match *operation {
        Operation::Load { flags, .. } => flags.volatile,
        Operation::AllocLocal { .. } => false,
        Operation::Store { .. }
        | Operation::AtomicLoad { .. }
        | Operation::AtomicStore { .. }
        | Operation::StackAlloc { .. }
        | Operation::Call { .. }
        | Operation::InlineAsm { .. }
        | Operation::ScopePush
        | Operation::ScopePop { .. }
        | Operation::VarargStart { .. }
        | Operation::VarargEnd { .. }
        | Operation::VarargCopy { .. }
        | Operation::VarargGet { .. }
        | Operation::OverflowArith { .. } => true,
        ref op => op.is_terminator(),
    })
}

impl DeadCodeAnalysis {
    pub fn compute(code: &Code) -> IrResult<Self> {
        let entry = code
            .entry_point()
            .ok_or(IrError::InvalidArgument("code container has no entry point"))?;

        // Block reachability.
        let mut alive_blocks = BTreeSet::new();
        let mut queue = VecDeque::from([entry]);
        while let Some(block) = queue.pop_front() {
            if !alive_blocks.insert(block) {
                continue;
            }
            for succ in block_successors(code, block)? {
                if !alive_blocks.contains(&succ) {
                    queue.push_back(succ);
                }
            }
        }

        // Predecessors restricted to alive blocks.
        let all_preds = Predecessors::compute(code)?;
        let mut preds: BTreeMap<BlockId, BTreeSet<BlockId>> = BTreeMap::new();
        for block in &alive_blocks {
            let alive_preds = all_preds
                .of(*block)?
                .iter()
                .copied()
                .filter(|p| alive_blocks.contains(p))
                .collect();
            preds.insert(*block, alive_preds);
        }

        // Transitive requirement closure from side-effecting roots.
        let mut alive_instrs = BTreeSet::new();
        let mut worklist = VecDeque::new();
        for block in &alive_blocks {
            for instr in code.block_control_iter(*block)? {
                if is_root(code, instr)? {
                    worklist.push_back(instr);
                }
            }
        }
        while let Some(instr) = worklist.pop_front() {
            if !alive_instrs.insert(instr) {
                continue;
            }
            match *code.instr(instr)?.operation() {
                Operation::Phi { phi } => {
                    let node = code.phi(phi)?;
                    let block = node.block_id();
                    for (pred, value) in node.links() {
                        let pred_alive = preds
                            .get(&block)
                            .map(|set| set.contains(&pred))
                            .unwrap_or(false);
                        if pred_alive && !alive_instrs.contains(&value) {
                            worklist.push_back(value);
                        }
                    }
                }
                _ => {
                    for input in code.instruction_input_refs(instr)? {
                        if !alive_instrs.contains(&input) {
                            worklist.push_back(input);
                        }
                    }
                }
            }
        }

        Ok(Self {
            alive_blocks,
            alive_instrs,
            preds,
        })
    }

    pub fn alive_block_count(&self) -> usize {
        self.alive_blocks.len()
    }

    pub fn alive_instr_count(&self) -> usize {
        self.alive_instrs.len()
    }
}

impl DeadCodeIndex for DeadCodeAnalysis {
    fn block_alive(&self, block: BlockId) -> bool {
        self.alive_blocks.contains(&block)
    }

    fn instr_alive(&self, instr: InstrRef) -> bool {
        self.alive_instrs.contains(&instr)
    }

    fn is_block_predecessor(&self, block: BlockId, pred: BlockId) -> bool {
        self.preds
            .get(&block)
            .map(|set| set.contains(&pred))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::InstructionBuilder;

    #[test]
    fn unreachable_block_and_unused_value_are_dead() {
        let mut code = Code::new();
        let entry = code.new_block(false);
        let orphan = code.new_block(false);
        code.set_entry_point(entry).unwrap();
        let mut b = InstructionBuilder::new(&mut code, entry);
        let used = b.int_const(1).unwrap();
        let unused = b.int_const(2).unwrap();
        b.ret(Some(used)).unwrap();
        b.at(orphan).ret(None).unwrap();

        let index = DeadCodeAnalysis::compute(&code).unwrap();
        assert!(index.block_alive(entry));
        assert!(!index.block_alive(orphan));
        assert!(index.instr_alive(used));
        assert!(!index.instr_alive(unused));
    }
}
