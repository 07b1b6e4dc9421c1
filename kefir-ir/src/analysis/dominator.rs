//! Immediate dominator tree.
//!
//! Built with the classical iterative data-flow algorithm over reverse
//! post-order: every block's immediate dominator is the intersection of
//! its processed predecessors' dominators, iterated to a fixed point.
//! Only blocks reachable from the entry point participate.

use super::cfg::{reverse_post_order, Predecessors};
use crate::code::Code;
use crate::error::{IrError, IrResult};
use crate::id::BlockId;
use rustc_hash::FxHashMap;

#[derive(Debug)]
pub struct DominatorTree {
    rpo: Vec<BlockId>,
    rpo_index: FxHashMap<BlockId, usize>,
    idom: FxHashMap<BlockId, BlockId>,
    entry: BlockId,
}

impl DominatorTree {
    pub fn compute(code: &Code, preds: &Predecessors) -> IrResult<Self> {
        let rpo = reverse_post_order(code)?;
        let entry = *rpo
            .first()
            .ok_or(IrError::InvalidArgument("code container has no entry point"))?;
        let rpo_index: FxHashMap<BlockId, usize> =
            rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();

        let mut idom: FxHashMap<BlockId, BlockId> = FxHashMap::default();
        idom.insert(entry, entry);

        let intersect = |idom: &FxHashMap<BlockId, BlockId>, mut a: BlockId, mut b: BlockId| {
            while a != b {
                while rpo_index[&a] > rpo_index[&b] {
                    a = idom[&a];
                }
                while rpo_index[&b] > rpo_index[&a] {
                    b = idom[&b];
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for pred in preds.of(*block)? {
                    if !idom.contains_key(pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        Some(current) => intersect(&idom, current, *pred),
                        None => *pred,
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(block) != Some(&new_idom) {
                        idom.insert(*block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        Ok(Self {
            rpo,
            rpo_index,
            idom,
            entry,
        })
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Blocks in reverse post-order; the entry comes first.
    pub fn reverse_post_order(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn rpo_position(&self, block: BlockId) -> Option<usize> {
        self.rpo_index.get(&block).copied()
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_index.contains_key(&block)
    }

    /// The immediate dominator, or `None` for the entry block and for
    /// unreachable blocks.
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        if block == self.entry {
            return None;
        }
        self.idom.get(&block).copied()
    }

    /// Whether `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            if current == self.entry {
                return false;
            }
            match self.idom.get(&current) {
                Some(next) => current = *next,
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::InstructionBuilder;
    use crate::operation::BranchCondVariant;

    #[test]
    fn diamond_dominators() {
        let mut code = Code::new();
        let entry = code.new_block(false);
        let then_block = code.new_block(false);
        let else_block = code.new_block(false);
        let join = code.new_block(false);
        code.set_entry_point(entry).unwrap();
        let mut b = InstructionBuilder::new(&mut code, entry);
        let cond = b.int_const(0).unwrap();
        b.branch(BranchCondVariant::Bit64, cond, then_block, else_block)
            .unwrap();
        b.at(then_block).jump(join).unwrap();
        b.at(else_block).jump(join).unwrap();
        b.at(join).ret(None).unwrap();

        let preds = Predecessors::compute(&code).unwrap();
        let dom = DominatorTree::compute(&code, &preds).unwrap();
        assert_eq!(dom.immediate_dominator(join), Some(entry));
        assert_eq!(dom.immediate_dominator(then_block), Some(entry));
        assert!(dom.dominates(entry, join));
        assert!(!dom.dominates(then_block, join));
        assert!(dom.dominates(join, join));
    }

    #[test]
    fn loop_header_dominates_latch() {
        let mut code = Code::new();
        let entry = code.new_block(false);
        let header = code.new_block(false);
        let latch = code.new_block(false);
        let exit = code.new_block(false);
        code.set_entry_point(entry).unwrap();
        let mut b = InstructionBuilder::new(&mut code, entry);
        b.jump(header).unwrap();
        let cond = b.at(header).int_const(1).unwrap();
        b.branch(BranchCondVariant::Bit8, cond, latch, exit).unwrap();
        b.at(latch).jump(header).unwrap();
        b.at(exit).ret(None).unwrap();

        let preds = Predecessors::compute(&code).unwrap();
        let dom = DominatorTree::compute(&code, &preds).unwrap();
        assert_eq!(dom.immediate_dominator(header), Some(entry));
        assert_eq!(dom.immediate_dominator(latch), Some(header));
        assert_eq!(dom.immediate_dominator(exit), Some(header));
        assert!(dom.dominates(header, latch));
    }
}
