//! Instruction linearization and liveness intervals.
//!
//! The linearization is a total order compatible with dominance: blocks
//! in reverse post-order, instructions in sibling order within a block.
//! Every instruction gets an interval `[def, last_use]` in that order;
//! the interval of a phi output reaches back to the terminators of the
//! predecessor blocks, and every phi link value stays live up to its
//! predecessor's terminator.

use super::cfg::Predecessors;
use super::dominator::DominatorTree;
use crate::code::Code;
use crate::error::{IrError, IrResult};
use crate::id::InstrRef;
use rustc_hash::FxHashMap;

#[derive(Debug)]
pub struct Linearization {
    order: Vec<InstrRef>,
    positions: FxHashMap<InstrRef, usize>,
}

impl Linearization {
    pub fn compute(code: &Code, dom: &DominatorTree) -> IrResult<Self> {
        let mut order = Vec::new();
        for block in dom.reverse_post_order() {
            for instr in code.block_instr_iter(*block)? {
                order.push(instr);
            }
        }
        let positions = order.iter().enumerate().map(|(i, r)| (*r, i)).collect();
        Ok(Self { order, positions })
    }

    pub fn order(&self) -> &[InstrRef] {
        &self.order
    }

    pub fn position_of(&self, instr: InstrRef) -> IrResult<usize> {
        self.positions
            .get(&instr)
            .copied()
            .ok_or(IrError::InvalidInstructionRef(instr))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessInterval {
    pub begin: usize,
    pub end: usize,
}

impl LivenessInterval {
    pub fn covers(&self, position: usize) -> bool {
        self.begin <= position && position <= self.end
    }

    pub fn overlaps(&self, other: &LivenessInterval) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }
}

#[derive(Debug)]
pub struct Liveness {
    pub linearization: Linearization,
    intervals: FxHashMap<InstrRef, LivenessInterval>,
}

impl Liveness {
    pub fn compute(code: &Code, dom: &DominatorTree, preds: &Predecessors) -> IrResult<Self> {
        let linearization = Linearization::compute(code, dom)?;
        let mut intervals: FxHashMap<InstrRef, LivenessInterval> = linearization
            .order()
            .iter()
            .enumerate()
            .map(|(pos, r)| {
                (
                    *r,
                    LivenessInterval {
                        begin: pos,
                        end: pos,
                    },
                )
            })
            .collect();

        let extend = |intervals: &mut FxHashMap<InstrRef, LivenessInterval>,
                      instr: InstrRef,
                      position: usize| {
            if let Some(interval) = intervals.get_mut(&instr) {
                interval.end = interval.end.max(position);
                interval.begin = interval.begin.min(position);
            }
        };

        // Plain uses keep operands alive up to the user's position.
        for (position, instr) in linearization.order().iter().enumerate() {
            for input in code.instruction_input_refs(*instr)? {
                extend(&mut intervals, input, position);
            }
        }

        // Phi values flow across block edges: the link value stays live
        // through its predecessor's terminator, and the phi output is
        // live from those terminators onwards.
        for block in dom.reverse_post_order() {
            for phi in code.block_phi_iter(*block)? {
                let node = code.phi(phi)?;
                let output = node.output();
                for (pred, value) in node.links() {
                    if !preds.is_predecessor(*block, pred) || !dom.is_reachable(pred) {
                        continue;
                    }
                    let terminator = code
                        .block_terminator(pred)?
                        .ok_or(IrError::InvariantViolation("block has no terminator"))?;
                    let term_position = linearization.position_of(terminator)?;
                    extend(&mut intervals, value, term_position);
                    extend(&mut intervals, output, term_position);
                }
            }
        }

        Ok(Self {
            linearization,
            intervals,
        })
    }

    pub fn interval_of(&self, instr: InstrRef) -> IrResult<LivenessInterval> {
        self.intervals
            .get(&instr)
            .copied()
            .ok_or(IrError::InvalidInstructionRef(instr))
    }
}
