//! Memory-to-register promotion.
//!
//! Replaces stack-resident scalar locals whose address is never observed
//! with SSA values threaded through phi nodes. Three phases:
//!
//! - **scan** classifies every local allocation as a promotion candidate
//!   or as addressed, and records block predecessors from terminators;
//! - **pull** rewrites loads of candidates into the value last written in
//!   the block (creating a phi, or a zero constant in the entry block,
//!   when no prior write exists) and deletes the stores;
//! - **propagate** wires every created phi to the values flowing out of
//!   its predecessors, creating further phis upstream as needed.
//!
//! The whole function is refused, successfully and with no changes, when
//! any block is externally enterable or the function contains an
//! indirect jump, since both defeat the predecessor analysis.

use crate::code::Code;
use crate::error::{IrError, IrResult};
use crate::function::{Function, FunctionDebugInfo};
use crate::id::{BlockId, InstrRef, PhiRef};
use crate::irtype::TypeArena;
use crate::module::ModuleEnv;
use crate::operation::{ExtWidth, LoadExtension, OpWidth, Operation};
use crate::optimize::{Pass, PassDisposition};
use crate::pass_manager::OptimizerConfig;
use rustc_hash::FxHashSet;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub struct Mem2Reg;

impl Pass for Mem2Reg {
    fn name(&self) -> &'static str {
        "mem2reg"
    }

    fn apply(
        &self,
        env: &ModuleEnv<'_>,
        function: &mut Function,
        _config: &OptimizerConfig,
    ) -> IrResult<PassDisposition> {
        let entry = function
            .entry_block()
            .ok_or(IrError::InvalidArgument("function has no entry block"))?;
        let (code, debug) = function.code_and_debug_mut();
        let mut state = Mem2RegState {
            types: env.types,
            code,
            debug,
            entry,
            addressed: FxHashSet::default(),
            candidates: FxHashSet::default(),
            preds: BTreeMap::new(),
            regs: BTreeMap::new(),
            queue: VecDeque::new(),
            visited: FxHashSet::default(),
        };
        if let ScanOutcome::Refused = state.scan()? {
            tracing::debug!("mem2reg refused: control flow defeats predecessor analysis");
            return Ok(PassDisposition::Continue);
        }
        state.pull()?;
        state.propagate()?;
        tracing::debug!(promoted = state.regs.len(), "mem2reg finished");
        Ok(PassDisposition::Continue)
    }
}

enum ScanOutcome {
    Ready,
    Refused,
}

#[derive(Default)]
struct RegState {
    inputs: BTreeMap<BlockId, PhiRef>,
    outputs: BTreeMap<BlockId, InstrRef>,
}

struct Mem2RegState<'a> {
    types: &'a TypeArena,
    code: &'a mut Code,
    debug: &'a mut FunctionDebugInfo,
    entry: BlockId,
    addressed: FxHashSet<InstrRef>,
    candidates: FxHashSet<InstrRef>,
    preds: BTreeMap<BlockId, BTreeSet<BlockId>>,
    regs: BTreeMap<InstrRef, RegState>,
    queue: VecDeque<BlockId>,
    visited: FxHashSet<BlockId>,
}

impl Mem2RegState<'_> {
    /// Marks an instruction as exposing a local's address. Allocations
    /// become addressed and lose candidacy; phi outputs propagate the
    /// marking through their link values, with a visited set guarding
    /// against back edge cycles.
    fn mark_local_addressed(
        &mut self,
        visited: &mut FxHashSet<InstrRef>,
        instr: InstrRef,
    ) -> IrResult<()> {
        let operation = self.code.instr(instr)?.operation().clone();
        match operation {
            Operation::AllocLocal { .. } => {
                self.addressed.insert(instr);
                self.candidates.remove(&instr);
            }
            Operation::Phi { phi } => {
                let links: Vec<InstrRef> = self.code.phi(phi)?.links().map(|(_, v)| v).collect();
                for value in links {
                    if visited.contains(&value) {
                        continue;
                    }
                    visited.insert(instr);
                    self.mark_local_addressed(visited, value)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Marks every input of the instruction as addressed, including
    /// call arguments and inline assembly parameters.
    fn extract_local_inputs(&mut self, instr: InstrRef) -> IrResult<()> {
        for input in self.code.instruction_input_refs(instr)? {
            let mut visited = FxHashSet::default();
            self.mark_local_addressed(&mut visited, input)?;
        }
        Ok(())
    }

    /// Adds an allocation to the candidate set, provided its entry in
    /// the local layout type carries a scalar typecode.
    fn mark_scalar_candidate(&mut self, alloc: InstrRef) -> IrResult<()> {
        let Operation::AllocLocal {
            type_id,
            type_index,
        } = *self.code.instr(alloc)?.operation()
        else {
            return Err(IrError::InvariantViolation(
                "scalar candidate must be a local allocation",
            ));
        };
        let typecode = self.types.entry_at(type_id, type_index)?.typecode;
        if typecode.is_scalar() {
            self.candidates.insert(alloc);
        }
        Ok(())
    }

    fn add_predecessor(&mut self, source: BlockId, target: BlockId) {
        self.preds.entry(target).or_default().insert(source);
    }

    fn scan(&mut self) -> IrResult<ScanOutcome> {
        let blocks: Vec<BlockId> = self.code.block_ids().collect();
        for block in blocks {
            if self.code.block(block)?.is_public() {
                return Ok(ScanOutcome::Refused);
            }
            let mut cursor = self.code.block(block)?.instr_head();
            while let Some(instr) = cursor {
                cursor = self.code.next_sibling(instr)?;
                let operation = self.code.instr(instr)?.operation().clone();
                match operation {
                    Operation::Phi { .. } => {
                        let mut visited = FxHashSet::default();
                        self.mark_local_addressed(&mut visited, instr)?;
                    }
                    Operation::Load {
                        location, flags, ..
                    } => {
                        let addr_is_alloc = matches!(
                            self.code.instr(location)?.operation(),
                            Operation::AllocLocal { .. }
                        );
                        if !flags.volatile && addr_is_alloc && !self.addressed.contains(&location) {
                            self.mark_scalar_candidate(location)?;
                        } else {
                            let mut visited = FxHashSet::default();
                            self.mark_local_addressed(&mut visited, location)?;
                        }
                    }
                    Operation::Store {
                        location,
                        value,
                        flags,
                        ..
                    } => {
                        let addr_is_alloc = matches!(
                            self.code.instr(location)?.operation(),
                            Operation::AllocLocal { .. }
                        );
                        if !flags.volatile && addr_is_alloc && !self.addressed.contains(&location) {
                            self.mark_scalar_candidate(location)?;
                        } else if flags.volatile {
                            let mut visited = FxHashSet::default();
                            self.mark_local_addressed(&mut visited, location)?;
                        }
                        let mut visited = FxHashSet::default();
                        self.mark_local_addressed(&mut visited, value)?;
                    }
                    Operation::Jump { target } => {
                        self.add_predecessor(block, target);
                        self.extract_local_inputs(instr)?;
                    }
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
                        self.add_predecessor(block, target);
                        self.add_predecessor(block, alternative);
                        self.extract_local_inputs(instr)?;
                    }
                    Operation::InlineAsm { asm } => {
                        let node = self.code.inline_assembly(asm)?;
                        if node.has_jump_targets() {
                            let mut targets: Vec<BlockId> =
                                node.default_jump_target().into_iter().collect();
                            targets.extend(node.jump_targets().map(|(_, t)| t));
                            for target in targets {
                                self.add_predecessor(block, target);
                            }
                        }
                        self.extract_local_inputs(instr)?;
                    }
                    Operation::IndirectJump { .. } => return Ok(ScanOutcome::Refused),
                    _ => self.extract_local_inputs(instr)?,
                }
            }
        }
        Ok(ScanOutcome::Ready)
    }

    /// The value representing the candidate at the start of `block`,
    /// creating the block input phi (or entry zero constant) on first
    /// demand.
    fn block_value_for(&mut self, alloc: InstrRef, block: BlockId) -> IrResult<InstrRef> {
        let existing = self
            .regs
            .get(&alloc)
            .and_then(|reg| reg.outputs.get(&block).copied());
        if let Some(value) = existing {
            return Ok(value);
        }
        let value = if block != self.entry {
            let (phi, output) = self.code.new_phi(block)?;
            self.regs
                .entry(alloc)
                .or_default()
                .inputs
                .insert(block, phi);
            output
        } else {
            let typecode = self.alloc_typecode(alloc)?;
            self.code.new_instruction(block, typecode.zero_operation()?)?
        };
        self.regs
            .entry(alloc)
            .or_default()
            .outputs
            .insert(block, value);
        self.debug.add_local_variable_ref(alloc, value);
        Ok(value)
    }

    fn alloc_typecode(&self, alloc: InstrRef) -> IrResult<crate::irtype::Typecode> {
        let Operation::AllocLocal {
            type_id,
            type_index,
        } = *self.code.instr(alloc)?.operation()
        else {
            return Err(IrError::InvariantViolation(
                "promoted value must be a local allocation",
            ));
        };
        Ok(self.types.entry_at(type_id, type_index)?.typecode)
    }

    /// Replaces references and keeps the recorded block outputs in sync
    /// with the rewrite.
    fn replace_references(&mut self, from: InstrRef, to: InstrRef) -> IrResult<()> {
        self.code.replace_references(from, to)?;
        for reg in self.regs.values_mut() {
            for output in reg.outputs.values_mut() {
                if *output == from {
                    *output = to;
                }
            }
        }
        Ok(())
    }

    fn pull(&mut self) -> IrResult<()> {
        let blocks: Vec<BlockId> = self.code.block_ids().collect();
        for block in blocks {
            let mut cursor = self.code.block(block)?.instr_head();
            while let Some(instr) = cursor {
                let operation = self.code.instr(instr)?.operation().clone();
                match operation {
                    Operation::Load {
                        width,
                        flags,
                        location,
                    } if self.candidates.contains(&location) => {
                        let typecode = self.alloc_typecode(location)?;
                        self.debug.set_location_cursor(Some(instr));
                        let mut replacement = self.block_value_for(location, block)?;
                        if typecode.is_integral() {
                            replacement =
                                self.extend_loaded_value(block, width, flags.load_extension, replacement)?;
                        }
                        cursor = self.code.next_sibling(instr)?;
                        self.replace_references(instr, replacement)?;
                        self.code.drop_control(instr)?;
                        self.code.drop_instr(instr)?;
                        self.debug.set_location_cursor(None);
                    }
                    Operation::Store {
                        location, value, ..
                    } if self.candidates.contains(&location) => {
                        self.regs
                            .entry(location)
                            .or_default()
                            .outputs
                            .insert(block, value);
                        self.debug.add_local_variable_ref(location, value);
                        cursor = self.code.next_sibling(instr)?;
                        self.code.drop_control(instr)?;
                        self.code.drop_instr(instr)?;
                    }
                    _ => cursor = self.code.next_sibling(instr)?,
                }
            }
        }
        Ok(())
    }

    /// Sub-word loads re-materialize their extension on the promoted
    /// value.
    fn extend_loaded_value(
        &mut self,
        block: BlockId,
        width: OpWidth,
        extension: LoadExtension,
        value: InstrRef,
    ) -> IrResult<InstrRef> {
        let from = match width {
            OpWidth::W8 => ExtWidth::W8,
            OpWidth::W16 => ExtWidth::W16,
            OpWidth::W32 => ExtWidth::W32,
            OpWidth::W64 => return Ok(value),
        };
        match extension {
            LoadExtension::None => Ok(value),
            LoadExtension::Sign => self
                .code
                .new_instruction(block, Operation::IntSignExtend { from, arg: value }),
            LoadExtension::Zero => self
                .code
                .new_instruction(block, Operation::IntZeroExtend { from, arg: value }),
        }
    }

    fn propagate(&mut self) -> IrResult<()> {
        let allocs: Vec<InstrRef> = self.regs.keys().copied().collect();
        for alloc in allocs {
            self.queue.clear();
            self.visited.clear();
            if let Some(reg) = self.regs.get(&alloc) {
                self.queue.extend(reg.inputs.keys().copied());
            }
            while let Some(block) = self.queue.pop_front() {
                if !self.visited.insert(block) {
                    continue;
                }
                let Some(phi) = self
                    .regs
                    .get(&alloc)
                    .and_then(|reg| reg.inputs.get(&block).copied())
                else {
                    continue;
                };
                let Some(preds) = self.preds.get(&block).cloned() else {
                    continue;
                };
                for pred in preds {
                    self.link_blocks(alloc, phi, pred)?;
                }
            }
        }
        Ok(())
    }

    /// Resolves the value the candidate holds at the end of `pred` and
    /// attaches it to the phi, creating upstream phis (queued for their
    /// own linking) or the entry zero constant on demand.
    fn link_blocks(&mut self, alloc: InstrRef, phi: PhiRef, pred: BlockId) -> IrResult<()> {
        let existing = self
            .regs
            .get(&alloc)
            .and_then(|reg| reg.outputs.get(&pred).copied());
        let source = match existing {
            Some(value) => value,
            None => {
                let value = if pred != self.entry {
                    let (pred_phi, output) = self.code.new_phi(pred)?;
                    self.regs
                        .entry(alloc)
                        .or_default()
                        .inputs
                        .insert(pred, pred_phi);
                    self.queue.push_back(pred);
                    output
                } else {
                    let typecode = self.alloc_typecode(alloc)?;
                    self.code
                        .new_instruction(pred, typecode.zero_operation()?)?
                };
                self.regs
                    .entry(alloc)
                    .or_default()
                    .outputs
                    .insert(pred, value);
                value
            }
        };
        match self.code.phi_link_for(phi, pred) {
            Ok(existing) => {
                if existing != source {
                    return Err(IrError::InvariantViolation(
                        "conflicting value already attached to the phi link",
                    ));
                }
            }
            Err(IrError::NotFound(_)) => self.code.phi_attach(phi, pred, source)?,
            Err(err) => return Err(err),
        }
        Ok(())
    }
}
