//! Sample backend consumer: a System-V AMD64 register allocator.
//!
//! Demonstrates how a code generator consumes the analyses and the IR:
//! an interference graph is built incrementally while walking the
//! liveness linearization, then linear scan assigns registers guided by
//! non-binding hints. ABI register hints come from returns and argument
//! preassignment; alias hints come from phi coalescing and two-address
//! integer arithmetic, propagated backward so defining instructions land
//! where later uses want them. Exhausted classes spill into a
//! demand-grown spill area.
//!
//! Inline assembly is not supported by this allocator and is reported as
//! such before any allocation state is built.

use crate::analysis::{AnalysisCache, DominatorTree, Liveness, Predecessors};
use crate::code::Code;
use crate::error::{IrError, IrResult};
use crate::function::Function;
use crate::id::InstrRef;
use crate::irtype::Typecode;
use crate::module::ModuleEnv;
use crate::operation::Operation;
use itertools::Itertools;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Amd64Register {
    Rax,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    Rbx,
    R12,
    R13,
    R14,
    R15,
    Xmm0,
    Xmm1,
    Xmm2,
    Xmm3,
    Xmm4,
    Xmm5,
    Xmm6,
    Xmm7,
    Xmm8,
    Xmm9,
    Xmm10,
    Xmm11,
    Xmm12,
    Xmm13,
    Xmm14,
    Xmm15,
}

/// General-purpose allocation order: caller-saved first, then
/// callee-saved. RSP and RBP are reserved for the stack discipline.
pub const GENERAL_PURPOSE_REGISTERS: [Amd64Register; 14] = [
    Amd64Register::Rax,
    Amd64Register::Rcx,
    Amd64Register::Rdx,
    Amd64Register::Rsi,
    Amd64Register::Rdi,
    Amd64Register::R8,
    Amd64Register::R9,
    Amd64Register::R10,
    Amd64Register::R11,
    Amd64Register::Rbx,
    Amd64Register::R12,
    Amd64Register::R13,
    Amd64Register::R14,
    Amd64Register::R15,
];

pub const FLOATING_POINT_REGISTERS: [Amd64Register; 16] = [
    Amd64Register::Xmm0,
    Amd64Register::Xmm1,
    Amd64Register::Xmm2,
    Amd64Register::Xmm3,
    Amd64Register::Xmm4,
    Amd64Register::Xmm5,
    Amd64Register::Xmm6,
    Amd64Register::Xmm7,
    Amd64Register::Xmm8,
    Amd64Register::Xmm9,
    Amd64Register::Xmm10,
    Amd64Register::Xmm11,
    Amd64Register::Xmm12,
    Amd64Register::Xmm13,
    Amd64Register::Xmm14,
    Amd64Register::Xmm15,
];

const INTEGER_ARGUMENT_REGISTERS: [Amd64Register; 6] = [
    Amd64Register::Rdi,
    Amd64Register::Rsi,
    Amd64Register::Rdx,
    Amd64Register::Rcx,
    Amd64Register::R8,
    Amd64Register::R9,
];

const FLOAT_ARGUMENT_REGISTERS: [Amd64Register; 8] = [
    Amd64Register::Xmm0,
    Amd64Register::Xmm1,
    Amd64Register::Xmm2,
    Amd64Register::Xmm3,
    Amd64Register::Xmm4,
    Amd64Register::Xmm5,
    Amd64Register::Xmm6,
    Amd64Register::Xmm7,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    GeneralPurpose,
    FloatingPoint,
    /// The instruction produces no allocatable value.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    None,
    Register(Amd64Register),
    SpillSlot(usize),
    /// Argument passed on the caller's stack, at the given offset from
    /// the frame base.
    StackArgument { offset: i64 },
}

#[derive(Debug)]
pub struct RegisterAllocation {
    pub class: RegisterClass,
    pub result: Allocation,
    register_hint: Option<Amd64Register>,
    alias_hint: Option<InstrRef>,
}

impl RegisterAllocation {
    fn new(class: RegisterClass) -> Self {
        Self {
            class,
            result: Allocation::None,
            register_hint: None,
            alias_hint: None,
        }
    }

    pub fn register_hint(&self) -> Option<Amd64Register> {
        self.register_hint
    }

    pub fn alias_hint(&self) -> Option<InstrRef> {
        self.alias_hint
    }
}

#[derive(Debug)]
pub struct RegisterAllocator {
    allocations: FxHashMap<InstrRef, RegisterAllocation>,
    interference: BTreeMap<InstrRef, BTreeSet<InstrRef>>,
    spill_area_size: usize,
}

impl RegisterAllocator {
    pub fn allocation_of(&self, instr: InstrRef) -> IrResult<&RegisterAllocation> {
        self.allocations
            .get(&instr)
            .ok_or(IrError::InvalidInstructionRef(instr))
    }

    pub fn interference_of(&self, instr: InstrRef) -> Option<&BTreeSet<InstrRef>> {
        self.interference.get(&instr)
    }

    pub fn spill_area_size(&self) -> usize {
        self.spill_area_size
    }
}

/// The register class of the value an instruction produces.
fn classify(code: &Code, instr: InstrRef, argument_classes: &[RegisterClass]) -> IrResult<RegisterClass> {
    Ok(match *code.instr(instr)?.operation() {
        Operation::Float32Const(_)
        | Operation::Float64Const(_)
        | Operation::LongDoubleConst(_)
        | Operation::FloatUnary { .. }
        | Operation::FloatBinary { .. } => RegisterClass::FloatingPoint,
        Operation::Store { .. }
        | Operation::AtomicStore { .. }
        | Operation::Jump { .. }
        | Operation::Branch { .. }
        | Operation::BranchCompare { .. }
        | Operation::IndirectJump { .. }
        | Operation::Return { .. }
        | Operation::TailCall { .. }
        | Operation::ScopePop { .. }
        | Operation::VarargStart { .. }
        | Operation::VarargEnd { .. }
        | Operation::VarargCopy { .. } => RegisterClass::Skip,
        Operation::GetArgument { index } => argument_classes
            .get(index)
            .copied()
            .unwrap_or(RegisterClass::GeneralPurpose),
        Operation::Phi { phi } => {
            let mut class = RegisterClass::GeneralPurpose;
            for (_pred, value) in code.phi(phi)?.links() {
                match code.instr(value)?.operation() {
                    Operation::Phi { .. } => continue,
                    Operation::Float32Const(_)
                    | Operation::Float64Const(_)
                    | Operation::LongDoubleConst(_)
                    | Operation::FloatUnary { .. }
                    | Operation::FloatBinary { .. } => {
                        class = RegisterClass::FloatingPoint;
                        break;
                    }
                    _ => break,
                }
            }
            class
        }
        _ => RegisterClass::GeneralPurpose,
    })
}

fn typecode_class(typecode: Typecode) -> RegisterClass {
    match typecode {
        Typecode::Float32 | Typecode::Float64 => RegisterClass::FloatingPoint,
        _ => RegisterClass::GeneralPurpose,
    }
}

/// The System-V AMD64 pre-assignment of argument values: integer
/// arguments flow through RDI, RSI, RDX, RCX, R8, R9, floating
/// arguments through XMM0-7, the rest through the caller's stack.
fn argument_preallocations(argument_classes: &[RegisterClass]) -> Vec<Allocation> {
    let mut integer = 0usize;
    let mut float = 0usize;
    let mut stack_offset = 16i64;
    argument_classes
        .iter()
        .map(|class| match class {
            RegisterClass::FloatingPoint if float < FLOAT_ARGUMENT_REGISTERS.len() => {
                let reg = FLOAT_ARGUMENT_REGISTERS[float];
                float += 1;
                Allocation::Register(reg)
            }
            RegisterClass::FloatingPoint | RegisterClass::GeneralPurpose | RegisterClass::Skip => {
                if matches!(class, RegisterClass::GeneralPurpose)
                    && integer < INTEGER_ARGUMENT_REGISTERS.len()
                {
                    let reg = INTEGER_ARGUMENT_REGISTERS[integer];
                    integer += 1;
                    Allocation::Register(reg)
                } else {
                    let offset = stack_offset;
                    stack_offset += 8;
                    Allocation::StackArgument { offset }
                }
            }
        })
        .collect()
}

struct AllocatorState {
    allocations: FxHashMap<InstrRef, RegisterAllocation>,
    interference: BTreeMap<InstrRef, BTreeSet<InstrRef>>,
    gp_in_use: FxHashMap<Amd64Register, InstrRef>,
    fp_in_use: FxHashMap<Amd64Register, InstrRef>,
    spill_in_use: Vec<bool>,
    spill_area_size: usize,
}

impl AllocatorState {
    fn class_registers(class: RegisterClass) -> &'static [Amd64Register] {
        match class {
            RegisterClass::GeneralPurpose => &GENERAL_PURPOSE_REGISTERS,
            RegisterClass::FloatingPoint => &FLOATING_POINT_REGISTERS,
            RegisterClass::Skip => &[],
        }
    }

    fn in_use_map(&mut self, class: RegisterClass) -> &mut FxHashMap<Amd64Register, InstrRef> {
        match class {
            RegisterClass::FloatingPoint => &mut self.fp_in_use,
            _ => &mut self.gp_in_use,
        }
    }

    fn register_free(&self, class: RegisterClass, register: Amd64Register) -> bool {
        match class {
            RegisterClass::FloatingPoint => !self.fp_in_use.contains_key(&register),
            _ => !self.gp_in_use.contains_key(&register),
        }
    }

    fn occupy(&mut self, class: RegisterClass, register: Amd64Register, instr: InstrRef) {
        self.in_use_map(class).insert(register, instr);
    }

    fn release(&mut self, instr: InstrRef) {
        if let Some(allocation) = self.allocations.get(&instr) {
            match allocation.result {
                Allocation::Register(register) => {
                    let class = allocation.class;
                    let in_use = self.in_use_map(class);
                    if in_use.get(&register) == Some(&instr) {
                        in_use.remove(&register);
                    }
                }
                Allocation::SpillSlot(slot) => {
                    if let Some(in_use) = self.spill_in_use.get_mut(slot) {
                        *in_use = false;
                    }
                }
                _ => {}
            }
        }
    }

    fn take_spill_slot(&mut self) -> usize {
        match self.spill_in_use.iter().position(|used| !used) {
            Some(slot) => {
                self.spill_in_use[slot] = true;
                slot
            }
            None => {
                self.spill_in_use.push(true);
                self.spill_area_size = self.spill_area_size.max(self.spill_in_use.len());
                self.spill_in_use.len() - 1
            }
        }
    }
}

/// Runs allocation over one function, consuming the cached analyses.
pub fn allocate_registers(
    env: &ModuleEnv<'_>,
    function: &Function,
    cache: &mut AnalysisCache,
) -> IrResult<RegisterAllocator> {
    let code = function.code();
    for block in code.blocks() {
        if block.inline_asm_head().is_some() {
            return Err(IrError::NotImplemented(
                "inline assembly in the sample register allocator",
            ));
        }
    }

    // Argument classes derive from the declaration's parameter type.
    let declaration = env
        .declarations
        .get(&function.declaration_id())
        .ok_or(IrError::NotFound("function declaration"))?;
    let argument_classes: Vec<RegisterClass> = match declaration.parameters_type {
        Some(type_id) => env
            .types
            .get(type_id)?
            .entries
            .iter()
            .map(|entry| typecode_class(entry.typecode))
            .collect(),
        None => Vec::new(),
    };
    let liveness: &Liveness = cache.get_or_insert_with("liveness", || {
        let preds = Predecessors::compute(code)?;
        let dom = DominatorTree::compute(code, &preds)?;
        Liveness::compute(code, &dom, &preds)
    })?;

    let order: Vec<InstrRef> = liveness.linearization.order().to_vec();
    let mut state = AllocatorState {
        allocations: FxHashMap::default(),
        interference: BTreeMap::new(),
        gp_in_use: FxHashMap::default(),
        fp_in_use: FxHashMap::default(),
        spill_in_use: Vec::new(),
        spill_area_size: 0,
    };

    // Incremental interference graph: every newly defined value
    // conflicts with the same-class values live across its definition.
    let mut alive: Vec<InstrRef> = Vec::new();
    for (position, instr) in order.iter().enumerate() {
        alive.retain(|candidate| {
            liveness
                .interval_of(*candidate)
                .map(|interval| interval.end >= position)
                .unwrap_or(false)
        });
        let class = classify(code, *instr, &argument_classes)?;
        state
            .allocations
            .insert(*instr, RegisterAllocation::new(class));
        if class != RegisterClass::Skip {
            for other in &alive {
                let other_class = state
                    .allocations
                    .get(other)
                    .map(|a| a.class)
                    .unwrap_or(RegisterClass::Skip);
                if other_class == class {
                    state.interference.entry(*instr).or_default().insert(*other);
                    state.interference.entry(*other).or_default().insert(*instr);
                }
            }
            alive.push(*instr);
        }
    }

    insert_hints(code, &order, &mut state)?;
    propagate_hints(&order, &mut state);

    // ABI preassignment of arguments happens before the main scan.
    let preallocations = argument_preallocations(&argument_classes);
    for instr in &order {
        let Operation::GetArgument { index } = *code.instr(*instr)?.operation() else {
            continue;
        };
        let preallocation = preallocations.get(index).copied().ok_or(
            IrError::InvalidArgument("argument index outside the declared parameter list"),
        )?;
        let class = state
            .allocations
            .get(instr)
            .ok_or(IrError::InvalidInstructionRef(*instr))?
            .class;
        match preallocation {
            Allocation::Register(register) => {
                if !state.register_free(class, register) {
                    return Err(IrError::InvariantViolation(
                        "failed to preallocate function argument registers",
                    ));
                }
                state
                    .allocations
                    .get_mut(instr)
                    .ok_or(IrError::InvalidInstructionRef(*instr))?
                    .result = Allocation::Register(register);
                state.occupy(class, register, *instr);
            }
            preallocation => {
                state
                    .allocations
                    .get_mut(instr)
                    .ok_or(IrError::InvalidInstructionRef(*instr))?
                    .result = preallocation;
            }
        }
    }

    // Linear scan. The active list guarantees every value is released
    // exactly once, when its interval expires.
    let mut active: Vec<InstrRef> = Vec::new();
    for (position, instr) in order.iter().enumerate() {
        let mut index = 0;
        while index < active.len() {
            let candidate = active[index];
            let ended = liveness
                .interval_of(candidate)
                .map(|interval| interval.end < position)
                .unwrap_or(true);
            if ended {
                state.release(candidate);
                active.swap_remove(index);
            } else {
                index += 1;
            }
        }

        let allocation = state
            .allocations
            .get(instr)
            .ok_or(IrError::InvalidInstructionRef(*instr))?;
        if allocation.class == RegisterClass::Skip {
            continue;
        }
        if !matches!(allocation.result, Allocation::None) {
            active.push(*instr);
            continue;
        }
        let class = allocation.class;
        let register_hint = allocation.register_hint;
        let alias_hint = allocation.alias_hint;

        // Registers wanted by interfering values that are still waiting
        // for their own allocation.
        let conflict_hints: BTreeSet<Amd64Register> = state
            .interference
            .get(instr)
            .into_iter()
            .flatten()
            .filter_map(|other| state.allocations.get(other))
            .filter(|other| matches!(other.result, Allocation::None))
            .filter_map(|other| other.register_hint)
            .collect();

        let mut chosen: Option<Amd64Register> = None;
        if let Some(hint) = register_hint {
            if state.register_free(class, hint) {
                chosen = Some(hint);
            }
        }
        if chosen.is_none() {
            if let Some(alias) = alias_hint {
                if let Some(Allocation::Register(register)) =
                    state.allocations.get(&alias).map(|a| a.result)
                {
                    let same_class = state
                        .allocations
                        .get(&alias)
                        .map(|a| a.class == class)
                        .unwrap_or(false);
                    if same_class && state.register_free(class, register) {
                        chosen = Some(register);
                    }
                }
            }
        }
        if chosen.is_none() {
            chosen = AllocatorState::class_registers(class)
                .iter()
                .copied()
                .filter(|register| state.register_free(class, *register))
                .find_or_first(|register| !conflict_hints.contains(register));
        }
        match chosen {
            Some(register) => {
                state
                    .allocations
                    .get_mut(instr)
                    .ok_or(IrError::InvalidInstructionRef(*instr))?
                    .result = Allocation::Register(register);
                state.occupy(class, register, *instr);
            }
            None => {
                let slot = state.take_spill_slot();
                state
                    .allocations
                    .get_mut(instr)
                    .ok_or(IrError::InvalidInstructionRef(*instr))?
                    .result = Allocation::SpillSlot(slot);
            }
        }
        active.push(*instr);
    }

    tracing::debug!(
        values = state.allocations.len(),
        spill_slots = state.spill_area_size,
        "register allocation finished"
    );
    Ok(RegisterAllocator {
        allocations: state.allocations,
        interference: state.interference,
        spill_area_size: state.spill_area_size,
    })
}

/// ABI and coalescing hints:
/// - returned values want the return register of their class;
/// - phi outputs alias their first link value, and link values without
///   an alias of their own alias the output;
/// - two-address integer arithmetic aliases its first operand.
fn insert_hints(code: &Code, order: &[InstrRef], state: &mut AllocatorState) -> IrResult<()> {
    for instr in order {
        match *code.instr(*instr)?.operation() {
            Operation::Return { value: Some(value) } => {
                if let Some(allocation) = state.allocations.get_mut(&value) {
                    if allocation.register_hint.is_none() {
                        allocation.register_hint = match allocation.class {
                            RegisterClass::FloatingPoint => Some(Amd64Register::Xmm0),
                            RegisterClass::GeneralPurpose => Some(Amd64Register::Rax),
                            RegisterClass::Skip => None,
                        };
                    }
                }
            }
            Operation::Phi { phi } => {
                let links: Vec<InstrRef> =
                    code.phi(phi)?.links().map(|(_, value)| value).collect();
                let output = code.phi(phi)?.output();
                if let Some(first) = links.first().copied() {
                    if let Some(allocation) = state.allocations.get_mut(&output) {
                        if allocation.alias_hint.is_none() {
                            allocation.alias_hint = Some(first);
                        }
                    }
                }
                for link in links {
                    if let Some(allocation) = state.allocations.get_mut(&link) {
                        if allocation.alias_hint.is_none() {
                            allocation.alias_hint = Some(output);
                        }
                    }
                }
            }
            Operation::IntBinary { args, .. } => {
                if let Some(allocation) = state.allocations.get_mut(instr) {
                    if allocation.alias_hint.is_none() {
                        allocation.alias_hint = Some(args[0]);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Walks the linearization backward, copying register hints onto alias
/// targets so the defining instruction is allocated to satisfy the
/// later hint.
fn propagate_hints(order: &[InstrRef], state: &mut AllocatorState) {
    for instr in order.iter().rev() {
        let Some(allocation) = state.allocations.get(instr) else {
            continue;
        };
        let (Some(hint), Some(alias)) = (allocation.register_hint, allocation.alias_hint) else {
            continue;
        };
        let class = allocation.class;
        if let Some(alias_allocation) = state.allocations.get_mut(&alias) {
            if alias_allocation.register_hint.is_none() && alias_allocation.class == class {
                alias_allocation.register_hint = Some(hint);
            }
        }
    }
}
