//! Instruction operations.
//!
//! The original representation of an operation is a tagged record whose
//! parameters form a large discriminated union; here the whole thing is a
//! single closed sum type with the parameters stored inline in each
//! variant. Dispatch is a `match` on the variant; there is no open
//! extension point. Concrete opcodes are front-end defined; the classes
//! below cover constants, integer and floating arithmetic, width
//! conversions, comparisons, memory accesses, control flow and the
//! structural pseudo-operations.

use crate::id::{AsmRef, BlockId, CallRef, FuncId, InstrRef, PhiRef, StringId, SymbolId, TypeId};

/// Operand width for integer arithmetic, loads and stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpWidth {
    W8,
    W16,
    W32,
    W64,
}

impl OpWidth {
    pub fn bits(self) -> u32 {
        match self {
            OpWidth::W8 => 8,
            OpWidth::W16 => 16,
            OpWidth::W32 => 32,
            OpWidth::W64 => 64,
        }
    }
}

/// Source width of a sign/zero extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtWidth {
    W8,
    W16,
    W32,
}

impl ExtWidth {
    pub fn bits(self) -> u32 {
        match self {
            ExtWidth::W8 => 8,
            ExtWidth::W16 => 16,
            ExtWidth::W32 => 32,
        }
    }
}

/// Target width of a truncation. `W1` is the boolean truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TruncWidth {
    W1,
    W8,
    W16,
    W32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    F32,
    F64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntUnaryOp {
    Neg,
    Not,
    BoolNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Udiv,
    Umod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    BoolAnd,
    BoolOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatUnaryOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Integer comparison kinds. `Above`/`Below` are the unsigned orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntComparisonKind {
    Equals,
    NotEquals,
    Greater,
    GreaterOrEquals,
    Lesser,
    LesserOrEquals,
    Above,
    AboveOrEquals,
    Below,
    BelowOrEquals,
}

impl IntComparisonKind {
    pub fn inverse(self) -> Self {
        use IntComparisonKind::*;
        match self {
            Equals => NotEquals,
            NotEquals => Equals,
            Greater => LesserOrEquals,
            LesserOrEquals => Greater,
            GreaterOrEquals => Lesser,
            Lesser => GreaterOrEquals,
            Above => BelowOrEquals,
            BelowOrEquals => Above,
            AboveOrEquals => Below,
            Below => AboveOrEquals,
        }
    }
}

/// Floating-point comparison kinds. The negated kinds are distinct from
/// the reversed orderings: with NaN operands `NotGreater` is not the same
/// predicate as `LesserOrEqual`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatComparisonKind {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Lesser,
    LesserOrEqual,
    NotGreater,
    NotGreaterOrEqual,
    NotLesser,
    NotLesserOrEqual,
}

impl FloatComparisonKind {
    pub fn inverse(self) -> Self {
        use FloatComparisonKind::*;
        match self {
            Equal => NotEqual,
            NotEqual => Equal,
            Greater => NotGreater,
            NotGreater => Greater,
            GreaterOrEqual => NotGreaterOrEqual,
            NotGreaterOrEqual => GreaterOrEqual,
            Lesser => NotLesser,
            NotLesser => Lesser,
            LesserOrEqual => NotLesserOrEqual,
            NotLesserOrEqual => LesserOrEqual,
        }
    }
}

/// A comparison operation: integer comparisons carry their operand width,
/// floating comparisons their operand format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Int {
        width: OpWidth,
        kind: IntComparisonKind,
    },
    Float32(FloatComparisonKind),
    Float64(FloatComparisonKind),
}

impl Comparison {
    /// The comparison matching the negation of `self`. Total involution:
    /// `c.inverse().inverse() == c` for every comparison.
    pub fn inverse(self) -> Self {
        match self {
            Comparison::Int { width, kind } => Comparison::Int {
                width,
                kind: kind.inverse(),
            },
            Comparison::Float32(kind) => Comparison::Float32(kind.inverse()),
            Comparison::Float64(kind) => Comparison::Float64(kind.inverse()),
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(self, Comparison::Int { .. })
    }
}

/// Condition interpretation of a conditional branch: the width at which
/// the condition value is tested, optionally negated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchCondVariant {
    Bit8,
    NegatedBit8,
    Bit16,
    NegatedBit16,
    Bit32,
    NegatedBit32,
    Bit64,
    NegatedBit64,
}

impl BranchCondVariant {
    pub fn is_direct(self) -> bool {
        matches!(
            self,
            BranchCondVariant::Bit8
                | BranchCondVariant::Bit16
                | BranchCondVariant::Bit32
                | BranchCondVariant::Bit64
        )
    }

    pub fn is_negated(self) -> bool {
        !self.is_direct()
    }

    pub fn width(self) -> OpWidth {
        match self {
            BranchCondVariant::Bit8 | BranchCondVariant::NegatedBit8 => OpWidth::W8,
            BranchCondVariant::Bit16 | BranchCondVariant::NegatedBit16 => OpWidth::W16,
            BranchCondVariant::Bit32 | BranchCondVariant::NegatedBit32 => OpWidth::W32,
            BranchCondVariant::Bit64 | BranchCondVariant::NegatedBit64 => OpWidth::W64,
        }
    }
}

/// Load extension behavior of a sub-word typed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadExtension {
    #[default]
    None,
    Sign,
    Zero,
}

/// Flags of a typed memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryFlags {
    pub load_extension: LoadExtension,
    pub volatile: bool,
}

impl MemoryFlags {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn volatile() -> Self {
        Self {
            load_extension: LoadExtension::None,
            volatile: true,
        }
    }
}

/// Atomic memory ordering. Only sequential consistency is modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOrder {
    SeqCst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverflowOp {
    Add,
    Sub,
    Mul,
}

/// The operation of a single instruction: opcode and parameters fused into
/// one closed sum type.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    // Constants.
    IntConst(i64),
    UintConst(u64),
    Float32Const(f32),
    Float64Const(f64),
    LongDoubleConst(f64),
    StringRef(StringId),
    BlockAddress(BlockId),

    // Integer and floating arithmetic.
    IntUnary {
        op: IntUnaryOp,
        width: OpWidth,
        arg: InstrRef,
    },
    IntBinary {
        op: IntBinaryOp,
        width: OpWidth,
        args: [InstrRef; 2],
    },
    FloatUnary {
        op: FloatUnaryOp,
        width: FloatWidth,
        arg: InstrRef,
    },
    FloatBinary {
        op: FloatBinaryOp,
        width: FloatWidth,
        args: [InstrRef; 2],
    },
    IntSignExtend {
        from: ExtWidth,
        arg: InstrRef,
    },
    IntZeroExtend {
        from: ExtWidth,
        arg: InstrRef,
    },
    IntTruncate {
        to: TruncWidth,
        arg: InstrRef,
    },
    Compare {
        comparison: Comparison,
        args: [InstrRef; 2],
    },

    // Memory.
    Load {
        width: OpWidth,
        flags: MemoryFlags,
        location: InstrRef,
    },
    Store {
        width: OpWidth,
        flags: MemoryFlags,
        location: InstrRef,
        value: InstrRef,
    },
    AtomicLoad {
        width: OpWidth,
        model: MemoryOrder,
        location: InstrRef,
    },
    AtomicStore {
        width: OpWidth,
        model: MemoryOrder,
        location: InstrRef,
        value: InstrRef,
    },
    AllocLocal {
        type_id: TypeId,
        type_index: usize,
    },
    GetLocal {
        index: usize,
        offset: i64,
    },
    GetGlobal {
        symbol: SymbolId,
        offset: i64,
    },
    GetThreadLocal {
        symbol: SymbolId,
        offset: i64,
    },
    StackAlloc {
        size: InstrRef,
        alignment: InstrRef,
        within_scope: bool,
    },

    // Control flow.
    Jump {
        target: BlockId,
    },
    Branch {
        variant: BranchCondVariant,
        condition: InstrRef,
        target: BlockId,
        alternative: BlockId,
    },
    BranchCompare {
        comparison: Comparison,
        args: [InstrRef; 2],
        target: BlockId,
        alternative: BlockId,
    },
    IndirectJump {
        target: InstrRef,
    },
    Call {
        call: CallRef,
        indirect_target: Option<InstrRef>,
    },
    TailCall {
        call: CallRef,
        indirect_target: Option<InstrRef>,
    },
    Return {
        value: Option<InstrRef>,
    },
    InlineAsm {
        asm: AsmRef,
    },

    // Structural.
    Phi {
        phi: PhiRef,
    },
    GetArgument {
        index: usize,
    },
    ScopePush,
    ScopePop {
        scope: InstrRef,
    },
    VarargStart {
        target: InstrRef,
    },
    VarargEnd {
        target: InstrRef,
    },
    VarargCopy {
        destination: InstrRef,
        source: InstrRef,
    },
    VarargGet {
        source: InstrRef,
        type_id: TypeId,
        type_index: usize,
    },
    OverflowArith {
        op: OverflowOp,
        signedness: u8,
        args: [InstrRef; 2],
        result_ptr: InstrRef,
    },
}

impl Operation {
    /// Stable mnemonic, used by the JSON debug dump.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Operation::IntConst(_) => "int_const",
            Operation::UintConst(_) => "uint_const",
            Operation::Float32Const(_) => "float32_const",
            Operation::Float64Const(_) => "float64_const",
            Operation::LongDoubleConst(_) => "long_double_const",
            Operation::StringRef(_) => "string_ref",
            Operation::BlockAddress(_) => "block_address",
            Operation::IntUnary { .. } => "int_unary",
            Operation::IntBinary { .. } => "int_binary",
            Operation::FloatUnary { .. } => "float_unary",
            Operation::FloatBinary { .. } => "float_binary",
            Operation::IntSignExtend { .. } => "int_sign_extend",
            Operation::IntZeroExtend { .. } => "int_zero_extend",
            Operation::IntTruncate { .. } => "int_truncate",
            Operation::Compare { .. } => "compare",
            Operation::Load { .. } => "load",
            Operation::Store { .. } => "store",
            Operation::AtomicLoad { .. } => "atomic_load",
            Operation::AtomicStore { .. } => "atomic_store",
            Operation::AllocLocal { .. } => "alloc_local",
            Operation::GetLocal { .. } => "get_local",
            Operation::GetGlobal { .. } => "get_global",
            Operation::GetThreadLocal { .. } => "get_thread_local",
            Operation::StackAlloc { .. } => "stack_alloc",
            Operation::Jump { .. } => "jump",
            Operation::Branch { .. } => "branch",
            Operation::BranchCompare { .. } => "branch_compare",
            Operation::IndirectJump { .. } => "indirect_jump",
            Operation::Call { .. } => "invoke",
            Operation::TailCall { .. } => "tail_invoke",
            Operation::Return { .. } => "return",
            Operation::InlineAsm { .. } => "inline_assembly",
            Operation::Phi { .. } => "phi",
            Operation::GetArgument { .. } => "get_argument",
            Operation::ScopePush => "scope_push",
            Operation::ScopePop { .. } => "scope_pop",
            Operation::VarargStart { .. } => "vararg_start",
            Operation::VarargEnd { .. } => "vararg_end",
            Operation::VarargCopy { .. } => "vararg_copy",
            Operation::VarargGet { .. } => "vararg_get",
            Operation::OverflowArith { .. } => "overflow_arith",
        }
    }

    /// Visits every instruction reference in the parameters. Call
    /// arguments, inline assembly parameters and phi links live in their
    /// dedicated nodes and are not visited here; the container accounts
    /// for those separately.
    pub fn for_each_ref(&self, mut f: impl FnMut(InstrRef)) {
        match *self {
            Operation::IntConst(_)
            | Operation::UintConst(_)
            | Operation::Float32Const(_)
            | Operation::Float64Const(_)
            | Operation::LongDoubleConst(_)
            | Operation::StringRef(_)
            | Operation::BlockAddress(_)
            | Operation::AllocLocal { .. }
            | Operation::GetLocal { .. }
            | Operation::GetGlobal { .. }
            | Operation::GetThreadLocal { .. }
            | Operation::Jump { .. }
            | Operation::Phi { .. }
            | Operation::GetArgument { .. }
            | Operation::ScopePush
            | Operation::InlineAsm { .. } => {}
            Operation::IntUnary { arg, .. }
            | Operation::FloatUnary { arg, .. }
            | Operation::IntSignExtend { arg, .. }
            | Operation::IntZeroExtend { arg, .. }
            | Operation::IntTruncate { arg, .. } => f(arg),
            Operation::IntBinary { args, .. }
            | Operation::FloatBinary { args, .. }
            | Operation::Compare { args, .. } => {
                f(args[0]);
                f(args[1]);
            }
            Operation::Load { location, .. } | Operation::AtomicLoad { location, .. } => {
                f(location)
            }
            Operation::Store {
                location, value, ..
            }
            | Operation::AtomicStore {
                location, value, ..
            } => {
                f(location);
                f(value);
            }
            Operation::StackAlloc {
                size, alignment, ..
            } => {
                f(size);
                f(alignment);
            }
            Operation::Branch { condition, .. } => f(condition),
            Operation::BranchCompare { args, .. } => {
                f(args[0]);
                f(args[1]);
            }
            Operation::IndirectJump { target } => f(target),
            Operation::Call {
                indirect_target, ..
            }
            | Operation::TailCall {
                indirect_target, ..
            } => {
                if let Some(target) = indirect_target {
                    f(target);
                }
            }
            Operation::Return { value } => {
                if let Some(value) = value {
                    f(value);
                }
            }
            Operation::ScopePop { scope } => f(scope),
            Operation::VarargStart { target } | Operation::VarargEnd { target } => f(target),
            Operation::VarargCopy {
                destination,
                source,
            } => {
                f(destination);
                f(source);
            }
            Operation::VarargGet { source, .. } => f(source),
            Operation::OverflowArith {
                args, result_ptr, ..
            } => {
                f(args[0]);
                f(args[1]);
                f(result_ptr);
            }
        }
    }

    /// Rewrites every parameter reference equal to `from` into `to`.
    pub fn replace_refs(&mut self, from: InstrRef, to: InstrRef) {
        let subst = |r: &mut InstrRef| {
            if *r == from {
                *r = to;
            }
        };
        match self {
            Operation::IntConst(_)
            | Operation::UintConst(_)
            | Operation::Float32Const(_)
            | Operation::Float64Const(_)
            | Operation::LongDoubleConst(_)
            | Operation::StringRef(_)
            | Operation::BlockAddress(_)
            | Operation::AllocLocal { .. }
            | Operation::GetLocal { .. }
            | Operation::GetGlobal { .. }
            | Operation::GetThreadLocal { .. }
            | Operation::Jump { .. }
            | Operation::Phi { .. }
            | Operation::GetArgument { .. }
            | Operation::ScopePush
            | Operation::InlineAsm { .. } => {}
            Operation::IntUnary { arg, .. }
            | Operation::FloatUnary { arg, .. }
            | Operation::IntSignExtend { arg, .. }
            | Operation::IntZeroExtend { arg, .. }
            | Operation::IntTruncate { arg, .. } => subst(arg),
            Operation::IntBinary { args, .. }
            | Operation::FloatBinary { args, .. }
            | Operation::Compare { args, .. }
            | Operation::BranchCompare { args, .. } => {
                subst(&mut args[0]);
                subst(&mut args[1]);
            }
            Operation::Load { location, .. } | Operation::AtomicLoad { location, .. } => {
                subst(location)
            }
            Operation::Store {
                location, value, ..
            }
            | Operation::AtomicStore {
                location, value, ..
            } => {
                subst(location);
                subst(value);
            }
            Operation::StackAlloc {
                size, alignment, ..
            } => {
                subst(size);
                subst(alignment);
            }
            Operation::Branch { condition, .. } => subst(condition),
            Operation::IndirectJump { target } => subst(target),
            Operation::Call {
                indirect_target, ..
            }
            | Operation::TailCall {
                indirect_target, ..
            } => {
                if let Some(target) = indirect_target {
                    subst(target);
                }
            }
            Operation::Return { value } => {
                if let Some(value) = value {
                    subst(value);
                }
            }
            Operation::ScopePop { scope } => subst(scope),
            Operation::VarargStart { target } | Operation::VarargEnd { target } => subst(target),
            Operation::VarargCopy {
                destination,
                source,
            } => {
                subst(destination);
                subst(source);
            }
            Operation::VarargGet { source, .. } => subst(source),
            Operation::OverflowArith {
                args, result_ptr, ..
            } => {
                subst(&mut args[0]);
                subst(&mut args[1]);
                subst(result_ptr);
            }
        }
    }

    /// Whether the operation terminates a basic block. Inline assembly
    /// only terminates when its site carries jump targets, which the
    /// container decides; here it is reported as non-terminating.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Operation::Jump { .. }
                | Operation::Branch { .. }
                | Operation::BranchCompare { .. }
                | Operation::IndirectJump { .. }
                | Operation::TailCall { .. }
                | Operation::Return { .. }
        )
    }

    /// Whether the operation must be threaded onto the control flow list
    /// of its block: terminators, memory effects and calls.
    pub fn has_observable_effects(&self) -> bool {
        self.is_terminator()
            || matches!(
                self,
                Operation::Load { .. }
                    | Operation::Store { .. }
                    | Operation::AtomicLoad { .. }
                    | Operation::AtomicStore { .. }
                    | Operation::AllocLocal { .. }
                    | Operation::StackAlloc { .. }
                    | Operation::Call { .. }
                    | Operation::InlineAsm { .. }
                    | Operation::ScopePush
                    | Operation::ScopePop { .. }
                    | Operation::VarargStart { .. }
                    | Operation::VarargEnd { .. }
                    | Operation::VarargCopy { .. }
                    | Operation::VarargGet { .. }
                    | Operation::OverflowArith { .. }
            )
    }

    /// Whether the operation computes a value purely from its operands,
    /// with no memory or control effects. Pure operations are eligible
    /// for value numbering and unconstrained dead code removal.
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            Operation::IntConst(_)
                | Operation::UintConst(_)
                | Operation::Float32Const(_)
                | Operation::Float64Const(_)
                | Operation::LongDoubleConst(_)
                | Operation::StringRef(_)
                | Operation::BlockAddress(_)
                | Operation::IntUnary { .. }
                | Operation::IntBinary { .. }
                | Operation::FloatUnary { .. }
                | Operation::FloatBinary { .. }
                | Operation::IntSignExtend { .. }
                | Operation::IntZeroExtend { .. }
                | Operation::IntTruncate { .. }
                | Operation::Compare { .. }
                | Operation::GetLocal { .. }
                | Operation::GetGlobal { .. }
                | Operation::GetThreadLocal { .. }
                | Operation::GetArgument { .. }
        )
    }

    /// Structural fingerprint used by value numbering and phi uniformity
    /// checks. Floats are keyed by bit pattern, so two NaN constants with
    /// identical bits compare equal while `0.0` and `-0.0` do not.
    pub fn fingerprint(&self) -> (&'static str, Vec<u64>) {
        let mut payload = Vec::new();
        {
            let p = &mut payload;
            match *self {
                Operation::IntConst(v) => p.push(v as u64),
                Operation::UintConst(v) => p.push(v),
                Operation::Float32Const(v) => p.push(v.to_bits() as u64),
                Operation::Float64Const(v) | Operation::LongDoubleConst(v) => p.push(v.to_bits()),
                Operation::StringRef(id) => p.push(id.into()),
                Operation::BlockAddress(id) => p.push(id.into()),
                Operation::IntUnary { op, width, arg } => {
                    p.push(op as u64);
                    p.push(width as u64);
                    p.push(arg.into());
                }
                Operation::IntBinary { op, width, args } => {
                    p.push(op as u64);
                    p.push(width as u64);
                    p.push(args[0].into());
                    p.push(args[1].into());
                }
                Operation::FloatUnary { op, width, arg } => {
                    p.push(op as u64);
                    p.push(width as u64);
                    p.push(arg.into());
                }
                Operation::FloatBinary { op, width, args } => {
                    p.push(op as u64);
                    p.push(width as u64);
                    p.push(args[0].into());
                    p.push(args[1].into());
                }
                Operation::IntSignExtend { from, arg } | Operation::IntZeroExtend { from, arg } => {
                    p.push(from as u64);
                    p.push(arg.into());
                }
                Operation::IntTruncate { to, arg } => {
                    p.push(to as u64);
                    p.push(arg.into());
                }
                Operation::Compare { comparison, args } => {
                    push_comparison(p, comparison);
                    p.push(args[0].into());
                    p.push(args[1].into());
                }
                Operation::GetLocal { index, offset } => {
                    p.push(index as u64);
                    p.push(offset as u64);
                }
                Operation::GetGlobal { symbol, offset }
                | Operation::GetThreadLocal { symbol, offset } => {
                    p.push(symbol.into());
                    p.push(offset as u64);
                }
                Operation::GetArgument { index } => p.push(index as u64),
                // Impure operations have no meaningful fingerprint; the
                // mnemonic alone keeps the result well defined.
                _ => {}
            }
        }
        (self.mnemonic(), payload)
    }
}

fn push_comparison(payload: &mut Vec<u64>, comparison: Comparison) {
    match comparison {
        Comparison::Int { width, kind } => {
            payload.push(0);
            payload.push(width as u64);
            payload.push(kind as u64);
        }
        Comparison::Float32(kind) => {
            payload.push(1);
            payload.push(kind as u64);
        }
        Comparison::Float64(kind) => {
            payload.push(2);
            payload.push(kind as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_inverse_is_an_involution() {
        let int_kinds = [
            IntComparisonKind::Equals,
            IntComparisonKind::NotEquals,
            IntComparisonKind::Greater,
            IntComparisonKind::GreaterOrEquals,
            IntComparisonKind::Lesser,
            IntComparisonKind::LesserOrEquals,
            IntComparisonKind::Above,
            IntComparisonKind::AboveOrEquals,
            IntComparisonKind::Below,
            IntComparisonKind::BelowOrEquals,
        ];
        for kind in int_kinds {
            for width in [OpWidth::W8, OpWidth::W16, OpWidth::W32, OpWidth::W64] {
                let cmp = Comparison::Int { width, kind };
                assert_eq!(cmp.inverse().inverse(), cmp);
                assert_ne!(cmp.inverse(), cmp);
            }
        }
        let float_kinds = [
            FloatComparisonKind::Equal,
            FloatComparisonKind::NotEqual,
            FloatComparisonKind::Greater,
            FloatComparisonKind::GreaterOrEqual,
            FloatComparisonKind::Lesser,
            FloatComparisonKind::LesserOrEqual,
            FloatComparisonKind::NotGreater,
            FloatComparisonKind::NotGreaterOrEqual,
            FloatComparisonKind::NotLesser,
            FloatComparisonKind::NotLesserOrEqual,
        ];
        for kind in float_kinds {
            for cmp in [Comparison::Float32(kind), Comparison::Float64(kind)] {
                assert_eq!(cmp.inverse().inverse(), cmp);
                assert_ne!(cmp.inverse(), cmp);
            }
        }
    }

    #[test]
    fn ref_traversal_covers_every_operand() {
        let op = Operation::OverflowArith {
            op: OverflowOp::Add,
            signedness: 0b01,
            args: [InstrRef::new(1), InstrRef::new(2)],
            result_ptr: InstrRef::new(3),
        };
        let mut seen = Vec::new();
        op.for_each_ref(|r| seen.push(r.raw()));
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn replace_refs_rewrites_all_matches() {
        let mut op = Operation::IntBinary {
            op: IntBinaryOp::Add,
            width: OpWidth::W32,
            args: [InstrRef::new(4), InstrRef::new(4)],
        };
        op.replace_refs(InstrRef::new(4), InstrRef::new(9));
        let mut seen = Vec::new();
        op.for_each_ref(|r| seen.push(r.raw()));
        assert_eq!(seen, vec![9, 9]);
    }

    #[test]
    fn float_fingerprints_use_bit_patterns() {
        let nan = f32::NAN;
        let a = Operation::Float32Const(nan);
        let b = Operation::Float32Const(nan);
        assert_eq!(a.fingerprint(), b.fingerprint());
        let pos = Operation::Float64Const(0.0);
        let neg = Operation::Float64Const(-0.0);
        assert_ne!(pos.fingerprint(), neg.fingerprint());
    }

    #[test]
    fn negated_branch_variants() {
        assert!(BranchCondVariant::Bit32.is_direct());
        assert!(BranchCondVariant::NegatedBit32.is_negated());
        assert_eq!(BranchCondVariant::NegatedBit8.width(), OpWidth::W8);
    }
}
