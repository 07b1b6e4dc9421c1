//! Typed instruction constructors.
//!
//! The builder borrows a code container and a target block and exposes one
//! constructor per operation class. Constructors of operations with
//! observable effects (memory accesses, calls, control transfers) also
//! append the new instruction to the block's control flow list, so a
//! builder-produced block satisfies the container invariants as soon as a
//! terminator is emitted.

use crate::code::Code;
use crate::error::IrResult;
use crate::id::{
    AsmFragmentId, AsmRef, BlockId, CallRef, FuncId, InstrRef, PhiRef, StringId, SymbolId, TypeId,
};
use crate::operation::{
    BranchCondVariant, Comparison, ExtWidth, FloatBinaryOp, FloatUnaryOp, FloatWidth, IntBinaryOp,
    IntUnaryOp, MemoryFlags, MemoryOrder, OpWidth, Operation, OverflowOp, TruncWidth,
};

pub struct InstructionBuilder<'a> {
    code: &'a mut Code,
    block: BlockId,
}

impl<'a> InstructionBuilder<'a> {
    pub fn new(code: &'a mut Code, block: BlockId) -> Self {
        Self { code, block }
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Repositions the builder onto another block of the same container.
    pub fn at(&mut self, block: BlockId) -> &mut Self {
        self.block = block;
        self
    }

    fn emit(&mut self, operation: Operation) -> IrResult<InstrRef> {
        self.code.new_instruction(self.block, operation)
    }

    fn emit_control(&mut self, operation: Operation) -> IrResult<InstrRef> {
        let instr = self.code.new_instruction(self.block, operation)?;
        self.code.add_control(self.block, instr)?;
        Ok(instr)
    }

    // Constants.

    pub fn int_const(&mut self, value: i64) -> IrResult<InstrRef> {
        self.emit(Operation::IntConst(value))
    }

    pub fn uint_const(&mut self, value: u64) -> IrResult<InstrRef> {
        self.emit(Operation::UintConst(value))
    }

    pub fn float32_const(&mut self, value: f32) -> IrResult<InstrRef> {
        self.emit(Operation::Float32Const(value))
    }

    pub fn float64_const(&mut self, value: f64) -> IrResult<InstrRef> {
        self.emit(Operation::Float64Const(value))
    }

    pub fn long_double_const(&mut self, value: f64) -> IrResult<InstrRef> {
        self.emit(Operation::LongDoubleConst(value))
    }

    pub fn string_ref(&mut self, string: StringId) -> IrResult<InstrRef> {
        self.emit(Operation::StringRef(string))
    }

    pub fn block_address(&mut self, block: BlockId) -> IrResult<InstrRef> {
        self.emit(Operation::BlockAddress(block))
    }

    // Arithmetic.

    pub fn int_unary(&mut self, op: IntUnaryOp, width: OpWidth, arg: InstrRef) -> IrResult<InstrRef> {
        self.emit(Operation::IntUnary { op, width, arg })
    }

    pub fn int_binary(
        &mut self,
        op: IntBinaryOp,
        width: OpWidth,
        lhs: InstrRef,
        rhs: InstrRef,
    ) -> IrResult<InstrRef> {
        self.emit(Operation::IntBinary {
            op,
            width,
            args: [lhs, rhs],
        })
    }

    pub fn int_add(&mut self, width: OpWidth, lhs: InstrRef, rhs: InstrRef) -> IrResult<InstrRef> {
        self.int_binary(IntBinaryOp::Add, width, lhs, rhs)
    }

    pub fn float_unary(
        &mut self,
        op: FloatUnaryOp,
        width: FloatWidth,
        arg: InstrRef,
    ) -> IrResult<InstrRef> {
        self.emit(Operation::FloatUnary { op, width, arg })
    }

    pub fn float_binary(
        &mut self,
        op: FloatBinaryOp,
        width: FloatWidth,
        lhs: InstrRef,
        rhs: InstrRef,
    ) -> IrResult<InstrRef> {
        self.emit(Operation::FloatBinary {
            op,
            width,
            args: [lhs, rhs],
        })
    }

    pub fn sign_extend(&mut self, from: ExtWidth, arg: InstrRef) -> IrResult<InstrRef> {
        self.emit(Operation::IntSignExtend { from, arg })
    }

    pub fn zero_extend(&mut self, from: ExtWidth, arg: InstrRef) -> IrResult<InstrRef> {
        self.emit(Operation::IntZeroExtend { from, arg })
    }

    pub fn truncate(&mut self, to: TruncWidth, arg: InstrRef) -> IrResult<InstrRef> {
        self.emit(Operation::IntTruncate { to, arg })
    }

    pub fn compare(
        &mut self,
        comparison: Comparison,
        lhs: InstrRef,
        rhs: InstrRef,
    ) -> IrResult<InstrRef> {
        self.emit(Operation::Compare {
            comparison,
            args: [lhs, rhs],
        })
    }

    // Memory.

    pub fn load(
        &mut self,
        width: OpWidth,
        flags: MemoryFlags,
        location: InstrRef,
    ) -> IrResult<InstrRef> {
        self.emit_control(Operation::Load {
            width,
            flags,
            location,
        })
    }

    pub fn store(
        &mut self,
        width: OpWidth,
        flags: MemoryFlags,
        location: InstrRef,
        value: InstrRef,
    ) -> IrResult<InstrRef> {
        self.emit_control(Operation::Store {
            width,
            flags,
            location,
            value,
        })
    }

    pub fn atomic_load(
        &mut self,
        width: OpWidth,
        model: MemoryOrder,
        location: InstrRef,
    ) -> IrResult<InstrRef> {
        self.emit_control(Operation::AtomicLoad {
            width,
            model,
            location,
        })
    }

    pub fn atomic_store(
        &mut self,
        width: OpWidth,
        model: MemoryOrder,
        location: InstrRef,
        value: InstrRef,
    ) -> IrResult<InstrRef> {
        self.emit_control(Operation::AtomicStore {
            width,
            model,
            location,
            value,
        })
    }

    pub fn alloc_local(&mut self, type_id: TypeId, type_index: usize) -> IrResult<InstrRef> {
        self.emit_control(Operation::AllocLocal {
            type_id,
            type_index,
        })
    }

    pub fn get_local(&mut self, index: usize, offset: i64) -> IrResult<InstrRef> {
        self.emit(Operation::GetLocal { index, offset })
    }

    pub fn get_global(&mut self, symbol: SymbolId, offset: i64) -> IrResult<InstrRef> {
        self.emit(Operation::GetGlobal { symbol, offset })
    }

    pub fn get_thread_local(&mut self, symbol: SymbolId, offset: i64) -> IrResult<InstrRef> {
        self.emit(Operation::GetThreadLocal { symbol, offset })
    }

    pub fn stack_alloc(
        &mut self,
        size: InstrRef,
        alignment: InstrRef,
        within_scope: bool,
    ) -> IrResult<InstrRef> {
        self.emit_control(Operation::StackAlloc {
            size,
            alignment,
            within_scope,
        })
    }

    // Control flow.

    pub fn jump(&mut self, target: BlockId) -> IrResult<InstrRef> {
        self.emit_control(Operation::Jump { target })
    }

    pub fn branch(
        &mut self,
        variant: BranchCondVariant,
        condition: InstrRef,
        target: BlockId,
        alternative: BlockId,
    ) -> IrResult<InstrRef> {
        self.emit_control(Operation::Branch {
            variant,
            condition,
            target,
            alternative,
        })
    }

    pub fn branch_compare(
        &mut self,
        comparison: Comparison,
        lhs: InstrRef,
        rhs: InstrRef,
        target: BlockId,
        alternative: BlockId,
    ) -> IrResult<InstrRef> {
        self.emit_control(Operation::BranchCompare {
            comparison,
            args: [lhs, rhs],
            target,
            alternative,
        })
    }

    pub fn indirect_jump(&mut self, target: InstrRef) -> IrResult<InstrRef> {
        self.emit_control(Operation::IndirectJump { target })
    }

    pub fn ret(&mut self, value: Option<InstrRef>) -> IrResult<InstrRef> {
        self.emit_control(Operation::Return { value })
    }

    pub fn call(
        &mut self,
        function: FuncId,
        argument_count: usize,
        indirect_target: Option<InstrRef>,
    ) -> IrResult<(CallRef, InstrRef)> {
        let (call, output) =
            self.code
                .new_call(self.block, function, argument_count, indirect_target)?;
        self.code.add_control(self.block, output)?;
        Ok((call, output))
    }

    pub fn tail_call(
        &mut self,
        function: FuncId,
        argument_count: usize,
        indirect_target: Option<InstrRef>,
    ) -> IrResult<(CallRef, InstrRef)> {
        let (call, output) =
            self.code
                .new_tail_call(self.block, function, argument_count, indirect_target)?;
        self.code.add_control(self.block, output)?;
        Ok((call, output))
    }

    pub fn inline_assembly(
        &mut self,
        fragment: AsmFragmentId,
        parameter_count: usize,
    ) -> IrResult<(AsmRef, InstrRef)> {
        let (asm, output) = self
            .code
            .new_inline_assembly(self.block, fragment, parameter_count)?;
        self.code.add_control(self.block, output)?;
        Ok((asm, output))
    }

    // Structural.

    pub fn phi(&mut self) -> IrResult<(PhiRef, InstrRef)> {
        self.code.new_phi(self.block)
    }

    pub fn get_argument(&mut self, index: usize) -> IrResult<InstrRef> {
        self.emit(Operation::GetArgument { index })
    }

    pub fn scope_push(&mut self) -> IrResult<InstrRef> {
        self.emit_control(Operation::ScopePush)
    }

    pub fn scope_pop(&mut self, scope: InstrRef) -> IrResult<InstrRef> {
        self.emit_control(Operation::ScopePop { scope })
    }

    pub fn vararg_start(&mut self, target: InstrRef) -> IrResult<InstrRef> {
        self.emit_control(Operation::VarargStart { target })
    }

    pub fn vararg_end(&mut self, target: InstrRef) -> IrResult<InstrRef> {
        self.emit_control(Operation::VarargEnd { target })
    }

    pub fn vararg_copy(&mut self, destination: InstrRef, source: InstrRef) -> IrResult<InstrRef> {
        self.emit_control(Operation::VarargCopy {
            destination,
            source,
        })
    }

    pub fn vararg_get(
        &mut self,
        source: InstrRef,
        type_id: TypeId,
        type_index: usize,
    ) -> IrResult<InstrRef> {
        self.emit_control(Operation::VarargGet {
            source,
            type_id,
            type_index,
        })
    }

    pub fn overflow_arith(
        &mut self,
        op: OverflowOp,
        signedness: u8,
        lhs: InstrRef,
        rhs: InstrRef,
        result_ptr: InstrRef,
    ) -> IrResult<InstrRef> {
        self.emit_control(Operation::OverflowArith {
            op,
            signedness,
            args: [lhs, rhs],
            result_ptr,
        })
    }
}
