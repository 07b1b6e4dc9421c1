//! Constant propagation.
//!
//! Folds integer unary and binary arithmetic, width conversions and
//! comparisons whose operands are constants, and converts conditional
//! branches on constant conditions into unconditional jumps, dropping
//! the detached edge's phi links. Floating point folding is deliberately
//! left to the front end. Blocks are visited in reverse post-order so a
//! single sweep propagates constants along forward edges.

use crate::analysis::cfg::reverse_post_order;
use crate::code::Code;
use crate::error::IrResult;
use crate::function::Function;
use crate::id::{BlockId, InstrRef};
use crate::module::ModuleEnv;
use crate::operation::{
    Comparison, ExtWidth, IntBinaryOp, IntComparisonKind, IntUnaryOp, OpWidth, Operation,
    TruncWidth,
};
use crate::optimize::{Pass, PassDisposition};
use crate::pass_manager::OptimizerConfig;

pub struct ConstProp;

impl Pass for ConstProp {
    fn name(&self) -> &'static str {
        "const-prop"
    }

    fn apply(
        &self,
        _env: &ModuleEnv<'_>,
        function: &mut Function,
        _config: &OptimizerConfig,
    ) -> IrResult<PassDisposition> {
        let code = function.code_mut();
        let order = reverse_post_order(code)?;
        let mut folded = 0usize;
        for block in order {
            let mut cursor = code.block(block)?.instr_head();
            while let Some(instr) = cursor {
                cursor = code.next_sibling(instr)?;
                if fold_instruction(code, block, instr)? {
                    folded += 1;
                }
            }
        }
        if folded > 0 {
            tracing::debug!(folded, "constant propagation finished");
        }
        Ok(PassDisposition::Continue)
    }
}

fn const_value(code: &Code, instr: InstrRef) -> IrResult<Option<u64>> {
    Ok(match *code.instr(instr)?.operation() {
        Operation::IntConst(v) => Some(v as u64),
        Operation::UintConst(v) => Some(v),
        _ => None,
    })
}

fn mask(width: OpWidth) -> u64 {
    match width {
        OpWidth::W64 => u64::MAX,
        w => (1u64 << w.bits()) - 1,
    }
}

fn sign_extend(value: u64, width: OpWidth) -> i64 {
    let shift = 64 - width.bits();
    (((value & mask(width)) << shift) as i64) >> shift
}

fn fold_instruction(code: &mut Code, block: BlockId, instr: InstrRef) -> IrResult<bool> {
    let operation = code.instr(instr)?.operation().clone();
    let folded = match operation {
        Operation::IntUnary { op, width, arg } => {
            const_value(code, arg)?.and_then(|value| eval_unary(op, width, value))
        }
        Operation::IntBinary { op, width, args } => {
            match (const_value(code, args[0])?, const_value(code, args[1])?) {
                (Some(lhs), Some(rhs)) => eval_binary(op, width, lhs, rhs),
                _ => None,
            }
        }
        Operation::Compare {
            comparison: Comparison::Int { width, kind },
            args,
        } => match (const_value(code, args[0])?, const_value(code, args[1])?) {
            (Some(lhs), Some(rhs)) => Some(eval_comparison(kind, width, lhs, rhs) as u64),
            _ => None,
        },
        Operation::IntSignExtend { from, arg } => const_value(code, arg)?
            .map(|value| sign_extend(value, ext_op_width(from)) as u64),
        Operation::IntZeroExtend { from, arg } => {
            const_value(code, arg)?.map(|value| value & mask(ext_op_width(from)))
        }
        Operation::IntTruncate { to, arg } => const_value(code, arg)?.map(|value| match to {
            TruncWidth::W1 => (value != 0) as u64,
            TruncWidth::W8 => value & mask(OpWidth::W8),
            TruncWidth::W16 => value & mask(OpWidth::W16),
            TruncWidth::W32 => value & mask(OpWidth::W32),
        }),
        Operation::Branch {
            variant,
            condition,
            target,
            alternative,
        } => {
            if let Some(value) = const_value(code, condition)? {
                let mut taken = value & mask(variant.width()) != 0;
                if variant.is_negated() {
                    taken = !taken;
                }
                rewrite_to_jump(code, block, instr, taken, target, alternative)?;
                return Ok(true);
            }
            return Ok(false);
        }
        Operation::BranchCompare {
            comparison: Comparison::Int { width, kind },
            args,
            target,
            alternative,
        } => {
            match (const_value(code, args[0])?, const_value(code, args[1])?) {
                (Some(lhs), Some(rhs)) => {
                    let taken = eval_comparison(kind, width, lhs, rhs);
                    rewrite_to_jump(code, block, instr, taken, target, alternative)?;
                    return Ok(true);
                }
                _ => return Ok(false),
            }
        }
        _ => None,
    };

    let Some(value) = folded else {
        return Ok(false);
    };
    let replacement = code.new_instruction(block, Operation::IntConst(value as i64))?;
    code.move_after(instr, replacement)?;
    code.replace_references(instr, replacement)?;
    code.drop_instr(instr)?;
    Ok(true)
}

fn ext_op_width(from: ExtWidth) -> OpWidth {
    match from {
        ExtWidth::W8 => OpWidth::W8,
        ExtWidth::W16 => OpWidth::W16,
        ExtWidth::W32 => OpWidth::W32,
    }
}

fn eval_unary(op: IntUnaryOp, width: OpWidth, value: u64) -> Option<u64> {
    let masked = value & mask(width);
    Some(match op {
        IntUnaryOp::Neg => masked.wrapping_neg() & mask(width),
        IntUnaryOp::Not => !masked & mask(width),
        IntUnaryOp::BoolNot => (masked == 0) as u64,
    })
}

fn eval_binary(op: IntBinaryOp, width: OpWidth, lhs: u64, rhs: u64) -> Option<u64> {
    let m = mask(width);
    let (l, r) = (lhs & m, rhs & m);
    let (ls, rs) = (sign_extend(lhs, width), sign_extend(rhs, width));
    let shift = (r % width.bits() as u64) as u32;
    let value = match op {
        IntBinaryOp::Add => l.wrapping_add(r),
        IntBinaryOp::Sub => l.wrapping_sub(r),
        IntBinaryOp::Mul => l.wrapping_mul(r),
        IntBinaryOp::Div => {
            if rs == 0 || (ls == sign_extend(1u64 << (width.bits() - 1), width) && rs == -1) {
                return None;
            }
            (ls / rs) as u64
        }
        IntBinaryOp::Mod => {
            if rs == 0 || (ls == sign_extend(1u64 << (width.bits() - 1), width) && rs == -1) {
                return None;
            }
            (ls % rs) as u64
        }
        IntBinaryOp::Udiv => {
            if r == 0 {
                return None;
            }
            l / r
        }
        IntBinaryOp::Umod => {
            if r == 0 {
                return None;
            }
            l % r
        }
        IntBinaryOp::And => l & r,
        IntBinaryOp::Or => l | r,
        IntBinaryOp::Xor => l ^ r,
        IntBinaryOp::Shl => l.wrapping_shl(shift),
        IntBinaryOp::Shr => l.wrapping_shr(shift),
        IntBinaryOp::Sar => (ls >> shift) as u64,
        IntBinaryOp::BoolAnd => (l != 0 && r != 0) as u64,
        IntBinaryOp::BoolOr => (l != 0 || r != 0) as u64,
    };
    Some(value & m)
}

fn eval_comparison(kind: IntComparisonKind, width: OpWidth, lhs: u64, rhs: u64) -> bool {
    let m = mask(width);
    let (l, r) = (lhs & m, rhs & m);
    let (ls, rs) = (sign_extend(lhs, width), sign_extend(rhs, width));
    match kind {
        IntComparisonKind::Equals => l == r,
        IntComparisonKind::NotEquals => l != r,
        IntComparisonKind::Greater => ls > rs,
        IntComparisonKind::GreaterOrEquals => ls >= rs,
        IntComparisonKind::Lesser => ls < rs,
        IntComparisonKind::LesserOrEquals => ls <= rs,
        IntComparisonKind::Above => l > r,
        IntComparisonKind::AboveOrEquals => l >= r,
        IntComparisonKind::Below => l < r,
        IntComparisonKind::BelowOrEquals => l <= r,
    }
}

/// Replaces a decided conditional terminator with a jump to the taken
/// target, removing the detached edge's phi links.
fn rewrite_to_jump(
    code: &mut Code,
    block: BlockId,
    branch: InstrRef,
    taken: bool,
    target: BlockId,
    alternative: BlockId,
) -> IrResult<()> {
    let (kept, dropped) = if taken {
        (target, alternative)
    } else {
        (alternative, target)
    };
    let jump = code.new_instruction(block, Operation::Jump { target: kept })?;
    code.move_after(branch, jump)?;
    code.drop_control(branch)?;
    code.add_control(block, jump)?;
    code.drop_instr(branch)?;
    if dropped != kept {
        let phis: Vec<_> = code.block_phi_iter(dropped)?.collect();
        for phi in phis {
            if code.phi_link_for(phi, block).is_ok() {
                code.phi_drop_link(phi, block)?;
            }
        }
    }
    Ok(())
}
