//! Comparison and branch fusion.
//!
//! A conditional branch whose condition is a comparison instruction is
//! rewritten into the fused branch-compare terminator. Negated branch
//! variants apply the comparison's inverse, so `branch !(a < b)` becomes
//! `branch_compare (a >= b)` with the same targets.

use crate::error::IrResult;
use crate::function::Function;
use crate::module::ModuleEnv;
use crate::operation::Operation;
use crate::optimize::{Pass, PassDisposition};
use crate::pass_manager::OptimizerConfig;

pub struct CmpBranchFuse;

impl Pass for CmpBranchFuse {
    fn name(&self) -> &'static str {
        "cmp-branch-fuse"
    }

    fn apply(
        &self,
        _env: &ModuleEnv<'_>,
        function: &mut Function,
        _config: &OptimizerConfig,
    ) -> IrResult<PassDisposition> {
        let code = function.code_mut();
        let blocks: Vec<_> = code.block_ids().collect();
        let mut fused = 0usize;
        for block in blocks {
            let Some(terminator) = code.block_terminator(block)? else {
                continue;
            };
            let Operation::Branch {
                variant,
                condition,
                target,
                alternative,
            } = *code.instr(terminator)?.operation()
            else {
                continue;
            };
            let Operation::Compare { comparison, args } = *code.instr(condition)?.operation()
            else {
                continue;
            };
            let comparison = if variant.is_negated() {
                comparison.inverse()
            } else {
                comparison
            };
            let replacement = code.new_instruction(
                block,
                Operation::BranchCompare {
                    comparison,
                    args,
                    target,
                    alternative,
                },
            )?;
            code.move_after(terminator, replacement)?;
            code.drop_control(terminator)?;
            code.add_control(block, replacement)?;
            code.drop_instr(terminator)?;
            fused += 1;
        }
        if fused > 0 {
            tracing::debug!(fused, "fused comparisons into branch-compare terminators");
        }
        Ok(PassDisposition::Continue)
    }
}
