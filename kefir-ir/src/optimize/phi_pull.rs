//! Uniform-phi materialization.
//!
//! A phi whose links all carry the same materializable operation
//! (integer or unsigned constant, float32/float64 constant compared by
//! bit pattern, get-local with identical index and offset, get-global
//! or get-thread-local of the same symbol) is replaced by a single
//! fresh instance of that operation placed at the phi's block. Blocks
//! are processed in reverse post-order so downstream uses observe the
//! freshest materialization.

use crate::analysis::cfg::reverse_post_order;
use crate::error::IrResult;
use crate::function::Function;
use crate::module::ModuleEnv;
use crate::operation::Operation;
use crate::optimize::{Pass, PassDisposition};
use crate::pass_manager::OptimizerConfig;

pub struct PhiPull;

impl Pass for PhiPull {
    fn name(&self) -> &'static str {
        "phi-pull"
    }

    fn apply(
        &self,
        _env: &ModuleEnv<'_>,
        function: &mut Function,
        _config: &OptimizerConfig,
    ) -> IrResult<PassDisposition> {
        let (code, debug) = function.code_and_debug_mut();
        let order = reverse_post_order(code)?;
        let mut pulled = 0usize;
        for block in order {
            let mut cursor = code.block(block)?.phi_head();
            while let Some(phi) = cursor {
                let node = code.phi(phi)?;
                let output = node.output();
                let links: Vec<_> = node.links().map(|(_, value)| value).collect();
                let Some(first) = links.first().copied() else {
                    cursor = code.phi_next_sibling(phi)?;
                    continue;
                };
                let operation = code.instr(first)?.operation().clone();
                let uniform = is_materializable(&operation)
                    && links.iter().skip(1).try_fold(true, |acc, other| {
                        let other_op = code.instr(*other)?.operation();
                        Ok::<bool, crate::error::IrError>(
                            acc && other_op.fingerprint() == operation.fingerprint(),
                        )
                    })?;
                if uniform {
                    debug.set_location_cursor(Some(first));
                    let replacement = code.new_instruction(block, operation)?;
                    code.move_after(output, replacement)?;
                    code.replace_references(output, replacement)?;
                    cursor = code.phi_next_sibling(phi)?;
                    code.drop_instr(output)?;
                    code.drop_phi(phi)?;
                    debug.set_location_cursor(None);
                    pulled += 1;
                } else {
                    cursor = code.phi_next_sibling(phi)?;
                }
            }
        }
        if pulled > 0 {
            tracing::debug!(pulled, "phi-pull materialized uniform phi nodes");
        }
        Ok(PassDisposition::Continue)
    }
}

/// The operations phi-pull may re-materialize at the join block.
fn is_materializable(operation: &Operation) -> bool {
    matches!(
        operation,
        Operation::IntConst(_)
            | Operation::UintConst(_)
            | Operation::Float32Const(_)
            | Operation::Float64Const(_)
            | Operation::GetLocal { .. }
            | Operation::GetGlobal { .. }
            | Operation::GetThreadLocal { .. }
    )
}
