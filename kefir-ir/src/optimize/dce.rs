//! Dead block and instruction removal.

use crate::analysis::DeadCodeAnalysis;
use crate::error::IrResult;
use crate::function::Function;
use crate::module::ModuleEnv;
use crate::optimize::{Pass, PassDisposition};
use crate::pass_manager::OptimizerConfig;

pub struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn apply(
        &self,
        _env: &ModuleEnv<'_>,
        function: &mut Function,
        _config: &OptimizerConfig,
    ) -> IrResult<PassDisposition> {
        let code = function.code_mut();
        let index = DeadCodeAnalysis::compute(code)?;
        let blocks_before = code.block_count();
        code.drop_dead_code(&index)?;
        tracing::debug!(
            blocks_removed = blocks_before - code.block_count(),
            "dead code elimination finished"
        );
        Ok(PassDisposition::Continue)
    }
}
