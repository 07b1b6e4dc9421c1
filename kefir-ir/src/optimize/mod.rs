//! Transformation passes.
//!
//! Every pass receives the read-only module environment, the mutable
//! function under transformation and the optimizer configuration, and
//! reports how the pipeline should proceed. Passes keep the container
//! invariants intact across their boundary: preconditions are checked
//! before the first mutation.

pub mod cmp_branch_fuse;
pub mod const_prop;
pub mod dce;
pub mod mem2reg;
pub mod phi_pull;
pub mod value_numbering;

pub use cmp_branch_fuse::CmpBranchFuse;
pub use const_prop::ConstProp;
pub use dce::DeadCodeElimination;
pub use mem2reg::Mem2Reg;
pub use phi_pull::PhiPull;
pub use value_numbering::ValueNumbering;

use crate::error::IrResult;
use crate::function::Function;
use crate::module::ModuleEnv;
use crate::pass_manager::OptimizerConfig;

/// How the pipeline proceeds after a pass returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassDisposition {
    /// Run the next pass of the pipeline.
    Continue,
    /// Skip the remaining passes for this function. Not an error.
    Yield,
}

pub trait Pass: Sync {
    fn name(&self) -> &'static str;

    fn apply(
        &self,
        env: &ModuleEnv<'_>,
        function: &mut Function,
        config: &OptimizerConfig,
    ) -> IrResult<PassDisposition>;
}
