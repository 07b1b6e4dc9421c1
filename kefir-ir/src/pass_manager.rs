//! Pipeline driver and optimizer configuration.
//!
//! A pipeline is an ordered list of pass names parsed from a
//! comma-separated specification string. Each named pass runs once per
//! function; a pass returning [`PassDisposition::Yield`] stops the
//! pipeline for that function without error, and the first error aborts
//! that function's pipeline so the caller can attribute it.

use crate::error::{IrError, IrResult};
use crate::id::FuncId;
use crate::module::Module;
use crate::optimize::{
    CmpBranchFuse, ConstProp, DeadCodeElimination, Mem2Reg, Pass, PassDisposition, PhiPull,
    ValueNumbering,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblySyntax {
    #[default]
    Att,
    IntelPrefixed,
    IntelNoprefix,
}

/// Knobs the driver hands to the optimizer and the code generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_inline_depth: u32,
    pub max_inlines_per_function: u32,
    pub debug_info: bool,
    pub position_independent_code: bool,
    pub emulated_tls: bool,
    pub omit_frame_pointer: bool,
    pub valgrind_compatible_x87: bool,
    pub syntax: AssemblySyntax,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_inline_depth: 16,
            max_inlines_per_function: 64,
            debug_info: false,
            position_independent_code: false,
            emulated_tls: false,
            omit_frame_pointer: false,
            valgrind_compatible_x87: false,
            syntax: AssemblySyntax::Att,
        }
    }
}

static MEM2REG: Mem2Reg = Mem2Reg;
static PHI_PULL: PhiPull = PhiPull;
static DCE: DeadCodeElimination = DeadCodeElimination;
static CONST_PROP: ConstProp = ConstProp;
static VALUE_NUMBERING: ValueNumbering = ValueNumbering;
static CMP_BRANCH_FUSE: CmpBranchFuse = CmpBranchFuse;

static PASS_REGISTRY: Lazy<BTreeMap<&'static str, &'static dyn Pass>> = Lazy::new(|| {
    let passes: [&'static dyn Pass; 6] = [
        &MEM2REG,
        &PHI_PULL,
        &DCE,
        &CONST_PROP,
        &VALUE_NUMBERING,
        &CMP_BRANCH_FUSE,
    ];
    passes.into_iter().map(|pass| (pass.name(), pass)).collect()
});

/// Looks up a registered pass by name.
pub fn pass_by_name(name: &str) -> IrResult<&'static dyn Pass> {
    PASS_REGISTRY
        .get(name)
        .copied()
        .ok_or_else(|| IrError::UnknownPass(name.into()))
}

/// Names of every registered pass, in lexicographic order.
pub fn registered_pass_names() -> Vec<&'static str> {
    PASS_REGISTRY.keys().copied().collect()
}

pub struct Pipeline {
    passes: Vec<&'static dyn Pass>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("passes", &self.passes.iter().map(|pass| pass.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl Pipeline {
    /// Parses a comma-separated pass specification. Elements are
    /// trimmed; empty elements are skipped; unknown names are user
    /// errors naming the offending token.
    pub fn parse(spec: &str) -> IrResult<Self> {
        let mut passes = Vec::new();
        for token in spec.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            passes.push(pass_by_name(token)?);
        }
        Ok(Self { passes })
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Runs every pass once over the given function, honoring yields.
    pub fn run_function(
        &self,
        module: &mut Module,
        function: FuncId,
        config: &OptimizerConfig,
    ) -> IrResult<()> {
        for pass in &self.passes {
            let (env, func) = module.env_and_function_mut(function)?;
            tracing::trace!(pass = pass.name(), function = %function, "running pass");
            match pass.apply(&env, func, config)? {
                PassDisposition::Continue => {}
                PassDisposition::Yield => {
                    tracing::debug!(
                        pass = pass.name(),
                        function = %function,
                        "pass yielded, skipping the rest of the pipeline"
                    );
                    break;
                }
            }
        }
        Ok(())
    }

    /// Runs the pipeline over every defined function of the module.
    pub fn run_module(&self, module: &mut Module, config: &OptimizerConfig) -> IrResult<()> {
        for function in module.function_ids() {
            self.run_function(module, function, config)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::InstructionBuilder;
    use crate::error::IrResult;
    use crate::function::Function;
    use crate::module::ModuleEnv;

    #[test]
    fn parse_trims_and_skips_empty_elements() {
        let pipeline = Pipeline::parse(" mem2reg , phi-pull,,dce ,").unwrap();
        assert_eq!(pipeline.pass_names(), vec!["mem2reg", "phi-pull", "dce"]);
        assert!(Pipeline::parse("").unwrap().is_empty());
        assert!(Pipeline::parse(",,  ,").unwrap().is_empty());
    }

    #[test]
    fn unknown_pass_name_is_a_user_error() {
        assert_eq!(
            Pipeline::parse("mem2reg,licm").unwrap_err(),
            IrError::UnknownPass("licm".into())
        );
    }

    #[test]
    fn registry_exposes_every_documented_pass() {
        assert_eq!(
            registered_pass_names(),
            vec![
                "cmp-branch-fuse",
                "const-prop",
                "dce",
                "mem2reg",
                "phi-pull",
                "value-numbering"
            ]
        );
    }

    #[test]
    fn yielding_pass_short_circuits_the_pipeline() {
        struct Yielder;
        impl Pass for Yielder {
            fn name(&self) -> &'static str {
                "yielder"
            }
            fn apply(
                &self,
                _env: &ModuleEnv<'_>,
                _function: &mut Function,
                _config: &OptimizerConfig,
            ) -> IrResult<PassDisposition> {
                Ok(PassDisposition::Yield)
            }
        }
        struct MustNotRun;
        impl Pass for MustNotRun {
            fn name(&self) -> &'static str {
                "must-not-run"
            }
            fn apply(
                &self,
                _env: &ModuleEnv<'_>,
                _function: &mut Function,
                _config: &OptimizerConfig,
            ) -> IrResult<PassDisposition> {
                panic!("pipeline must stop after a yield");
            }
        }

        static YIELDER: Yielder = Yielder;
        static MUST_NOT_RUN: MustNotRun = MustNotRun;
        let pipeline = Pipeline {
            passes: vec![&YIELDER, &MUST_NOT_RUN],
        };

        let mut module = Module::new();
        let id = module.declare_function("f", None, None, false);
        let mut function = Function::with_entry(id, None).unwrap();
        let entry = function.entry_block().unwrap();
        InstructionBuilder::new(function.code_mut(), entry)
            .ret(None)
            .unwrap();
        module.define_function(function).unwrap();
        pipeline
            .run_function(&mut module, id, &OptimizerConfig::default())
            .unwrap();
    }
}
