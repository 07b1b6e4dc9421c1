//! Local value numbering.
//!
//! Deduplicates pure instructions within each block, keyed by the
//! structural fingerprint of their operation (floats by bit pattern).
//! Later duplicates are rewritten onto the first occurrence; rewritten
//! operands feed the fingerprints of instructions further down the
//! block, so chains of duplicates collapse in one sweep.

use crate::error::IrResult;
use crate::function::Function;
use crate::module::ModuleEnv;
use crate::optimize::{Pass, PassDisposition};
use crate::pass_manager::OptimizerConfig;
use rustc_hash::FxHashMap;

pub struct ValueNumbering;

impl Pass for ValueNumbering {
    fn name(&self) -> &'static str {
        "value-numbering"
    }

    fn apply(
        &self,
        _env: &ModuleEnv<'_>,
        function: &mut Function,
        _config: &OptimizerConfig,
    ) -> IrResult<PassDisposition> {
        let code = function.code_mut();
        let blocks: Vec<_> = code.block_ids().collect();
        let mut removed = 0usize;
        for block in blocks {
            let mut numbering: FxHashMap<(&'static str, Vec<u64>), _> = FxHashMap::default();
            let mut cursor = code.block(block)?.instr_head();
            while let Some(instr) = cursor {
                cursor = code.next_sibling(instr)?;
                let operation = code.instr(instr)?.operation();
                if !operation.is_pure() {
                    continue;
                }
                let key = operation.fingerprint();
                match numbering.get(&key) {
                    Some(&canonical) => {
                        code.replace_references(instr, canonical)?;
                        code.drop_instr(instr)?;
                        removed += 1;
                    }
                    None => {
                        numbering.insert(key, instr);
                    }
                }
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "value numbering removed duplicates");
        }
        Ok(PassDisposition::Continue)
    }
}
