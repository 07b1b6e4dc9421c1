//! Analysis oracles.
//!
//! Every analysis is a pure function of an immutable code container
//! snapshot. Consumers that run several analyses over the same snapshot
//! keep them in an [`AnalysisCache`], which stores results as
//! downcastable trait objects and is flushed whenever a pass mutates the
//! function.

pub mod cfg;
pub mod dce;
pub mod dominator;
pub mod liveness;

pub use cfg::Predecessors;
pub use dce::DeadCodeAnalysis;
pub use dominator::DominatorTree;
pub use liveness::{Linearization, Liveness, LivenessInterval};

use crate::error::IrResult;
use downcast_rs::{impl_downcast, Downcast};
use rustc_hash::FxHashMap;

pub trait AnalysisResultT: Downcast + std::fmt::Debug {}
impl_downcast!(AnalysisResultT);

impl AnalysisResultT for Predecessors {}
impl AnalysisResultT for DominatorTree {}
impl AnalysisResultT for Liveness {}
impl AnalysisResultT for DeadCodeAnalysis {}

pub type AnalysisResult = Box<dyn AnalysisResultT>;

/// Keyed store of analysis results for one function snapshot.
#[derive(Debug, Default)]
pub struct AnalysisCache {
    results: FxHashMap<&'static str, AnalysisResult>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches the cached result under `key`, computing and storing it
    /// on a miss. The stored result must have been produced under the
    /// same key type; a mismatch is a programming error.
    pub fn get_or_insert_with<T, F>(&mut self, key: &'static str, build: F) -> IrResult<&T>
    where
        T: AnalysisResultT,
        F: FnOnce() -> IrResult<T>,
    {
        if !self.results.contains_key(key) {
            let result = build()?;
            self.results.insert(key, Box::new(result));
        }
        let entry = self.results.get(key).expect("analysis result just inserted");
        Ok(entry
            .downcast_ref::<T>()
            .expect("analysis cache key bound to a different result type"))
    }

    /// Drops every cached result; called after a pass mutates the
    /// function the cache was computed for.
    pub fn invalidate(&mut self) {
        self.results.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::InstructionBuilder;
    use crate::code::Code;

    #[test]
    fn cache_computes_once_and_invalidates() {
        let mut code = Code::new();
        let entry = code.new_block(false);
        code.set_entry_point(entry).unwrap();
        InstructionBuilder::new(&mut code, entry).ret(None).unwrap();

        let mut cache = AnalysisCache::new();
        let mut computed = 0;
        for _ in 0..2 {
            cache
                .get_or_insert_with("predecessors", || {
                    computed += 1;
                    Predecessors::compute(&code)
                })
                .unwrap();
        }
        assert_eq!(computed, 1);
        cache.invalidate();
        assert!(cache.is_empty());
    }
}
