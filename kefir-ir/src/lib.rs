//! Kefir optimizer intermediate representation.
//!
//! The optimizer core of the compiler: an SSA-like IR held in a code
//! container with strict structural invariants, analysis oracles over
//! immutable snapshots (liveness, dominance, predecessors, dead code),
//! the transformation passes driven by a configurable pipeline, the JSON
//! debug dump with bit-exact reload, and a sample register allocator
//! consuming the analyses.
//!
//! Entities are addressed by dense, monotonically increasing ids that
//! are never reused, so the cyclic use-def chains of SSA form are plain
//! index references. All mutation goes through the code container, which
//! keeps the use map, the inverted index from definitions to users,
//! exact at every step.

pub mod analysis;
pub mod builder;
pub mod code;
pub mod error;
pub mod function;
pub mod id;
pub mod irtype;
pub mod module;
pub mod operation;
pub mod optimize;
pub mod parser;
pub mod pass_manager;
pub mod printer;
pub mod regalloc;
pub mod verify;

pub use builder::InstructionBuilder;
pub use code::{Code, CodeEventListener, DeadCodeIndex};
pub use error::{IrError, IrResult};
pub use function::Function;
pub use id::{AsmFragmentId, AsmRef, BlockId, CallRef, FuncId, InstrRef, PhiRef, StringId, SymbolId, TypeId};
pub use module::Module;
pub use operation::Operation;
pub use optimize::{Pass, PassDisposition};
pub use pass_manager::{OptimizerConfig, Pipeline};

/// Revision of the opcode set. Embedded into the JSON debug dump as
/// `meta_info.opcode_rev` and checked on reload.
pub const OPCODES_REVISION: u64 = 1;
