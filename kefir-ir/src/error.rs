//! Error surface of the optimizer core.
//!
//! Every fallible operation returns [`IrResult`]; nested calls propagate
//! failures with `?` up to the pass entry point. Passes perform
//! preconditions first and mutations second, so the container invariants
//! still hold whenever an error escapes. A pass declining to run is not an
//! error: that is expressed through `PassDisposition::Yield` instead.

use crate::id::{AsmRef, BlockId, CallRef, InstrRef, PhiRef};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IrError {
    #[error("instruction reference {0} is unknown or deleted")]
    InvalidInstructionRef(InstrRef),
    #[error("block {0} is unknown or deleted")]
    InvalidBlock(BlockId),
    #[error("phi node {0} is unknown or deleted")]
    InvalidPhi(PhiRef),
    #[error("call site {0} is unknown")]
    InvalidCall(CallRef),
    #[error("inline assembly site {0} is unknown")]
    InvalidInlineAsm(AsmRef),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("operation would violate container invariants: {0}")]
    InvariantViolation(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("unknown optimizer pass '{0}'")]
    UnknownPass(String),
    #[error("malformed module dump: {0}")]
    ModuleFormat(String),
    #[error("opcode revision mismatch: module carries {found}, compiler expects {expected}")]
    OpcodeRevisionMismatch { found: u64, expected: u64 },
}

pub type IrResult<T> = Result<T, IrError>;
