//! Container invariant verification.
//!
//! Checks the structural invariants that must hold between passes. Tests
//! run this after every transformation; passes may run it while being
//! debugged.

use crate::analysis::cfg::Predecessors;
use crate::code::Code;
use crate::error::{IrError, IrResult};
use crate::function::Function;
use crate::id::InstrRef;
use crate::operation::Operation;
use std::collections::BTreeSet;

/// Verifies every container invariant of the function body:
///
/// 1. all references resolve to live instructions;
/// 2. the use map is exactly the inverse reference relation;
/// 3. each control flow list is a subsequence of its sibling list;
/// 4. each block ends with exactly one terminator on its control flow
///    list and has no terminator before it;
/// 5. phi link sets equal the predecessor sets of their blocks;
/// 6. phi outputs reside in the phi's block and carry the phi operation;
/// 7. the entry block has no predecessors.
pub fn verify_function(function: &Function) -> IrResult<()> {
    let code = function.code();
    verify_references(code)?;
    verify_use_map(code)?;
    verify_lists(code)?;
    verify_terminators(code)?;
    verify_phis(code)?;
    Ok(())
}

fn verify_references(code: &Code) -> IrResult<()> {
    for block in code.blocks() {
        for instr in code.block_instr_iter(block.id())? {
            for input in code.instruction_input_refs(instr)? {
                if !code.instr_exists(input) {
                    return Err(IrError::InvariantViolation(
                        "instruction references a deleted instruction",
                    ));
                }
            }
        }
    }
    Ok(())
}

fn verify_use_map(code: &Code) -> IrResult<()> {
    let mut expected: std::collections::BTreeMap<InstrRef, BTreeSet<InstrRef>> =
        std::collections::BTreeMap::new();
    for block in code.blocks() {
        for instr in code.block_instr_iter(block.id())? {
            expected.entry(instr).or_default();
            for input in code.instruction_input_refs(instr)? {
                expected.entry(input).or_default().insert(instr);
            }
        }
    }
    for (instr, users) in expected {
        if code.use_set(instr) != users {
            return Err(IrError::InvariantViolation(
                "use map diverges from operation parameters",
            ));
        }
    }
    Ok(())
}

fn verify_lists(code: &Code) -> IrResult<()> {
    for block in code.blocks() {
        let siblings: Vec<InstrRef> = code.block_instr_iter(block.id())?.collect();
        let control: Vec<InstrRef> = code.block_control_iter(block.id())?.collect();
        // Subsequence check: control entries appear in sibling order.
        let mut sibling_iter = siblings.iter();
        for c in &control {
            if !sibling_iter.any(|s| s == c) {
                return Err(IrError::InvariantViolation(
                    "control flow list is not a subsequence of the sibling list",
                ));
            }
        }
        for instr in &siblings {
            if code.instr(*instr)?.block_id() != block.id() {
                return Err(IrError::InvariantViolation(
                    "instruction is linked into a foreign block",
                ));
            }
        }
    }
    Ok(())
}

fn verify_terminators(code: &Code) -> IrResult<()> {
    for block in code.blocks() {
        let control: Vec<InstrRef> = code.block_control_iter(block.id())?.collect();
        match control.last() {
            Some(last) if code.instruction_is_terminator(*last)? => {}
            _ => {
                return Err(IrError::InvariantViolation(
                    "block does not end with a terminator",
                ))
            }
        }
        for instr in &control[..control.len() - 1] {
            if code.instruction_is_terminator(*instr)? {
                return Err(IrError::InvariantViolation(
                    "terminator in the middle of a control flow list",
                ));
            }
        }
    }
    Ok(())
}

fn verify_phis(code: &Code) -> IrResult<()> {
    let preds = Predecessors::compute(code)?;
    for block in code.blocks() {
        for phi in code.block_phi_iter(block.id())? {
            let node = code.phi(phi)?;
            if node.block_id() != block.id() {
                return Err(IrError::InvariantViolation(
                    "phi node is chained into a foreign block",
                ));
            }
            let output = code.instr(node.output())?;
            if output.block_id() != block.id() {
                return Err(IrError::InvariantViolation(
                    "phi output resides outside the phi's block",
                ));
            }
            match output.operation() {
                Operation::Phi { phi: op_phi } if *op_phi == phi => {}
                _ => {
                    return Err(IrError::InvariantViolation(
                        "phi output does not carry the phi operation",
                    ))
                }
            }
            let linked: BTreeSet<_> = node.links().map(|(pred, _)| pred).collect();
            let expected = preds.of(block.id())?;
            if &linked != expected {
                return Err(IrError::InvariantViolation(
                    "phi link set diverges from the block's predecessors",
                ));
            }
        }
    }
    if let Some(entry) = code.entry_point() {
        if !preds.of(entry)?.is_empty() {
            return Err(IrError::InvariantViolation("entry block has predecessors"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::InstructionBuilder;
    use crate::function::Function;
    use crate::id::FuncId;

    #[test]
    fn well_formed_function_verifies() {
        let mut function = Function::with_entry(FuncId::new(0), None).unwrap();
        let entry = function.entry_block().unwrap();
        let code = function.code_mut();
        let mut b = InstructionBuilder::new(code, entry);
        let v = b.int_const(3).unwrap();
        b.ret(Some(v)).unwrap();
        verify_function(&function).unwrap();
    }

    #[test]
    fn missing_terminator_is_detected() {
        let mut function = Function::with_entry(FuncId::new(0), None).unwrap();
        let entry = function.entry_block().unwrap();
        let code = function.code_mut();
        InstructionBuilder::new(code, entry).int_const(1).unwrap();
        assert!(verify_function(&function).is_err());
    }
}
