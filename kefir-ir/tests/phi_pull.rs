//! Uniform-phi materialization scenarios.

mod common;

use common::*;
use kefir_ir::builder::InstructionBuilder;
use kefir_ir::id::FuncId;
use kefir_ir::module::Module;
use kefir_ir::operation::{BranchCondVariant, Operation};
use kefir_ir::pass_manager::{OptimizerConfig, Pipeline};
use kefir_ir::printer::module_to_string;
use kefir_ir::verify::verify_function;

fn run_phi_pull(module: &mut Module, id: FuncId) {
    let pipeline = Pipeline::parse("phi-pull").unwrap();
    pipeline
        .run_function(module, id, &OptimizerConfig::default())
        .unwrap();
}

/// Builds a diamond whose phi joins the given constants.
fn diamond_with_consts(module: &mut Module, left: i64, right: i64) -> (FuncId, kefir_ir::BlockId) {
    let id = define_function(module, "diamond", None, None, None);
    let function_handle = function_mut(module, id);
    let entry = function_handle.entry_block().unwrap();
    let code = function_handle.code_mut();
    let then_block = code.new_block(false);
    let else_block = code.new_block(false);
    let join = code.new_block(false);
    let mut b = InstructionBuilder::new(code, entry);
    let cond = b.int_const(1).unwrap();
    b.branch(BranchCondVariant::Bit64, cond, then_block, else_block)
        .unwrap();
    let a = b.at(then_block).int_const(left).unwrap();
    b.jump(join).unwrap();
    let c = b.at(else_block).int_const(right).unwrap();
    b.jump(join).unwrap();
    let (phi, output) = b.at(join).phi().unwrap();
    b.ret(Some(output)).unwrap();
    code.phi_attach(phi, then_block, a).unwrap();
    code.phi_attach(phi, else_block, c).unwrap();
    (id, join)
}

/// A phi whose links are both `int_const 42` is removed and replaced by
/// a fresh constant at the join block.
#[test]
fn uniform_constant_phi_is_pulled() {
    let mut module = Module::new();
    let (id, join) = diamond_with_consts(&mut module, 42, 42);

    run_phi_pull(&mut module, id);

    let function = function(&module, id);
    let code = function.code();
    assert_eq!(count_phis(code), 0);
    assert!(code.block(join).unwrap().phi_head().is_none());

    let ret = code.block_terminator(join).unwrap().unwrap();
    let Operation::Return { value: Some(value) } = *code.instr(ret).unwrap().operation() else {
        panic!("return must carry a value");
    };
    assert_eq!(code.instr(value).unwrap().block_id(), join);
    assert_eq!(*code.instr(value).unwrap().operation(), Operation::IntConst(42));
    verify_function(function).unwrap();
}

/// Non-uniform phis are left intact.
#[test]
fn divergent_phi_is_kept() {
    let mut module = Module::new();
    let (id, join) = diamond_with_consts(&mut module, 1, 2);

    run_phi_pull(&mut module, id);

    let function = function(&module, id);
    let code = function.code();
    assert_eq!(count_phis(code), 1);
    assert!(code.block(join).unwrap().phi_head().is_some());
    verify_function(function).unwrap();
}

/// Running phi-pull twice yields the same IR as running it once.
#[test]
fn phi_pull_is_idempotent() {
    let mut module = Module::new();
    let (id, _join) = diamond_with_consts(&mut module, 7, 7);

    run_phi_pull(&mut module, id);
    let once = module_to_string(&module, false).unwrap();
    run_phi_pull(&mut module, id);
    let twice = module_to_string(&module, false).unwrap();

    assert_eq!(once, twice);
}

/// Uniform float constants are compared by bit pattern: `0.0` and
/// `-0.0` do not merge.
#[test]
fn signed_zero_floats_are_not_uniform() {
    let mut module = Module::new();
    let id = define_function(&mut module, "zeros", None, None, None);
    let function_handle = function_mut(&mut module, id);
    let entry = function_handle.entry_block().unwrap();
    let code = function_handle.code_mut();
    let then_block = code.new_block(false);
    let else_block = code.new_block(false);
    let join = code.new_block(false);
    let mut b = InstructionBuilder::new(code, entry);
    let cond = b.int_const(0).unwrap();
    b.branch(BranchCondVariant::Bit8, cond, then_block, else_block)
        .unwrap();
    let pos = b.at(then_block).float64_const(0.0).unwrap();
    b.jump(join).unwrap();
    let neg = b.at(else_block).float64_const(-0.0).unwrap();
    b.jump(join).unwrap();
    let (phi, output) = b.at(join).phi().unwrap();
    b.ret(Some(output)).unwrap();
    code.phi_attach(phi, then_block, pos).unwrap();
    code.phi_attach(phi, else_block, neg).unwrap();

    run_phi_pull(&mut module, id);

    assert_eq!(count_phis(function(&module, id).code()), 1);
}

/// Get-local materializations must agree on both index and offset.
#[test]
fn get_local_phi_requires_identical_offsets() {
    let mut module = Module::new();
    let id = define_function(&mut module, "locals", None, None, None);
    let function_handle = function_mut(&mut module, id);
    let entry = function_handle.entry_block().unwrap();
    let code = function_handle.code_mut();
    let then_block = code.new_block(false);
    let else_block = code.new_block(false);
    let join = code.new_block(false);
    let mut b = InstructionBuilder::new(code, entry);
    let cond = b.int_const(1).unwrap();
    b.branch(BranchCondVariant::Bit8, cond, then_block, else_block)
        .unwrap();
    let same_a = b.at(then_block).get_local(2, 8).unwrap();
    b.jump(join).unwrap();
    let same_b = b.at(else_block).get_local(2, 8).unwrap();
    b.jump(join).unwrap();
    let (phi, output) = b.at(join).phi().unwrap();
    b.ret(Some(output)).unwrap();
    code.phi_attach(phi, then_block, same_a).unwrap();
    code.phi_attach(phi, else_block, same_b).unwrap();

    run_phi_pull(&mut module, id);

    let code = function(&module, id).code();
    assert_eq!(count_phis(code), 0);
    let ret = code.block_terminator(join).unwrap().unwrap();
    let Operation::Return { value: Some(value) } = *code.instr(ret).unwrap().operation() else {
        panic!("return must carry a value");
    };
    assert_eq!(
        *code.instr(value).unwrap().operation(),
        Operation::GetLocal { index: 2, offset: 8 }
    );
}
