//! Pipeline-driven transformations: fusion, folding, numbering and the
//! combined pass sequence.

mod common;

use common::*;
use kefir_ir::builder::InstructionBuilder;
use kefir_ir::id::FuncId;
use kefir_ir::irtype::Typecode;
use kefir_ir::module::Module;
use kefir_ir::operation::{
    BranchCondVariant, Comparison, IntBinaryOp, IntComparisonKind, MemoryFlags, OpWidth, Operation,
};
use kefir_ir::pass_manager::{OptimizerConfig, Pipeline};
use kefir_ir::verify::verify_function;

fn run(module: &mut Module, id: FuncId, spec: &str) {
    Pipeline::parse(spec)
        .unwrap()
        .run_function(module, id, &OptimizerConfig::default())
        .unwrap();
}

/// `if (x == 3)` branching on the comparison fuses into a
/// branch-compare terminator carrying the comparison directly.
#[test]
fn comparison_fuses_into_branch_compare() {
    let mut module = Module::new();
    let params = scalar_type(&mut module, Typecode::Int, 1);
    let id = define_function(&mut module, "eq3", Some(params), None, None);

    let function_handle = function_mut(&mut module, id);
    let entry = function_handle.entry_block().unwrap();
    let code = function_handle.code_mut();
    let then_block = code.new_block(false);
    let else_block = code.new_block(false);
    let mut b = InstructionBuilder::new(code, entry);
    let x = b.get_argument(0).unwrap();
    let three = b.int_const(3).unwrap();
    let comparison = Comparison::Int {
        width: OpWidth::W32,
        kind: IntComparisonKind::Equals,
    };
    let cond = b.compare(comparison, x, three).unwrap();
    b.branch(BranchCondVariant::Bit8, cond, then_block, else_block)
        .unwrap();
    let one = b.at(then_block).int_const(1).unwrap();
    b.ret(Some(one)).unwrap();
    let zero = b.at(else_block).int_const(0).unwrap();
    b.ret(Some(zero)).unwrap();

    run(&mut module, id, "cmp-branch-fuse");

    let function = function(&module, id);
    let code = function.code();
    let terminator = code.block_terminator(entry).unwrap().unwrap();
    assert_eq!(
        *code.instr(terminator).unwrap().operation(),
        Operation::BranchCompare {
            comparison,
            args: [x, three],
            target: then_block,
            alternative: else_block,
        }
    );
    verify_function(function).unwrap();
}

/// A negated branch variant applies the comparison's inverse while
/// keeping the branch targets.
#[test]
fn negated_branch_fuses_with_inverse_comparison() {
    let mut module = Module::new();
    let params = scalar_type(&mut module, Typecode::Int, 1);
    let id = define_function(&mut module, "ne3", Some(params), None, None);

    let function_handle = function_mut(&mut module, id);
    let entry = function_handle.entry_block().unwrap();
    let code = function_handle.code_mut();
    let then_block = code.new_block(false);
    let else_block = code.new_block(false);
    let mut b = InstructionBuilder::new(code, entry);
    let x = b.get_argument(0).unwrap();
    let three = b.int_const(3).unwrap();
    let cond = b
        .compare(
            Comparison::Int {
                width: OpWidth::W32,
                kind: IntComparisonKind::Equals,
            },
            x,
            three,
        )
        .unwrap();
    b.branch(BranchCondVariant::NegatedBit8, cond, then_block, else_block)
        .unwrap();
    b.at(then_block).ret(None).unwrap();
    b.at(else_block).ret(None).unwrap();

    run(&mut module, id, "cmp-branch-fuse");

    let code = function(&module, id).code();
    let terminator = code.block_terminator(entry).unwrap().unwrap();
    let Operation::BranchCompare { comparison, target, alternative, .. } =
        *code.instr(terminator).unwrap().operation()
    else {
        panic!("terminator must be a branch-compare");
    };
    assert_eq!(
        comparison,
        Comparison::Int {
            width: OpWidth::W32,
            kind: IntComparisonKind::NotEquals,
        }
    );
    assert_eq!(target, then_block);
    assert_eq!(alternative, else_block);
}

/// Constant operands fold through arithmetic and decide branches,
/// detaching the untaken edge's phi link.
#[test]
fn constants_fold_and_decide_branches() {
    let mut module = Module::new();
    let id = define_function(&mut module, "folds", None, None, None);

    let function_handle = function_mut(&mut module, id);
    let entry = function_handle.entry_block().unwrap();
    let code = function_handle.code_mut();
    let then_block = code.new_block(false);
    let else_block = code.new_block(false);
    let join = code.new_block(false);
    let mut b = InstructionBuilder::new(code, entry);
    let two = b.int_const(2).unwrap();
    let three = b.int_const(3).unwrap();
    let five = b
        .int_binary(IntBinaryOp::Add, OpWidth::W32, two, three)
        .unwrap();
    let cond = b
        .compare(
            Comparison::Int {
                width: OpWidth::W32,
                kind: IntComparisonKind::Greater,
            },
            five,
            three,
        )
        .unwrap();
    b.branch(BranchCondVariant::Bit8, cond, then_block, else_block)
        .unwrap();
    let a = b.at(then_block).int_const(10).unwrap();
    b.jump(join).unwrap();
    let c = b.at(else_block).int_const(20).unwrap();
    b.jump(join).unwrap();
    let (phi, output) = b.at(join).phi().unwrap();
    b.ret(Some(output)).unwrap();
    code.phi_attach(phi, then_block, a).unwrap();
    code.phi_attach(phi, else_block, c).unwrap();

    run(&mut module, id, "const-prop");

    {
        let function = function(&module, id);
        let code = function.code();
        // 2 + 3 folded; 5 > 3 decided the branch toward the then block.
        let terminator = code.block_terminator(entry).unwrap().unwrap();
        assert_eq!(
            *code.instr(terminator).unwrap().operation(),
            Operation::Jump { target: then_block }
        );
        assert!(!code.instr_exists(five));
        assert!(!code.instr_exists(cond));
        // The else block still jumps to the join until dead code
        // removal deletes it, so the phi keeps both links for now.
        assert_eq!(code.phi(phi).unwrap().link_count(), 2);
        verify_function(function).unwrap();
    }

    run(&mut module, id, "dce");

    let function = function(&module, id);
    let code = function.code();
    assert!(code.block(else_block).is_err());
    let links: Vec<_> = code.phi(phi).unwrap().links().collect();
    assert_eq!(links, vec![(then_block, a)]);
    verify_function(function).unwrap();
}

/// Division by a constant zero is left alone.
#[test]
fn division_by_zero_is_not_folded() {
    let mut module = Module::new();
    let id = define_function(&mut module, "div0", None, None, None);
    let function_handle = function_mut(&mut module, id);
    let entry = function_handle.entry_block().unwrap();
    let code = function_handle.code_mut();
    let mut b = InstructionBuilder::new(code, entry);
    let one = b.int_const(1).unwrap();
    let zero = b.int_const(0).unwrap();
    let division = b
        .int_binary(IntBinaryOp::Div, OpWidth::W32, one, zero)
        .unwrap();
    b.ret(Some(division)).unwrap();

    run(&mut module, id, "const-prop");

    let code = function(&module, id).code();
    assert!(code.instr_exists(division));
    assert_eq!(
        *code.instr(division).unwrap().operation(),
        Operation::IntBinary {
            op: IntBinaryOp::Div,
            width: OpWidth::W32,
            args: [one, zero],
        }
    );
}

/// Folding masks to the operation width.
#[test]
fn folding_respects_operand_width() {
    let mut module = Module::new();
    let id = define_function(&mut module, "wrap", None, None, None);
    let function_handle = function_mut(&mut module, id);
    let entry = function_handle.entry_block().unwrap();
    let code = function_handle.code_mut();
    let mut b = InstructionBuilder::new(code, entry);
    let big = b.int_const(0xFF).unwrap();
    let one = b.int_const(1).unwrap();
    let wrapped = b
        .int_binary(IntBinaryOp::Add, OpWidth::W8, big, one)
        .unwrap();
    let ret = b.ret(Some(wrapped)).unwrap();

    run(&mut module, id, "const-prop");

    let code = function(&module, id).code();
    let Operation::Return { value: Some(value) } = *code.instr(ret).unwrap().operation() else {
        panic!("return must carry a value");
    };
    assert_eq!(*code.instr(value).unwrap().operation(), Operation::IntConst(0));
}

/// Value numbering collapses structurally identical pure instructions
/// within a block, including chains that become identical as their
/// operands merge.
#[test]
fn value_numbering_deduplicates_chains() {
    let mut module = Module::new();
    let params = scalar_type(&mut module, Typecode::Int, 1);
    let id = define_function(&mut module, "dedup", Some(params), None, None);

    let function_handle = function_mut(&mut module, id);
    let entry = function_handle.entry_block().unwrap();
    let code = function_handle.code_mut();
    let mut b = InstructionBuilder::new(code, entry);
    let x = b.get_argument(0).unwrap();
    let one_a = b.int_const(1).unwrap();
    let one_b = b.int_const(1).unwrap();
    let sum_a = b.int_add(OpWidth::W64, x, one_a).unwrap();
    let sum_b = b.int_add(OpWidth::W64, x, one_b).unwrap();
    let total = b.int_add(OpWidth::W64, sum_a, sum_b).unwrap();
    let ret = b.ret(Some(total)).unwrap();

    run(&mut module, id, "value-numbering");

    let function = function(&module, id);
    let code = function.code();
    assert!(!code.instr_exists(one_b));
    assert!(!code.instr_exists(sum_b));
    assert_eq!(
        *code.instr(total).unwrap().operation(),
        Operation::IntBinary {
            op: IntBinaryOp::Add,
            width: OpWidth::W64,
            args: [sum_a, sum_a],
        }
    );
    assert_eq!(
        *code.instr(ret).unwrap().operation(),
        Operation::Return { value: Some(total) }
    );
    verify_function(function).unwrap();
}

/// The full pipeline leaves a promoted, fused, pruned function: no
/// memory traffic, no dead allocation, a fused terminator, and intact
/// invariants.
#[test]
fn full_pipeline_produces_clean_code() {
    let mut module = Module::new();
    let locals = scalar_type(&mut module, Typecode::Int, 1);
    let params = scalar_type(&mut module, Typecode::Int, 1);
    let id = define_function(&mut module, "clean", Some(params), None, Some(locals));

    let function_handle = function_mut(&mut module, id);
    let entry = function_handle.entry_block().unwrap();
    let code = function_handle.code_mut();
    let then_block = code.new_block(false);
    let else_block = code.new_block(false);
    let join = code.new_block(false);
    let mut b = InstructionBuilder::new(code, entry);
    let x = b.get_argument(0).unwrap();
    let r = b.alloc_local(locals, 0).unwrap();
    let three = b.int_const(3).unwrap();
    let cond = b
        .compare(
            Comparison::Int {
                width: OpWidth::W32,
                kind: IntComparisonKind::Equals,
            },
            x,
            three,
        )
        .unwrap();
    b.branch(BranchCondVariant::Bit8, cond, then_block, else_block)
        .unwrap();
    let seven = b.at(then_block).int_const(7).unwrap();
    b.store(OpWidth::W32, MemoryFlags::plain(), r, seven).unwrap();
    b.jump(join).unwrap();
    let seven_again = b.at(else_block).int_const(7).unwrap();
    b.store(OpWidth::W32, MemoryFlags::plain(), r, seven_again)
        .unwrap();
    b.jump(join).unwrap();
    let loaded = b.at(join).load(OpWidth::W32, MemoryFlags::plain(), r).unwrap();
    let ret = b.ret(Some(loaded)).unwrap();

    run(
        &mut module,
        id,
        "mem2reg, phi-pull, cmp-branch-fuse, value-numbering, dce",
    );

    let function = function(&module, id);
    let code = function.code();
    assert_eq!(count_loads(code), 0);
    assert_eq!(count_stores(code), 0);
    assert_eq!(count_phis(code), 0);
    assert!(!code.instr_exists(r), "dead allocation must be collected");

    let terminator = code.block_terminator(entry).unwrap().unwrap();
    assert!(matches!(
        code.instr(terminator).unwrap().operation(),
        Operation::BranchCompare { .. }
    ));
    // Both stores wrote 7, so phi-pull materialized a single constant.
    let Operation::Return { value: Some(value) } = *code.instr(ret).unwrap().operation() else {
        panic!("return must carry a value");
    };
    assert_eq!(*code.instr(value).unwrap().operation(), Operation::IntConst(7));
    verify_function(function).unwrap();
}
