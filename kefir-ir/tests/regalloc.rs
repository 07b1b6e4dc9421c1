//! Register allocation over the liveness linearization.

mod common;

use common::*;
use kefir_ir::analysis::AnalysisCache;
use kefir_ir::builder::InstructionBuilder;
use kefir_ir::id::InstrRef;
use kefir_ir::irtype::Typecode;
use kefir_ir::module::Module;
use kefir_ir::operation::{BranchCondVariant, OpWidth};
use kefir_ir::regalloc::{allocate_registers, Allocation, Amd64Register, RegisterClass};
use kefir_ir::IrError;

/// `f(a, b) { return a + b; }`: arguments take their ABI registers and
/// the returned sum lands in RAX through the return hint.
#[test]
fn abi_preassignment_and_return_hint() {
    let mut module = Module::new();
    let params = scalar_type(&mut module, Typecode::Int, 2);
    let returns = scalar_type(&mut module, Typecode::Int, 1);
    let id = define_function(&mut module, "sum", Some(params), Some(returns), None);

    let function = function_mut(&mut module, id);
    let entry = function.entry_block().unwrap();
    let code = function.code_mut();
    let mut b = InstructionBuilder::new(code, entry);
    let a = b.get_argument(0).unwrap();
    let c = b.get_argument(1).unwrap();
    let sum = b.int_add(OpWidth::W64, a, c).unwrap();
    b.ret(Some(sum)).unwrap();

    let (env, function) = module.env_and_function_mut(id).unwrap();
    let mut cache = AnalysisCache::new();
    let allocator = allocate_registers(&env, function, &mut cache).unwrap();

    assert_eq!(
        allocator.allocation_of(a).unwrap().result,
        Allocation::Register(Amd64Register::Rdi)
    );
    assert_eq!(
        allocator.allocation_of(c).unwrap().result,
        Allocation::Register(Amd64Register::Rsi)
    );
    assert_eq!(
        allocator.allocation_of(sum).unwrap().result,
        Allocation::Register(Amd64Register::Rax)
    );
}

/// Float arguments flow through XMM registers, separate from the
/// integer argument sequence.
#[test]
fn float_arguments_use_xmm_registers() {
    let mut module = Module::new();
    let params = module.types.add(kefir_ir::irtype::Type::new(vec![
        kefir_ir::irtype::TypeEntry::scalar(Typecode::Int),
        kefir_ir::irtype::TypeEntry::scalar(Typecode::Float64),
        kefir_ir::irtype::TypeEntry::scalar(Typecode::Int),
    ]));
    let id = define_function(&mut module, "mixed", Some(params), None, None);

    let function = function_mut(&mut module, id);
    let entry = function.entry_block().unwrap();
    let code = function.code_mut();
    let mut b = InstructionBuilder::new(code, entry);
    let i0 = b.get_argument(0).unwrap();
    let f1 = b.get_argument(1).unwrap();
    let i2 = b.get_argument(2).unwrap();
    b.ret(Some(i0)).unwrap();

    let (env, function) = module.env_and_function_mut(id).unwrap();
    let mut cache = AnalysisCache::new();
    let allocator = allocate_registers(&env, function, &mut cache).unwrap();

    assert_eq!(
        allocator.allocation_of(i0).unwrap().result,
        Allocation::Register(Amd64Register::Rdi)
    );
    assert_eq!(
        allocator.allocation_of(f1).unwrap().result,
        Allocation::Register(Amd64Register::Xmm0)
    );
    assert_eq!(
        allocator.allocation_of(i2).unwrap().result,
        Allocation::Register(Amd64Register::Rsi)
    );
    assert_eq!(allocator.allocation_of(f1).unwrap().class, RegisterClass::FloatingPoint);
}

/// Simultaneously live values of the same class never share a register,
/// and exhausting the class spills into the demand-grown spill area.
#[test]
fn interference_forces_distinct_registers_and_spills() {
    let mut module = Module::new();
    let id = define_function(&mut module, "pressure", None, None, None);

    let function = function_mut(&mut module, id);
    let entry = function.entry_block().unwrap();
    let code = function.code_mut();
    let mut b = InstructionBuilder::new(code, entry);
    let values: Vec<InstrRef> = (0..20)
        .map(|i| b.int_const(i).expect("constant"))
        .collect();
    // Keep all twenty alive across each other by folding them together
    // at the end.
    let mut acc = values[0];
    for value in &values[1..] {
        acc = b.int_add(OpWidth::W64, acc, *value).unwrap();
    }
    b.ret(Some(acc)).unwrap();

    let (env, function) = module.env_and_function_mut(id).unwrap();
    let mut cache = AnalysisCache::new();
    let allocator = allocate_registers(&env, function, &mut cache).unwrap();

    let mut registers = std::collections::BTreeSet::new();
    let mut spills = 0usize;
    for value in &values {
        match allocator.allocation_of(*value).unwrap().result {
            Allocation::Register(register) => {
                assert!(registers.insert(register), "register assigned twice");
            }
            Allocation::SpillSlot(_) => spills += 1,
            other => panic!("unexpected allocation {other:?}"),
        }
    }
    assert_eq!(registers.len() + spills, 20);
    assert!(spills >= 6, "14 general purpose registers cannot hold 20 values");
    assert!(allocator.spill_area_size() >= spills);

    // The interference graph recorded the conflicts that forced this.
    let neighbors = allocator.interference_of(values[0]).unwrap();
    assert!(neighbors.len() >= 19);
}

/// A phi output coalesces with its links: the hint chain from the
/// return value propagates backward so both sides of the diamond and
/// the phi land in RAX.
#[test]
fn phi_coalescing_propagates_register_hints() {
    let mut module = Module::new();
    let returns = scalar_type(&mut module, Typecode::Int, 1);
    let id = define_function(&mut module, "select", None, Some(returns), None);

    let function = function_mut(&mut module, id);
    let entry = function.entry_block().unwrap();
    let code = function.code_mut();
    let then_block = code.new_block(false);
    let else_block = code.new_block(false);
    let join = code.new_block(false);
    let mut b = InstructionBuilder::new(code, entry);
    let cond = b.int_const(1).unwrap();
    b.branch(BranchCondVariant::Bit64, cond, then_block, else_block)
        .unwrap();
    let a = b.at(then_block).int_const(10).unwrap();
    b.jump(join).unwrap();
    let c = b.at(else_block).int_const(20).unwrap();
    b.jump(join).unwrap();
    let (phi, output) = b.at(join).phi().unwrap();
    b.ret(Some(output)).unwrap();
    code.phi_attach(phi, then_block, a).unwrap();
    code.phi_attach(phi, else_block, c).unwrap();

    let (env, function) = module.env_and_function_mut(id).unwrap();
    let mut cache = AnalysisCache::new();
    let allocator = allocate_registers(&env, function, &mut cache).unwrap();

    assert_eq!(
        allocator.allocation_of(output).unwrap().result,
        Allocation::Register(Amd64Register::Rax)
    );
    let first_link = allocator.allocation_of(a).unwrap();
    assert_eq!(first_link.result, Allocation::Register(Amd64Register::Rax));
}

/// Inline assembly is rejected before any allocation state exists.
#[test]
fn inline_assembly_is_not_supported() {
    let mut module = Module::new();
    let fragment = module.add_asm_fragment("cpuid", vec!["rbx".into()], 0);
    let id = define_function(&mut module, "uses_asm", None, None, None);

    let function = function_mut(&mut module, id);
    let entry = function.entry_block().unwrap();
    let code = function.code_mut();
    let mut b = InstructionBuilder::new(code, entry);
    b.inline_assembly(fragment, 0).unwrap();
    b.ret(None).unwrap();

    let (env, function) = module.env_and_function_mut(id).unwrap();
    let mut cache = AnalysisCache::new();
    assert_eq!(
        allocate_registers(&env, function, &mut cache).unwrap_err(),
        IrError::NotImplemented("inline assembly in the sample register allocator")
    );
}
