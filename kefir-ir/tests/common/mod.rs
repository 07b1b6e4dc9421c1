#![allow(dead_code)]

use kefir_ir::code::Code;
use kefir_ir::function::Function;
use kefir_ir::id::{FuncId, TypeId};
use kefir_ir::irtype::{Type, TypeEntry, Typecode};
use kefir_ir::module::Module;
use kefir_ir::operation::Operation;

/// Adds a flat type of `entries` scalar entries with the given typecode.
pub fn scalar_type(module: &mut Module, typecode: Typecode, entries: usize) -> TypeId {
    module
        .types
        .add(Type::new(vec![TypeEntry::scalar(typecode); entries]))
}

/// Declares and defines a function with an entry block in place.
pub fn define_function(
    module: &mut Module,
    name: &str,
    params: Option<TypeId>,
    returns: Option<TypeId>,
    locals: Option<TypeId>,
) -> FuncId {
    let id = module.declare_function(name, params, returns, false);
    let function = Function::with_entry(id, locals).expect("fresh function must accept an entry");
    module.define_function(function).expect("unique definition");
    id
}

pub fn function(module: &Module, id: FuncId) -> &Function {
    module.function(id).expect("function must be defined")
}

pub fn function_mut(module: &mut Module, id: FuncId) -> &mut Function {
    module.functions.get_mut(&id).expect("function must be defined")
}

/// Counts instructions across all blocks matching the predicate.
pub fn count_ops(code: &Code, pred: impl Fn(&Operation) -> bool) -> usize {
    let mut count = 0;
    for block in code.blocks() {
        for instr in code
            .block_instr_iter(block.id())
            .expect("block iteration over a live block")
        {
            if pred(code.instr(instr).expect("live instruction").operation()) {
                count += 1;
            }
        }
    }
    count
}

pub fn count_loads(code: &Code) -> usize {
    count_ops(code, |op| matches!(op, Operation::Load { .. }))
}

pub fn count_stores(code: &Code) -> usize {
    count_ops(code, |op| matches!(op, Operation::Store { .. }))
}

pub fn count_phis(code: &Code) -> usize {
    count_ops(code, |op| matches!(op, Operation::Phi { .. }))
}
