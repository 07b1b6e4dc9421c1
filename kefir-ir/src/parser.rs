//! JSON debug dump reload.
//!
//! Rebuilds a module from the form produced by [`crate::printer`]. The
//! reload is bit-exact: entity ids, id allocator positions, list orders
//! and the use map all match the dumped module, so dumping the result
//! again yields identical text. The `meta_info.opcode_rev` stamp must
//! match this compiler's revision.

use crate::code::{
    AsmParameter, Block, CallNode, Code, InlineAsmNode, Instruction, InstrLink, ListEnds, PhiNode,
};
use crate::error::{IrError, IrResult};
use crate::function::{Function, FunctionDebugInfo};
use crate::id::{
    AsmFragmentId, AsmRef, BlockId, CallRef, FuncId, InstrRef, PhiRef, StringId, SymbolId, TypeId,
};
use crate::irtype::{Type, TypeEntry, Typecode};
use crate::module::{
    AsmFragment, DataObject, DataStorage, DebugAttribute, DebugAttributeValue, DebugEntry,
    FunctionDeclaration, Identifier, IdentifierKind, IdentifierVisibility, Module, StringLiteral,
    StringLiteralKind,
};
use crate::operation::{
    BranchCondVariant, Comparison, ExtWidth, FloatBinaryOp, FloatComparisonKind, FloatUnaryOp,
    FloatWidth, IntBinaryOp, IntComparisonKind, IntUnaryOp, LoadExtension, MemoryFlags,
    MemoryOrder, OpWidth, Operation, OverflowOp, TruncWidth,
};
use crate::OPCODES_REVISION;
use serde_json::Value;
use std::collections::BTreeMap;

/// Parses a module from its JSON debug text.
pub fn module_from_str(text: &str) -> IrResult<Module> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| IrError::ModuleFormat(err.to_string()))?;
    module_from_json(&value)
}

/// Parses a module from its JSON debug form.
pub fn module_from_json(value: &Value) -> IrResult<Module> {
    let root = as_object(value, "module")?;

    let meta = as_object(field(root, "meta_info")?, "meta_info")?;
    let revision = as_u64(field(meta, "opcode_rev")?, "opcode_rev")?;
    if revision != OPCODES_REVISION {
        return Err(IrError::OpcodeRevisionMismatch {
            found: revision,
            expected: OPCODES_REVISION,
        });
    }

    let mut module = Module::new();
    let mut max_symbol = 0u32;
    for entry in as_array(field(root, "identifiers")?, "identifiers")? {
        let entry = as_object(entry, "identifier")?;
        let id = SymbolId::new(as_u32(field(entry, "id")?, "identifier id")?);
        max_symbol = max_symbol.max(id.raw() + 1);
        module.identifiers.insert(
            id,
            Identifier {
                name: as_str(field(entry, "symbol")?, "identifier symbol")?.into(),
                kind: identifier_kind_from(as_str(field(entry, "type")?, "identifier type")?)?,
                visibility: identifier_visibility_from(as_str(
                    field(entry, "visibility")?,
                    "identifier visibility",
                )?)?,
            },
        );
    }

    for entry in as_array(field(root, "types")?, "types")? {
        let entry = as_object(entry, "type")?;
        let id = TypeId::new(as_u32(field(entry, "id")?, "type id")?);
        let mut entries = Vec::new();
        for item in as_array(field(entry, "type")?, "type entries")? {
            let item = as_object(item, "type entry")?;
            entries.push(TypeEntry {
                typecode: typecode_from(as_str(field(item, "type")?, "typecode")?)?,
                alignment: as_u32(field(item, "alignment")?, "type alignment")?,
                param: as_u64(field(item, "param")?, "type param")?,
            });
        }
        module.types.insert_with_id(id, Type::new(entries))?;
    }

    for entry in as_array(field(root, "data")?, "data")? {
        let entry = as_object(entry, "data object")?;
        let name = as_str(field(entry, "identifier")?, "data identifier")?.to_string();
        module.data.insert(
            name.clone(),
            DataObject {
                name,
                type_id: TypeId::new(as_u32(field(entry, "type")?, "data type")?),
                storage: match as_str(field(entry, "storage")?, "data storage")? {
                    "global" => DataStorage::Global,
                    "thread_local" => DataStorage::ThreadLocal,
                    other => {
                        return Err(IrError::ModuleFormat(format!(
                            "unknown data storage '{other}'"
                        )))
                    }
                },
                external: as_bool(field(entry, "external")?, "data external")?,
            },
        );
    }

    let mut max_string = 0u32;
    for entry in as_array(field(root, "string_literals")?, "string_literals")? {
        let entry = as_object(entry, "string literal")?;
        let id = StringId::new(as_u32(field(entry, "id")?, "string literal id")?);
        max_string = max_string.max(id.raw() + 1);
        let content = as_array(field(entry, "content")?, "string literal content")?
            .iter()
            .map(|byte| as_u64(byte, "string literal byte").map(|b| b as u8))
            .collect::<IrResult<Vec<u8>>>()?;
        module.string_literals.insert(
            id,
            StringLiteral {
                kind: string_literal_kind_from(as_str(field(entry, "kind")?, "string kind")?)?,
                public: as_bool(field(entry, "public")?, "string literal public")?,
                content,
            },
        );
    }

    let mut max_function = 0u32;
    for entry in as_array(field(root, "function_declarations")?, "function_declarations")? {
        let entry = as_object(entry, "function declaration")?;
        let id = FuncId::new(as_u32(field(entry, "id")?, "function declaration id")?);
        max_function = max_function.max(id.raw() + 1);
        module.function_declarations.insert(
            id,
            FunctionDeclaration {
                id,
                name: as_str(field(entry, "name")?, "function name")?.into(),
                parameters_type: opt_u32(field(entry, "parameters")?, "function parameters")?
                    .map(TypeId::new),
                returns_type: opt_u32(field(entry, "returns")?, "function returns")?
                    .map(TypeId::new),
                vararg: as_bool(field(entry, "vararg")?, "function vararg")?,
            },
        );
    }

    let mut max_fragment = 0u32;
    for entry in as_array(field(root, "inline_assembly")?, "inline_assembly")? {
        let entry = as_object(entry, "inline assembly fragment")?;
        let id = AsmFragmentId::new(as_u32(field(entry, "id")?, "fragment id")?);
        max_fragment = max_fragment.max(id.raw() + 1);
        module.asm_fragments.insert(
            id,
            AsmFragment {
                id,
                template: as_str(field(entry, "template")?, "fragment template")?.into(),
                clobbers: as_array(field(entry, "clobbers")?, "fragment clobbers")?
                    .iter()
                    .map(|c| as_str(c, "clobber").map(String::from))
                    .collect::<IrResult<Vec<_>>>()?,
                parameter_count: as_u64(field(entry, "parameter_count")?, "fragment parameters")?
                    as usize,
            },
        );
    }

    for entry in as_array(field(root, "functions")?, "functions")? {
        let function = function_from_json(entry)?;
        let id = function.declaration_id();
        if !module.function_declarations.contains_key(&id) {
            return Err(IrError::ModuleFormat(format!(
                "function {id} has no declaration"
            )));
        }
        module.functions.insert(id, function);
    }

    if let Some(debug) = root.get("debug_info") {
        let debug = as_object(debug, "debug_info")?;
        module.debug_entries.entries = as_array(field(debug, "entries")?, "debug entries")?
            .iter()
            .map(debug_entry_from_json)
            .collect::<IrResult<Vec<_>>>()?;
    }

    module.restore_counters(max_symbol, max_string, max_function, max_fragment);
    Ok(module)
}

fn function_from_json(value: &Value) -> IrResult<Function> {
    let object = as_object(value, "function")?;
    let id = FuncId::new(as_u32(field(object, "id")?, "function id")?);
    let locals_type = opt_u32(field(object, "locals_type")?, "locals type")?.map(TypeId::new);
    let code = code_from_json(field(object, "body")?)?;
    let mut debug_info = FunctionDebugInfo::default();
    if let Some(debug) = object.get("debug_info") {
        let debug = as_object(debug, "function debug info")?;
        for entry in as_array(field(debug, "local_variable_refs")?, "local variable refs")? {
            let entry = as_object(entry, "local variable ref")?;
            let local = InstrRef::new(as_u32(field(entry, "local")?, "local")?);
            for r in as_array(field(entry, "refs")?, "refs")? {
                debug_info.add_local_variable_ref(local, InstrRef::new(as_u32(r, "ref")?));
            }
        }
    }
    Ok(Function::restore_parts(id, locals_type, code, debug_info))
}

fn code_from_json(value: &Value) -> IrResult<Code> {
    let object = as_object(value, "code container")?;
    let mut code = Code::new();

    let next_ids = as_object(field(object, "next_ids")?, "next_ids")?;
    code.restore_counters(
        as_u32(field(next_ids, "instruction")?, "next instruction id")?,
        as_u32(field(next_ids, "phi")?, "next phi id")?,
        as_u32(field(next_ids, "block")?, "next block id")?,
        as_u32(field(next_ids, "call")?, "next call id")?,
        as_u32(field(next_ids, "inline_assembly")?, "next inline assembly id")?,
    );

    for block_value in as_array(field(object, "blocks")?, "blocks")? {
        let block_object = as_object(block_value, "block")?;
        let block_id = BlockId::new(as_u32(field(block_object, "id")?, "block id")?);

        let instructions = as_array(field(block_object, "instructions")?, "instructions")?;
        let instr_ids = instructions
            .iter()
            .map(|instr| {
                let instr = as_object(instr, "instruction")?;
                Ok(InstrRef::new(as_u32(field(instr, "id")?, "instruction id")?))
            })
            .collect::<IrResult<Vec<_>>>()?;
        for (position, instr_value) in instructions.iter().enumerate() {
            let instr_object = as_object(instr_value, "instruction")?;
            let id = instr_ids[position];
            let operation = operation_from_json(instr_object)?;
            code.restore_instruction(Instruction {
                id,
                block: block_id,
                operation,
                siblings: InstrLink {
                    prev: position.checked_sub(1).map(|p| instr_ids[p]),
                    next: instr_ids.get(position + 1).copied(),
                },
                control: InstrLink::default(),
                in_control: false,
            })?;
        }

        let control_ids = as_array(field(block_object, "control_flow")?, "control_flow")?
            .iter()
            .map(|id| Ok(InstrRef::new(as_u32(id, "control flow ref")?)))
            .collect::<IrResult<Vec<_>>>()?;
        for (position, id) in control_ids.iter().enumerate() {
            code.restore_control_link(
                *id,
                InstrLink {
                    prev: position.checked_sub(1).map(|p| control_ids[p]),
                    next: control_ids.get(position + 1).copied(),
                },
            )?;
        }

        let phis = as_array(field(block_object, "phi")?, "phi nodes")?;
        let phi_ids = phis
            .iter()
            .map(|phi| {
                let phi = as_object(phi, "phi node")?;
                Ok(PhiRef::new(as_u32(field(phi, "id")?, "phi id")?))
            })
            .collect::<IrResult<Vec<_>>>()?;
        for (position, phi_value) in phis.iter().enumerate() {
            let phi_object = as_object(phi_value, "phi node")?;
            let mut links = BTreeMap::new();
            for link in as_array(field(phi_object, "links")?, "phi links")? {
                let link = as_object(link, "phi link")?;
                links.insert(
                    BlockId::new(as_u32(field(link, "block")?, "phi link block")?),
                    InstrRef::new(as_u32(field(link, "value")?, "phi link value")?),
                );
            }
            code.restore_phi(PhiNode {
                id: phi_ids[position],
                block: block_id,
                output: InstrRef::new(as_u32(field(phi_object, "output")?, "phi output")?),
                links,
                prev: position.checked_sub(1).map(|p| phi_ids[p]),
                next: phi_ids.get(position + 1).copied(),
            })?;
        }

        let calls = as_array(field(block_object, "calls")?, "call sites")?;
        let call_ids = calls
            .iter()
            .map(|call| {
                let call = as_object(call, "call site")?;
                Ok(CallRef::new(as_u32(field(call, "id")?, "call id")?))
            })
            .collect::<IrResult<Vec<_>>>()?;
        for (position, call_value) in calls.iter().enumerate() {
            let call_object = as_object(call_value, "call site")?;
            let arguments = as_array(field(call_object, "arguments")?, "call arguments")?
                .iter()
                .map(|arg| Ok(opt_u32(arg, "call argument")?.map(InstrRef::new)))
                .collect::<IrResult<Vec<_>>>()?;
            code.restore_call(CallNode {
                id: call_ids[position],
                block: block_id,
                function: FuncId::new(as_u32(field(call_object, "function")?, "call function")?),
                output: InstrRef::new(as_u32(field(call_object, "output")?, "call output")?),
                arguments,
                return_space: opt_u32(field(call_object, "return_space")?, "return space")?
                    .map(InstrRef::new),
                prev: position.checked_sub(1).map(|p| call_ids[p]),
                next: call_ids.get(position + 1).copied(),
            })?;
        }

        let asms = as_array(field(block_object, "inline_assembly")?, "inline assembly sites")?;
        let asm_ids = asms
            .iter()
            .map(|asm| {
                let asm = as_object(asm, "inline assembly site")?;
                Ok(AsmRef::new(as_u32(field(asm, "id")?, "inline assembly id")?))
            })
            .collect::<IrResult<Vec<_>>>()?;
        for (position, asm_value) in asms.iter().enumerate() {
            let asm_object = as_object(asm_value, "inline assembly site")?;
            let parameters = as_array(field(asm_object, "parameters")?, "asm parameters")?
                .iter()
                .map(|param| {
                    let param = as_object(param, "asm parameter")?;
                    Ok(AsmParameter {
                        read: opt_u32(field(param, "read")?, "asm read ref")?.map(InstrRef::new),
                        load_store: opt_u32(field(param, "load_store")?, "asm load/store ref")?
                            .map(InstrRef::new),
                    })
                })
                .collect::<IrResult<Vec<_>>>()?;
            let mut jump_targets = BTreeMap::new();
            for target in as_array(field(asm_object, "jump_targets")?, "asm jump targets")? {
                let target = as_object(target, "asm jump target")?;
                jump_targets.insert(
                    as_u32(field(target, "label")?, "asm jump label")?,
                    BlockId::new(as_u32(field(target, "block")?, "asm jump block")?),
                );
            }
            code.restore_asm(InlineAsmNode {
                id: asm_ids[position],
                block: block_id,
                fragment: AsmFragmentId::new(as_u32(
                    field(asm_object, "fragment")?,
                    "asm fragment",
                )?),
                output: InstrRef::new(as_u32(field(asm_object, "output")?, "asm output")?),
                parameters,
                default_jump_target: opt_u32(
                    field(asm_object, "default_jump_target")?,
                    "asm default jump target",
                )?
                .map(BlockId::new),
                jump_targets,
                prev: position.checked_sub(1).map(|p| asm_ids[p]),
                next: asm_ids.get(position + 1).copied(),
            })?;
        }

        let public_labels = as_array(field(block_object, "public_labels")?, "public labels")?
            .iter()
            .map(|label| as_str(label, "public label").map(String::from))
            .collect::<IrResult<std::collections::BTreeSet<_>>>()?;
        code.restore_block(Block {
            id: block_id,
            content: ListEnds {
                head: instr_ids.first().copied(),
                tail: instr_ids.last().copied(),
            },
            control: ListEnds {
                head: control_ids.first().copied(),
                tail: control_ids.last().copied(),
            },
            phis: ListEnds {
                head: phi_ids.first().copied(),
                tail: phi_ids.last().copied(),
            },
            calls: ListEnds {
                head: call_ids.first().copied(),
                tail: call_ids.last().copied(),
            },
            inline_asms: ListEnds {
                head: asm_ids.first().copied(),
                tail: asm_ids.last().copied(),
            },
            public: as_bool(field(block_object, "public")?, "block public")?,
            public_labels,
        });
    }

    code.restore_entry_point(
        opt_u32(field(object, "entry_point")?, "entry point")?.map(BlockId::new),
    );
    code.rebuild_uses()?;
    Ok(code)
}

fn operation_from_json(instr: &serde_json::Map<String, Value>) -> IrResult<Operation> {
    let opcode = as_str(field(instr, "opcode")?, "opcode")?;
    let arg = instr.get("arg");
    let arg_required = || {
        arg.ok_or_else(|| IrError::ModuleFormat(format!("opcode '{opcode}' requires an argument")))
    };
    let arg_object = || as_object(arg_required()?, "instruction argument");

    Ok(match opcode {
        "int_const" => Operation::IntConst(as_i64(arg_required()?, "int constant")?),
        "uint_const" => Operation::UintConst(as_u64(arg_required()?, "uint constant")?),
        "float32_const" => Operation::Float32Const(as_f64(arg_required()?, "float32")? as f32),
        "float64_const" => Operation::Float64Const(as_f64(arg_required()?, "float64")?),
        "long_double_const" => {
            Operation::LongDoubleConst(as_f64(arg_required()?, "long double")?)
        }
        "string_ref" => Operation::StringRef(StringId::new(as_u32(arg_required()?, "string")?)),
        "block_address" => {
            Operation::BlockAddress(BlockId::new(as_u32(arg_required()?, "block address")?))
        }
        "int_unary" => {
            let object = arg_object()?;
            Operation::IntUnary {
                op: int_unary_from(as_str(field(object, "operation")?, "unary operation")?)?,
                width: op_width_from(as_u64(field(object, "width")?, "width")?)?,
                arg: InstrRef::new(as_u32(field(object, "ref")?, "operand")?),
            }
        }
        "int_binary" => {
            let object = arg_object()?;
            Operation::IntBinary {
                op: int_binary_from(as_str(field(object, "operation")?, "binary operation")?)?,
                width: op_width_from(as_u64(field(object, "width")?, "width")?)?,
                args: refs2(object)?,
            }
        }
        "float_unary" => {
            let object = arg_object()?;
            Operation::FloatUnary {
                op: match as_str(field(object, "operation")?, "float unary")? {
                    "neg" => FloatUnaryOp::Neg,
                    other => {
                        return Err(IrError::ModuleFormat(format!(
                            "unknown float unary operation '{other}'"
                        )))
                    }
                },
                width: float_width_from(as_u64(field(object, "width")?, "float width")?)?,
                arg: InstrRef::new(as_u32(field(object, "ref")?, "operand")?),
            }
        }
        "float_binary" => {
            let object = arg_object()?;
            Operation::FloatBinary {
                op: float_binary_from(as_str(field(object, "operation")?, "float binary")?)?,
                width: float_width_from(as_u64(field(object, "width")?, "float width")?)?,
                args: refs2(object)?,
            }
        }
        "int_sign_extend" | "int_zero_extend" => {
            let object = arg_object()?;
            let from = ext_width_from(as_u64(field(object, "from")?, "extension width")?)?;
            let arg = InstrRef::new(as_u32(field(object, "ref")?, "operand")?);
            if opcode == "int_sign_extend" {
                Operation::IntSignExtend { from, arg }
            } else {
                Operation::IntZeroExtend { from, arg }
            }
        }
        "int_truncate" => {
            let object = arg_object()?;
            Operation::IntTruncate {
                to: trunc_width_from(as_u64(field(object, "to")?, "truncation width")?)?,
                arg: InstrRef::new(as_u32(field(object, "ref")?, "operand")?),
            }
        }
        "compare" => {
            let object = arg_object()?;
            Operation::Compare {
                comparison: comparison_from(field(object, "comparison")?)?,
                args: refs2(object)?,
            }
        }
        "load" => {
            let object = arg_object()?;
            Operation::Load {
                width: op_width_from(as_u64(field(object, "width")?, "load width")?)?,
                flags: memory_flags_from(field(object, "memory_flags")?)?,
                location: InstrRef::new(as_u32(field(object, "location")?, "load location")?),
            }
        }
        "store" => {
            let object = arg_object()?;
            Operation::Store {
                width: op_width_from(as_u64(field(object, "width")?, "store width")?)?,
                flags: memory_flags_from(field(object, "memory_flags")?)?,
                location: InstrRef::new(as_u32(field(object, "location")?, "store location")?),
                value: InstrRef::new(as_u32(field(object, "value")?, "store value")?),
            }
        }
        "atomic_load" => {
            let object = arg_object()?;
            Operation::AtomicLoad {
                width: op_width_from(as_u64(field(object, "width")?, "atomic load width")?)?,
                model: memory_order_from(as_str(field(object, "memory_order")?, "memory order")?)?,
                location: InstrRef::new(as_u32(field(object, "location")?, "atomic location")?),
            }
        }
        "atomic_store" => {
            let object = arg_object()?;
            Operation::AtomicStore {
                width: op_width_from(as_u64(field(object, "width")?, "atomic store width")?)?,
                model: memory_order_from(as_str(field(object, "memory_order")?, "memory order")?)?,
                location: InstrRef::new(as_u32(field(object, "location")?, "atomic location")?),
                value: InstrRef::new(as_u32(field(object, "value")?, "atomic value")?),
            }
        }
        "alloc_local" => {
            let object = arg_object()?;
            Operation::AllocLocal {
                type_id: TypeId::new(as_u32(field(object, "type")?, "allocation type")?),
                type_index: as_u64(field(object, "index")?, "allocation index")? as usize,
            }
        }
        "get_local" => {
            let object = arg_object()?;
            Operation::GetLocal {
                index: as_u64(field(object, "index")?, "local index")? as usize,
                offset: as_i64(field(object, "offset")?, "local offset")?,
            }
        }
        "get_global" | "get_thread_local" => {
            let object = arg_object()?;
            let symbol = SymbolId::new(as_u32(field(object, "identifier")?, "symbol")?);
            let offset = as_i64(field(object, "offset")?, "symbol offset")?;
            if opcode == "get_global" {
                Operation::GetGlobal { symbol, offset }
            } else {
                Operation::GetThreadLocal { symbol, offset }
            }
        }
        "stack_alloc" => {
            let object = arg_object()?;
            Operation::StackAlloc {
                size: InstrRef::new(as_u32(field(object, "size")?, "stack alloc size")?),
                alignment: InstrRef::new(as_u32(
                    field(object, "alignment")?,
                    "stack alloc alignment",
                )?),
                within_scope: as_bool(field(object, "within_scope")?, "within scope")?,
            }
        }
        "jump" => {
            let object = arg_object()?;
            Operation::Jump {
                target: BlockId::new(as_u32(field(object, "target_block")?, "jump target")?),
            }
        }
        "branch" => {
            let object = arg_object()?;
            Operation::Branch {
                variant: branch_variant_from(as_str(
                    field(object, "condition_variant")?,
                    "condition variant",
                )?)?,
                condition: InstrRef::new(as_u32(field(object, "condition")?, "condition")?),
                target: BlockId::new(as_u32(field(object, "target_block")?, "branch target")?),
                alternative: BlockId::new(as_u32(
                    field(object, "alternative_block")?,
                    "branch alternative",
                )?),
            }
        }
        "branch_compare" => {
            let object = arg_object()?;
            Operation::BranchCompare {
                comparison: comparison_from(field(object, "comparison")?)?,
                args: refs2(object)?,
                target: BlockId::new(as_u32(field(object, "target_block")?, "branch target")?),
                alternative: BlockId::new(as_u32(
                    field(object, "alternative_block")?,
                    "branch alternative",
                )?),
            }
        }
        "indirect_jump" => Operation::IndirectJump {
            target: InstrRef::new(as_u32(field(arg_object()?, "ref")?, "indirect target")?),
        },
        "invoke" | "tail_invoke" => {
            let object = arg_object()?;
            let call = CallRef::new(as_u32(field(object, "call_ref")?, "call ref")?);
            let indirect_target =
                opt_u32(field(object, "indirect_ref")?, "indirect ref")?.map(InstrRef::new);
            if opcode == "invoke" {
                Operation::Call {
                    call,
                    indirect_target,
                }
            } else {
                Operation::TailCall {
                    call,
                    indirect_target,
                }
            }
        }
        "return" => Operation::Return {
            value: opt_u32(field(arg_object()?, "ref")?, "return value")?.map(InstrRef::new),
        },
        "inline_assembly" => Operation::InlineAsm {
            asm: AsmRef::new(as_u32(field(arg_object()?, "inline_asm_ref")?, "asm ref")?),
        },
        "phi" => Operation::Phi {
            phi: PhiRef::new(as_u32(field(arg_object()?, "phi_ref")?, "phi ref")?),
        },
        "get_argument" => Operation::GetArgument {
            index: as_u64(field(arg_object()?, "index")?, "argument index")? as usize,
        },
        "scope_push" => Operation::ScopePush,
        "scope_pop" => Operation::ScopePop {
            scope: InstrRef::new(as_u32(field(arg_object()?, "ref")?, "scope")?),
        },
        "vararg_start" => Operation::VarargStart {
            target: InstrRef::new(as_u32(field(arg_object()?, "ref")?, "vararg target")?),
        },
        "vararg_end" => Operation::VarargEnd {
            target: InstrRef::new(as_u32(field(arg_object()?, "ref")?, "vararg target")?),
        },
        "vararg_copy" => {
            let refs = refs2(arg_object()?)?;
            Operation::VarargCopy {
                destination: refs[0],
                source: refs[1],
            }
        }
        "vararg_get" => {
            let object = arg_object()?;
            Operation::VarargGet {
                source: InstrRef::new(as_u32(field(object, "ref")?, "vararg source")?),
                type_id: TypeId::new(as_u32(field(object, "type")?, "vararg type")?),
                type_index: as_u64(field(object, "index")?, "vararg type index")? as usize,
            }
        }
        "overflow_arith" => {
            let object = arg_object()?;
            let refs = as_array(field(object, "refs")?, "overflow refs")?;
            if refs.len() != 3 {
                return Err(IrError::ModuleFormat(
                    "overflow_arith requires three references".into(),
                ));
            }
            Operation::OverflowArith {
                op: match as_str(field(object, "operation")?, "overflow operation")? {
                    "add" => OverflowOp::Add,
                    "sub" => OverflowOp::Sub,
                    "mul" => OverflowOp::Mul,
                    other => {
                        return Err(IrError::ModuleFormat(format!(
                            "unknown overflow operation '{other}'"
                        )))
                    }
                },
                signedness: as_u64(field(object, "signedness")?, "signedness")? as u8,
                args: [
                    InstrRef::new(as_u32(&refs[0], "overflow operand")?),
                    InstrRef::new(as_u32(&refs[1], "overflow operand")?),
                ],
                result_ptr: InstrRef::new(as_u32(&refs[2], "overflow result pointer")?),
            }
        }
        other => {
            return Err(IrError::ModuleFormat(format!("unknown opcode '{other}'")));
        }
    })
}

fn debug_entry_from_json(value: &Value) -> IrResult<DebugEntry> {
    let object = as_object(value, "debug entry")?;
    let mut attributes = Vec::new();
    for attr in as_array(field(object, "attributes")?, "debug attributes")? {
        let attr = as_object(attr, "debug attribute")?;
        let value = field(attr, "value")?;
        let value = match as_str(field(attr, "type")?, "debug attribute type")? {
            "integer" => DebugAttributeValue::Integer(as_i64(value, "debug integer")?),
            "unsigned" => DebugAttributeValue::Unsigned(as_u64(value, "debug unsigned")?),
            "string" => DebugAttributeValue::String(as_str(value, "debug string")?.into()),
            other => {
                return Err(IrError::ModuleFormat(format!(
                    "unknown debug attribute type '{other}'"
                )))
            }
        };
        attributes.push(DebugAttribute {
            name: as_str(field(attr, "name")?, "debug attribute name")?.into(),
            value,
        });
    }
    Ok(DebugEntry {
        id: as_u32(field(object, "id")?, "debug entry id")?,
        tag: as_str(field(object, "tag")?, "debug entry tag")?.into(),
        attributes,
        children: as_array(field(object, "children")?, "debug children")?
            .iter()
            .map(debug_entry_from_json)
            .collect::<IrResult<Vec<_>>>()?,
    })
}

// -------------------------------------------------------------------------
// JSON access helpers
// -------------------------------------------------------------------------

fn format_err(what: &str) -> IrError {
    IrError::ModuleFormat(format!("malformed or missing {what}"))
}

fn field<'a>(object: &'a serde_json::Map<String, Value>, key: &str) -> IrResult<&'a Value> {
    object
        .get(key)
        .ok_or_else(|| IrError::ModuleFormat(format!("missing field '{key}'")))
}

fn as_object<'a>(value: &'a Value, what: &str) -> IrResult<&'a serde_json::Map<String, Value>> {
    value.as_object().ok_or_else(|| format_err(what))
}

fn as_array<'a>(value: &'a Value, what: &str) -> IrResult<&'a Vec<Value>> {
    value.as_array().ok_or_else(|| format_err(what))
}

fn as_str<'a>(value: &'a Value, what: &str) -> IrResult<&'a str> {
    value.as_str().ok_or_else(|| format_err(what))
}

fn as_bool(value: &Value, what: &str) -> IrResult<bool> {
    value.as_bool().ok_or_else(|| format_err(what))
}

fn as_u64(value: &Value, what: &str) -> IrResult<u64> {
    value.as_u64().ok_or_else(|| format_err(what))
}

fn as_i64(value: &Value, what: &str) -> IrResult<i64> {
    value.as_i64().ok_or_else(|| format_err(what))
}

fn as_f64(value: &Value, what: &str) -> IrResult<f64> {
    value.as_f64().ok_or_else(|| format_err(what))
}

fn as_u32(value: &Value, what: &str) -> IrResult<u32> {
    let raw = as_u64(value, what)?;
    u32::try_from(raw).map_err(|_| format_err(what))
}

fn opt_u32(value: &Value, what: &str) -> IrResult<Option<u32>> {
    if value.is_null() {
        Ok(None)
    } else {
        as_u32(value, what).map(Some)
    }
}

fn refs2(object: &serde_json::Map<String, Value>) -> IrResult<[InstrRef; 2]> {
    let refs = as_array(field(object, "refs")?, "operand references")?;
    if refs.len() != 2 {
        return Err(IrError::ModuleFormat(
            "expected exactly two operand references".into(),
        ));
    }
    Ok([
        InstrRef::new(as_u32(&refs[0], "operand reference")?),
        InstrRef::new(as_u32(&refs[1], "operand reference")?),
    ])
}

// -------------------------------------------------------------------------
// Enum name decoding
// -------------------------------------------------------------------------

fn identifier_kind_from(name: &str) -> IrResult<IdentifierKind> {
    Ok(match name {
        "global" => IdentifierKind::Global,
        "thread_local" => IdentifierKind::ThreadLocal,
        "function" => IdentifierKind::Function,
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown identifier kind '{other}'"
            )))
        }
    })
}

fn identifier_visibility_from(name: &str) -> IrResult<IdentifierVisibility> {
    Ok(match name {
        "default" => IdentifierVisibility::Default,
        "hidden" => IdentifierVisibility::Hidden,
        "protected" => IdentifierVisibility::Protected,
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown identifier visibility '{other}'"
            )))
        }
    })
}

fn string_literal_kind_from(name: &str) -> IrResult<StringLiteralKind> {
    Ok(match name {
        "multibyte" => StringLiteralKind::Multibyte,
        "unicode16" => StringLiteralKind::Unicode16,
        "unicode32" => StringLiteralKind::Unicode32,
        "wide" => StringLiteralKind::Wide,
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown string literal kind '{other}'"
            )))
        }
    })
}

fn typecode_from(name: &str) -> IrResult<Typecode> {
    Ok(match name {
        "bool" => Typecode::Bool,
        "char" => Typecode::Char,
        "short" => Typecode::Short,
        "int" => Typecode::Int,
        "long" => Typecode::Long,
        "word" => Typecode::Word,
        "int8" => Typecode::Int8,
        "int16" => Typecode::Int16,
        "int32" => Typecode::Int32,
        "int64" => Typecode::Int64,
        "float32" => Typecode::Float32,
        "float64" => Typecode::Float64,
        "long_double" => Typecode::LongDouble,
        "struct" => Typecode::Struct,
        "array" => Typecode::Array,
        "union" => Typecode::Union,
        "bits" => Typecode::Bits,
        "builtin" => Typecode::Builtin,
        "complex_float32" => Typecode::ComplexFloat32,
        "complex_float64" => Typecode::ComplexFloat64,
        "complex_long_double" => Typecode::ComplexLongDouble,
        other => return Err(IrError::ModuleFormat(format!("unknown typecode '{other}'"))),
    })
}

fn int_unary_from(name: &str) -> IrResult<IntUnaryOp> {
    Ok(match name {
        "neg" => IntUnaryOp::Neg,
        "not" => IntUnaryOp::Not,
        "bool_not" => IntUnaryOp::BoolNot,
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown integer unary operation '{other}'"
            )))
        }
    })
}

fn int_binary_from(name: &str) -> IrResult<IntBinaryOp> {
    Ok(match name {
        "add" => IntBinaryOp::Add,
        "sub" => IntBinaryOp::Sub,
        "mul" => IntBinaryOp::Mul,
        "div" => IntBinaryOp::Div,
        "mod" => IntBinaryOp::Mod,
        "udiv" => IntBinaryOp::Udiv,
        "umod" => IntBinaryOp::Umod,
        "and" => IntBinaryOp::And,
        "or" => IntBinaryOp::Or,
        "xor" => IntBinaryOp::Xor,
        "shl" => IntBinaryOp::Shl,
        "shr" => IntBinaryOp::Shr,
        "sar" => IntBinaryOp::Sar,
        "bool_and" => IntBinaryOp::BoolAnd,
        "bool_or" => IntBinaryOp::BoolOr,
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown integer binary operation '{other}'"
            )))
        }
    })
}

fn float_binary_from(name: &str) -> IrResult<FloatBinaryOp> {
    Ok(match name {
        "add" => FloatBinaryOp::Add,
        "sub" => FloatBinaryOp::Sub,
        "mul" => FloatBinaryOp::Mul,
        "div" => FloatBinaryOp::Div,
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown float binary operation '{other}'"
            )))
        }
    })
}

fn op_width_from(bits: u64) -> IrResult<OpWidth> {
    Ok(match bits {
        8 => OpWidth::W8,
        16 => OpWidth::W16,
        32 => OpWidth::W32,
        64 => OpWidth::W64,
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown operand width {other}"
            )))
        }
    })
}

fn float_width_from(bits: u64) -> IrResult<FloatWidth> {
    Ok(match bits {
        32 => FloatWidth::F32,
        64 => FloatWidth::F64,
        other => return Err(IrError::ModuleFormat(format!("unknown float width {other}"))),
    })
}

fn ext_width_from(bits: u64) -> IrResult<ExtWidth> {
    Ok(match bits {
        8 => ExtWidth::W8,
        16 => ExtWidth::W16,
        32 => ExtWidth::W32,
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown extension width {other}"
            )))
        }
    })
}

fn trunc_width_from(bits: u64) -> IrResult<TruncWidth> {
    Ok(match bits {
        1 => TruncWidth::W1,
        8 => TruncWidth::W8,
        16 => TruncWidth::W16,
        32 => TruncWidth::W32,
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown truncation width {other}"
            )))
        }
    })
}

fn memory_flags_from(value: &Value) -> IrResult<MemoryFlags> {
    let object = as_object(value, "memory flags")?;
    let load_extension = match as_str(field(object, "load_extension")?, "load extension")? {
        "none" => LoadExtension::None,
        "sign" => LoadExtension::Sign,
        "zero" => LoadExtension::Zero,
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown load extension '{other}'"
            )))
        }
    };
    let volatile = as_bool(field(object, "volatile")?, "volatile flag")?;
    Ok(MemoryFlags {
        load_extension,
        volatile,
    })
}

fn memory_order_from(name: &str) -> IrResult<MemoryOrder> {
    Ok(match name {
        "seq_cst" => MemoryOrder::SeqCst,
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown memory order '{other}'"
            )))
        }
    })
}

fn branch_variant_from(name: &str) -> IrResult<BranchCondVariant> {
    Ok(match name {
        "8bit" => BranchCondVariant::Bit8,
        "negated_8bit" => BranchCondVariant::NegatedBit8,
        "16bit" => BranchCondVariant::Bit16,
        "negated_16bit" => BranchCondVariant::NegatedBit16,
        "32bit" => BranchCondVariant::Bit32,
        "negated_32bit" => BranchCondVariant::NegatedBit32,
        "64bit" => BranchCondVariant::Bit64,
        "negated_64bit" => BranchCondVariant::NegatedBit64,
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown branch condition variant '{other}'"
            )))
        }
    })
}

fn int_comparison_from(name: &str) -> IrResult<IntComparisonKind> {
    Ok(match name {
        "equals" => IntComparisonKind::Equals,
        "not_equals" => IntComparisonKind::NotEquals,
        "greater" => IntComparisonKind::Greater,
        "greater_or_equals" => IntComparisonKind::GreaterOrEquals,
        "lesser" => IntComparisonKind::Lesser,
        "lesser_or_equals" => IntComparisonKind::LesserOrEquals,
        "above" => IntComparisonKind::Above,
        "above_or_equals" => IntComparisonKind::AboveOrEquals,
        "below" => IntComparisonKind::Below,
        "below_or_equals" => IntComparisonKind::BelowOrEquals,
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown integer comparison '{other}'"
            )))
        }
    })
}

fn float_comparison_from(name: &str) -> IrResult<FloatComparisonKind> {
    Ok(match name {
        "equal" => FloatComparisonKind::Equal,
        "not_equal" => FloatComparisonKind::NotEqual,
        "greater" => FloatComparisonKind::Greater,
        "greater_or_equal" => FloatComparisonKind::GreaterOrEqual,
        "lesser" => FloatComparisonKind::Lesser,
        "lesser_or_equal" => FloatComparisonKind::LesserOrEqual,
        "not_greater" => FloatComparisonKind::NotGreater,
        "not_greater_or_equal" => FloatComparisonKind::NotGreaterOrEqual,
        "not_lesser" => FloatComparisonKind::NotLesser,
        "not_lesser_or_equal" => FloatComparisonKind::NotLesserOrEqual,
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown float comparison '{other}'"
            )))
        }
    })
}

fn comparison_from(value: &Value) -> IrResult<Comparison> {
    let object = as_object(value, "comparison")?;
    Ok(match as_str(field(object, "class")?, "comparison class")? {
        "int" => Comparison::Int {
            width: op_width_from(as_u64(field(object, "width")?, "comparison width")?)?,
            kind: int_comparison_from(as_str(field(object, "operation")?, "comparison kind")?)?,
        },
        "float32" => Comparison::Float32(float_comparison_from(as_str(
            field(object, "operation")?,
            "comparison kind",
        )?)?),
        "float64" => Comparison::Float64(float_comparison_from(as_str(
            field(object, "operation")?,
            "comparison kind",
        )?)?),
        other => {
            return Err(IrError::ModuleFormat(format!(
                "unknown comparison class '{other}'"
            )))
        }
    })
}
