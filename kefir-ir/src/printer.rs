//! JSON debug dump of a module.
//!
//! The dump is the module's external debug interface: identifiers,
//! types, data, string literals, function declarations, function bodies,
//! inline assembly fragments, optionally the debug information tree, and
//! a `meta_info.opcode_rev` stamp checked on reload. The layout is
//! deterministic (module tables serialize in emission order, code
//! containers in ascending block id with instructions in sibling order),
//! so dump, reload and dump again produces byte-identical text.

use crate::code::Code;
use crate::error::IrResult;
use crate::function::Function;
use crate::module::{
    DebugAttributeValue, DebugEntry, IdentifierKind, IdentifierVisibility, Module,
    StringLiteralKind,
};
use crate::operation::{
    BranchCondVariant, Comparison, ExtWidth, FloatBinaryOp, FloatComparisonKind, FloatUnaryOp,
    FloatWidth, IntBinaryOp, IntComparisonKind, IntUnaryOp, LoadExtension, MemoryFlags,
    MemoryOrder, OpWidth, Operation, OverflowOp, TruncWidth,
};
use crate::OPCODES_REVISION;
use serde_json::{json, Map, Value};

/// Serializes the module into its JSON debug form. `debug_info` controls
/// whether the debug information tree and per-function debug bookkeeping
/// are included.
pub fn module_to_json(module: &Module, debug_info: bool) -> IrResult<Value> {
    let mut root = Map::new();
    root.insert(
        "identifiers".into(),
        Value::Array(
            module
                .identifiers
                .iter()
                .map(|(id, ident)| {
                    json!({
                        "id": id.raw(),
                        "symbol": ident.name,
                        "type": identifier_kind(ident.kind),
                        "visibility": identifier_visibility(ident.visibility),
                    })
                })
                .collect(),
        ),
    );
    root.insert(
        "types".into(),
        Value::Array(
            module
                .types
                .iter()
                .map(|(id, ty)| {
                    json!({
                        "id": id.raw(),
                        "type": ty.entries.iter().map(|entry| {
                            json!({
                                "type": typecode_name(entry.typecode),
                                "alignment": entry.alignment,
                                "param": entry.param,
                            })
                        }).collect::<Vec<_>>(),
                    })
                })
                .collect(),
        ),
    );
    root.insert(
        "data".into(),
        Value::Array(
            module
                .data
                .values()
                .map(|data| {
                    json!({
                        "identifier": data.name,
                        "type": data.type_id.raw(),
                        "storage": match data.storage {
                            crate::module::DataStorage::Global => "global",
                            crate::module::DataStorage::ThreadLocal => "thread_local",
                        },
                        "external": data.external,
                    })
                })
                .collect(),
        ),
    );
    root.insert(
        "string_literals".into(),
        Value::Array(
            module
                .string_literals
                .iter()
                .map(|(id, literal)| {
                    json!({
                        "id": id.raw(),
                        "kind": string_literal_kind(literal.kind),
                        "public": literal.public,
                        "content": literal.content,
                    })
                })
                .collect(),
        ),
    );
    root.insert(
        "function_declarations".into(),
        Value::Array(
            module
                .function_declarations
                .values()
                .map(|decl| {
                    json!({
                        "id": decl.id.raw(),
                        "name": decl.name,
                        "parameters": decl.parameters_type.map(|t| t.raw()),
                        "returns": decl.returns_type.map(|t| t.raw()),
                        "vararg": decl.vararg,
                    })
                })
                .collect(),
        ),
    );
    root.insert(
        "functions".into(),
        Value::Array(
            module
                .functions
                .values()
                .map(|function| function_to_json(function, debug_info))
                .collect::<IrResult<Vec<_>>>()?,
        ),
    );
    root.insert(
        "inline_assembly".into(),
        Value::Array(
            module
                .asm_fragments
                .iter()
                .map(|(id, fragment)| {
                    json!({
                        "id": id.raw(),
                        "template": fragment.template,
                        "parameter_count": fragment.parameter_count,
                        "clobbers": fragment.clobbers,
                    })
                })
                .collect(),
        ),
    );
    if debug_info {
        root.insert(
            "debug_info".into(),
            json!({
                "entries": module
                    .debug_entries
                    .entries
                    .iter()
                    .map(debug_entry_to_json)
                    .collect::<Vec<_>>(),
            }),
        );
    }
    root.insert(
        "meta_info".into(),
        json!({ "opcode_rev": OPCODES_REVISION }),
    );
    Ok(Value::Object(root))
}

/// Serializes the module into pretty-printed JSON text.
pub fn module_to_string(module: &Module, debug_info: bool) -> IrResult<String> {
    let value = module_to_json(module, debug_info)?;
    serde_json::to_string_pretty(&value)
        .map_err(|err| crate::error::IrError::ModuleFormat(err.to_string()))
}

fn function_to_json(function: &Function, debug_info: bool) -> IrResult<Value> {
    let mut object = Map::new();
    object.insert("id".into(), json!(function.declaration_id().raw()));
    object.insert(
        "locals_type".into(),
        json!(function.locals_type_id().map(|t| t.raw())),
    );
    object.insert("body".into(), code_to_json(function.code())?);
    if debug_info {
        let mut locals = Vec::new();
        for block in function.code().blocks() {
            for instr in function.code().block_instr_iter(block.id())? {
                if let Some(refs) = function.debug_info().local_variable_refs(instr) {
                    locals.push(json!({
                        "local": instr.raw(),
                        "refs": refs.iter().map(|r| r.raw()).collect::<Vec<_>>(),
                    }));
                }
            }
        }
        object.insert(
            "debug_info".into(),
            json!({ "local_variable_refs": locals }),
        );
    }
    Ok(Value::Object(object))
}

fn code_to_json(code: &Code) -> IrResult<Value> {
    let mut blocks = Vec::new();
    for block in code.blocks() {
        let mut phis = Vec::new();
        for phi in code.block_phi_iter(block.id())? {
            let node = code.phi(phi)?;
            phis.push(json!({
                "id": phi.raw(),
                "output": node.output().raw(),
                "links": node.links().map(|(pred, value)| {
                    json!({ "block": pred.raw(), "value": value.raw() })
                }).collect::<Vec<_>>(),
            }));
        }
        let mut calls = Vec::new();
        for call in code.block_call_iter(block.id())? {
            let node = code.call(call)?;
            calls.push(json!({
                "id": call.raw(),
                "output": node.output().raw(),
                "function": node.function().raw(),
                "arguments": node.arguments().map(|arg| arg.map(|a| a.raw())).collect::<Vec<_>>(),
                "return_space": node.return_space().map(|r| r.raw()),
            }));
        }
        let mut inline_asm = Vec::new();
        for asm in code.block_inline_asm_iter(block.id())? {
            let node = code.inline_assembly(asm)?;
            inline_asm.push(json!({
                "id": asm.raw(),
                "output": node.output().raw(),
                "fragment": node.fragment().raw(),
                "parameters": node.parameters().iter().map(|param| {
                    json!({
                        "read": param.read.map(|r| r.raw()),
                        "load_store": param.load_store.map(|r| r.raw()),
                    })
                }).collect::<Vec<_>>(),
                "default_jump_target": node.default_jump_target().map(|b| b.raw()),
                "jump_targets": node.jump_targets().map(|(label, target)| {
                    json!({ "label": label, "block": target.raw() })
                }).collect::<Vec<_>>(),
            }));
        }
        let mut instructions = Vec::new();
        for instr in code.block_instr_iter(block.id())? {
            instructions.push(instruction_to_json(code, instr)?);
        }
        let control_flow: Vec<u32> = code
            .block_control_iter(block.id())?
            .map(|i| i.raw())
            .collect();
        blocks.push(json!({
            "id": block.id().raw(),
            "public": block.public,
            "public_labels": block.public_labels().collect::<Vec<_>>(),
            "phi": phis,
            "calls": calls,
            "inline_assembly": inline_asm,
            "instructions": instructions,
            "control_flow": control_flow,
        }));
    }
    Ok(json!({
        "entry_point": code.entry_point().map(|b| b.raw()),
        "next_ids": {
            "instruction": code.next_instr_id(),
            "phi": code.next_phi_id(),
            "block": code.next_block_id(),
            "call": code.next_call_id(),
            "inline_assembly": code.next_asm_id(),
        },
        "blocks": blocks,
    }))
}

fn instruction_to_json(code: &Code, instr: crate::id::InstrRef) -> IrResult<Value> {
    let operation = code.instr(instr)?.operation();
    let mut object = Map::new();
    object.insert("id".into(), json!(instr.raw()));
    object.insert("opcode".into(), json!(operation.mnemonic()));
    if let Some(arg) = operation_arg(operation) {
        object.insert("arg".into(), arg);
    }
    Ok(Value::Object(object))
}

fn operation_arg(operation: &Operation) -> Option<Value> {
    Some(match *operation {
        Operation::IntConst(value) => json!(value),
        Operation::UintConst(value) => json!(value),
        Operation::Float32Const(value) => json!(value),
        Operation::Float64Const(value) | Operation::LongDoubleConst(value) => json!(value),
        Operation::StringRef(id) => json!(id.raw()),
        Operation::BlockAddress(id) => json!(id.raw()),
        Operation::IntUnary { op, width, arg } => json!({
            "operation": int_unary_name(op),
            "width": width.bits(),
            "ref": arg.raw(),
        }),
        Operation::IntBinary { op, width, args } => json!({
            "operation": int_binary_name(op),
            "width": width.bits(),
            "refs": [args[0].raw(), args[1].raw()],
        }),
        Operation::FloatUnary { op, width, arg } => json!({
            "operation": float_unary_name(op),
            "width": float_width_bits(width),
            "ref": arg.raw(),
        }),
        Operation::FloatBinary { op, width, args } => json!({
            "operation": float_binary_name(op),
            "width": float_width_bits(width),
            "refs": [args[0].raw(), args[1].raw()],
        }),
        Operation::IntSignExtend { from, arg } | Operation::IntZeroExtend { from, arg } => json!({
            "from": ext_width_bits(from),
            "ref": arg.raw(),
        }),
        Operation::IntTruncate { to, arg } => json!({
            "to": trunc_width_bits(to),
            "ref": arg.raw(),
        }),
        Operation::Compare { comparison, args } => json!({
            "comparison": comparison_to_json(comparison),
            "refs": [args[0].raw(), args[1].raw()],
        }),
        Operation::Load {
            width,
            flags,
            location,
        } => json!({
            "location": location.raw(),
            "width": width.bits(),
            "memory_flags": memory_flags_to_json(flags),
        }),
        Operation::Store {
            width,
            flags,
            location,
            value,
        } => json!({
            "location": location.raw(),
            "value": value.raw(),
            "width": width.bits(),
            "memory_flags": memory_flags_to_json(flags),
        }),
        Operation::AtomicLoad {
            width,
            model,
            location,
        } => json!({
            "location": location.raw(),
            "width": width.bits(),
            "memory_order": memory_order_name(model),
        }),
        Operation::AtomicStore {
            width,
            model,
            location,
            value,
        } => json!({
            "location": location.raw(),
            "value": value.raw(),
            "width": width.bits(),
            "memory_order": memory_order_name(model),
        }),
        Operation::AllocLocal {
            type_id,
            type_index,
        } => json!({
            "type": type_id.raw(),
            "index": type_index,
        }),
        Operation::GetLocal { index, offset } => json!({
            "index": index,
            "offset": offset,
        }),
        Operation::GetGlobal { symbol, offset }
        | Operation::GetThreadLocal { symbol, offset } => json!({
            "identifier": symbol.raw(),
            "offset": offset,
        }),
        Operation::StackAlloc {
            size,
            alignment,
            within_scope,
        } => json!({
            "size": size.raw(),
            "alignment": alignment.raw(),
            "within_scope": within_scope,
        }),
        Operation::Jump { target } => json!({ "target_block": target.raw() }),
        Operation::Branch {
            variant,
            condition,
            target,
            alternative,
        } => json!({
            "target_block": target.raw(),
            "alternative_block": alternative.raw(),
            "condition": condition.raw(),
            "condition_variant": branch_variant_name(variant),
        }),
        Operation::BranchCompare {
            comparison,
            args,
            target,
            alternative,
        } => json!({
            "target_block": target.raw(),
            "alternative_block": alternative.raw(),
            "comparison": comparison_to_json(comparison),
            "refs": [args[0].raw(), args[1].raw()],
        }),
        Operation::IndirectJump { target } => json!({ "ref": target.raw() }),
        Operation::Call {
            call,
            indirect_target,
        }
        | Operation::TailCall {
            call,
            indirect_target,
        } => json!({
            "call_ref": call.raw(),
            "indirect_ref": indirect_target.map(|t| t.raw()),
        }),
        Operation::Return { value } => json!({ "ref": value.map(|v| v.raw()) }),
        Operation::InlineAsm { asm } => json!({ "inline_asm_ref": asm.raw() }),
        Operation::Phi { phi } => json!({ "phi_ref": phi.raw() }),
        Operation::GetArgument { index } => json!({ "index": index }),
        Operation::ScopePush => return None,
        Operation::ScopePop { scope } => json!({ "ref": scope.raw() }),
        Operation::VarargStart { target } | Operation::VarargEnd { target } => {
            json!({ "ref": target.raw() })
        }
        Operation::VarargCopy {
            destination,
            source,
        } => json!({ "refs": [destination.raw(), source.raw()] }),
        Operation::VarargGet {
            source,
            type_id,
            type_index,
        } => json!({
            "ref": source.raw(),
            "type": type_id.raw(),
            "index": type_index,
        }),
        Operation::OverflowArith {
            op,
            signedness,
            args,
            result_ptr,
        } => json!({
            "operation": overflow_op_name(op),
            "signedness": signedness,
            "refs": [args[0].raw(), args[1].raw(), result_ptr.raw()],
        }),
    })
}

fn debug_entry_to_json(entry: &DebugEntry) -> Value {
    json!({
        "id": entry.id,
        "tag": entry.tag,
        "attributes": entry.attributes.iter().map(|attr| {
            let (kind, value) = match &attr.value {
                DebugAttributeValue::Integer(v) => ("integer", json!(v)),
                DebugAttributeValue::Unsigned(v) => ("unsigned", json!(v)),
                DebugAttributeValue::String(v) => ("string", json!(v)),
            };
            json!({ "name": attr.name, "type": kind, "value": value })
        }).collect::<Vec<_>>(),
        "children": entry.children.iter().map(debug_entry_to_json).collect::<Vec<_>>(),
    })
}

pub(crate) fn identifier_kind(kind: IdentifierKind) -> &'static str {
    match kind {
        IdentifierKind::Global => "global",
        IdentifierKind::ThreadLocal => "thread_local",
        IdentifierKind::Function => "function",
    }
}

pub(crate) fn identifier_visibility(visibility: IdentifierVisibility) -> &'static str {
    match visibility {
        IdentifierVisibility::Default => "default",
        IdentifierVisibility::Hidden => "hidden",
        IdentifierVisibility::Protected => "protected",
    }
}

pub(crate) fn string_literal_kind(kind: StringLiteralKind) -> &'static str {
    match kind {
        StringLiteralKind::Multibyte => "multibyte",
        StringLiteralKind::Unicode16 => "unicode16",
        StringLiteralKind::Unicode32 => "unicode32",
        StringLiteralKind::Wide => "wide",
    }
}

pub(crate) fn typecode_name(typecode: crate::irtype::Typecode) -> &'static str {
    use crate::irtype::Typecode::*;
    match typecode {
        Bool => "bool",
        Char => "char",
        Short => "short",
        Int => "int",
        Long => "long",
        Word => "word",
        Int8 => "int8",
        Int16 => "int16",
        Int32 => "int32",
        Int64 => "int64",
        Float32 => "float32",
        Float64 => "float64",
        LongDouble => "long_double",
        Struct => "struct",
        Array => "array",
        Union => "union",
        Bits => "bits",
        Builtin => "builtin",
        ComplexFloat32 => "complex_float32",
        ComplexFloat64 => "complex_float64",
        ComplexLongDouble => "complex_long_double",
    }
}

pub(crate) fn int_unary_name(op: IntUnaryOp) -> &'static str {
    match op {
        IntUnaryOp::Neg => "neg",
        IntUnaryOp::Not => "not",
        IntUnaryOp::BoolNot => "bool_not",
    }
}

pub(crate) fn int_binary_name(op: IntBinaryOp) -> &'static str {
    match op {
        IntBinaryOp::Add => "add",
        IntBinaryOp::Sub => "sub",
        IntBinaryOp::Mul => "mul",
        IntBinaryOp::Div => "div",
        IntBinaryOp::Mod => "mod",
        IntBinaryOp::Udiv => "udiv",
        IntBinaryOp::Umod => "umod",
        IntBinaryOp::And => "and",
        IntBinaryOp::Or => "or",
        IntBinaryOp::Xor => "xor",
        IntBinaryOp::Shl => "shl",
        IntBinaryOp::Shr => "shr",
        IntBinaryOp::Sar => "sar",
        IntBinaryOp::BoolAnd => "bool_and",
        IntBinaryOp::BoolOr => "bool_or",
    }
}

pub(crate) fn float_unary_name(op: FloatUnaryOp) -> &'static str {
    match op {
        FloatUnaryOp::Neg => "neg",
    }
}

pub(crate) fn float_binary_name(op: FloatBinaryOp) -> &'static str {
    match op {
        FloatBinaryOp::Add => "add",
        FloatBinaryOp::Sub => "sub",
        FloatBinaryOp::Mul => "mul",
        FloatBinaryOp::Div => "div",
    }
}

pub(crate) fn overflow_op_name(op: OverflowOp) -> &'static str {
    match op {
        OverflowOp::Add => "add",
        OverflowOp::Sub => "sub",
        OverflowOp::Mul => "mul",
    }
}

pub(crate) fn memory_order_name(order: MemoryOrder) -> &'static str {
    match order {
        MemoryOrder::SeqCst => "seq_cst",
    }
}

pub(crate) fn branch_variant_name(variant: BranchCondVariant) -> &'static str {
    match variant {
        BranchCondVariant::Bit8 => "8bit",
        BranchCondVariant::NegatedBit8 => "negated_8bit",
        BranchCondVariant::Bit16 => "16bit",
        BranchCondVariant::NegatedBit16 => "negated_16bit",
        BranchCondVariant::Bit32 => "32bit",
        BranchCondVariant::NegatedBit32 => "negated_32bit",
        BranchCondVariant::Bit64 => "64bit",
        BranchCondVariant::NegatedBit64 => "negated_64bit",
    }
}

pub(crate) fn int_comparison_name(kind: IntComparisonKind) -> &'static str {
    match kind {
        IntComparisonKind::Equals => "equals",
        IntComparisonKind::NotEquals => "not_equals",
        IntComparisonKind::Greater => "greater",
        IntComparisonKind::GreaterOrEquals => "greater_or_equals",
        IntComparisonKind::Lesser => "lesser",
        IntComparisonKind::LesserOrEquals => "lesser_or_equals",
        IntComparisonKind::Above => "above",
        IntComparisonKind::AboveOrEquals => "above_or_equals",
        IntComparisonKind::Below => "below",
        IntComparisonKind::BelowOrEquals => "below_or_equals",
    }
}

pub(crate) fn float_comparison_name(kind: FloatComparisonKind) -> &'static str {
    match kind {
        FloatComparisonKind::Equal => "equal",
        FloatComparisonKind::NotEqual => "not_equal",
        FloatComparisonKind::Greater => "greater",
        FloatComparisonKind::GreaterOrEqual => "greater_or_equal",
        FloatComparisonKind::Lesser => "lesser",
        FloatComparisonKind::LesserOrEqual => "lesser_or_equal",
        FloatComparisonKind::NotGreater => "not_greater",
        FloatComparisonKind::NotGreaterOrEqual => "not_greater_or_equal",
        FloatComparisonKind::NotLesser => "not_lesser",
        FloatComparisonKind::NotLesserOrEqual => "not_lesser_or_equal",
    }
}

fn comparison_to_json(comparison: Comparison) -> Value {
    match comparison {
        Comparison::Int { width, kind } => json!({
            "class": "int",
            "width": width.bits(),
            "operation": int_comparison_name(kind),
        }),
        Comparison::Float32(kind) => json!({
            "class": "float32",
            "operation": float_comparison_name(kind),
        }),
        Comparison::Float64(kind) => json!({
            "class": "float64",
            "operation": float_comparison_name(kind),
        }),
    }
}

fn float_width_bits(width: FloatWidth) -> u32 {
    match width {
        FloatWidth::F32 => 32,
        FloatWidth::F64 => 64,
    }
}

fn ext_width_bits(width: ExtWidth) -> u32 {
    width.bits()
}

fn trunc_width_bits(width: TruncWidth) -> u32 {
    match width {
        TruncWidth::W1 => 1,
        TruncWidth::W8 => 8,
        TruncWidth::W16 => 16,
        TruncWidth::W32 => 32,
    }
}

fn memory_flags_to_json(flags: MemoryFlags) -> Value {
    json!({
        "load_extension": match flags.load_extension {
            LoadExtension::None => "none",
            LoadExtension::Sign => "sign",
            LoadExtension::Zero => "zero",
        },
        "volatile": flags.volatile,
    })
}
