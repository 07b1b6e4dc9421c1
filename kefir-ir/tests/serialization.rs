//! JSON debug dump round-trips.

mod common;

use common::*;
use kefir_ir::builder::InstructionBuilder;
use kefir_ir::code::AsmParameter;
use kefir_ir::id::FuncId;
use kefir_ir::irtype::Typecode;
use kefir_ir::module::{
    DataObject, DataStorage, DebugAttribute, DebugAttributeValue, DebugEntry, IdentifierKind,
    IdentifierVisibility, Module, StringLiteral, StringLiteralKind,
};
use kefir_ir::operation::{Comparison, IntComparisonKind, MemoryFlags, MemoryOrder, OpWidth};
use kefir_ir::parser::{module_from_str, module_from_json};
use kefir_ir::printer::{module_to_json, module_to_string};
use kefir_ir::verify::verify_function;
use pretty_assertions::assert_eq;

/// A module exercising every serialized construct: identifiers, types,
/// data, string literals, several functions with phis, calls, inline
/// assembly, atomics, and a debug tree.
fn rich_module() -> (Module, FuncId) {
    let mut module = Module::new();
    module.declare_identifier("counter", IdentifierKind::Global, IdentifierVisibility::Default);
    let tls = module.declare_identifier(
        "per_thread",
        IdentifierKind::ThreadLocal,
        IdentifierVisibility::Hidden,
    );

    let int_type = scalar_type(&mut module, Typecode::Int, 2);
    module.data.insert(
        "counter".into(),
        DataObject {
            name: "counter".into(),
            type_id: int_type,
            storage: DataStorage::Global,
            external: false,
        },
    );
    let greeting = module.add_string_literal(StringLiteral {
        kind: StringLiteralKind::Multibyte,
        public: false,
        content: b"hello\0".to_vec(),
    });
    let fragment = module.add_asm_fragment("nop", vec!["cc".into()], 1);

    let callee = module.declare_function("callee", Some(int_type), Some(int_type), false);
    let main = define_function(&mut module, "main", Some(int_type), Some(int_type), Some(int_type));

    {
        let function = function_mut(&mut module, main);
        let entry = function.entry_block().unwrap();
        let code = function.code_mut();
        let then_block = code.new_block(false);
        let else_block = code.new_block(true);
        let join = code.new_block(false);
        code.add_block_public_label(join, "join_label").unwrap();

        let mut b = InstructionBuilder::new(code, entry);
        let x = b.get_argument(0).unwrap();
        let lit = b.string_ref(greeting).unwrap();
        let tls_addr = b.get_thread_local(tls, 4).unwrap();
        let three = b.int_const(3).unwrap();
        b.atomic_store(OpWidth::W32, MemoryOrder::SeqCst, tls_addr, three)
            .unwrap();
        let local = b.alloc_local(int_type, 0).unwrap();
        b.store(OpWidth::W32, MemoryFlags::plain(), local, x).unwrap();
        b.branch_compare(
            Comparison::Int {
                width: OpWidth::W32,
                kind: IntComparisonKind::Equals,
            },
            x,
            three,
            then_block,
            else_block,
        )
        .unwrap();

        let (call, call_out) = b.at(then_block).call(callee, 1, None).unwrap();
        b.jump(join).unwrap();
        let loaded = b
            .at(else_block)
            .load(OpWidth::W32, MemoryFlags::plain(), local)
            .unwrap();
        let (asm, _asm_out) = b.inline_assembly(fragment, 1).unwrap();
        b.jump(join).unwrap();
        let (phi, output) = b.at(join).phi().unwrap();
        b.ret(Some(output)).unwrap();

        code.call_set_argument(call, 0, x).unwrap();
        code.inline_assembly_set_parameter(
            asm,
            0,
            AsmParameter {
                read: Some(loaded),
                load_store: Some(local),
            },
        )
        .unwrap();
        code.phi_attach(phi, then_block, call_out).unwrap();
        code.phi_attach(phi, else_block, loaded).unwrap();
        let _ = lit;
    }

    module.debug_entries.entries.push(DebugEntry {
        id: 0,
        tag: "compile_unit".into(),
        attributes: vec![
            DebugAttribute {
                name: "name".into(),
                value: DebugAttributeValue::String("unit.c".into()),
            },
            DebugAttribute {
                name: "line".into(),
                value: DebugAttributeValue::Unsigned(12),
            },
        ],
        children: vec![DebugEntry {
            id: 1,
            tag: "variable".into(),
            attributes: vec![DebugAttribute {
                name: "offset".into(),
                value: DebugAttributeValue::Integer(-8),
            }],
            children: Vec::new(),
        }],
    });

    (module, main)
}

/// Dump, reload and dump again: byte-identical text, and the reloaded
/// module satisfies every container invariant (so ids, phi links and
/// the use map all survived).
#[test]
fn dump_reload_dump_is_byte_identical() -> anyhow::Result<()> {
    let (module, main) = rich_module();
    let first = module_to_string(&module, true)?;
    let reloaded = module_from_str(&first)?;
    let second = module_to_string(&reloaded, true)?;

    if first != second {
        println!("{}", prettydiff::diff_lines(&first, &second));
    }
    assert_eq!(first, second);

    verify_function(reloaded.function(main)?)?;
    Ok(())
}

/// Deleted-id gaps survive the round trip: the reloaded container keeps
/// allocating above the dumped high-water mark.
#[test]
fn id_allocation_resumes_after_reload() {
    let (mut module, main) = rich_module();
    {
        let function = function_mut(&mut module, main);
        let entry = function.entry_block().unwrap();
        let code = function.code_mut();
        let mut b = InstructionBuilder::new(code, entry);
        let doomed = b.int_const(999).unwrap();
        code.drop_instr(doomed).unwrap();
    }
    let text = module_to_string(&module, false).unwrap();
    let mut reloaded = module_from_str(&text).unwrap();

    let original_next = {
        let function = function_mut(&mut module, main);
        let entry = function.entry_block().unwrap();
        InstructionBuilder::new(function.code_mut(), entry)
            .int_const(0)
            .unwrap()
    };
    let reloaded_next = {
        let function = reloaded.functions.get_mut(&main).unwrap();
        let entry = function.entry_block().unwrap();
        InstructionBuilder::new(function.code_mut(), entry)
            .int_const(0)
            .unwrap()
    };
    assert_eq!(original_next, reloaded_next);
}

/// The opcode revision stamp is checked on reload.
#[test]
fn opcode_revision_mismatch_is_rejected() {
    let (module, _main) = rich_module();
    let mut value = module_to_json(&module, false).unwrap();
    value["meta_info"]["opcode_rev"] = serde_json::json!(kefir_ir::OPCODES_REVISION + 1);
    let err = module_from_json(&value).unwrap_err();
    assert_eq!(
        err,
        kefir_ir::IrError::OpcodeRevisionMismatch {
            found: kefir_ir::OPCODES_REVISION + 1,
            expected: kefir_ir::OPCODES_REVISION,
        }
    );
}

/// Malformed dumps surface as module format errors, not panics.
#[test]
fn malformed_dump_is_a_format_error() {
    assert!(matches!(
        module_from_str("{\"identifiers\": 3}"),
        Err(kefir_ir::IrError::ModuleFormat(_))
    ));
    assert!(matches!(
        module_from_str("not json at all"),
        Err(kefir_ir::IrError::ModuleFormat(_))
    ));
}
