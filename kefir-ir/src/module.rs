//! The IR module.
//!
//! One module per translation unit: named identifiers, the type table,
//! data objects, string literals, function declarations and definitions,
//! inline assembly fragments and the debug information tree. Module
//! tables iterate in front-end emission order, which the debug dump
//! serializes verbatim.

use crate::error::{IrError, IrResult};
use crate::function::Function;
use crate::id::{AsmFragmentId, FuncId, StringId, SymbolId, TypeId};
use crate::irtype::TypeArena;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Global,
    ThreadLocal,
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierVisibility {
    Default,
    Hidden,
    Protected,
}

/// A named symbol visible at module scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub name: String,
    pub kind: IdentifierKind,
    pub visibility: IdentifierVisibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStorage {
    Global,
    ThreadLocal,
}

/// A data object emitted by the front end. The optimizer never looks
/// inside; only the identity and typing matter here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObject {
    pub name: String,
    pub type_id: TypeId,
    pub storage: DataStorage,
    pub external: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringLiteralKind {
    Multibyte,
    Unicode16,
    Unicode32,
    Wide,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringLiteral {
    pub kind: StringLiteralKind,
    pub public: bool,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDeclaration {
    pub id: FuncId,
    pub name: String,
    pub parameters_type: Option<TypeId>,
    pub returns_type: Option<TypeId>,
    pub vararg: bool,
}

/// An inline assembly fragment: the template text plus clobber list. The
/// per-use parameters live on the inline assembly sites inside function
/// bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmFragment {
    pub id: AsmFragmentId,
    pub template: String,
    pub clobbers: Vec<String>,
    pub parameter_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DebugAttributeValue {
    Integer(i64),
    Unsigned(u64),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebugAttribute {
    pub name: String,
    pub value: DebugAttributeValue,
}

/// A node of the debug information tree. Opaque to the optimizer; the
/// dump serializes it and the loader restores it untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DebugEntry {
    pub id: u32,
    pub tag: String,
    pub attributes: Vec<DebugAttribute>,
    pub children: Vec<DebugEntry>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DebugEntries {
    pub entries: Vec<DebugEntry>,
}

impl DebugEntries {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read-only module context handed to passes next to the mutable
/// function they transform.
pub struct ModuleEnv<'a> {
    pub types: &'a TypeArena,
    pub declarations: &'a IndexMap<FuncId, FunctionDeclaration>,
    pub string_literals: &'a IndexMap<StringId, StringLiteral>,
    pub asm_fragments: &'a IndexMap<AsmFragmentId, AsmFragment>,
}

#[derive(Debug, Default)]
pub struct Module {
    pub identifiers: IndexMap<SymbolId, Identifier>,
    pub types: TypeArena,
    pub data: IndexMap<String, DataObject>,
    pub string_literals: IndexMap<StringId, StringLiteral>,
    pub function_declarations: IndexMap<FuncId, FunctionDeclaration>,
    pub functions: IndexMap<FuncId, Function>,
    pub asm_fragments: IndexMap<AsmFragmentId, AsmFragment>,
    pub debug_entries: DebugEntries,
    next_symbol_id: u32,
    next_string_id: u32,
    next_function_id: u32,
    next_fragment_id: u32,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_identifier(
        &mut self,
        name: &str,
        kind: IdentifierKind,
        visibility: IdentifierVisibility,
    ) -> SymbolId {
        let id = SymbolId::new(self.next_symbol_id);
        self.next_symbol_id += 1;
        self.identifiers.insert(
            id,
            Identifier {
                name: name.into(),
                kind,
                visibility,
            },
        );
        id
    }

    pub fn add_string_literal(&mut self, literal: StringLiteral) -> StringId {
        let id = StringId::new(self.next_string_id);
        self.next_string_id += 1;
        self.string_literals.insert(id, literal);
        id
    }

    pub fn string_literal(&self, id: StringId) -> IrResult<&StringLiteral> {
        self.string_literals
            .get(&id)
            .ok_or(IrError::NotFound("string literal"))
    }

    pub fn declare_function(
        &mut self,
        name: &str,
        parameters_type: Option<TypeId>,
        returns_type: Option<TypeId>,
        vararg: bool,
    ) -> FuncId {
        let id = FuncId::new(self.next_function_id);
        self.next_function_id += 1;
        self.function_declarations.insert(
            id,
            FunctionDeclaration {
                id,
                name: name.into(),
                parameters_type,
                returns_type,
                vararg,
            },
        );
        id
    }

    pub fn function_declaration(&self, id: FuncId) -> IrResult<&FunctionDeclaration> {
        self.function_declarations
            .get(&id)
            .ok_or(IrError::NotFound("function declaration"))
    }

    /// Registers a defined function. The declaration must exist.
    pub fn define_function(&mut self, function: Function) -> IrResult<()> {
        let id = function.declaration_id();
        self.function_declaration(id)?;
        if self.functions.contains_key(&id) {
            return Err(IrError::InvalidArgument("function is already defined"));
        }
        self.functions.insert(id, function);
        Ok(())
    }

    pub fn function(&self, id: FuncId) -> IrResult<&Function> {
        self.functions.get(&id).ok_or(IrError::NotFound("function"))
    }

    pub fn function_ids(&self) -> Vec<FuncId> {
        self.functions.keys().copied().collect()
    }

    pub fn add_asm_fragment(
        &mut self,
        template: &str,
        clobbers: Vec<String>,
        parameter_count: usize,
    ) -> AsmFragmentId {
        let id = AsmFragmentId::new(self.next_fragment_id);
        self.next_fragment_id += 1;
        self.asm_fragments.insert(
            id,
            AsmFragment {
                id,
                template: template.into(),
                clobbers,
                parameter_count,
            },
        );
        id
    }

    /// Splits the module into the read-only environment and one mutable
    /// function, so a pass can consult module tables while rewriting the
    /// function body.
    pub fn env_and_function_mut(&mut self, id: FuncId) -> IrResult<(ModuleEnv<'_>, &mut Function)> {
        let Module {
            types,
            function_declarations,
            string_literals,
            asm_fragments,
            functions,
            ..
        } = self;
        let function = functions.get_mut(&id).ok_or(IrError::NotFound("function"))?;
        Ok((
            ModuleEnv {
                types,
                declarations: function_declarations,
                string_literals,
                asm_fragments,
            },
            function,
        ))
    }

    pub(crate) fn counters(&self) -> (u32, u32, u32, u32) {
        (
            self.next_symbol_id,
            self.next_string_id,
            self.next_function_id,
            self.next_fragment_id,
        )
    }

    pub(crate) fn restore_counters(
        &mut self,
        next_symbol: u32,
        next_string: u32,
        next_function: u32,
        next_fragment: u32,
    ) {
        self.next_symbol_id = next_symbol;
        self.next_string_id = next_string;
        self.next_function_id = next_function;
        self.next_fragment_id = next_fragment;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Function;

    #[test]
    fn function_definition_requires_declaration() {
        let mut module = Module::new();
        let missing = Function::new(FuncId::new(7), None);
        assert_eq!(
            module.define_function(missing),
            Err(IrError::NotFound("function declaration"))
        );
        let id = module.declare_function("main", None, None, false);
        module.define_function(Function::new(id, None)).unwrap();
        assert_eq!(
            module.define_function(Function::new(id, None)),
            Err(IrError::InvalidArgument("function is already defined"))
        );
    }

    #[test]
    fn env_split_allows_simultaneous_type_access() {
        let mut module = Module::new();
        let id = module.declare_function("f", None, None, false);
        module.define_function(Function::new(id, None)).unwrap();
        let (env, function) = module.env_and_function_mut(id).unwrap();
        assert!(env.types.is_empty());
        let _ = function.code_mut().new_block(false);
    }
}
