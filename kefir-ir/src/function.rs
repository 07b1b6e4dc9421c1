//! Function definitions.

use crate::code::Code;
use crate::error::IrResult;
use crate::id::{BlockId, FuncId, InstrRef, TypeId};
use std::collections::{BTreeMap, BTreeSet};

/// Per-function debug bookkeeping: an instruction location cursor that
/// passes set while synthesizing replacements, and the map tying promoted
/// local allocations to the SSA values that materialized them.
#[derive(Debug, Clone, Default)]
pub struct FunctionDebugInfo {
    location_cursor: Option<InstrRef>,
    local_variable_refs: BTreeMap<InstrRef, BTreeSet<InstrRef>>,
}

impl FunctionDebugInfo {
    pub fn set_location_cursor(&mut self, cursor: Option<InstrRef>) {
        self.location_cursor = cursor;
    }

    pub fn location_cursor(&self) -> Option<InstrRef> {
        self.location_cursor
    }

    pub fn add_local_variable_ref(&mut self, local: InstrRef, value: InstrRef) {
        self.local_variable_refs
            .entry(local)
            .or_default()
            .insert(value);
    }

    pub fn local_variable_refs(&self, local: InstrRef) -> Option<&BTreeSet<InstrRef>> {
        self.local_variable_refs.get(&local)
    }
}

/// A defined function: stable declaration id, optional local variable
/// layout type, and the code container holding the body.
#[derive(Debug)]
pub struct Function {
    declaration_id: FuncId,
    locals_type_id: Option<TypeId>,
    code: Code,
    debug_info: FunctionDebugInfo,
}

impl Function {
    pub fn new(declaration_id: FuncId, locals_type_id: Option<TypeId>) -> Self {
        Self {
            declaration_id,
            locals_type_id,
            code: Code::new(),
            debug_info: FunctionDebugInfo::default(),
        }
    }

    /// Creates a function with an entry block already in place.
    pub fn with_entry(declaration_id: FuncId, locals_type_id: Option<TypeId>) -> IrResult<Self> {
        let mut function = Self::new(declaration_id, locals_type_id);
        let entry = function.code.new_block(false);
        function.code.set_entry_point(entry)?;
        Ok(function)
    }

    pub fn declaration_id(&self) -> FuncId {
        self.declaration_id
    }

    pub fn locals_type_id(&self) -> Option<TypeId> {
        self.locals_type_id
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.code.entry_point()
    }

    pub fn code(&self) -> &Code {
        &self.code
    }

    pub fn code_mut(&mut self) -> &mut Code {
        &mut self.code
    }

    pub fn debug_info(&self) -> &FunctionDebugInfo {
        &self.debug_info
    }

    pub fn debug_info_mut(&mut self) -> &mut FunctionDebugInfo {
        &mut self.debug_info
    }

    /// Simultaneous mutable access to the body and the debug
    /// bookkeeping, used by passes that rewrite both in lockstep.
    pub fn code_and_debug_mut(&mut self) -> (&mut Code, &mut FunctionDebugInfo) {
        (&mut self.code, &mut self.debug_info)
    }

    pub(crate) fn restore_parts(
        declaration_id: FuncId,
        locals_type_id: Option<TypeId>,
        code: Code,
        debug_info: FunctionDebugInfo,
    ) -> Self {
        Self {
            declaration_id,
            locals_type_id,
            code,
            debug_info,
        }
    }
}
