//! IR type table.
//!
//! A type is a flat sequence of entries; aggregate entries carry the number
//! of members that follow them (arrays carry the element count). Local
//! variable allocations reference a `(TypeId, index)` pair pointing at one
//! entry of one table row. The optimizer only ever inspects the typecode of
//! that entry: scalar typecodes make a local eligible for promotion,
//! everything else keeps it in memory.

use crate::error::{IrError, IrResult};
use crate::id::TypeId;
use crate::operation::Operation;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Typecode {
    Bool,
    Char,
    Short,
    Int,
    Long,
    Word,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    LongDouble,
    Struct,
    Array,
    Union,
    Bits,
    Builtin,
    ComplexFloat32,
    ComplexFloat64,
    ComplexLongDouble,
}

impl Typecode {
    /// Typecodes that mem2reg may promote to SSA values.
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            Typecode::Bool
                | Typecode::Char
                | Typecode::Short
                | Typecode::Int
                | Typecode::Long
                | Typecode::Word
                | Typecode::Int8
                | Typecode::Int16
                | Typecode::Int32
                | Typecode::Int64
                | Typecode::Float32
                | Typecode::Float64
        )
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            Typecode::Bool
                | Typecode::Char
                | Typecode::Short
                | Typecode::Int
                | Typecode::Long
                | Typecode::Word
                | Typecode::Int8
                | Typecode::Int16
                | Typecode::Int32
                | Typecode::Int64
        )
    }

    /// The constant operation representing "never written" storage of this
    /// typecode. Only defined for scalar typecodes.
    pub fn zero_operation(self) -> IrResult<Operation> {
        match self {
            code if code.is_integral() => Ok(Operation::IntConst(0)),
            Typecode::Float32 => Ok(Operation::Float32Const(0.0)),
            Typecode::Float64 => Ok(Operation::Float64Const(0.0)),
            _ => Err(IrError::InvalidArgument(
                "no zero constant for non-scalar typecode",
            )),
        }
    }
}

/// One entry of a type table row: a typecode, an optional alignment
/// override, and a typecode-specific parameter (member count for structs
/// and unions, element count for arrays, width for bitfields).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeEntry {
    pub typecode: Typecode,
    pub alignment: u32,
    pub param: u64,
}

impl TypeEntry {
    pub fn scalar(typecode: Typecode) -> Self {
        Self {
            typecode,
            alignment: 0,
            param: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Type {
    pub entries: Vec<TypeEntry>,
}

impl Type {
    pub fn new(entries: Vec<TypeEntry>) -> Self {
        Self { entries }
    }

    pub fn entry(&self, index: usize) -> Option<&TypeEntry> {
        self.entries.get(index)
    }
}

/// Module-level table of named types, keyed by dense id and iterated in
/// front-end emission order.
#[derive(Debug, Default)]
pub struct TypeArena {
    types: IndexMap<TypeId, Type>,
    next_id: u32,
}

impl TypeArena {
    pub fn add(&mut self, ty: Type) -> TypeId {
        let id = TypeId::new(self.next_id);
        self.next_id += 1;
        self.types.insert(id, ty);
        id
    }

    pub(crate) fn insert_with_id(&mut self, id: TypeId, ty: Type) -> IrResult<()> {
        if self.types.contains_key(&id) {
            return Err(IrError::InvalidArgument("duplicate type id"));
        }
        self.types.insert(id, ty);
        self.next_id = self.next_id.max(id.raw() + 1);
        Ok(())
    }

    pub fn get(&self, id: TypeId) -> IrResult<&Type> {
        self.types.get(&id).ok_or(IrError::NotFound("IR type"))
    }

    /// Fetches a single entry of a type table row.
    pub fn entry_at(&self, id: TypeId, index: usize) -> IrResult<&TypeEntry> {
        self.get(id)?
            .entry(index)
            .ok_or(IrError::NotFound("IR type entry"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &Type)> {
        self.types.iter().map(|(id, ty)| (*id, ty))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_classification_matches_promotion_set() {
        for code in [
            Typecode::Bool,
            Typecode::Char,
            Typecode::Short,
            Typecode::Int,
            Typecode::Long,
            Typecode::Word,
            Typecode::Int8,
            Typecode::Int16,
            Typecode::Int32,
            Typecode::Int64,
            Typecode::Float32,
            Typecode::Float64,
        ] {
            assert!(code.is_scalar(), "{code:?}");
        }
        for code in [
            Typecode::Struct,
            Typecode::Array,
            Typecode::Union,
            Typecode::LongDouble,
            Typecode::Bits,
            Typecode::Builtin,
            Typecode::ComplexFloat32,
        ] {
            assert!(!code.is_scalar(), "{code:?}");
        }
    }

    #[test]
    fn zero_operation_follows_typecode() {
        assert_eq!(
            Typecode::Int.zero_operation().unwrap(),
            Operation::IntConst(0)
        );
        assert_eq!(
            Typecode::Float32.zero_operation().unwrap(),
            Operation::Float32Const(0.0)
        );
        assert!(Typecode::Struct.zero_operation().is_err());
    }

    #[test]
    fn entry_lookup() {
        let mut arena = TypeArena::default();
        let id = arena.add(Type::new(vec![TypeEntry::scalar(Typecode::Int)]));
        assert_eq!(arena.entry_at(id, 0).unwrap().typecode, Typecode::Int);
        assert!(arena.entry_at(id, 1).is_err());
    }
}
