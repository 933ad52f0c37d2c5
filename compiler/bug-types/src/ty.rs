//! The semantic type representation.

use std::sync::Arc;

/// A field within a [StructTy], with its byte offset inside the struct's
/// 32-byte-aligned layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructField {
    pub name: String,
    pub ty: Ty,
    /// Byte offset of the field. Every field starts on a 32-byte boundary
    /// since bit-packing is not supported.
    pub offset: u64,
}

/// A resolved struct type. Structs compare by name plus field structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructTy {
    pub name: String,
    pub fields: Arc<Vec<StructField>>,
}

impl StructTy {
    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Represents the type of an expression or declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    /// An integer with an explicit signedness and bit width. The width is
    /// one of 8, 16, 32, 64, 128 or 256.
    Int { signed: bool, bits: u16 },
    /// A 160-bit account address.
    Address,
    /// A boolean.
    Bool,
    /// A byte sequence; fixed width 1..=32 when `size` is given, dynamic
    /// otherwise.
    Bytes { size: Option<u8> },
    /// A dynamic UTF-8 string.
    String,
    /// An array; fixed length when `size` is given, dynamic otherwise.
    Array { element: Box<Ty>, size: Option<u64> },
    /// A storage mapping. Keys are restricted to elementary hashable types.
    Mapping { key: Box<Ty>, value: Box<Ty> },
    /// A user-defined struct.
    Struct(StructTy),
    /// A function signature.
    Function { params: Vec<Ty>, returns: Option<Box<Ty>> },
    /// Sentinel for a type that failed to resolve or check. Carrying the
    /// reason lets checking continue past the first failure.
    Failure(Arc<str>),
}

impl Ty {
    pub const UINT256: Ty = Ty::Int { signed: false, bits: 256 };
    pub const BYTES32: Ty = Ty::Bytes { size: Some(32) };

    pub fn uint(bits: u16) -> Ty {
        Ty::Int { signed: false, bits }
    }

    pub fn failure(reason: impl Into<Arc<str>>) -> Ty {
        Ty::Failure(reason.into())
    }

    /// The sentinel result type of a function with no declared return.
    pub fn void() -> Ty {
        Ty::failure("void function")
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Ty::Failure(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int { .. })
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, Ty::Int { signed: false, .. })
    }

    /// Whether values of this type fit into a single 256-bit word.
    pub fn is_word(&self) -> bool {
        matches!(
            self,
            Ty::Int { .. } | Ty::Address | Ty::Bool | Ty::Bytes { size: Some(_) }
        )
    }

    /// Whether the type may be used as a mapping key: elementary word-sized
    /// types whose padded form is well defined.
    pub fn is_hashable_key(&self) -> bool {
        self.is_word()
    }

    /// The number of 32-byte storage slots a value of this type occupies at
    /// its declared position. Dynamic types occupy one slot in place; their
    /// payload lives at derived slots.
    pub fn storage_slots(&self) -> u64 {
        match self {
            Ty::Struct(def) => def.fields.iter().map(|field| field.ty.storage_slots()).sum(),
            Ty::Array { element, size: Some(size) } => size * element.storage_slots(),
            _ => 1,
        }
    }

    /// The number of bytes a value of this type occupies in linear memory.
    /// Dynamic arrays and byte strings are represented by a pointer word at
    /// their declared position.
    pub fn memory_size(&self) -> u64 {
        match self {
            Ty::Struct(def) => def.fields.iter().map(|field| field.ty.memory_size()).sum(),
            Ty::Array { element, size: Some(size) } => size * element.memory_size(),
            _ => 32,
        }
    }

    /// Whether `self` can be assigned a value of type `source`: identical
    /// types, a smaller unsigned integer into a larger one, or fixed bytes
    /// into dynamic bytes.
    pub fn assignable_from(&self, source: &Ty) -> bool {
        // Failure types unify with everything so one error does not cascade.
        if self.is_failure() || source.is_failure() {
            return true;
        }

        if self == source {
            return true;
        }

        match (self, source) {
            (
                Ty::Int { signed: false, bits: into },
                Ty::Int { signed: false, bits: from },
            ) => from <= into,
            (Ty::Bytes { size: None }, Ty::Bytes { size: Some(_) }) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> StructTy {
        StructTy {
            name: "Point".to_string(),
            fields: Arc::new(vec![
                StructField { name: "x".to_string(), ty: Ty::UINT256, offset: 0 },
                StructField { name: "y".to_string(), ty: Ty::UINT256, offset: 32 },
            ]),
        }
    }

    #[test]
    fn structural_equality() {
        assert_eq!(Ty::uint(256), Ty::UINT256);
        assert_ne!(Ty::uint(128), Ty::UINT256);
        assert_ne!(Ty::Int { signed: true, bits: 256 }, Ty::UINT256);

        let a = Ty::Struct(point());
        let b = Ty::Struct(point());
        assert_eq!(a, b);

        let mut renamed = point();
        renamed.name = "Vector".to_string();
        assert_ne!(a, Ty::Struct(renamed));
    }

    #[test]
    fn assignability() {
        assert!(Ty::UINT256.assignable_from(&Ty::uint(8)));
        assert!(!Ty::uint(8).assignable_from(&Ty::UINT256));
        assert!(Ty::Bytes { size: None }.assignable_from(&Ty::Bytes { size: Some(4) }));
        assert!(!Ty::Bytes { size: Some(4) }.assignable_from(&Ty::Bytes { size: None }));
        assert!(!Ty::UINT256.assignable_from(&Ty::Bool));
        // Failure unifies both ways.
        assert!(Ty::UINT256.assignable_from(&Ty::failure("boom")));
        assert!(Ty::failure("boom").assignable_from(&Ty::UINT256));
    }

    #[test]
    fn storage_slot_counts() {
        assert_eq!(Ty::UINT256.storage_slots(), 1);
        assert_eq!(Ty::Struct(point()).storage_slots(), 2);
        assert_eq!(
            Ty::Array { element: Box::new(Ty::Struct(point())), size: Some(3) }.storage_slots(),
            6
        );
        // Dynamic types hold one in-place slot.
        assert_eq!(Ty::Array { element: Box::new(Ty::UINT256), size: None }.storage_slots(), 1);
        assert_eq!(
            Ty::Mapping { key: Box::new(Ty::Address), value: Box::new(Ty::UINT256) }
                .storage_slots(),
            1
        );
    }
}
