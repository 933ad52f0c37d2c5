//! The output of the type environment: everything later stages need to know
//! about the module's names and types.

use std::collections::HashMap;

use bug_ast::NodeId;
use bug_source::Span;
use indexmap::IndexMap;

use crate::{
    symbol::ScopeStack,
    ty::{StructTy, Ty},
};

/// A module-level persistent storage slot.
#[derive(Debug, Clone)]
pub struct StorageSlot {
    pub slot: u64,
    pub name: String,
    pub ty: Ty,
    pub span: Span,
}

/// The resolved signature of a user-defined function.
#[derive(Debug, Clone)]
pub struct FunctionSig {
    pub name: String,
    pub params: Vec<(String, Ty)>,
    /// The declared return type, or the void sentinel.
    pub returns: Ty,
    pub span: Span,
}

/// The type environment produced by [`crate::typecheck`].
#[derive(Debug, Default)]
pub struct TypeEnv {
    /// The finite mapping from AST node id to resolved type.
    types: HashMap<NodeId, Ty>,
    /// Resolved struct definitions, in declaration order.
    pub structs: IndexMap<String, StructTy>,
    /// Storage layout in slot order.
    pub storage: Vec<StorageSlot>,
    /// User-defined function signatures, in declaration order.
    pub functions: IndexMap<String, FunctionSig>,
    /// The populated module scope.
    pub module_scope: ScopeStack,
}

impl TypeEnv {
    /// Record the type of an AST node.
    pub fn set_ty(&mut self, id: NodeId, ty: Ty) {
        self.types.insert(id, ty);
    }

    /// The type previously recorded for the node, defaulting to a failure
    /// sentinel for nodes the checker never reached.
    pub fn ty_of(&self, id: NodeId) -> Ty {
        self.types.get(&id).cloned().unwrap_or_else(|| Ty::failure("unresolved node"))
    }

    pub fn ty_of_ref(&self, id: NodeId) -> Option<&Ty> {
        self.types.get(&id)
    }

    /// The storage slot declared under `name`, if any.
    pub fn storage_by_name(&self, name: &str) -> Option<&StorageSlot> {
        self.storage.iter().find(|slot| slot.name == name)
    }
}
