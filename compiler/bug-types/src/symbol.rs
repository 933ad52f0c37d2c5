//! Symbols and nested scope tables.

use indexmap::IndexMap;

use crate::ty::Ty;

/// Where a symbol's value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    /// A persistent storage slot.
    Storage,
    /// A value in linear memory.
    Memory,
    /// A value in the call's input data.
    Calldata,
    /// A block-local variable.
    Local,
    /// A compiler-provided name (environment accessors).
    Builtin,
}

/// A resolved name: its type, mutability, storage class and, for storage
/// symbols, the declared slot index.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub ty: Ty,
    pub mutable: bool,
    pub class: StorageClass,
    pub slot: Option<u64>,
}

impl Symbol {
    pub fn local(name: impl Into<String>, ty: Ty) -> Self {
        Self { name: name.into(), ty, mutable: true, class: StorageClass::Local, slot: None }
    }

    pub fn storage(name: impl Into<String>, ty: Ty, slot: u64) -> Self {
        Self { name: name.into(), ty, mutable: true, class: StorageClass::Storage, slot: Some(slot) }
    }

    pub fn builtin(name: impl Into<String>, ty: Ty) -> Self {
        Self { name: name.into(), ty, mutable: false, class: StorageClass::Builtin, slot: None }
    }
}

/// Nested scopes with innermost-wins lookup. The bottom scope is the module
/// scope; function bodies and blocks push and pop on top of it.
#[derive(Debug, Clone)]
pub struct ScopeStack {
    scopes: Vec<IndexMap<String, Symbol>>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    /// Create a [ScopeStack] holding a single (module) scope.
    pub fn new() -> Self {
        Self { scopes: vec![IndexMap::new()] }
    }

    /// Enter a fresh innermost scope.
    pub fn enter(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    /// Exit the innermost scope, discarding its symbols.
    pub fn exit(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot exit the module scope");
        self.scopes.pop();
    }

    /// Declare a symbol in the innermost scope, shadowing any outer binding
    /// of the same name.
    pub fn declare(&mut self, symbol: Symbol) {
        let scope = self.scopes.last_mut().expect("scope stack is never empty");
        scope.insert(symbol.name.clone(), symbol);
    }

    /// Innermost-wins lookup.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Whether the name is already declared in the innermost scope.
    pub fn declared_in_innermost(&self, name: &str) -> bool {
        self.scopes.last().map(|scope| scope.contains_key(name)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn innermost_wins() {
        let mut scopes = ScopeStack::new();
        scopes.declare(Symbol::storage("x", Ty::UINT256, 0));

        scopes.enter();
        scopes.declare(Symbol::local("x", Ty::Bool));
        assert_eq!(scopes.lookup("x").unwrap().ty, Ty::Bool);
        assert_eq!(scopes.lookup("x").unwrap().class, StorageClass::Local);

        scopes.exit();
        assert_eq!(scopes.lookup("x").unwrap().ty, Ty::UINT256);
        assert_eq!(scopes.lookup("x").unwrap().slot, Some(0));
    }

    #[test]
    fn missing_names() {
        let scopes = ScopeStack::new();
        assert!(scopes.lookup("missing").is_none());
    }
}
