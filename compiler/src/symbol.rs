//! The symbol table.
//!
//! Scopes form a stack; each symbol binds an interned name to a type plus
//! the flags later passes need: kind, memory qualifier, sync modifier,
//! declared and effective function modifiers, native/alias data, the arena
//! and scope depths at declaration, and the thread-state machinery that
//! tracks spawn/sync at compile time. The table additionally tracks the
//! current arena, scope and loop depths.

use crate::ast::{FunctionModifier, MemoryQualifier, SyncModifier};
use crate::types::Type;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Global,
    Local,
    Param,
    Namespace,
    Type,
}

/// Spawn/sync lifecycle of a binding that holds a thread handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// Not a thread handle, or already synchronized.
    Normal,
    /// Spawned but not yet synchronized.
    Pending,
    /// Joined.
    Synchronized,
}

/// Freeze tracking for variables captured by pending spawns.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrozenState {
    pub freeze_count: u32,
    pub frozen: bool,
}

#[derive(Debug)]
pub struct Symbol<'arena> {
    pub name: &'arena str,
    pub ty: &'arena Type<'arena>,
    pub kind: SymbolKind,
    pub mem_qual: MemoryQualifier,
    pub sync_mod: SyncModifier,
    /// Effective modifier for function symbols.
    pub func_mod: FunctionModifier,
    /// Modifier as written in the source.
    pub declared_func_mod: FunctionModifier,
    pub is_function: bool,
    pub is_native: bool,
    pub c_alias: Option<&'arena str>,
    pub arena_depth: u32,
    pub declaration_scope_depth: u32,
    pub thread_state: ThreadState,
    pub frozen_state: FrozenState,
    /// Names this pending handle froze at spawn time.
    pub frozen_args: Vec<&'arena str>,
    pub has_pending_elements: bool,
    /// Module-scope bindings declared `static` mangle differently.
    pub is_static: bool,
    /// Code-generation override for the value expression (used for closure
    /// environment fields).
    pub c_name: Option<String>,
    /// Code-generation override for the cell pointer expression.
    pub c_ptr_name: Option<String>,
    /// Namespace payload, when `kind == Namespace`.
    pub namespace_symbols: Vec<Symbol<'arena>>,
    /// Canonical module name behind a namespace import.
    pub canonical_module: Option<&'arena str>,
}

impl<'arena> Symbol<'arena> {
    fn new(name: &'arena str, ty: &'arena Type<'arena>, kind: SymbolKind) -> Self {
        Symbol {
            name,
            ty,
            kind,
            mem_qual: MemoryQualifier::Default,
            sync_mod: SyncModifier::None,
            func_mod: FunctionModifier::Default,
            declared_func_mod: FunctionModifier::Default,
            is_function: false,
            is_native: false,
            c_alias: None,
            arena_depth: 0,
            declaration_scope_depth: 0,
            thread_state: ThreadState::Normal,
            frozen_state: FrozenState::default(),
            frozen_args: Vec::new(),
            has_pending_elements: false,
            is_static: false,
            c_name: None,
            c_ptr_name: None,
            namespace_symbols: Vec::new(),
            canonical_module: None,
        }
    }

    /// A free-standing function symbol, used when namespace members are
    /// assembled outside the scope stack.
    pub fn function(
        name: &'arena str,
        ty: &'arena Type<'arena>,
        is_native: bool,
        c_alias: Option<&'arena str>,
    ) -> Self {
        let mut sym = Symbol::new(name, ty, SymbolKind::Global);
        sym.is_function = true;
        sym.is_native = is_native;
        sym.c_alias = c_alias;
        sym
    }

    /// The namespace kind is authoritative; this accessor exists because
    /// several call sites read better as a predicate.
    pub fn is_namespace(&self) -> bool {
        matches!(self.kind, SymbolKind::Namespace)
    }
}

#[derive(Debug, Default)]
struct Scope<'arena> {
    symbols: Vec<Symbol<'arena>>,
}

#[derive(Debug)]
pub struct SymbolTable<'arena> {
    scopes: Vec<Scope<'arena>>,
    pub arena_depth: u32,
    pub scope_depth: u32,
    pub loop_depth: u32,
}

impl<'arena> SymbolTable<'arena> {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Scope::default()],
            arena_depth: 0,
            scope_depth: 0,
            loop_depth: 0,
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
        self.scope_depth += 1;
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
            self.scope_depth = self.scope_depth.saturating_sub(1);
        }
    }

    pub fn enter_arena(&mut self) {
        self.arena_depth += 1;
    }

    pub fn exit_arena(&mut self) {
        self.arena_depth = self.arena_depth.saturating_sub(1);
    }

    pub fn enter_loop(&mut self) {
        self.loop_depth += 1;
    }

    pub fn exit_loop(&mut self) {
        self.loop_depth = self.loop_depth.saturating_sub(1);
    }

    pub fn in_loop(&self) -> bool {
        self.loop_depth > 0
    }

    /// Adds a local binding with default flags.
    pub fn add_symbol(&mut self, name: &'arena str, ty: &'arena Type<'arena>) {
        self.add_symbol_full(name, ty, SymbolKind::Local, MemoryQualifier::Default);
    }

    pub fn add_symbol_full(
        &mut self,
        name: &'arena str,
        ty: &'arena Type<'arena>,
        kind: SymbolKind,
        mem_qual: MemoryQualifier,
    ) -> &mut Symbol<'arena> {
        let mut sym = Symbol::new(name, ty, kind);
        sym.mem_qual = mem_qual;
        sym.arena_depth = self.arena_depth;
        sym.declaration_scope_depth = self.scope_depth;
        let scope = self.scopes.last_mut().expect("symbol table always has a scope");
        scope.symbols.push(sym);
        scope.symbols.last_mut().expect("just pushed")
    }

    /// Innermost-scope-first lookup.
    pub fn lookup(&self, name: &str) -> Option<&Symbol<'arena>> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.symbols.iter().rev().find(|s| s.name == name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Symbol<'arena>> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.symbols.iter_mut().rev().find(|s| s.name == name))
    }

    /// Lookup restricted to the current scope.
    pub fn lookup_current(&mut self, name: &str) -> Option<&mut Symbol<'arena>> {
        self.scopes
            .last_mut()
            .and_then(|scope| scope.symbols.iter_mut().rev().find(|s| s.name == name))
    }

    /// Registers a type alias or struct type.
    pub fn add_type(&mut self, name: &'arena str, ty: &'arena Type<'arena>) {
        self.add_symbol_full(name, ty, SymbolKind::Type, MemoryQualifier::Default);
    }

    pub fn lookup_type(&self, name: &str) -> Option<&Symbol<'arena>> {
        self.scopes.iter().rev().find_map(|scope| {
            scope
                .symbols
                .iter()
                .rev()
                .find(|s| s.kind == SymbolKind::Type && s.name == name)
        })
    }

    /// Finds `name` inside the namespace `ns`.
    pub fn lookup_namespaced(&self, ns: &str, name: &str) -> Option<&Symbol<'arena>> {
        let ns_sym = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.symbols.iter().rev().find(|s| s.is_namespace() && s.name == ns))?;
        ns_sym.namespace_symbols.iter().find(|s| s.name == name)
    }

    // ---- thread-state transitions -------------------------------------

    /// NORMAL -> PENDING; anything else is a misuse the checker reports.
    pub fn mark_pending(&mut self, name: &str) -> bool {
        match self.lookup_mut(name) {
            Some(sym) if sym.thread_state == ThreadState::Normal => {
                sym.thread_state = ThreadState::Pending;
                true
            }
            _ => false,
        }
    }

    /// PENDING -> SYNCHRONIZED.
    pub fn mark_synchronized(&mut self, name: &str) -> bool {
        match self.lookup_mut(name) {
            Some(sym) if sym.thread_state == ThreadState::Pending => {
                sym.thread_state = ThreadState::Synchronized;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.lookup(name).is_some_and(|s| s.thread_state == ThreadState::Pending)
    }

    pub fn freeze(&mut self, name: &str) {
        if let Some(sym) = self.lookup_mut(name) {
            sym.frozen_state.freeze_count += 1;
            sym.frozen_state.frozen = true;
        }
    }

    pub fn unfreeze(&mut self, name: &str) {
        if let Some(sym) = self.lookup_mut(name) {
            sym.frozen_state.freeze_count = sym.frozen_state.freeze_count.saturating_sub(1);
            sym.frozen_state.frozen = sym.frozen_state.freeze_count > 0;
        }
    }

    pub fn is_frozen(&self, name: &str) -> bool {
        self.lookup(name).is_some_and(|s| s.frozen_state.frozen)
    }
}

impl<'arena> Default for SymbolTable<'arena> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::use_arena;
    use crate::types::Primitives;

    #[test]
    fn inner_scopes_shadow_outer_ones() {
        use_arena(|arena| {
            let prims = Primitives::new(arena);
            let mut table = SymbolTable::new();
            let n = arena.store_name("n");
            table.add_symbol(n, prims.long);
            table.push_scope();
            table.add_symbol(n, prims.str_);
            assert_eq!(table.lookup("n").unwrap().ty, prims.str_);
            table.pop_scope();
            assert_eq!(table.lookup("n").unwrap().ty, prims.long);
        });
    }

    #[test]
    fn thread_state_transitions_are_one_way() {
        use_arena(|arena| {
            let prims = Primitives::new(arena);
            let mut table = SymbolTable::new();
            let h = arena.store_name("h");
            table.add_symbol(h, prims.long);
            assert!(table.mark_pending("h"));
            assert!(!table.mark_pending("h"));
            assert!(table.mark_synchronized("h"));
            assert!(!table.mark_synchronized("h"));
        });
    }

    #[test]
    fn freeze_counts_nest() {
        use_arena(|arena| {
            let prims = Primitives::new(arena);
            let mut table = SymbolTable::new();
            let v = arena.store_name("v");
            table.add_symbol(v, prims.long);
            table.freeze("v");
            table.freeze("v");
            table.unfreeze("v");
            assert!(table.is_frozen("v"));
            table.unfreeze("v");
            assert!(!table.is_frozen("v"));
        });
    }
}
