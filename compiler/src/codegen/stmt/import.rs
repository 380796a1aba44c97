//! Import emission.
//!
//! A plain import splices the imported module's statements into the current
//! translation unit (each module once). A namespaced import emits the
//! module under a `<ns>__` prefix: functions and globals mangle with the
//! prefix, static globals with the module's canonical name, and nested
//! namespaced imports stack their prefixes.

use crate::ast::{ImportStmt, StmtKind};
use crate::error::Result;
use crate::symbol::SymbolKind;

use super::super::CodeGen;

/// Declares the imported module's symbols and forward declarations during
/// module hoisting.
pub fn hoist_import<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    import: &'arena ImportStmt<'arena>,
) -> Result<()> {
    let Some(stmts) = import.module.get() else {
        return Ok(());
    };
    match import.namespace {
        None => {
            let key = stmts.as_ptr() as usize;
            if gen.emitted_modules.contains(&key) {
                return Ok(());
            }
            gen.hoist_module(stmts)
        }
        Some(ns) => {
            let saved_prefix = gen.current_namespace_prefix.clone();
            gen.current_namespace_prefix = Some(match &saved_prefix {
                Some(outer) => format!("{outer}__{ns}"),
                None => ns.to_owned(),
            });
            let result = gen.hoist_module(stmts);
            // The namespace symbol lets call sites resolve `ns.f`.
            let ns_name = gen.arena.store_name(ns);
            let void_ty = gen.prims.void;
            let mut members = Vec::new();
            for stmt in stmts {
                if let StmtKind::Function(func) = &stmt.kind {
                    if let Some(sym) = gen.table.lookup(func.name) {
                        if sym.is_function {
                            members.push(crate::symbol::Symbol::function(
                                func.name,
                                sym.ty,
                                sym.is_native,
                                sym.c_alias,
                            ));
                        }
                    }
                }
            }
            gen.current_namespace_prefix = saved_prefix;
            let ns_sym = gen.table.add_symbol_full(
                ns_name,
                void_ty,
                SymbolKind::Namespace,
                crate::ast::MemoryQualifier::Default,
            );
            ns_sym.namespace_symbols = members;
            ns_sym.canonical_module = import.canonical.get();
            result
        }
    }
}

/// Emits the imported module's definitions.
pub fn gen_import<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    import: &'arena ImportStmt<'arena>,
) -> Result<()> {
    let Some(stmts) = import.module.get() else {
        return Ok(());
    };
    let key = stmts.as_ptr() as usize;
    if !gen.emitted_modules.insert(key) {
        return Ok(());
    }

    let saved_prefix = gen.current_namespace_prefix.clone();
    let saved_canonical = gen.current_canonical_module.clone();
    if let Some(ns) = import.namespace {
        gen.current_namespace_prefix = Some(match &saved_prefix {
            Some(outer) => format!("{outer}__{ns}"),
            None => ns.to_owned(),
        });
        gen.current_canonical_module = import
            .canonical
            .get()
            .map(str::to_owned)
            .or_else(|| Some(module_stem(import.path)));
    } else {
        gen.current_canonical_module = Some(module_stem(import.path));
    }

    let mut result = Ok(());
    for stmt in stmts {
        result = gen.gen_module_stmt(stmt);
        if result.is_err() {
            break;
        }
    }

    gen.current_namespace_prefix = saved_prefix;
    gen.current_canonical_module = saved_canonical;
    result
}

/// The canonical module name: the file stem of the import path.
fn module_stem(path: &str) -> String {
    let base = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let stem = base.strip_suffix(".sn").unwrap_or(base);
    if stem.is_empty() {
        "module".to_owned()
    } else {
        stem.to_owned()
    }
}
