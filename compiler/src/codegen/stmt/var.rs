//! Variable-declaration lowering.
//!
//! A declaration turns into one of several shapes: a null global slot for
//! module-scope empty arrays, a pending-handle pair for thread spawns, a
//! heap cell for `as ref` and captured primitives, a heap allocation for
//! large structs, or a plain C declaration. Module-scope initializers that
//! need an arena are recorded on the deferred list and replayed under
//! `__main_arena__` at the top of `main`.

use crate::ast::{ExprKind, MemoryQualifier, SyncModifier, VarDeclStmt};
use crate::error::Result;
use crate::symbol::SymbolKind;
use crate::types::Type;

use super::super::cnames;
use super::super::expr::{coerce_for_target, gen_expr};
use super::super::CodeGen;

/// Structs at or above this payload size are heap-allocated in the current
/// arena instead of living on the C stack.
const STRUCT_STACK_THRESHOLD: usize = 8192;

pub fn gen_var_declaration<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    decl: &'arena VarDeclStmt<'arena>,
    indent: usize,
) -> Result<()> {
    let raw_name = decl.name;
    let is_global = gen.at_global_scope();
    let static_prefix = if decl.is_static && is_global { "static " } else { "" };
    let var_name = if is_global {
        gen.global_c_name(raw_name, decl.is_static)
    } else {
        cnames::mangle(raw_name)
    };
    let ty = decl.ty();
    let type_c = cnames::c_type(ty);

    if is_global {
        // Modules can be spliced more than once; emit each global once.
        if !gen.emitted_globals.insert(var_name.clone()) {
            return Ok(());
        }
        if decl.is_static {
            gen.emitted_static_globals.insert(var_name.clone());
        }
    }

    // Module-scope empty arrays are a bare null slot; the first push
    // allocates.
    if is_global {
        if let Type::Array(_) = ty {
            let empty = match decl.initializer {
                None => true,
                Some(init) => matches!(&init.kind, ExprKind::ArrayLiteral { elements } if elements.is_empty()),
            };
            if empty {
                record_symbol(gen, decl, SymbolKind::Global, decl.mem_qual);
                gen.line(indent, &format!("{static_prefix}SnHandle *{var_name} = NULL;"));
                if decl.has_pending_elements.get() {
                    gen.line(
                        indent,
                        &format!("{static_prefix}SnHandle *__{raw_name}_pending_elems__ = NULL;"),
                    );
                }
                return Ok(());
            }
        }
    }

    // Spawn results and bindings that may later hold one get a pending
    // companion; the sync statement writes the real value.
    let is_thread_spawn = decl
        .initializer
        .is_some_and(|init| matches!(init.kind, ExprKind::Spawn { .. }));
    let is_primitive = ty.is_primitive();
    let is_spawn_handle_result = !gen.at_global_scope()
        && (matches!(ty, Type::Str)
            || matches!(ty, Type::Array(_)) && !matches!(ty.base_element(), Type::Any));
    let is_struct_result = matches!(ty, Type::Struct { .. });
    let needs_pending = is_primitive || is_spawn_handle_result || is_struct_result;
    let has_special_qual = decl.mem_qual != MemoryQualifier::Default;
    let is_captured = gen.is_captured_primitive(raw_name)
        && (is_primitive || matches!(ty, Type::Array(_)));

    if is_thread_spawn && needs_pending && !is_global && !has_special_qual && !is_captured {
        let pending = format!("__{raw_name}_pending__");
        let init = decl.initializer.expect("spawn declarations carry an initializer");
        let init_str = gen_expr(gen, init)?;
        gen.line(indent, &format!("SnHandle *{pending} = {init_str};"));
        gen.line(indent, &format!("{type_c} {var_name};"));
        record_symbol(gen, decl, SymbolKind::Local, decl.mem_qual);
        gen.table.mark_pending(raw_name);
        if decl.has_pending_elements.get() {
            gen.line(indent, &format!("SnHandle *__{raw_name}_pending_elems__ = NULL;"));
        }
        return Ok(());
    }

    // Captured primitives promote to reference cells so nested lambdas see
    // a pointer.
    let effective_qual = if decl.mem_qual == MemoryQualifier::Default && is_captured {
        MemoryQualifier::AsRef
    } else {
        decl.mem_qual
    };

    let kind = if is_global { SymbolKind::Global } else { SymbolKind::Local };
    record_symbol(gen, decl, kind, effective_qual);

    // Deferred module-scope initialization: anything needing an arena runs
    // under __main_arena__ at the top of main.
    let needs_deferred = is_global
        && decl.initializer.is_some()
        && (ty.is_handle()
            || matches!(ty, Type::Any)
            || matches!(
                decl.initializer.map(|i| &i.kind),
                Some(ExprKind::Call { .. } | ExprKind::MethodCall { .. })
            ));

    let mut init_str = match decl.initializer {
        Some(init) => {
            if matches!(init.kind, ExprKind::Lambda(_)) {
                gen.current_decl_var_name = Some(raw_name);
                gen.recursive_lambda_id = -1;
            }
            let saved_arena = gen.current_arena_var.clone();
            if needs_deferred {
                gen.current_arena_var = Some("__main_arena__".to_owned());
            }
            let text = gen_expr(gen, init)?;
            gen.current_arena_var = saved_arena;
            coerce_for_target(gen, text, ty, init.ty())
        }
        None => cnames::default_value(ty).to_owned(),
    };

    if needs_deferred {
        gen.deferred_global_names.push(var_name.clone());
        gen.deferred_global_values.push(init_str.clone());
        init_str = if ty.is_handle() {
            "NULL".to_owned()
        } else {
            match ty {
                Type::Struct { .. } | Type::Any => "{0}".to_owned(),
                _ => "0".to_owned(),
            }
        };
    }

    // `as val` deep copy for reference types.
    if decl.mem_qual == MemoryQualifier::AsVal {
        let arena = gen.arena_var();
        match ty {
            Type::Array(elem) => {
                init_str = match elem {
                    Type::Str => format!("sn_array_clone_string({arena}, {init_str})"),
                    e if e.is_primitive() => format!(
                        "sn_array_clone_{}({arena}, {init_str})",
                        cnames::type_suffix(e)
                    ),
                    _ => format!("sn_array_clone_generic({arena}, {init_str}, sizeof(SnHandle *))"),
                };
            }
            Type::Str => {
                init_str =
                    format!("sn_arena_strdup({arena}, (const char *)({init_str})->ptr)");
            }
            _ => {}
        }
    }

    if effective_qual == MemoryQualifier::AsRef {
        // Heap cell: the variable becomes a pointer into its handle's
        // payload. Closures that escape pull the cell into the caller's
        // arena with them.
        let in_main = gen.current_function.as_deref() == Some("main");
        let alloc_arena = if gen.allocate_closure_in_caller_arena
            && gen.current_arena_var.as_deref() == Some("__local_arena__")
            && !in_main
        {
            "__caller_arena__".to_owned()
        } else {
            gen.arena_var()
        };
        gen.line(
            indent,
            &format!("SnHandle *__{var_name}_h__ = sn_arena_alloc({alloc_arena}, sizeof({type_c}));"),
        );
        gen.line(
            indent,
            &format!("{type_c} *{var_name} = ({type_c} *)__{var_name}_h__->ptr;"),
        );
        gen.line(indent, &format!("*{var_name} = {init_str};"));
    } else if let Type::Struct { size, .. } = ty {
        if !is_global && *size >= STRUCT_STACK_THRESHOLD {
            // Large structs live in the arena; the symbol reads through a
            // pointer from here on.
            let arena = gen.arena_var();
            gen.line(
                indent,
                &format!("SnHandle *__{var_name}_h__ = sn_arena_alloc({arena}, sizeof({type_c}));"),
            );
            gen.line(
                indent,
                &format!("{type_c} *{var_name} = ({type_c} *)__{var_name}_h__->ptr;"),
            );
            gen.line(indent, &format!("*{var_name} = {init_str};"));
            if let Some(sym) = gen.table.lookup_current(raw_name) {
                sym.mem_qual = MemoryQualifier::AsRef;
            }
        } else {
            gen.line(indent, &format!("{static_prefix}{type_c} {var_name} = {init_str};"));
        }
    } else {
        gen.line(indent, &format!("{static_prefix}{type_c} {var_name} = {init_str};"));
    }

    if decl.has_pending_elements.get() && matches!(ty, Type::Array(_)) && !is_global {
        gen.line(indent, &format!("SnHandle *__{raw_name}_pending_elems__ = NULL;"));
    }

    // Recursive lambdas are patched right after the declaration: the
    // closure was allocated with a null self-slot.
    if gen.recursive_lambda_id >= 0
        && decl
            .initializer
            .is_some_and(|init| matches!(init.kind, ExprKind::Lambda(_)))
    {
        let lambda_id = gen.recursive_lambda_id;
        let field = cnames::mangle(raw_name);
        gen.line(
            indent,
            &format!("((__closure_{lambda_id}__ *)({var_name})->ptr)->{field} = {var_name};"),
        );
        gen.recursive_lambda_id = -1;
    }
    gen.current_decl_var_name = None;

    Ok(())
}

fn record_symbol<'c, 'g, 'arena>(
    gen: &'g mut CodeGen<'c, 'arena>,
    decl: &'arena VarDeclStmt<'arena>,
    kind: SymbolKind,
    qual: MemoryQualifier,
) -> &'g mut crate::symbol::Symbol<'arena> {
    let sym = gen.table.add_symbol_full(decl.name, decl.ty(), kind, qual);
    sym.is_static = decl.is_static;
    if decl.sync_mod == SyncModifier::Atomic {
        sym.sync_mod = SyncModifier::Atomic;
    }
    if decl.has_pending_elements.get() {
        sym.has_pending_elements = true;
    }
    sym
}
