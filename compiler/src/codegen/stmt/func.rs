//! Function lowering: the arena preamble and postamble.
//!
//! Every non-`main` function receives the caller's arena as a hidden first
//! parameter. The modifier decides what the local arena is: `main` creates
//! the root, `shared` aliases the caller's, default and `private` create a
//! child. Heap-shaped return values are promoted into the caller's arena at
//! the return label, before the local arena is destroyed.

use crate::ast::{FunctionModifier, FunctionStmt, MemoryQualifier, StmtKind};
use crate::check::function_has_marked_tail_calls;
use crate::error::Result;
use crate::symbol::SymbolKind;
use crate::types::Type;

use super::super::cnames;
use super::super::CodeGen;
use super::capture;

/// True for `main(args: str[])`.
fn main_has_args(func: &FunctionStmt<'_>) -> bool {
    func.name == "main" && func.params.len() == 1
}

/// The emitted C prototype (without the trailing `;` or body).
pub fn prototype<'arena>(gen: &CodeGen<'_, 'arena>, func: &'arena FunctionStmt<'arena>) -> String {
    let is_main = func.name == "main";
    let ret_c = if is_main { "int".to_owned() } else { cnames::c_type(func.return_ty) };
    let name = gen.function_c_name(func.name);

    let mut params = String::new();
    if main_has_args(func) {
        params.push_str("int argc, char **argv");
    } else {
        if !is_main {
            params.push_str("SnArena *__caller_arena__");
        }
        for p in func.params {
            if !params.is_empty() {
                params.push_str(", ");
            }
            let pt = cnames::c_type(p.ty);
            let pn = cnames::mangle(p.name);
            // `as ref` primitives and structs become pointer parameters.
            let by_ref = p.mem_qual == MemoryQualifier::AsRef
                && (p.ty.is_primitive() || matches!(p.ty, Type::Struct { .. }));
            if by_ref {
                params.push_str(&format!("{pt} *{pn}"));
            } else {
                params.push_str(&format!("{pt} {pn}"));
            }
        }
        if params.is_empty() {
            params.push_str("void");
        }
    }
    format!("{ret_c} {name}({params})")
}

pub fn gen_function<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    func: &'arena FunctionStmt<'arena>,
) -> Result<()> {
    // Bodiless native functions are external C declarations; they arrive
    // via pragma include or the link line.
    if func.is_native && func.body.is_empty() {
        gen.declare_function_symbol(func);
        return Ok(());
    }
    gen.declare_function_symbol(func);

    let saved_function = gen.current_function.clone();
    let saved_return = gen.current_return_type;
    let saved_modifier = gen.current_func_modifier;
    let saved_private = gen.in_private_context;
    let saved_shared = gen.in_shared_context;
    let saved_arena = gen.current_arena_var.clone();
    let saved_tail = gen.in_tail_call_function;
    let saved_tail_fn = gen.tail_call_fn;

    let is_main = func.name == "main";
    let is_private = func.modifier == FunctionModifier::Private;
    let is_shared = func.modifier == FunctionModifier::Shared;
    let fn_label = gen.function_c_name(func.name);

    gen.current_function = Some(fn_label.clone());
    gen.current_return_type = Some(func.return_ty);
    gen.current_func_modifier = func.modifier;
    if is_private {
        gen.in_private_context = true;
    }
    gen.in_shared_context = is_shared;
    gen.current_arena_var = Some("__local_arena__".to_owned());

    let ret_c = if is_main { "int".to_owned() } else { cnames::c_type(func.return_ty) };
    let has_return_value = !matches!(func.return_ty, Type::Void) || is_main;

    gen.table.push_scope();
    gen.table.enter_arena();
    for p in func.params {
        gen.table
            .add_symbol_full(p.name, p.ty, SymbolKind::Param, p.mem_qual);
    }

    // Pre-pass: primitives mutated under a nested lambda become cells.
    capture::scan_captured_primitives(gen, func.body);

    gen.line(0, &format!("{} {{", prototype(gen, func)));

    // Arena preamble by modifier.
    if is_main {
        gen.line(1, "SnArena *__local_arena__ = sn_arena_create(NULL);");
        gen.line(1, "__main_arena__ = __local_arena__;");
        gen.replay_deferred_globals(1);
    } else if is_shared {
        gen.line(1, "SnArena *__local_arena__ = __caller_arena__;");
    } else {
        gen.line(1, "SnArena *__local_arena__ = sn_arena_create(__caller_arena__);");
    }

    if has_return_value {
        let default = if is_main { "0".to_owned() } else { cnames::default_value(func.return_ty).to_owned() };
        gen.line(1, &format!("{ret_c} _return_value = {default};"));
    }

    if main_has_args(func) {
        let p = cnames::mangle(func.params[0].name);
        gen.line(1, &format!("SnHandle *{p} = sn_args_create(__local_arena__, argc, argv);"));
    }

    // `as val` reference parameters are cloned so the caller's buffer is
    // never mutated.
    for p in func.params {
        if p.mem_qual != MemoryQualifier::AsVal {
            continue;
        }
        let pn = cnames::mangle(p.name);
        match p.ty {
            Type::Array(elem) => {
                let call = match elem {
                    Type::Str => format!("sn_array_clone_string(__local_arena__, {pn})"),
                    e if e.is_primitive() => format!(
                        "sn_array_clone_{}(__local_arena__, {pn})",
                        cnames::type_suffix(e)
                    ),
                    _ => format!("sn_array_clone_generic(__local_arena__, {pn}, sizeof(SnHandle *))"),
                };
                gen.line(1, &format!("{pn} = {call};"));
            }
            Type::Str => {
                gen.line(
                    1,
                    &format!("{pn} = sn_arena_strdup(__local_arena__, (const char *){pn}->ptr);"),
                );
            }
            _ => {}
        }
    }

    let has_tail_calls = function_has_marked_tail_calls(func);
    if has_tail_calls {
        gen.in_tail_call_function = true;
        gen.tail_call_fn = Some(func);
        gen.line(1, "while (1) { /* tail call loop */");
    }

    // While a function returns a closure, lambdas and cells allocate in the
    // caller's arena so captured state survives this frame.
    let saved_closure_flag = gen.allocate_closure_in_caller_arena;
    if !is_main && matches!(func.return_ty, Type::Function { .. }) {
        gen.allocate_closure_in_caller_arena = true;
    }

    let body_indent = if has_tail_calls { 2 } else { 1 };
    let mut ends_with_return = false;
    for stmt in func.body {
        ends_with_return = matches!(stmt.kind, StmtKind::Return { .. });
        super::gen_stmt(gen, stmt, body_indent)?;
    }
    gen.allocate_closure_in_caller_arena = saved_closure_flag;

    if !ends_with_return {
        gen.line(body_indent, &format!("goto {fn_label}_return;"));
    }
    if has_tail_calls {
        gen.line(1, "} /* end tail call loop */");
    }
    gen.in_tail_call_function = saved_tail;
    gen.tail_call_fn = saved_tail_fn;

    gen.line(0, &format!("{fn_label}_return:;"));

    // Promote heap-shaped return values into the caller's arena before the
    // local arena dies. Shared functions skip this: their values already
    // live in the caller's arena.
    if !is_main && !is_shared && has_return_value {
        emit_return_promotion(gen, func.return_ty);
    }

    if is_main || !is_shared {
        gen.line(1, "sn_arena_destroy(__local_arena__);");
    }

    if has_return_value {
        gen.line(1, "return _return_value;");
    } else {
        gen.line(1, "return;");
    }
    gen.line(0, "}");
    gen.line(0, "");

    gen.table.exit_arena();
    gen.table.pop_scope();
    gen.clear_captured_primitives();

    gen.current_function = saved_function;
    gen.current_return_type = saved_return;
    gen.current_func_modifier = saved_modifier;
    gen.in_private_context = saved_private;
    gen.in_shared_context = saved_shared;
    gen.current_arena_var = saved_arena;
    Ok(())
}

/// The promotion call matching the declared return type.
fn emit_return_promotion(gen: &mut CodeGen<'_, '_>, ret: &Type<'_>) {
    match ret {
        Type::Str => {
            gen.line(1, "_return_value = sn_arena_promote_string(__caller_arena__, _return_value);");
        }
        Type::Array(elem) => {
            let depth = ret.array_depth();
            let base = ret.base_element();
            let call = match (depth, base, elem) {
                (_, _, Type::Any) => "sn_arena_promote(__caller_arena__, _return_value)".to_owned(),
                (1, _, Type::Str) => {
                    "sn_promote_array_string(__caller_arena__, _return_value)".to_owned()
                }
                (2, Type::Str, _) => {
                    "sn_promote_array2_string(__caller_arena__, _return_value)".to_owned()
                }
                (3, Type::Str, _) => {
                    "sn_promote_array3_string(__caller_arena__, _return_value)".to_owned()
                }
                (2, _, _) => "sn_promote_array_handle(__caller_arena__, _return_value)".to_owned(),
                (3, _, _) => {
                    "sn_promote_array_handle_3d(__caller_arena__, _return_value)".to_owned()
                }
                (_, _, e) if e.is_primitive() => format!(
                    "sn_array_clone_{}(__caller_arena__, _return_value)",
                    cnames::type_suffix(e)
                ),
                _ => "sn_arena_promote(__caller_arena__, _return_value)".to_owned(),
            };
            gen.line(1, &format!("_return_value = {call};"));
        }
        Type::Struct { name, .. } => {
            gen.line(
                1,
                &format!(
                    "_return_value = *({name} *)sn_arena_promote_sized(__caller_arena__, &_return_value, sizeof({name}));"
                ),
            );
        }
        Type::Function { .. } => {
            gen.line(1, "_return_value = sn_arena_promote(__caller_arena__, _return_value);");
        }
        Type::Any => {
            gen.line(1, "_return_value = sn_any_promote(__caller_arena__, _return_value);");
        }
        _ => {}
    }
}
