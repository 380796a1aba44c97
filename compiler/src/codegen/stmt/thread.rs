//! Sync-statement lowering.
//!
//! `sync h` joins the thread behind a pending handle and writes the result
//! into the binding the spawn declared. Heap-shaped results are promoted
//! into the syncing function's arena; the thread's root arena is destroyed
//! by the runtime once the value is out. Arrays that accumulated spawn
//! results drain their pending companion in push order.

use crate::error::Result;
use crate::location::Location;
use crate::types::Type;

use super::super::cnames;
use super::super::expr::var_ref;
use super::super::CodeGen;

/// The joining expression for a binding of the given type, as an assignment
/// into the declared variable.
fn sync_assignment(gen: &mut CodeGen<'_, '_>, name: &str, ty: &Type<'_>) -> String {
    let var = var_ref(gen, name);
    let pending = format!("__{name}_pending__");
    let arena = gen.arena_var();
    match ty {
        Type::Double | Type::Float => {
            format!("{var} = ({})sn_thread_sync_double({pending})", cnames::c_type(ty))
        }
        Type::Str | Type::Array(_) | Type::Function { .. } => {
            format!("{var} = sn_thread_sync_handle({arena}, {pending})")
        }
        Type::Struct { name: sname, .. } => {
            format!("{var} = *({sname} *)sn_thread_sync_handle({arena}, {pending})->ptr")
        }
        Type::Any => format!("{var} = sn_thread_sync_any({arena}, {pending})"),
        Type::Void => format!("sn_thread_sync({pending})"),
        _ => format!("{var} = ({})sn_thread_sync_long({pending})", cnames::c_type(ty)),
    }
}

pub fn gen_sync_statement<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    name: &'arena str,
    indent: usize,
    loc: Location,
) -> Result<()> {
    let Some(sym) = gen.table.lookup(name) else {
        return gen.internal_error("sync of an unknown binding", loc);
    };
    let ty = sym.ty;
    let has_pending_elems = sym.has_pending_elements;

    if has_pending_elems {
        if let Type::Array(elem) = ty {
            return gen_pending_drain(gen, name, elem, indent, loc);
        }
    }

    let assignment = sync_assignment(gen, name, ty);
    gen.line(indent, &format!("{assignment};"));
    gen.table.mark_synchronized(name);
    Ok(())
}

/// Joins every spawn result pushed into an array, in push order.
fn gen_pending_drain<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    name: &'arena str,
    elem: &'arena Type<'arena>,
    indent: usize,
    loc: Location,
) -> Result<()> {
    let pending = format!("__{name}_pending_elems__");
    let var = var_ref(gen, name);
    let arena = gen.arena_var();
    let id = gen.next_temp_id;
    gen.next_temp_id += 1;

    let push_value = match elem {
        Type::Double | Type::Float => format!(
            "sn_array_push_{}({arena}, {var}, ({})sn_thread_sync_double(__p_{id}__))",
            cnames::type_suffix(elem),
            cnames::c_type(elem)
        ),
        Type::Str => format!(
            "sn_array_push_string_handle({arena}, {var}, sn_thread_sync_handle({arena}, __p_{id}__))"
        ),
        Type::Array(_) => format!(
            "sn_array_push_handle({arena}, {var}, sn_thread_sync_handle({arena}, __p_{id}__))"
        ),
        e if e.is_primitive() => format!(
            "sn_array_push_{}({arena}, {var}, ({})sn_thread_sync_long(__p_{id}__))",
            cnames::type_suffix(e),
            cnames::c_type(e)
        ),
        _ => return gen.internal_error("pending elements of this type", loc),
    };

    gen.line(indent, &format!("if ({pending} != NULL) {{"));
    gen.line(indent + 1, &format!("sn_handle_begin({pending});"));
    gen.line(indent + 1, &format!("long long __n_{id}__ = sn_array_len({pending});"));
    gen.line(
        indent + 1,
        &format!("for (long long __i_{id}__ = 0; __i_{id}__ < __n_{id}__; __i_{id}__++) {{"),
    );
    gen.line(
        indent + 2,
        &format!("sn_handle_renew({pending});"),
    );
    gen.line(
        indent + 2,
        &format!("SnHandle *__p_{id}__ = ((SnHandle **)sn_array_data({pending}))[__i_{id}__];"),
    );
    gen.line(indent + 2, &format!("{var} = {push_value};"));
    gen.line(indent + 1, "}");
    gen.line(indent + 1, &format!("sn_handle_end({pending});"));
    gen.line(indent + 1, &format!("{pending} = NULL;"));
    gen.line(indent, "}");
    Ok(())
}

/// Expression form of sync: joins and yields the value, assigning the
/// binding as a side effect.
pub fn sync_value_expr<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    name: &'arena str,
    loc: Location,
) -> Result<String> {
    let Some(sym) = gen.table.lookup(name) else {
        return gen.internal_error("sync of an unknown binding", loc);
    };
    let ty = sym.ty;
    let assignment = sync_assignment(gen, name, ty);
    gen.table.mark_synchronized(name);
    Ok(format!("({assignment})"))
}
