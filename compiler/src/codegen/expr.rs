//! Expression code generation.
//!
//! Every routine returns the C expression text for its node; statement-level
//! support code (closure constructors, spawn thunks) is emitted into the
//! dedicated output sections on the [`CodeGen`] context. Strings, arrays,
//! closures and boxed structs are all `SnHandle *` at this level, which
//! keeps the lowerings uniform: only the runtime entry point changes with
//! the element type.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::ast::{
    BinaryOp, Expr, ExprKind, LambdaBody, LambdaExpr, Literal, MemoryQualifier, Stmt, StmtKind,
    UnaryOp,
};
use crate::error::Result;
use crate::location::Location;
use crate::symbol::SymbolKind;
use crate::types::Type;

use super::cnames::{self, c_string_literal};
use super::stmt::thread;
use super::CodeGen;

/// The C lvalue/rvalue for a variable reference, honoring cell indirection
/// and global mangling.
pub fn var_ref(gen: &CodeGen<'_, '_>, name: &str) -> String {
    let Some(sym) = gen.table.lookup(name) else {
        return cnames::mangle(name);
    };
    if let Some(cn) = &sym.c_name {
        return cn.clone();
    }
    let base = if sym.kind == SymbolKind::Global && !sym.is_function {
        gen.global_c_name(name, sym.is_static)
    } else {
        cnames::mangle(name)
    };
    if is_cell_symbol(sym) {
        format!("(*{base})")
    } else {
        base
    }
}

/// The pointer expression backing a cell variable (for capture passing and
/// `as ref` argument forwarding).
pub fn cell_ptr(gen: &CodeGen<'_, '_>, name: &str) -> String {
    let Some(sym) = gen.table.lookup(name) else {
        return format!("&{}", cnames::mangle(name));
    };
    if let Some(ptr) = &sym.c_ptr_name {
        return ptr.clone();
    }
    if is_cell_symbol(sym) {
        cnames::mangle(name)
    } else {
        format!("&{}", cnames::mangle(name))
    }
}

fn is_cell_symbol(sym: &crate::symbol::Symbol<'_>) -> bool {
    sym.mem_qual == MemoryQualifier::AsRef
        && (sym.ty.is_primitive() || matches!(sym.ty, Type::Struct { .. } | Type::Array(_)))
}

/// Converts an already-generated expression into a string handle.
pub fn to_string_of(gen: &mut CodeGen<'_, '_>, text: &str, ty: &Type<'_>) -> String {
    let arena = gen.arena_var();
    match ty {
        Type::Str => text.to_owned(),
        Type::Int | Type::Long | Type::Int32 | Type::UInt | Type::UInt32 | Type::Byte => {
            format!("sn_to_string_long({arena}, (long long)({text}))")
        }
        Type::Double | Type::Float => format!("sn_to_string_double({arena}, ({text}))"),
        Type::Bool => format!("sn_to_string_bool({arena}, ({text}))"),
        Type::Char => format!("sn_to_string_char({arena}, ({text}))"),
        Type::Any => format!("sn_any_to_string({arena}, ({text}))"),
        Type::Array(elem) => {
            let depth = ty.array_depth();
            let base = ty.base_element();
            if matches!(base, Type::Any) || matches!(elem, Type::Any) {
                format!("sn_array_to_string_any({arena}, ({text}))")
            } else {
                let sfx = cnames::type_suffix(base);
                match depth {
                    1 => format!("sn_array_to_string_{sfx}({arena}, ({text}))"),
                    2 => format!("sn_array_to_string2_{sfx}({arena}, ({text}))"),
                    _ => format!("sn_array_to_string3_{sfx}({arena}, ({text}))"),
                }
            }
        }
        Type::Function { .. } => format!("sn_string_from({arena}, \"<function>\")"),
        Type::Struct { name, .. } => format!("sn_string_from({arena}, \"<{name}>\")"),
        _ => format!("sn_string_from({arena}, \"\")"),
    }
}

/// Wraps an expression with the boxing call for its concrete type.
pub fn box_value(gen: &mut CodeGen<'_, '_>, text: &str, ty: &Type<'_>) -> String {
    match ty {
        Type::Any => text.to_owned(),
        Type::Array(elem) => {
            format!("sn_box_array(({text}), {})", cnames::any_tag(elem))
        }
        Type::Struct { id, size, .. } => {
            // Struct values are copied into a handle before boxing.
            let arena = gen.arena_var();
            format!("sn_box_struct(sn_handle_from_bytes({arena}, &({text}), {size}), {id})")
        }
        _ => format!("{}(({text}))", cnames::box_fn(ty)),
    }
}

/// Typed-array to `any[]` conversion for the given source element type and
/// nesting depth.
pub fn array_to_any(gen: &mut CodeGen<'_, '_>, text: &str, src_ty: &Type<'_>) -> String {
    let arena = gen.arena_var();
    let depth = src_ty.array_depth();
    let base = src_ty.base_element();
    if matches!(base, Type::Any) {
        return text.to_owned();
    }
    let sfx = cnames::type_suffix(base);
    match depth {
        1 => format!("sn_array_to_any_{sfx}({arena}, ({text}))"),
        2 => format!("sn_array2_to_any_{sfx}({arena}, ({text}))"),
        _ => format!("sn_array3_to_any_{sfx}({arena}, ({text}))"),
    }
}

fn double_literal(v: f64) -> String {
    let s = format!("{v}");
    if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
        s
    } else {
        format!("{s}.0")
    }
}

pub fn gen_expr<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    expr: &'arena Expr<'arena>,
) -> Result<String> {
    let loc = expr.loc;
    match &expr.kind {
        ExprKind::Literal(lit) => Ok(match lit {
            Literal::Int(v) | Literal::Long(v) => format!("{v}LL"),
            Literal::Double(v) => double_literal(*v),
            Literal::Str(s) => {
                let arena = gen.arena_var();
                format!("sn_string_from({arena}, {})", c_string_literal(s))
            }
            Literal::Char(c) => match c {
                '\'' => "'\\''".to_owned(),
                '\\' => "'\\\\'".to_owned(),
                '\n' => "'\\n'".to_owned(),
                '\t' => "'\\t'".to_owned(),
                c => format!("'{c}'"),
            },
            Literal::Bool(b) => if *b { "1" } else { "0" }.to_owned(),
        }),
        ExprKind::Variable(name) => Ok(var_ref(gen, name)),
        ExprKind::Unary { op, operand } => {
            let inner = gen_expr(gen, operand)?;
            Ok(match op {
                UnaryOp::Neg => format!("(-{inner})"),
                UnaryOp::Not => format!("(!{inner})"),
            })
        }
        ExprKind::Binary { op, left, right } => gen_binary(gen, *op, left, right),
        ExprKind::Assign { name, value } => {
            let mut rhs = gen_expr(gen, value)?;
            if let Some(sym) = gen.table.lookup(name) {
                let target_ty = sym.ty;
                rhs = coerce_for_target(gen, rhs, target_ty, value.ty());
            }
            Ok(format!("({} = {rhs})", var_ref(gen, name)))
        }
        ExprKind::CompoundAssign { name, op, value } => {
            let lhs = var_ref(gen, name);
            let rhs = gen_expr(gen, value)?;
            let is_str = gen.table.lookup(name).is_some_and(|s| matches!(s.ty, Type::Str));
            if is_str && *op == BinaryOp::Add {
                let arena = gen.arena_var();
                let rhs_str = to_string_of(gen, &rhs, value.ty());
                Ok(format!("({lhs} = sn_string_concat({arena}, {lhs}, {rhs_str}))"))
            } else {
                Ok(format!("({lhs} {}= {rhs})", op.c_op()))
            }
        }
        ExprKind::Call { name, namespace, args, .. } => gen_call(gen, name, *namespace, args, loc),
        ExprKind::CallValue { callee, args } => {
            let callee_text = gen_expr(gen, callee)?;
            gen_closure_call(gen, &callee_text, callee.ty(), args)
        }
        ExprKind::MethodCall { receiver, method, args } => {
            gen_method_call(gen, receiver, method, args, loc)
        }
        ExprKind::Member { object, field } => {
            // Namespace member access reaches a mangled global.
            if let ExprKind::Variable(ns) = &object.kind {
                if gen.table.lookup(ns).is_some_and(crate::symbol::Symbol::is_namespace) {
                    return Ok(cnames::mangle(&format!("{ns}__{field}")));
                }
            }
            let obj_ty = object.ty();
            let obj = gen_expr(gen, object)?;
            match (obj_ty, *field) {
                (Type::Array(_), "len") => Ok(format!("sn_array_len({obj})")),
                (Type::Str, "len") => Ok(format!("sn_string_len({obj})")),
                _ => Ok(format!("(({obj}).{})", cnames::mangle(field))),
            }
        }
        ExprKind::MemberAssign { object, field, value } => {
            let obj = gen_expr(gen, object)?;
            let rhs = gen_expr(gen, value)?;
            Ok(format!("(({obj}).{} = {rhs})", cnames::mangle(field)))
        }
        ExprKind::Index { array, index } => {
            let arr_ty = array.ty();
            let arr = gen_expr(gen, array)?;
            let idx = gen_expr(gen, index)?;
            match arr_ty {
                Type::Str => Ok(format!("(((char *)({arr})->ptr)[{idx}])")),
                Type::Array(elem) => {
                    let ct = cnames::c_type(elem);
                    Ok(format!("((({ct} *)sn_array_data({arr}))[{idx}])"))
                }
                _ => gen.internal_error("indexing a non-array", loc),
            }
        }
        ExprKind::IndexAssign { array, index, value } => {
            let arr_ty = array.ty();
            let arr = gen_expr(gen, array)?;
            let idx = gen_expr(gen, index)?;
            let mut rhs = gen_expr(gen, value)?;
            let Type::Array(elem) = arr_ty else {
                return gen.internal_error("index-assign on a non-array", loc);
            };
            rhs = coerce_for_target(gen, rhs, elem, value.ty());
            let ct = cnames::c_type(elem);
            Ok(format!("((({ct} *)sn_array_data({arr}))[{idx}] = {rhs})"))
        }
        ExprKind::ArrayLiteral { elements } => gen_array_literal(gen, expr, elements, loc),
        ExprKind::SizedArray { len, default } => {
            let arena = gen.arena_var();
            let len_text = gen_expr(gen, len)?;
            let default_text = gen_expr(gen, default)?;
            match default.ty() {
                Type::Str => Ok(format!(
                    "sn_array_alloc_string({arena}, (size_t)({len_text}), (const char *)({default_text})->ptr)"
                )),
                ty if ty.is_primitive() => {
                    let sfx = cnames::type_suffix(ty);
                    Ok(format!(
                        "sn_array_alloc_{sfx}({arena}, (size_t)({len_text}), {default_text})"
                    ))
                }
                _ => gen.internal_error("sized allocation of this element type", loc),
            }
        }
        ExprKind::Slice { array, start, end, step } => {
            let arr_ty = array.ty();
            let arr = gen_expr(gen, array)?;
            let bound = |gen: &mut CodeGen<'_, 'arena>, b: &Option<&'arena Expr<'arena>>| -> Result<String> {
                match b {
                    Some(e) => gen_expr(gen, e),
                    None => Ok("SN_SLICE_DEFAULT".to_owned()),
                }
            };
            let s = bound(gen, start)?;
            let e = bound(gen, end)?;
            let st = bound(gen, step)?;
            let Type::Array(elem) = arr_ty else {
                return gen.internal_error("slicing a non-array", loc);
            };
            match elem {
                Type::Str => Ok(format!("sn_array_slice_string({arr}, {s}, {e}, {st})")),
                Type::Array(_) | Type::Function { .. } => {
                    Ok(format!("sn_array_slice_long({arr}, {s}, {e}, {st})"))
                }
                ty if ty.is_primitive() => {
                    let sfx = cnames::type_suffix(ty);
                    Ok(format!("sn_array_slice_{sfx}({arr}, {s}, {e}, {st})"))
                }
                _ => gen.internal_error("slicing this element type", loc),
            }
        }
        ExprKind::Range { start, end } => {
            let arena = gen.arena_var();
            let s = gen_expr(gen, start)?;
            let e = gen_expr(gen, end)?;
            Ok(format!("sn_array_range({arena}, {s}, {e})"))
        }
        ExprKind::Spread { array } => {
            // A bare spread clones the array.
            let arr_ty = array.ty();
            let arr = gen_expr(gen, array)?;
            Ok(clone_array(gen, &arr, arr_ty))
        }
        ExprKind::Interpolated { parts } => {
            let arena = gen.arena_var();
            let mut acc: Option<String> = None;
            for part in *parts {
                let text = gen_expr(gen, part)?;
                let as_str = to_string_of(gen, &text, part.ty());
                acc = Some(match acc {
                    None => as_str,
                    Some(prev) => format!("sn_string_concat({arena}, {prev}, {as_str})"),
                });
            }
            Ok(acc.unwrap_or_else(|| format!("sn_string_from({arena}, \"\")")))
        }
        ExprKind::Lambda(lambda) => gen_lambda(gen, lambda, expr.ty(), loc),
        ExprKind::Spawn { call } => gen_spawn(gen, call, loc),
        ExprKind::SyncExpr { name } => thread::sync_value_expr(gen, name, loc),
        ExprKind::TypeOf { operand } => {
            let arena = gen.arena_var();
            match operand.ty() {
                Type::Any => {
                    let inner = gen_expr(gen, operand)?;
                    Ok(format!(
                        "sn_string_from({arena}, sn_any_tag_name(sn_any_tag({inner})))"
                    ))
                }
                ty => Ok(format!(
                    "sn_string_from({arena}, {})",
                    c_string_literal(&ty.display_name())
                )),
            }
        }
        ExprKind::Is { operand, ty } => {
            let inner = gen_expr(gen, operand)?;
            Ok(format!("sn_any_has_tag({inner}, {})", cnames::any_tag(ty)))
        }
        ExprKind::AsType { operand, ty } => {
            let inner = gen_expr(gen, operand)?;
            let src = operand.ty();
            match (src, ty) {
                (Type::Any, target) => Ok(unbox_value(gen, &inner, target)),
                (src_ty, Type::Any) => Ok(box_value(gen, &inner, src_ty)),
                (_, target) => Ok(format!("(({})({inner}))", cnames::c_type(target))),
            }
        }
        ExprKind::StructLiteral { name, fields } => {
            let mut parts = Vec::with_capacity(fields.len());
            for (fname, fvalue) in *fields {
                let v = gen_expr(gen, fvalue)?;
                parts.push(format!(".{} = {v}", cnames::mangle(fname)));
            }
            Ok(format!("(({}){{ {} }})", name, parts.join(", ")))
        }
        ExprKind::Match { scrutinee, arms } => {
            let scrut = gen_expr(gen, scrutinee)?;
            let scrut_ty = scrutinee.ty();
            let mut out = cnames::default_value(expr.ty()).to_owned();
            for arm in arms.iter().rev() {
                let value = gen_expr(gen, arm.value)?;
                match arm.pattern {
                    Some(pat) => {
                        let p = gen_expr(gen, pat)?;
                        let cond = if matches!(scrut_ty, Type::Str) {
                            format!("sn_string_eq({scrut}, {p})")
                        } else {
                            format!("({scrut} == {p})")
                        };
                        out = format!("({cond} ? {value} : {out})");
                    }
                    None => out = value,
                }
            }
            Ok(out)
        }
    }
}

/// Boxes / converts a generated value when the assignment target demands it.
pub fn coerce_for_target(
    gen: &mut CodeGen<'_, '_>,
    text: String,
    target: &Type<'_>,
    source: &Type<'_>,
) -> String {
    match (target, source) {
        (Type::Any, src) if !matches!(src, Type::Any) => box_value(gen, &text, src),
        (Type::Array(t), Type::Array(s))
            if matches!(t.base_element(), Type::Any) && !matches!(s.base_element(), Type::Any) =>
        {
            array_to_any(gen, &text, source)
        }
        _ => text,
    }
}

fn clone_array(gen: &mut CodeGen<'_, '_>, text: &str, ty: &Type<'_>) -> String {
    let arena = gen.arena_var();
    match ty {
        Type::Array(Type::Str) => format!("sn_array_clone_string({arena}, ({text}))"),
        Type::Array(elem) if elem.is_primitive() => {
            format!("sn_array_clone_{}({arena}, ({text}))", cnames::type_suffix(elem))
        }
        Type::Array(_) => format!(
            "sn_array_clone_generic({arena}, ({text}), sizeof(SnHandle *))"
        ),
        _ => text.to_owned(),
    }
}

/// Array literal lowering.
///
/// Plain runs of elements become one `create` call over a compound literal;
/// spread segments join in with concat. An empty literal is a null handle:
/// the first push allocates.
fn gen_array_literal<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    expr: &'arena Expr<'arena>,
    elements: &'arena [&'arena Expr<'arena>],
    loc: Location,
) -> Result<String> {
    let Type::Array(elem) = expr.ty() else {
        return gen.internal_error("array literal without an array type", loc);
    };
    if elements.is_empty() {
        return Ok("NULL".to_owned());
    }
    let arena = gen.arena_var();

    enum Seg {
        Items(Vec<String>),
        Spread(String),
    }
    let mut segs: Vec<Seg> = Vec::new();
    for e in elements {
        if let ExprKind::Spread { array } = &e.kind {
            let text = gen_expr(gen, array)?;
            segs.push(Seg::Spread(text));
        } else {
            let raw = gen_expr(gen, e)?;
            let coerced = coerce_for_target(gen, raw, elem, e.ty());
            match segs.last_mut() {
                Some(Seg::Items(items)) => items.push(coerced),
                _ => segs.push(Seg::Items(vec![coerced])),
            }
        }
    }

    let make_items = |items: &[String]| -> String {
        let n = items.len();
        let list = items.join(", ");
        match elem {
            Type::Str | Type::Array(_) | Type::Function { .. } => {
                format!("sn_array_create_handle({arena}, {n}, (SnHandle *[]){{ {list} }})")
            }
            Type::Any => format!("sn_array_create_any({arena}, {n}, (SnAny[]){{ {list} }})"),
            Type::Struct { name, .. } => format!(
                "sn_array_create_generic({arena}, {n}, sizeof({name}), ({name}[]){{ {list} }})"
            ),
            prim => {
                let ct = cnames::c_type(prim);
                format!(
                    "sn_array_create_{}({arena}, {n}, ({ct}[]){{ {list} }})",
                    cnames::type_suffix(prim)
                )
            }
        }
    };

    let concat_sfx = match elem {
        Type::Str => "string",
        e if e.is_primitive() => cnames::type_suffix(e),
        _ => "string",
    };

    if segs.len() == 1 {
        return Ok(match &segs[0] {
            Seg::Items(items) => make_items(items),
            // `[...a]` is a copy of `a`.
            Seg::Spread(text) => clone_array(gen, text, expr.ty()),
        });
    }
    let mut acc: Option<String> = None;
    for seg in &segs {
        let text = match seg {
            Seg::Items(items) => make_items(items),
            Seg::Spread(text) => text.clone(),
        };
        acc = Some(match acc {
            None => text,
            Some(prev) => format!("sn_array_concat_{concat_sfx}({prev}, {text})"),
        });
    }
    Ok(acc.expect("at least one segment"))
}

fn gen_binary<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    op: BinaryOp,
    left: &'arena Expr<'arena>,
    right: &'arena Expr<'arena>,
) -> Result<String> {
    let lt = left.ty();
    let rt = right.ty();
    let l = gen_expr(gen, left)?;
    let r = gen_expr(gen, right)?;
    let arena = gen.arena_var();

    // String concatenation and comparison.
    if matches!(lt, Type::Str) || matches!(rt, Type::Str) {
        match op {
            BinaryOp::Add => {
                let ls = to_string_of(gen, &l, lt);
                let rs = to_string_of(gen, &r, rt);
                return Ok(format!("sn_string_concat({arena}, {ls}, {rs})"));
            }
            BinaryOp::Eq => return Ok(format!("sn_string_eq({l}, {r})")),
            BinaryOp::Ne => return Ok(format!("(!sn_string_eq({l}, {r}))")),
            _ => {}
        }
    }

    // Array concatenation and equality.
    if let (Type::Array(le), Type::Array(_)) = (lt, rt) {
        match op {
            BinaryOp::Add => {
                let sfx = match le {
                    Type::Str => "string",
                    e if e.is_primitive() => cnames::type_suffix(e),
                    _ => "string",
                };
                return Ok(format!("sn_array_concat_{sfx}({l}, {r})"));
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                let call = match le {
                    Type::Str => format!("sn_array_eq_string({l}, {r})"),
                    e if e.is_primitive() => {
                        format!("sn_array_eq_{}({l}, {r})", cnames::type_suffix(e))
                    }
                    _ => format!("sn_array_eq_long({l}, {r})"),
                };
                return Ok(if op == BinaryOp::Eq { call } else { format!("(!{call})") });
            }
            _ => {}
        }
    }

    // Dynamic equality.
    if matches!(lt, Type::Any) || matches!(rt, Type::Any) {
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            let lb = if matches!(lt, Type::Any) { l.clone() } else { box_value(gen, &l, lt) };
            let rb = if matches!(rt, Type::Any) { r.clone() } else { box_value(gen, &r, rt) };
            let call = format!("sn_any_equals({lb}, {rb})");
            return Ok(if op == BinaryOp::Eq { call } else { format!("(!{call})") });
        }
    }

    Ok(format!("({l} {} {r})", op.c_op()))
}

fn gen_call<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    name: &'arena str,
    namespace: Option<&'arena str>,
    args: &'arena [&'arena Expr<'arena>],
    loc: Location,
) -> Result<String> {
    // print/println lower directly onto the runtime's print family.
    if namespace.is_none() && (name == "print" || name == "println") {
        let arg = args.first().copied();
        let Some(arg) = arg else {
            return gen.internal_error("print needs an argument", loc);
        };
        let text = gen_expr(gen, arg)?;
        let which = if name == "println" { "println" } else { "print" };
        return Ok(match arg.ty() {
            Type::Str => format!("sn_{which}_string({text})"),
            Type::Int | Type::Long | Type::Int32 | Type::UInt | Type::UInt32 => {
                format!("sn_{which}_long((long long)({text}))", which = which)
            }
            Type::Double | Type::Float => format!("sn_{which}_double({text})"),
            Type::Bool => format!("sn_{which}_bool({text})"),
            Type::Char => format!("sn_{which}_char({text})"),
            Type::Byte => format!("sn_{which}_byte({text})"),
            ty => {
                let s = to_string_of(gen, &text, ty);
                format!("sn_{which}_string({s})")
            }
        });
    }

    let (is_function, is_native) = match namespace {
        Some(ns) => gen
            .table
            .lookup_namespaced(ns, name)
            .map_or((true, false), |s| (s.is_function, s.is_native)),
        None => gen
            .table
            .lookup(name)
            .map_or((true, false), |s| (s.is_function, s.is_native)),
    };

    // A call through a function-typed binding is a closure invocation.
    if !is_function {
        let callee_ty = gen.table.lookup(name).map(|s| s.ty).unwrap_or(&Type::Void);
        let callee_text = var_ref(gen, name);
        return gen_closure_call(gen, &callee_text, callee_ty, args);
    }

    let c_name = match namespace {
        Some(ns) => cnames::mangle(&format!("{ns}__{name}")),
        None => gen.function_c_name(name),
    };

    let func = gen.functions.get(name).copied();
    let mut parts = Vec::new();
    if !is_native {
        parts.push(gen.arena_var());
    }
    for (i, arg) in args.iter().enumerate() {
        let param = func.and_then(|f| f.params.get(i));
        let text = if param.is_some_and(|p| p.mem_qual == MemoryQualifier::AsRef) {
            // Reference parameters receive the cell pointer.
            match &arg.kind {
                ExprKind::Variable(vn) => cell_ptr(gen, vn),
                _ => format!("&({})", gen_expr(gen, arg)?),
            }
        } else {
            let raw = gen_expr(gen, arg)?;
            match param.map(|p| p.ty) {
                Some(target) => coerce_for_target(gen, raw, target, arg.ty()),
                None => raw,
            }
        };
        parts.push(text);
    }
    Ok(format!("{c_name}({})", parts.join(", ")))
}

fn gen_closure_call<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    callee_text: &str,
    callee_ty: &'arena Type<'arena>,
    args: &'arena [&'arena Expr<'arena>],
) -> Result<String> {
    let (params, ret): (&[&Type<'_>], &Type<'_>) = match callee_ty {
        Type::Function { params, ret } => (params, ret),
        _ => (&[], &Type::Void),
    };
    let ret_c = cnames::c_type(ret);
    let mut param_tys = String::new();
    for p in params {
        let _ = write!(param_tys, ", {}", cnames::c_type(p));
    }
    let mut arg_texts = Vec::with_capacity(args.len());
    for arg in args {
        arg_texts.push(gen_expr(gen, arg)?);
    }
    let arena = gen.arena_var();
    let args_joined = if arg_texts.is_empty() {
        String::new()
    } else {
        format!(", {}", arg_texts.join(", "))
    };
    Ok(format!(
        "((({ret_c} (*)(SnArena *, void *{param_tys}))(((SnClosureHdr *)({callee_text})->ptr)->fn))({arena}, ({callee_text})->ptr{args_joined}))"
    ))
}

fn gen_method_call<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    receiver: &'arena Expr<'arena>,
    method: &'arena str,
    args: &'arena [&'arena Expr<'arena>],
    loc: Location,
) -> Result<String> {
    let recv_ty = receiver.ty();
    let arena = gen.arena_var();

    // `ns.f(args)` parses as a method call on the namespace binding.
    if let ExprKind::Variable(ns) = &receiver.kind {
        if gen.table.lookup(ns).is_some_and(crate::symbol::Symbol::is_namespace) {
            let c_name = cnames::mangle(&format!("{ns}__{method}"));
            let mut parts = vec![arena];
            for arg in args {
                parts.push(gen_expr(gen, arg)?);
            }
            return Ok(format!("{c_name}({})", parts.join(", ")));
        }
    }

    match recv_ty {
        Type::Array(elem) => {
            let recv = gen_expr(gen, receiver)?;
            match method {
                "push" => {
                    let ExprKind::Variable(recv_name) = &receiver.kind else {
                        return gen.internal_error("push target must be a variable", loc);
                    };
                    let lvalue = var_ref(gen, recv_name);
                    let arg = args.first().copied();
                    let Some(arg) = arg else {
                        return gen.internal_error("push needs an element", loc);
                    };
                    // A pushed spawn result goes into the pending companion
                    // and is drained by the matching sync.
                    if matches!(arg.kind, ExprKind::Spawn { .. }) {
                        let pending = format!("__{recv_name}_pending_elems__");
                        let spawned = gen_expr(gen, arg)?;
                        return Ok(format!(
                            "({pending} = sn_array_push_handle({arena}, {pending}, {spawned}))"
                        ));
                    }
                    let raw = gen_expr(gen, arg)?;
                    let value = coerce_for_target(gen, raw, elem, arg.ty());
                    let call = match elem {
                        Type::Str => format!("sn_array_push_string_handle({arena}, {lvalue}, {value})"),
                        // coerce_for_target already boxed the element.
                        Type::Any => format!("sn_array_push_any({arena}, {lvalue}, {value})"),
                        Type::Array(_) | Type::Function { .. } => {
                            format!("sn_array_push_handle({arena}, {lvalue}, {value})")
                        }
                        Type::Struct { name, .. } => format!(
                            "sn_array_push_struct({arena}, {lvalue}, &({value}), sizeof({name}))"
                        ),
                        e => format!("sn_array_push_{}({arena}, {lvalue}, {value})", cnames::type_suffix(e)),
                    };
                    Ok(format!("({lvalue} = {call})"))
                }
                "pop" => Ok(match elem {
                    Type::Str => format!("sn_array_pop_string({recv})"),
                    Type::Any => format!("sn_array_pop_any({recv})"),
                    Type::Array(_) | Type::Function { .. } => format!("sn_array_pop_handle({recv})"),
                    e => format!("sn_array_pop_{}({recv})", cnames::type_suffix(e)),
                }),
                "len" => Ok(format!("sn_array_len({recv})")),
                "clear" => Ok(format!("sn_array_clear({recv})")),
                "clone" => Ok(clone_array(gen, &recv, recv_ty)),
                "reverse" => Ok(match elem {
                    Type::Str => format!("sn_array_rev_string({recv})"),
                    e if e.is_primitive() => format!("sn_array_rev_{}({recv})", cnames::type_suffix(e)),
                    _ => format!("sn_array_rev_long({recv})"),
                }),
                "index_of" | "contains" => {
                    let which = if method == "index_of" { "index_of" } else { "contains" };
                    let arg = gen_expr(gen, args[0])?;
                    Ok(match elem {
                        Type::Str => format!(
                            "sn_array_{which}_string({recv}, (const char *)({arg})->ptr)"
                        ),
                        e if e.is_primitive() => {
                            format!("sn_array_{which}_{}({recv}, {arg})", cnames::type_suffix(e))
                        }
                        _ => format!("sn_array_{which}_long({recv}, (long long)({arg}))"),
                    })
                }
                "join" => {
                    let sep = gen_expr(gen, args[0])?;
                    let sfx = match elem {
                        Type::Str => "string",
                        e if e.is_primitive() => cnames::type_suffix(e),
                        _ => return gen.internal_error("join on this element type", loc),
                    };
                    Ok(format!(
                        "sn_array_join_{sfx}({arena}, {recv}, (const char *)({sep})->ptr)"
                    ))
                }
                "push_copy" => {
                    let arg = gen_expr(gen, args[0])?;
                    Ok(match elem {
                        Type::Str => format!(
                            "sn_array_push_copy_string({recv}, (const char *)({arg})->ptr)"
                        ),
                        e if e.is_primitive() => {
                            format!("sn_array_push_copy_{}({recv}, {arg})", cnames::type_suffix(e))
                        }
                        _ => return gen.internal_error("push_copy on this element type", loc),
                    })
                }
                "insert" => {
                    let elem_text = gen_expr(gen, args[0])?;
                    let idx = gen_expr(gen, args[1])?;
                    Ok(match elem {
                        Type::Str => format!(
                            "sn_array_ins_string({recv}, (const char *)({elem_text})->ptr, {idx})"
                        ),
                        e if e.is_primitive() => format!(
                            "sn_array_ins_{}({recv}, {elem_text}, {idx})",
                            cnames::type_suffix(e)
                        ),
                        _ => return gen.internal_error("insert on this element type", loc),
                    })
                }
                "remove" => {
                    let idx = gen_expr(gen, args[0])?;
                    Ok(match elem {
                        Type::Str => format!("sn_array_rem_string({recv}, {idx})"),
                        e if e.is_primitive() => {
                            format!("sn_array_rem_{}({recv}, {idx})", cnames::type_suffix(e))
                        }
                        _ => return gen.internal_error("remove on this element type", loc),
                    })
                }
                "to_string" => Ok(to_string_of(gen, &recv, recv_ty)),
                _ => gen.internal_error("unknown array method", loc),
            }
        }
        Type::Str => {
            let recv = gen_expr(gen, receiver)?;
            match method {
                "len" => Ok(format!("sn_string_len({recv})")),
                "to_string" => Ok(recv),
                _ => gen.internal_error("unknown string method", loc),
            }
        }
        // UFCS: struct method calls resolve to free functions taking the
        // receiver first.
        Type::Struct { .. } => {
            let func = gen.functions.get(method).copied();
            let c_name = gen.function_c_name(method);
            let mut parts = vec![gen.arena_var()];
            let recv_text = if func
                .and_then(|f| f.params.first())
                .is_some_and(|p| p.mem_qual == MemoryQualifier::AsRef)
            {
                match &receiver.kind {
                    ExprKind::Variable(vn) => cell_ptr(gen, vn),
                    _ => format!("&({})", gen_expr(gen, receiver)?),
                }
            } else {
                gen_expr(gen, receiver)?
            };
            parts.push(recv_text);
            for arg in args {
                parts.push(gen_expr(gen, arg)?);
            }
            Ok(format!("{c_name}({})", parts.join(", ")))
        }
        _ => gen.internal_error("method call on this type", loc),
    }
}

fn unbox_value(gen: &mut CodeGen<'_, '_>, text: &str, target: &Type<'_>) -> String {
    match target {
        Type::Struct { name, id, .. } => {
            format!("(*({name} *)(sn_unbox_struct(({text}), {id}))->ptr)")
        }
        Type::Int | Type::Long => format!("sn_unbox_long(({text}))"),
        _ => {
            let _ = gen;
            format!("{}(({text}))", cnames::unbox_fn(target))
        }
    }
}

// ---------------------------------------------------------------------------
// Lambdas
// ---------------------------------------------------------------------------

struct Capture<'arena> {
    name: &'arena str,
    ty: &'arena Type<'arena>,
    cell: bool,
    self_slot: bool,
}

fn gen_lambda<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    lambda: &'arena LambdaExpr<'arena>,
    lambda_ty: &'arena Type<'arena>,
    loc: Location,
) -> Result<String> {
    let id = gen.next_lambda_id;
    gen.next_lambda_id += 1;

    let ret = match lambda_ty {
        Type::Function { ret, .. } => *ret,
        _ => lambda.ret.unwrap_or(&Type::Void),
    };
    let captures = collect_captures(gen, lambda);

    // Closure record: function pointer first, then one field per capture.
    let closure_ty = format!("__closure_{id}__");
    let _ = writeln!(gen.lambda_defs, "typedef struct {closure_ty} {{");
    let _ = writeln!(gen.lambda_defs, "    void *fn;");
    for cap in &captures {
        let ct = cnames::c_type(cap.ty);
        let field = cnames::mangle(cap.name);
        if cap.self_slot {
            let _ = writeln!(gen.lambda_defs, "    SnHandle *{field};");
        } else if cap.cell {
            let _ = writeln!(gen.lambda_defs, "    {ct} *{field};");
        } else {
            let _ = writeln!(gen.lambda_defs, "    {ct} {field};");
        }
    }
    let _ = writeln!(gen.lambda_defs, "}} {closure_ty};");

    // The lambda body becomes a static function taking the caller's arena
    // and the raw environment. Lambdas share the caller's arena.
    let saved_out = core::mem::take(&mut gen.out);
    let saved_fn = gen.current_function.clone();
    let saved_ret = gen.current_return_type;
    let saved_arena = gen.current_arena_var.clone();
    let saved_tail = gen.in_tail_call_function;
    let saved_decl = gen.current_decl_var_name.take();
    // Returns inside the lambda must not unwind the enclosing function's
    // loop or private-block arenas.
    let saved_loop_stack = core::mem::take(&mut gen.loop_arena_stack);
    let saved_private_stack = core::mem::take(&mut gen.private_arena_stack);

    let fn_name = format!("__lambda_{id}__");
    gen.current_function = Some(fn_name.clone());
    gen.current_return_type = Some(ret);
    gen.current_arena_var = Some("__local_arena__".to_owned());
    gen.in_tail_call_function = false;

    gen.table.push_scope();
    for p in lambda.params {
        gen.table
            .add_symbol_full(p.name, p.ty, SymbolKind::Param, p.mem_qual);
    }
    for cap in &captures {
        let sym = gen.table.add_symbol_full(
            cap.name,
            cap.ty,
            SymbolKind::Local,
            MemoryQualifier::Default,
        );
        let field = cnames::mangle(cap.name);
        if cap.cell {
            sym.c_name = Some(format!("(*__env__->{field})"));
            sym.c_ptr_name = Some(format!("__env__->{field}"));
        } else {
            sym.c_name = Some(format!("__env__->{field}"));
        }
    }

    let ret_c = if matches!(ret, Type::Void) { "void".to_owned() } else { cnames::c_type(ret) };
    let mut params_text = String::new();
    let mut param_tys_text = String::new();
    for p in lambda.params {
        let _ = write!(params_text, ", {} {}", cnames::c_type(p.ty), cnames::mangle(p.name));
        let _ = write!(param_tys_text, ", {}", cnames::c_type(p.ty));
    }
    // The constructor stores the function pointer, so the prototype must
    // precede it in the file.
    let _ = writeln!(
        gen.lambda_defs,
        "static {ret_c} {fn_name}(SnArena *, void *{param_tys_text});"
    );
    gen.line(
        0,
        &format!("static {ret_c} {fn_name}(SnArena *__caller_arena__, void *__env_raw__{params_text}) {{"),
    );
    gen.line(1, &format!("{closure_ty} *__env__ = ({closure_ty} *)__env_raw__;"));
    gen.line(1, "(void)__env__;");
    gen.line(1, "SnArena *__local_arena__ = __caller_arena__;");
    if !matches!(ret, Type::Void) {
        gen.line(1, &format!("{ret_c} _return_value = {};", cnames::default_value(ret)));
    }

    match &lambda.body {
        LambdaBody::Expr(expr) => {
            let value = gen_expr(gen, expr)?;
            if matches!(ret, Type::Void) {
                gen.line(1, &format!("{value};"));
            } else {
                gen.line(1, &format!("_return_value = {value};"));
            }
            gen.line(1, &format!("goto {fn_name}_return;"));
        }
        LambdaBody::Block(stmts) => {
            for s in *stmts {
                super::stmt::gen_stmt(gen, s, 1)?;
            }
            gen.line(1, &format!("goto {fn_name}_return;"));
        }
    }

    gen.line(0, &format!("{fn_name}_return:"));
    if matches!(ret, Type::Void) {
        gen.line(1, "return;");
    } else {
        gen.line(1, "return _return_value;");
    }
    gen.line(0, "}");
    gen.line(0, "");

    gen.table.pop_scope();
    let body_text = core::mem::replace(&mut gen.out, saved_out);
    gen.current_function = saved_fn;
    gen.current_return_type = saved_ret;
    gen.current_arena_var = saved_arena;
    gen.in_tail_call_function = saved_tail;
    gen.current_decl_var_name = saved_decl;
    gen.loop_arena_stack = saved_loop_stack;
    gen.private_arena_stack = saved_private_stack;

    // Constructor: allocates the closure and seeds its fields, so a lambda
    // stays a single C expression at its use site.
    let mut ctor_params = String::new();
    let mut ctor_body = String::new();
    let mut ctor_args: Vec<String> = Vec::new();
    let mut has_self_slot = false;
    for cap in &captures {
        let field = cnames::mangle(cap.name);
        let ct = cnames::c_type(cap.ty);
        if cap.self_slot {
            has_self_slot = true;
            let _ = write!(ctor_params, ", SnHandle *{field}");
            let _ = writeln!(ctor_body, "    __c__->{field} = {field};");
            ctor_args.push("NULL".to_owned());
        } else if cap.cell {
            let _ = write!(ctor_params, ", {ct} *{field}");
            let _ = writeln!(ctor_body, "    __c__->{field} = {field};");
            ctor_args.push(cell_ptr(gen, cap.name));
        } else {
            let _ = write!(ctor_params, ", {ct} {field}");
            let _ = writeln!(ctor_body, "    __c__->{field} = {field};");
            ctor_args.push(var_ref(gen, cap.name));
        }
    }
    let _ = writeln!(
        gen.lambda_defs,
        "static SnHandle *__make_closure_{id}__(SnArena *__arena__{ctor_params}) {{"
    );
    let _ = writeln!(
        gen.lambda_defs,
        "    SnHandle *__h__ = sn_arena_alloc(__arena__, sizeof({closure_ty}));"
    );
    let _ = writeln!(gen.lambda_defs, "    {closure_ty} *__c__ = ({closure_ty} *)__h__->ptr;");
    let _ = writeln!(gen.lambda_defs, "    __c__->fn = (void *){fn_name};");
    gen.lambda_defs.push_str(&ctor_body);
    let _ = writeln!(gen.lambda_defs, "    return __h__;");
    let _ = writeln!(gen.lambda_defs, "}}");
    gen.lambda_defs.push('\n');
    gen.lambda_defs.push_str(&body_text);

    if has_self_slot {
        gen.recursive_lambda_id = id;
    }
    let _ = loc;

    // Closures escape through returns: while the enclosing function returns
    // a closure, allocate in the caller's arena instead of the local one.
    let in_main = gen.current_function.as_deref() == Some("main");
    let alloc_arena = if gen.allocate_closure_in_caller_arena
        && gen.current_arena_var.as_deref() == Some("__local_arena__")
        && !in_main
    {
        "__caller_arena__".to_owned()
    } else {
        gen.arena_var()
    };
    let args_joined = if ctor_args.is_empty() {
        String::new()
    } else {
        format!(", {}", ctor_args.join(", "))
    };
    Ok(format!("__make_closure_{id}__({alloc_arena}{args_joined})"))
}

/// Finds the outer-scope bindings a lambda references.
fn collect_captures<'arena>(
    gen: &CodeGen<'_, 'arena>,
    lambda: &'arena LambdaExpr<'arena>,
) -> Vec<Capture<'arena>> {
    let mut locals: HashSet<&str> = lambda.params.iter().map(|p| p.name).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut captures = Vec::new();

    fn visit_name<'arena>(
        gen: &CodeGen<'_, 'arena>,
        name: &'arena str,
        locals: &HashSet<&str>,
        seen: &mut HashSet<&'arena str>,
        captures: &mut Vec<Capture<'arena>>,
    ) {
        if locals.contains(name) || seen.contains(name) {
            return;
        }
        let self_slot = gen.current_decl_var_name == Some(name);
        let Some(sym) = gen.table.lookup(name) else {
            return;
        };
        if !self_slot {
            if sym.is_function || sym.kind == SymbolKind::Global || sym.is_namespace() {
                return;
            }
            if !matches!(sym.kind, SymbolKind::Local | SymbolKind::Param) {
                return;
            }
        }
        seen.insert(name);
        let cell = !self_slot
            && (gen.is_captured_primitive(name)
                || (sym.mem_qual == MemoryQualifier::AsRef
                    && (sym.ty.is_primitive() || matches!(sym.ty, Type::Array(_)))));
        captures.push(Capture { name, ty: sym.ty, cell, self_slot });
    }

    fn walk_expr<'arena>(
        gen: &CodeGen<'_, 'arena>,
        expr: &'arena Expr<'arena>,
        locals: &mut HashSet<&'arena str>,
        seen: &mut HashSet<&'arena str>,
        captures: &mut Vec<Capture<'arena>>,
    ) {
        match &expr.kind {
            ExprKind::Variable(name) => visit_name(gen, name, locals, seen, captures),
            ExprKind::Assign { name, value } | ExprKind::CompoundAssign { name, value, .. } => {
                visit_name(gen, name, locals, seen, captures);
                walk_expr(gen, value, locals, seen, captures);
            }
            ExprKind::Unary { operand, .. }
            | ExprKind::Spread { array: operand }
            | ExprKind::TypeOf { operand }
            | ExprKind::Is { operand, .. }
            | ExprKind::AsType { operand, .. }
            | ExprKind::Spawn { call: operand } => walk_expr(gen, operand, locals, seen, captures),
            ExprKind::Binary { left, right, .. } | ExprKind::Range { start: left, end: right } => {
                walk_expr(gen, left, locals, seen, captures);
                walk_expr(gen, right, locals, seen, captures);
            }
            ExprKind::Call { name, args, .. } => {
                visit_name(gen, name, locals, seen, captures);
                for a in *args {
                    walk_expr(gen, a, locals, seen, captures);
                }
            }
            ExprKind::CallValue { callee, args } => {
                walk_expr(gen, callee, locals, seen, captures);
                for a in *args {
                    walk_expr(gen, a, locals, seen, captures);
                }
            }
            ExprKind::MethodCall { receiver, args, .. } => {
                walk_expr(gen, receiver, locals, seen, captures);
                for a in *args {
                    walk_expr(gen, a, locals, seen, captures);
                }
            }
            ExprKind::Member { object, .. } => walk_expr(gen, object, locals, seen, captures),
            ExprKind::MemberAssign { object, value, .. } => {
                walk_expr(gen, object, locals, seen, captures);
                walk_expr(gen, value, locals, seen, captures);
            }
            ExprKind::Index { array, index } => {
                walk_expr(gen, array, locals, seen, captures);
                walk_expr(gen, index, locals, seen, captures);
            }
            ExprKind::IndexAssign { array, index, value } => {
                walk_expr(gen, array, locals, seen, captures);
                walk_expr(gen, index, locals, seen, captures);
                walk_expr(gen, value, locals, seen, captures);
            }
            ExprKind::ArrayLiteral { elements } | ExprKind::Interpolated { parts: elements } => {
                for e in *elements {
                    walk_expr(gen, e, locals, seen, captures);
                }
            }
            ExprKind::SizedArray { len, default } => {
                walk_expr(gen, len, locals, seen, captures);
                walk_expr(gen, default, locals, seen, captures);
            }
            ExprKind::Slice { array, start, end, step } => {
                walk_expr(gen, array, locals, seen, captures);
                for b in [start, end, step].into_iter().flatten() {
                    walk_expr(gen, b, locals, seen, captures);
                }
            }
            ExprKind::Lambda(inner) => {
                // Nested lambda: its params shadow, the rest still captures.
                let mut inner_locals = locals.clone();
                for p in inner.params {
                    inner_locals.insert(p.name);
                }
                match &inner.body {
                    LambdaBody::Expr(e) => walk_expr(gen, e, &mut inner_locals, seen, captures),
                    LambdaBody::Block(stmts) => {
                        for s in *stmts {
                            walk_stmt(gen, s, &mut inner_locals, seen, captures);
                        }
                    }
                }
            }
            ExprKind::SyncExpr { name } => visit_name(gen, name, locals, seen, captures),
            ExprKind::StructLiteral { fields, .. } => {
                for (_, e) in *fields {
                    walk_expr(gen, e, locals, seen, captures);
                }
            }
            ExprKind::Match { scrutinee, arms } => {
                walk_expr(gen, scrutinee, locals, seen, captures);
                for arm in *arms {
                    if let Some(p) = arm.pattern {
                        walk_expr(gen, p, locals, seen, captures);
                    }
                    walk_expr(gen, arm.value, locals, seen, captures);
                }
            }
            ExprKind::Literal(_) => {}
        }
    }

    fn walk_stmt<'arena>(
        gen: &CodeGen<'_, 'arena>,
        stmt: &'arena Stmt<'arena>,
        locals: &mut HashSet<&'arena str>,
        seen: &mut HashSet<&'arena str>,
        captures: &mut Vec<Capture<'arena>>,
    ) {
        match &stmt.kind {
            StmtKind::Expression(e) | StmtKind::Return { value: Some(e) } => {
                walk_expr(gen, e, locals, seen, captures);
            }
            StmtKind::VarDecl(decl) => {
                locals.insert(decl.name);
                if let Some(init) = decl.initializer {
                    walk_expr(gen, init, locals, seen, captures);
                }
            }
            StmtKind::Block(stmts) | StmtKind::PrivateBlock(stmts) => {
                let mut inner = locals.clone();
                for s in *stmts {
                    walk_stmt(gen, s, &mut inner, seen, captures);
                }
            }
            StmtKind::If { condition, then_branch, else_branch } => {
                walk_expr(gen, condition, locals, seen, captures);
                walk_stmt(gen, then_branch, locals, seen, captures);
                if let Some(e) = else_branch {
                    walk_stmt(gen, e, locals, seen, captures);
                }
            }
            StmtKind::While { condition, body } => {
                walk_expr(gen, condition, locals, seen, captures);
                walk_stmt(gen, body, locals, seen, captures);
            }
            StmtKind::For { var, start, end, body } => {
                walk_expr(gen, start, locals, seen, captures);
                walk_expr(gen, end, locals, seen, captures);
                let mut inner = locals.clone();
                inner.insert(var);
                walk_stmt(gen, body, &mut inner, seen, captures);
            }
            StmtKind::ForEach { var, iterable, body } => {
                walk_expr(gen, iterable, locals, seen, captures);
                let mut inner = locals.clone();
                inner.insert(var);
                walk_stmt(gen, body, &mut inner, seen, captures);
            }
            StmtKind::Lock { lock_expr, body } => {
                walk_expr(gen, lock_expr, locals, seen, captures);
                walk_stmt(gen, body, locals, seen, captures);
            }
            _ => {}
        }
    }

    match &lambda.body {
        LambdaBody::Expr(e) => walk_expr(gen, e, &mut locals, &mut seen, &mut captures),
        LambdaBody::Block(stmts) => {
            for s in *stmts {
                walk_stmt(gen, s, &mut locals, &mut seen, &mut captures);
            }
        }
    }
    captures
}

// ---------------------------------------------------------------------------
// Spawn thunks
// ---------------------------------------------------------------------------

fn gen_spawn<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    call: &'arena Expr<'arena>,
    loc: Location,
) -> Result<String> {
    let ExprKind::Call { name, namespace, args, .. } = &call.kind else {
        return gen.internal_error("spawn expects a direct call", loc);
    };
    let id = gen.next_spawn_id;
    gen.next_spawn_id += 1;

    let func = gen.functions.get(*name).copied();
    let is_native = gen.table.lookup(name).is_some_and(|s| s.is_native);
    let c_name = match namespace {
        Some(ns) => cnames::mangle(&format!("{ns}__{name}")),
        None => gen.function_c_name(name),
    };
    let ret = call.ty();

    // Argument pack: copied by the runtime before the spawner's frame moves on.
    let args_ty = format!("__spawn_args_{id}__");
    let _ = writeln!(gen.spawn_defs, "typedef struct {{");
    if args.is_empty() {
        let _ = writeln!(gen.spawn_defs, "    char __unused__;");
    }
    for (i, arg) in args.iter().enumerate() {
        let ct = func
            .and_then(|f| f.params.get(i))
            .map_or_else(|| cnames::c_type(arg.ty()), |p| cnames::c_type(p.ty));
        let _ = writeln!(gen.spawn_defs, "    {ct} a{i};");
    }
    let _ = writeln!(gen.spawn_defs, "}} {args_ty};");

    let _ = writeln!(
        gen.spawn_defs,
        "static SnThreadResult __spawn_fn_{id}__(unsigned char *__raw__) {{"
    );
    let _ = writeln!(gen.spawn_defs, "    {args_ty} *__args__ = ({args_ty} *)__raw__;");
    let _ = writeln!(gen.spawn_defs, "    (void)__args__;");
    let _ = writeln!(gen.spawn_defs, "    SnThreadResult __r__ = {{0}};");
    let _ = writeln!(gen.spawn_defs, "    SnArena *__spawn_arena__ = sn_arena_create(NULL);");
    let mut call_args: Vec<String> = Vec::new();
    if !is_native {
        call_args.push("__spawn_arena__".to_owned());
    }
    for i in 0..args.len() {
        call_args.push(format!("__args__->a{i}"));
    }
    let call_text = format!("{c_name}({})", call_args.join(", "));
    match ret {
        Type::Void => {
            let _ = writeln!(gen.spawn_defs, "    {call_text};");
            let _ = writeln!(gen.spawn_defs, "    sn_arena_destroy(__spawn_arena__);");
        }
        Type::Double | Type::Float => {
            let _ = writeln!(gen.spawn_defs, "    __r__.dbits = (double){call_text};");
            let _ = writeln!(gen.spawn_defs, "    sn_arena_destroy(__spawn_arena__);");
        }
        Type::Any => {
            let _ = writeln!(gen.spawn_defs, "    __r__.any = {call_text};");
            let _ = writeln!(gen.spawn_defs, "    __r__.arena = __spawn_arena__;");
        }
        ty if ty.is_handle() || matches!(ty, Type::Struct { .. }) => {
            if let Type::Struct { name: sname, size, .. } = ty {
                let _ = writeln!(gen.spawn_defs, "    {sname} __v__ = {call_text};");
                let _ = writeln!(
                    gen.spawn_defs,
                    "    SnHandle *__vh__ = sn_arena_alloc(__spawn_arena__, {size});"
                );
                let _ = writeln!(gen.spawn_defs, "    *({sname} *)__vh__->ptr = __v__;");
                let _ = writeln!(gen.spawn_defs, "    __r__.handle = __vh__;");
            } else {
                let _ = writeln!(gen.spawn_defs, "    __r__.handle = {call_text};");
            }
            let _ = writeln!(gen.spawn_defs, "    __r__.arena = __spawn_arena__;");
        }
        _ => {
            let _ = writeln!(gen.spawn_defs, "    __r__.bits = (long long){call_text};");
            let _ = writeln!(gen.spawn_defs, "    sn_arena_destroy(__spawn_arena__);");
        }
    }
    let _ = writeln!(gen.spawn_defs, "    return __r__;");
    let _ = writeln!(gen.spawn_defs, "}}");
    gen.spawn_defs.push('\n');

    let arena = gen.arena_var();
    if args.is_empty() {
        return Ok(format!("sn_thread_spawn({arena}, __spawn_fn_{id}__, NULL, 0)"));
    }
    let mut packed = Vec::with_capacity(args.len());
    for arg in args.iter() {
        packed.push(gen_expr(gen, arg)?);
    }
    Ok(format!(
        "sn_thread_spawn({arena}, __spawn_fn_{id}__, &({args_ty}){{ {} }}, sizeof({args_ty}))",
        packed.join(", ")
    ))
}
