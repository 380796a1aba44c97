//! Return-statement lowering.
//!
//! A marked tail call rewrites into parameter reassignment plus `continue`
//! on the enclosing tail loop. A normal return stores the value, unwinds
//! any active loop and private-block arenas (innermost first), and jumps to
//! the function's return label; the function-level arena itself is the
//! postamble's job.

use crate::ast::{Expr, ExprKind};
use crate::error::Result;
use crate::location::Location;
use crate::types::Type;

use super::super::cnames;
use super::super::expr::{box_value, gen_expr};
use super::super::CodeGen;

pub fn gen_return<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    value: Option<&'arena Expr<'arena>>,
    indent: usize,
    loc: Location,
) -> Result<()> {
    let is_void = gen
        .current_return_type
        .map_or(true, |t| matches!(t, Type::Void));

    // Tail-call rewrite.
    if gen.in_tail_call_function {
        if let Some(expr) = value {
            if let ExprKind::Call { args, is_tail_call, .. } = &expr.kind {
                if is_tail_call.get() {
                    let Some(func) = gen.tail_call_fn else {
                        return gen.internal_error("tail call outside a tail function", loc);
                    };
                    if func.params.len() > 1 {
                        // Temporaries first: the new arguments may read the
                        // old parameter values.
                        for (i, arg) in args.iter().enumerate() {
                            let ct = cnames::c_type(func.params[i].ty);
                            let text = gen_expr(gen, arg)?;
                            gen.line(indent, &format!("{ct} __tail_arg_{i}__ = {text};"));
                        }
                        for (i, p) in func.params.iter().enumerate() {
                            let pn = cnames::mangle(p.name);
                            gen.line(indent, &format!("{pn} = __tail_arg_{i}__;"));
                        }
                    } else if let (Some(p), Some(arg)) = (func.params.first(), args.first()) {
                        let pn = cnames::mangle(p.name);
                        let text = gen_expr(gen, arg)?;
                        gen.line(indent, &format!("{pn} = {text};"));
                    }
                    gen.line(indent, "continue;");
                    return Ok(());
                }
            }
        }
    }

    if let Some(expr) = value {
        if !is_void {
            // A lambda returned directly is allocated in the caller's arena
            // so its captured state survives this frame.
            let is_lambda_return = matches!(expr.kind, ExprKind::Lambda(_));
            let saved_flag = gen.allocate_closure_in_caller_arena;
            if is_lambda_return {
                gen.allocate_closure_in_caller_arena = true;
            }
            let mut text = gen_expr(gen, expr)?;
            if is_lambda_return {
                gen.allocate_closure_in_caller_arena = saved_flag;
            }

            if let Some(ret_ty) = gen.current_return_type {
                if matches!(ret_ty, Type::Any) && !matches!(expr.ty(), Type::Any) {
                    text = box_value(gen, &text, expr.ty());
                }
            }
            gen.line(indent, &format!("_return_value = {text};"));
        } else {
            let text = gen_expr(gen, expr)?;
            gen.line(indent, &format!("{text};"));
        }
    }

    // Unwind active loop arenas, then private-block arenas, innermost
    // first. The function arena is destroyed at the return label.
    let loop_arenas: Vec<_> = gen.loop_arena_stack.iter().rev().cloned().collect();
    for arena in loop_arenas {
        gen.line(indent, &format!("sn_arena_destroy({arena});"));
    }
    let private_arenas: Vec<_> = gen.private_arena_stack.iter().rev().cloned().collect();
    for arena in private_arenas {
        gen.line(indent, &format!("sn_arena_destroy({arena});"));
    }

    let label = gen
        .current_function
        .clone()
        .unwrap_or_else(|| "main".to_owned());
    gen.line(indent, &format!("goto {label}_return;"));
    Ok(())
}
