//! Loop lowering: `while`, range `for`, and `foreach` over arrays.
//!
//! A `foreach` brackets its body with a loop arena that `return` unwinds;
//! the body itself still allocates in the enclosing arena, the loop arena
//! carries the iteration bookkeeping and dies with the loop.

use crate::ast::{Expr, Stmt};
use crate::error::Result;
use crate::symbol::SymbolKind;
use crate::types::Type;

use super::super::cnames;
use super::super::expr::gen_expr;
use super::super::CodeGen;
use super::gen_stmt;

pub fn gen_while<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    condition: &'arena Expr<'arena>,
    body: &'arena Stmt<'arena>,
    indent: usize,
) -> Result<()> {
    let cond = gen_expr(gen, condition)?;
    gen.line(indent, &format!("while ({cond}) {{"));
    gen.table.enter_loop();
    let result = gen_stmt(gen, body, indent + 1);
    gen.table.exit_loop();
    gen.line(indent, "}");
    result
}

pub fn gen_for<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    var: &'arena str,
    start: &'arena Expr<'arena>,
    end: &'arena Expr<'arena>,
    body: &'arena Stmt<'arena>,
    indent: usize,
) -> Result<()> {
    let start_text = gen_expr(gen, start)?;
    let end_text = gen_expr(gen, end)?;
    let v = cnames::mangle(var);

    gen.table.push_scope();
    gen.table
        .add_symbol_full(var, gen.prims.long, SymbolKind::Local, crate::ast::MemoryQualifier::Default);
    gen.line(
        indent,
        &format!("for (long long {v} = {start_text}; {v} < {end_text}; {v}++) {{"),
    );
    gen.table.enter_loop();
    let result = gen_stmt(gen, body, indent + 1);
    gen.table.exit_loop();
    gen.line(indent, "}");
    gen.table.pop_scope();
    result
}

pub fn gen_for_each<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    var: &'arena str,
    iterable: &'arena Expr<'arena>,
    body: &'arena Stmt<'arena>,
    indent: usize,
) -> Result<()> {
    let iter_ty = iterable.ty();
    let Type::Array(elem) = iter_ty else {
        return gen.internal_error("foreach over a non-array", iterable.loc);
    };
    let iter_text = gen_expr(gen, iterable)?;
    let id = gen.next_temp_id;
    gen.next_temp_id += 1;
    let iter = format!("__iter_{id}__");
    let loop_arena = format!("__loop_arena_{id}__");
    let len = format!("__len_{id}__");
    let i = format!("__i_{id}__");
    let parent = gen.arena_var();
    let elem_ct = cnames::c_type(elem);
    let v = cnames::mangle(var);

    gen.line(indent, "{");
    gen.line(indent + 1, &format!("SnHandle *{iter} = {iter_text};"));
    gen.line(indent + 1, &format!("SnArena *{loop_arena} = sn_arena_create({parent});"));
    gen.loop_arena_stack.push(loop_arena.clone());
    gen.line(indent + 1, &format!("long long {len} = sn_array_len({iter});"));
    gen.line(
        indent + 1,
        &format!("for (long long {i} = 0; {i} < {len}; {i}++) {{"),
    );

    gen.table.push_scope();
    gen.table
        .add_symbol_full(var, elem, SymbolKind::Local, crate::ast::MemoryQualifier::Default);
    gen.line(
        indent + 2,
        &format!("{elem_ct} {v} = (({elem_ct} *)sn_array_data({iter}))[{i}];"),
    );
    gen.table.enter_loop();
    let result = gen_stmt(gen, body, indent + 2);
    gen.table.exit_loop();
    gen.table.pop_scope();

    gen.line(indent + 1, "}");
    gen.loop_arena_stack.pop();
    gen.line(indent + 1, &format!("sn_arena_destroy({loop_arena});"));
    gen.line(indent, "}");
    result
}
