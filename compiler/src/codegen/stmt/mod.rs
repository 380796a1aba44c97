//! Statement code generation: the dispatcher and the small statement forms.
//!
//! The larger lowerings live in their own files: variable declarations in
//! [`var`], function bodies in [`func`], returns in [`ret`], the
//! captured-primitive pre-pass in [`capture`], sync statements in
//! [`thread`], imports in [`import`] and loops in [`loops`].

pub mod capture;
pub mod func;
pub mod import;
pub mod loops;
pub mod ret;
pub mod thread;
pub mod var;

use crate::ast::{ExprKind, Stmt, StmtKind};
use crate::error::Result;

use super::expr::{gen_expr, var_ref};
use super::CodeGen;

pub fn gen_stmt<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    stmt: &'arena Stmt<'arena>,
    indent: usize,
) -> Result<()> {
    match &stmt.kind {
        StmtKind::Expression(expr) => {
            if let ExprKind::SyncExpr { name } = &expr.kind {
                return thread::gen_sync_statement(gen, name, indent, stmt.loc);
            }
            let text = gen_expr(gen, expr)?;
            gen.line(indent, &format!("{text};"));
            Ok(())
        }
        StmtKind::VarDecl(decl) => var::gen_var_declaration(gen, decl, indent),
        StmtKind::Function(func) => func::gen_function(gen, func),
        StmtKind::Return { value } => ret::gen_return(gen, *value, indent, stmt.loc),
        StmtKind::Block(stmts) => {
            gen.table.push_scope();
            gen.line(indent, "{");
            for s in *stmts {
                gen_stmt(gen, s, indent + 1)?;
            }
            gen.line(indent, "}");
            gen.table.pop_scope();
            Ok(())
        }
        StmtKind::If { condition, then_branch, else_branch } => {
            let cond = gen_expr(gen, condition)?;
            gen.line(indent, &format!("if ({cond}) {{"));
            gen_stmt(gen, then_branch, indent + 1)?;
            gen.line(indent, "}");
            if let Some(else_branch) = else_branch {
                gen.line(indent, "else {");
                gen_stmt(gen, else_branch, indent + 1)?;
                gen.line(indent, "}");
            }
            Ok(())
        }
        StmtKind::While { condition, body } => loops::gen_while(gen, condition, body, indent),
        StmtKind::For { var, start, end, body } => {
            loops::gen_for(gen, var, start, end, body, indent)
        }
        StmtKind::ForEach { var, iterable, body } => {
            loops::gen_for_each(gen, var, iterable, body, indent)
        }
        StmtKind::Break => {
            gen.line(indent, "break;");
            Ok(())
        }
        StmtKind::Continue => {
            gen.line(indent, "continue;");
            Ok(())
        }
        StmtKind::Lock { lock_expr, body } => {
            let target = match &lock_expr.kind {
                ExprKind::Variable(name) => var_ref(gen, name),
                _ => gen_expr(gen, lock_expr)?,
            };
            gen.line(indent, &format!("sn_sync_lock((void *)&({target}));"));
            gen.line(indent, "{");
            gen_stmt(gen, body, indent + 1)?;
            gen.line(indent, "}");
            gen.line(indent, &format!("sn_sync_unlock((void *)&({target}));"));
            Ok(())
        }
        StmtKind::PrivateBlock(stmts) => {
            let id = gen.next_temp_id;
            gen.next_temp_id += 1;
            let arena_name = format!("__private_arena_{id}__");
            let parent = gen.arena_var();
            gen.line(indent, "{");
            gen.line(
                indent + 1,
                &format!("SnArena *{arena_name} = sn_arena_create({parent});"),
            );
            let saved_arena = gen.current_arena_var.replace(arena_name.clone());
            let saved_private = gen.in_private_context;
            gen.in_private_context = true;
            gen.private_arena_stack.push(arena_name.clone());
            gen.table.push_scope();
            gen.table.enter_arena();
            let result = stmts.iter().try_for_each(|s| gen_stmt(gen, s, indent + 1));
            gen.table.exit_arena();
            gen.table.pop_scope();
            gen.private_arena_stack.pop();
            gen.in_private_context = saved_private;
            gen.current_arena_var = saved_arena;
            gen.line(indent + 1, &format!("sn_arena_destroy({arena_name});"));
            gen.line(indent, "}");
            result
        }
        // Module-level constructs have no body-level lowering.
        StmtKind::Import(_)
        | StmtKind::Pragma(_)
        | StmtKind::TypeDecl { .. }
        | StmtKind::StructDecl(_) => Ok(()),
    }
}
