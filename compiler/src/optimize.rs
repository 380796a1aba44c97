//! AST-level optimization: literal folding and dead-store elimination.
//!
//! Runs after checking, so every expression already carries its type. The
//! tree is immutable; rewrites allocate fresh nodes in the compile-time
//! arena and rebuild the statement slices that changed. A local declaration
//! is dead when its name is never read nor written afterwards and its
//! initializer cannot have side effects.

use std::collections::HashSet;

use log::debug;

use crate::arena::CompileArena;
use crate::ast::{
    BinaryOp, Expr, ExprKind, FunctionStmt, LambdaBody, Literal, Module, Stmt, StmtKind, UnaryOp,
};

pub fn optimize_module<'arena>(
    arena: &CompileArena<'arena>,
    module: &Module<'arena>,
) -> Module<'arena> {
    let stmts: Vec<_> = module.stmts.iter().map(|s| optimize_stmt(arena, s)).collect();
    Module { stmts: arena.alloc_slice(&stmts) }
}

fn optimize_stmt<'arena>(
    arena: &CompileArena<'arena>,
    stmt: &'arena Stmt<'arena>,
) -> &'arena Stmt<'arena> {
    match &stmt.kind {
        StmtKind::Function(func) => {
            if func.body.is_empty() {
                return stmt;
            }
            let body = optimize_body(arena, func.body);
            if core::ptr::eq(body.as_ptr(), func.body.as_ptr()) {
                return stmt;
            }
            let rebuilt = arena.alloc(FunctionStmt {
                name: func.name,
                params: func.params,
                return_ty: func.return_ty,
                body,
                modifier: func.modifier,
                is_native: func.is_native,
                c_alias: func.c_alias.clone(),
                loc: func.loc,
            });
            arena.alloc(Stmt::new(StmtKind::Function(rebuilt), stmt.loc))
        }
        _ => fold_stmt(arena, stmt),
    }
}

/// Dead-store elimination plus folding over one function body.
fn optimize_body<'arena>(
    arena: &CompileArena<'arena>,
    body: &'arena [&'arena Stmt<'arena>],
) -> &'arena [&'arena Stmt<'arena>] {
    let mut used = HashSet::new();
    let mut written = HashSet::new();
    for stmt in body {
        collect_stmt_vars(stmt, &mut used, &mut written);
    }

    let mut out = Vec::with_capacity(body.len());
    let mut changed = false;
    for stmt in body {
        if let StmtKind::VarDecl(decl) = &stmt.kind {
            let referenced = used.contains(decl.name) || written.contains(decl.name);
            let pure = decl.initializer.is_none_or_pure();
            if !referenced && pure {
                debug!("dropping dead store {}", decl.name);
                changed = true;
                continue;
            }
        }
        let folded = fold_stmt(arena, stmt);
        changed |= !core::ptr::eq(folded, *stmt);
        out.push(folded);
    }
    if changed {
        arena.alloc_slice(&out)
    } else {
        body
    }
}

trait PureInit {
    fn is_none_or_pure(&self) -> bool;
}

impl PureInit for Option<&Expr<'_>> {
    fn is_none_or_pure(&self) -> bool {
        self.map_or(true, |e| is_pure(e))
    }
}

/// True when evaluating the expression cannot observe or change state.
fn is_pure(expr: &Expr<'_>) -> bool {
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::Variable(_) => true,
        ExprKind::Unary { operand, .. } => is_pure(operand),
        ExprKind::Binary { left, right, .. } => is_pure(left) && is_pure(right),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Used/written variable collection
// ---------------------------------------------------------------------------

fn collect_stmt_vars<'arena>(
    stmt: &'arena Stmt<'arena>,
    used: &mut HashSet<&'arena str>,
    written: &mut HashSet<&'arena str>,
) {
    match &stmt.kind {
        StmtKind::Expression(e) | StmtKind::Return { value: Some(e) } => {
            collect_expr_vars(e, used, written);
        }
        StmtKind::Return { value: None } | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::VarDecl(decl) => {
            if let Some(init) = decl.initializer {
                collect_expr_vars(init, used, written);
            }
        }
        StmtKind::Block(stmts) | StmtKind::PrivateBlock(stmts) => {
            for s in *stmts {
                collect_stmt_vars(s, used, written);
            }
        }
        StmtKind::If { condition, then_branch, else_branch } => {
            collect_expr_vars(condition, used, written);
            collect_stmt_vars(then_branch, used, written);
            if let Some(e) = else_branch {
                collect_stmt_vars(e, used, written);
            }
        }
        StmtKind::While { condition, body } => {
            collect_expr_vars(condition, used, written);
            collect_stmt_vars(body, used, written);
        }
        StmtKind::For { start, end, body, .. } => {
            collect_expr_vars(start, used, written);
            collect_expr_vars(end, used, written);
            collect_stmt_vars(body, used, written);
        }
        StmtKind::ForEach { iterable, body, .. } => {
            collect_expr_vars(iterable, used, written);
            collect_stmt_vars(body, used, written);
        }
        StmtKind::Lock { lock_expr, body } => {
            collect_expr_vars(lock_expr, used, written);
            collect_stmt_vars(body, used, written);
        }
        StmtKind::Function(func) => {
            for s in func.body {
                collect_stmt_vars(s, used, written);
            }
        }
        StmtKind::Import(_)
        | StmtKind::Pragma(_)
        | StmtKind::TypeDecl { .. }
        | StmtKind::StructDecl(_) => {}
    }
}

fn collect_expr_vars<'arena>(
    expr: &'arena Expr<'arena>,
    used: &mut HashSet<&'arena str>,
    written: &mut HashSet<&'arena str>,
) {
    match &expr.kind {
        ExprKind::Variable(name) => {
            used.insert(name);
        }
        ExprKind::Literal(_) => {}
        ExprKind::Unary { operand, .. }
        | ExprKind::Spread { array: operand }
        | ExprKind::TypeOf { operand }
        | ExprKind::Is { operand, .. }
        | ExprKind::AsType { operand, .. }
        | ExprKind::Spawn { call: operand } => collect_expr_vars(operand, used, written),
        ExprKind::Binary { left, right, .. } => {
            collect_expr_vars(left, used, written);
            collect_expr_vars(right, used, written);
        }
        // The target of an assignment is a def, not a use; the value is a use.
        ExprKind::Assign { name, value } | ExprKind::CompoundAssign { name, value, .. } => {
            written.insert(name);
            collect_expr_vars(value, used, written);
        }
        ExprKind::Call { args, .. } => {
            for a in *args {
                collect_expr_vars(a, used, written);
            }
        }
        ExprKind::CallValue { callee, args } => {
            collect_expr_vars(callee, used, written);
            for a in *args {
                collect_expr_vars(a, used, written);
            }
        }
        ExprKind::MethodCall { receiver, args, .. } => {
            collect_expr_vars(receiver, used, written);
            // push/pop rebind the receiver handle in place
            if let ExprKind::Variable(name) = &receiver.kind {
                written.insert(name);
            }
            for a in *args {
                collect_expr_vars(a, used, written);
            }
        }
        ExprKind::Member { object, .. } => collect_expr_vars(object, used, written),
        ExprKind::MemberAssign { object, value, .. } => {
            collect_expr_vars(object, used, written);
            collect_expr_vars(value, used, written);
        }
        ExprKind::Index { array, index } => {
            collect_expr_vars(array, used, written);
            collect_expr_vars(index, used, written);
        }
        ExprKind::IndexAssign { array, index, value } => {
            collect_expr_vars(array, used, written);
            collect_expr_vars(index, used, written);
            collect_expr_vars(value, used, written);
        }
        ExprKind::ArrayLiteral { elements } | ExprKind::Interpolated { parts: elements } => {
            for e in *elements {
                collect_expr_vars(e, used, written);
            }
        }
        ExprKind::SizedArray { len, default } => {
            collect_expr_vars(len, used, written);
            collect_expr_vars(default, used, written);
        }
        ExprKind::Slice { array, start, end, step } => {
            collect_expr_vars(array, used, written);
            for b in [start, end, step].into_iter().flatten() {
                collect_expr_vars(b, used, written);
            }
        }
        ExprKind::Range { start, end } => {
            collect_expr_vars(start, used, written);
            collect_expr_vars(end, used, written);
        }
        // Captures from the outer scope count as uses.
        ExprKind::Lambda(lambda) => match &lambda.body {
            LambdaBody::Expr(e) => collect_expr_vars(e, used, written),
            LambdaBody::Block(stmts) => {
                for s in *stmts {
                    collect_stmt_vars(s, used, written);
                }
            }
        },
        ExprKind::SyncExpr { name } => {
            used.insert(name);
        }
        ExprKind::StructLiteral { fields, .. } => {
            for (_, e) in *fields {
                collect_expr_vars(e, used, written);
            }
        }
        ExprKind::Match { scrutinee, arms } => {
            collect_expr_vars(scrutinee, used, written);
            for arm in *arms {
                if let Some(p) = arm.pattern {
                    collect_expr_vars(p, used, written);
                }
                collect_expr_vars(arm.value, used, written);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Literal folding
// ---------------------------------------------------------------------------

fn fold_stmt<'arena>(
    arena: &CompileArena<'arena>,
    stmt: &'arena Stmt<'arena>,
) -> &'arena Stmt<'arena> {
    let rebuilt = match &stmt.kind {
        StmtKind::Expression(e) => {
            let folded = fold_expr(arena, e);
            if core::ptr::eq(folded, *e) {
                return stmt;
            }
            StmtKind::Expression(folded)
        }
        StmtKind::Return { value: Some(e) } => {
            let folded = fold_expr(arena, e);
            if core::ptr::eq(folded, *e) {
                return stmt;
            }
            StmtKind::Return { value: Some(folded) }
        }
        StmtKind::If { condition, then_branch, else_branch } => {
            let cond = fold_expr(arena, condition);
            let then_f = fold_stmt(arena, then_branch);
            let else_f = else_branch.map(|e| fold_stmt(arena, e));
            let else_same = match (else_f, else_branch) {
                (None, None) => true,
                (Some(a), Some(b)) => core::ptr::eq(a, *b),
                _ => false,
            };
            if core::ptr::eq(cond, *condition) && core::ptr::eq(then_f, *then_branch) && else_same {
                return stmt;
            }
            StmtKind::If { condition: cond, then_branch: then_f, else_branch: else_f }
        }
        StmtKind::While { condition, body } => {
            let cond = fold_expr(arena, condition);
            let body_f = fold_stmt(arena, body);
            if core::ptr::eq(cond, *condition) && core::ptr::eq(body_f, *body) {
                return stmt;
            }
            StmtKind::While { condition: cond, body: body_f }
        }
        StmtKind::Block(stmts) => {
            let folded: Vec<_> = stmts.iter().map(|s| fold_stmt(arena, s)).collect();
            if folded.iter().zip(stmts.iter()).all(|(a, b)| core::ptr::eq(*a, *b)) {
                return stmt;
            }
            StmtKind::Block(arena.alloc_slice(&folded))
        }
        _ => return stmt,
    };
    arena.alloc(Stmt::new(rebuilt, stmt.loc))
}

fn as_int_literal(expr: &Expr<'_>) -> Option<i64> {
    match expr.kind {
        ExprKind::Literal(Literal::Int(v) | Literal::Long(v)) => Some(v),
        _ => None,
    }
}

fn as_bool_literal(expr: &Expr<'_>) -> Option<bool> {
    match expr.kind {
        ExprKind::Literal(Literal::Bool(v)) => Some(v),
        _ => None,
    }
}

fn fold_expr<'arena>(
    arena: &CompileArena<'arena>,
    expr: &'arena Expr<'arena>,
) -> &'arena Expr<'arena> {
    let ExprKind::Binary { op, left: orig_left, right: orig_right } = &expr.kind else {
        return expr;
    };
    let left = fold_expr(arena, orig_left);
    let right = fold_expr(arena, orig_right);

    let folded_kind = match (as_int_literal(left), as_int_literal(right)) {
        (Some(a), Some(b)) => match op {
            BinaryOp::Add => a.checked_add(b).map(Literal::Long),
            BinaryOp::Sub => a.checked_sub(b).map(Literal::Long),
            BinaryOp::Mul => a.checked_mul(b).map(Literal::Long),
            BinaryOp::Div if b != 0 => Some(Literal::Long(a / b)),
            BinaryOp::Mod if b != 0 => Some(Literal::Long(a % b)),
            BinaryOp::Eq => Some(Literal::Bool(a == b)),
            BinaryOp::Ne => Some(Literal::Bool(a != b)),
            BinaryOp::Lt => Some(Literal::Bool(a < b)),
            BinaryOp::Le => Some(Literal::Bool(a <= b)),
            BinaryOp::Gt => Some(Literal::Bool(a > b)),
            BinaryOp::Ge => Some(Literal::Bool(a >= b)),
            _ => None,
        },
        _ => match (as_bool_literal(left), as_bool_literal(right)) {
            (Some(a), Some(b)) => match op {
                BinaryOp::And => Some(Literal::Bool(a && b)),
                BinaryOp::Or => Some(Literal::Bool(a || b)),
                BinaryOp::Eq => Some(Literal::Bool(a == b)),
                BinaryOp::Ne => Some(Literal::Bool(a != b)),
                _ => None,
            },
            _ => None,
        },
    };

    match folded_kind {
        Some(lit) => {
            let folded = arena.alloc(Expr::new(ExprKind::Literal(lit), expr.loc));
            if let Some(ty) = expr.ty.get() {
                folded.set_ty(ty);
            }
            folded
        }
        None if core::ptr::eq(left, *orig_left) && core::ptr::eq(right, *orig_right) => expr,
        None => {
            let rebuilt = arena.alloc(Expr::new(
                ExprKind::Binary { op: *op, left, right },
                expr.loc,
            ));
            if let Some(ty) = expr.ty.get() {
                rebuilt.set_ty(ty);
            }
            rebuilt
        }
    }
}

/// Folds a unary negation or not over a literal; used by tests and kept for
/// parity with the binary folder.
pub fn fold_unary<'arena>(
    arena: &CompileArena<'arena>,
    expr: &'arena Expr<'arena>,
) -> &'arena Expr<'arena> {
    let ExprKind::Unary { op, operand } = &expr.kind else {
        return expr;
    };
    let lit = match (op, &operand.kind) {
        (UnaryOp::Neg, ExprKind::Literal(Literal::Int(v))) => Some(Literal::Int(-v)),
        (UnaryOp::Neg, ExprKind::Literal(Literal::Long(v))) => Some(Literal::Long(-v)),
        (UnaryOp::Not, ExprKind::Literal(Literal::Bool(v))) => Some(Literal::Bool(!v)),
        _ => None,
    };
    match lit {
        Some(lit) => {
            let folded = arena.alloc(Expr::new(ExprKind::Literal(lit), expr.loc));
            if let Some(ty) = expr.ty.get() {
                folded.set_ty(ty);
            }
            folded
        }
        None => expr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::use_arena;
    use crate::location::Location;

    fn int_lit<'arena>(arena: &CompileArena<'arena>, v: i64) -> &'arena Expr<'arena> {
        arena.alloc(Expr::new(ExprKind::Literal(Literal::Int(v)), Location::default()))
    }

    #[test]
    fn folds_integer_arithmetic() {
        use_arena(|arena| {
            let e = arena.alloc(Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Mul,
                    left: int_lit(arena, 6),
                    right: int_lit(arena, 7),
                },
                Location::default(),
            ));
            let folded = fold_expr(arena, e);
            assert!(matches!(folded.kind, ExprKind::Literal(Literal::Long(42))));
        });
    }

    #[test]
    fn folds_nested_comparisons() {
        use_arena(|arena| {
            let sum = arena.alloc(Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Add,
                    left: int_lit(arena, 1),
                    right: int_lit(arena, 2),
                },
                Location::default(),
            ));
            let cmp = arena.alloc(Expr::new(
                ExprKind::Binary { op: BinaryOp::Lt, left: sum, right: int_lit(arena, 10) },
                Location::default(),
            ));
            let folded = fold_expr(arena, cmp);
            assert!(matches!(folded.kind, ExprKind::Literal(Literal::Bool(true))));
        });
    }

    #[test]
    fn division_by_zero_is_left_alone() {
        use_arena(|arena| {
            let e = arena.alloc(Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Div,
                    left: int_lit(arena, 1),
                    right: int_lit(arena, 0),
                },
                Location::default(),
            ));
            let folded = fold_expr(arena, e);
            assert!(matches!(folded.kind, ExprKind::Binary { .. }));
        });
    }

    #[test]
    fn variables_are_not_folded() {
        use_arena(|arena| {
            let var = arena.alloc(Expr::new(
                ExprKind::Variable(arena.store_name("x")),
                Location::default(),
            ));
            let e = arena.alloc(Expr::new(
                ExprKind::Binary { op: BinaryOp::Add, left: var, right: int_lit(arena, 1) },
                Location::default(),
            ));
            assert!(core::ptr::eq(fold_expr(arena, e), e));
        });
    }
}
