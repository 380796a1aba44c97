//! The captured-primitive pre-pass.
//!
//! Before a function body is lowered, this scan finds every local of
//! capture-by-reference type (primitives, whose mutations must survive
//! across closure calls, and arrays, whose `push`/`pop` may rebind the
//! payload handle) that is referenced from inside at least one lambda
//! nested in the body. Variable lowering then turns those locals into heap
//! cells so nested lambdas see a pointer.
//!
//! The scan keeps its own scope environment, a persistent map cloned at
//! block boundaries: the declaration is inserted before its initializer is
//! visited, so a lambda inside the initializer of a recursive binding can
//! see the name being declared.

use im_rc::HashMap as ImHashMap;

use crate::ast::{Expr, ExprKind, LambdaBody, Stmt, StmtKind};
use crate::types::Type;

use super::super::CodeGen;

#[derive(Clone, Copy)]
struct EnvEntry<'arena> {
    ty: &'arena Type<'arena>,
    /// Locals capture by reference; lambda parameters do not.
    is_local: bool,
}

type ScanEnv<'arena> = ImHashMap<&'arena str, EnvEntry<'arena>>;

/// Primitives can be reassigned; arrays are included because `push`/`pop`
/// return new payload handles that must be written back through the cell.
fn needs_capture_by_ref(ty: &Type<'_>) -> bool {
    matches!(
        ty,
        Type::Int | Type::Long | Type::Double | Type::Bool | Type::Byte | Type::Char | Type::Array(_)
    )
}

/// Populates the generator's captured-primitive set for one function body.
pub fn scan_captured_primitives<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    body: &'arena [&'arena Stmt<'arena>],
) {
    gen.clear_captured_primitives();
    let mut env = ScanEnv::new();
    for stmt in body {
        scan_stmt(gen, stmt, &mut env, 0);
    }
}

fn scan_stmt<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    stmt: &'arena Stmt<'arena>,
    env: &mut ScanEnv<'arena>,
    lambda_depth: u32,
) {
    match &stmt.kind {
        StmtKind::VarDecl(decl) => {
            env.insert(decl.name, EnvEntry { ty: decl.ty(), is_local: true });
            if let Some(init) = decl.initializer {
                scan_expr(gen, init, env, lambda_depth);
            }
        }
        StmtKind::Expression(e) | StmtKind::Return { value: Some(e) } => {
            scan_expr(gen, e, env, lambda_depth);
        }
        StmtKind::Block(stmts) | StmtKind::PrivateBlock(stmts) => {
            let mut inner = env.clone();
            for s in *stmts {
                scan_stmt(gen, s, &mut inner, lambda_depth);
            }
        }
        StmtKind::If { condition, then_branch, else_branch } => {
            scan_expr(gen, condition, env, lambda_depth);
            scan_stmt(gen, then_branch, env, lambda_depth);
            if let Some(e) = else_branch {
                scan_stmt(gen, e, env, lambda_depth);
            }
        }
        StmtKind::While { condition, body } => {
            scan_expr(gen, condition, env, lambda_depth);
            scan_stmt(gen, body, env, lambda_depth);
        }
        StmtKind::For { var, start, end, body } => {
            scan_expr(gen, start, env, lambda_depth);
            scan_expr(gen, end, env, lambda_depth);
            let mut inner = env.clone();
            inner.insert(var, EnvEntry { ty: &Type::Long, is_local: true });
            scan_stmt(gen, body, &mut inner, lambda_depth);
        }
        StmtKind::ForEach { var, iterable, body } => {
            scan_expr(gen, iterable, env, lambda_depth);
            let mut inner = env.clone();
            if let Type::Array(elem) = iterable.ty() {
                inner.insert(var, EnvEntry { ty: elem, is_local: true });
            }
            scan_stmt(gen, body, &mut inner, lambda_depth);
        }
        StmtKind::Lock { lock_expr, body } => {
            scan_expr(gen, lock_expr, env, lambda_depth);
            scan_stmt(gen, body, env, lambda_depth);
        }
        _ => {}
    }
}

fn scan_expr<'arena>(
    gen: &mut CodeGen<'_, 'arena>,
    expr: &'arena Expr<'arena>,
    env: &mut ScanEnv<'arena>,
    lambda_depth: u32,
) {
    match &expr.kind {
        ExprKind::Lambda(lambda) => {
            // Lambda parameters shadow outer names but are not captures.
            let mut inner = env.clone();
            for p in lambda.params {
                inner.insert(p.name, EnvEntry { ty: p.ty, is_local: false });
            }
            match &lambda.body {
                LambdaBody::Expr(e) => scan_expr(gen, e, &mut inner, lambda_depth + 1),
                LambdaBody::Block(stmts) => {
                    for s in *stmts {
                        scan_stmt(gen, s, &mut inner, lambda_depth + 1);
                    }
                }
            }
        }
        ExprKind::Variable(name) => {
            if lambda_depth > 0 {
                if let Some(entry) = env.get(name) {
                    if entry.is_local && needs_capture_by_ref(entry.ty) {
                        gen.add_captured_primitive(name);
                    }
                }
            }
        }
        ExprKind::Assign { name, value } | ExprKind::CompoundAssign { name, value, .. } => {
            if lambda_depth > 0 {
                if let Some(entry) = env.get(name) {
                    if entry.is_local && needs_capture_by_ref(entry.ty) {
                        gen.add_captured_primitive(name);
                    }
                }
            }
            scan_expr(gen, value, env, lambda_depth);
        }
        ExprKind::Unary { operand, .. }
        | ExprKind::Spread { array: operand }
        | ExprKind::TypeOf { operand }
        | ExprKind::Is { operand, .. }
        | ExprKind::AsType { operand, .. }
        | ExprKind::Spawn { call: operand } => scan_expr(gen, operand, env, lambda_depth),
        ExprKind::Binary { left, right, .. } | ExprKind::Range { start: left, end: right } => {
            scan_expr(gen, left, env, lambda_depth);
            scan_expr(gen, right, env, lambda_depth);
        }
        ExprKind::Call { args, .. } => {
            for a in *args {
                scan_expr(gen, a, env, lambda_depth);
            }
        }
        ExprKind::CallValue { callee, args } => {
            scan_expr(gen, callee, env, lambda_depth);
            for a in *args {
                scan_expr(gen, a, env, lambda_depth);
            }
        }
        ExprKind::MethodCall { receiver, args, .. } => {
            scan_expr(gen, receiver, env, lambda_depth);
            for a in *args {
                scan_expr(gen, a, env, lambda_depth);
            }
        }
        ExprKind::Member { object, .. } => scan_expr(gen, object, env, lambda_depth),
        ExprKind::MemberAssign { object, value, .. } => {
            scan_expr(gen, object, env, lambda_depth);
            scan_expr(gen, value, env, lambda_depth);
        }
        ExprKind::Index { array, index } => {
            scan_expr(gen, array, env, lambda_depth);
            scan_expr(gen, index, env, lambda_depth);
        }
        ExprKind::IndexAssign { array, index, value } => {
            scan_expr(gen, array, env, lambda_depth);
            scan_expr(gen, index, env, lambda_depth);
            scan_expr(gen, value, env, lambda_depth);
        }
        ExprKind::ArrayLiteral { elements } | ExprKind::Interpolated { parts: elements } => {
            for e in *elements {
                scan_expr(gen, e, env, lambda_depth);
            }
        }
        ExprKind::SizedArray { len, default } => {
            scan_expr(gen, len, env, lambda_depth);
            scan_expr(gen, default, env, lambda_depth);
        }
        ExprKind::Slice { array, start, end, step } => {
            scan_expr(gen, array, env, lambda_depth);
            for b in [start, end, step].into_iter().flatten() {
                scan_expr(gen, b, env, lambda_depth);
            }
        }
        ExprKind::SyncExpr { name } => {
            if lambda_depth > 0 {
                if let Some(entry) = env.get(name) {
                    if entry.is_local && needs_capture_by_ref(entry.ty) {
                        gen.add_captured_primitive(name);
                    }
                }
            }
        }
        ExprKind::StructLiteral { fields, .. } => {
            for (_, e) in *fields {
                scan_expr(gen, e, env, lambda_depth);
            }
        }
        ExprKind::Match { scrutinee, arms } => {
            scan_expr(gen, scrutinee, env, lambda_depth);
            for arm in *arms {
                if let Some(p) = arm.pattern {
                    scan_expr(gen, p, env, lambda_depth);
                }
                scan_expr(gen, arm.value, env, lambda_depth);
            }
        }
        ExprKind::Literal(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use core::cell::{Cell, OnceCell};

    use crate::arena::{use_arena, CompileArena};
    use crate::ast::{
        Expr, ExprKind, LambdaBody, LambdaExpr, MemoryQualifier, Stmt, StmtKind, SyncModifier,
        VarDeclStmt,
    };
    use crate::codegen::CodeGen;
    use crate::location::Location;
    use crate::types::{Primitives, Type};

    use super::scan_captured_primitives;

    fn var_decl<'arena>(
        arena: &CompileArena<'arena>,
        name: &'arena str,
        ty: &'arena Type<'arena>,
    ) -> &'arena Stmt<'arena> {
        let resolved = OnceCell::new();
        let _ = resolved.set(ty);
        let decl = arena.alloc(VarDeclStmt {
            name,
            declared_ty: Some(ty),
            ty: resolved,
            initializer: None,
            mem_qual: MemoryQualifier::Default,
            sync_mod: SyncModifier::None,
            is_static: false,
            has_pending_elements: Cell::new(false),
            loc: Location::default(),
        });
        arena.alloc(Stmt::new(StmtKind::VarDecl(decl), Location::default()))
    }

    fn lambda_reading<'arena>(
        arena: &CompileArena<'arena>,
        name: &'arena str,
    ) -> &'arena Stmt<'arena> {
        let var = arena.alloc(Expr::new(ExprKind::Variable(name), Location::default()));
        let lambda = arena.alloc(LambdaExpr {
            params: &[],
            ret: None,
            body: LambdaBody::Expr(var),
        });
        let expr = arena.alloc(Expr::new(ExprKind::Lambda(lambda), Location::default()));
        arena.alloc(Stmt::new(StmtKind::Expression(expr), Location::default()))
    }

    #[test]
    fn locals_read_inside_lambdas_are_captured() {
        use_arena(|arena| {
            let prims = Primitives::new(arena);
            let mut gen = CodeGen::new(arena, &prims);
            let n = arena.store_name("n");
            let body = arena.alloc_slice(&[var_decl(arena, n, prims.long), lambda_reading(arena, n)]);
            scan_captured_primitives(&mut gen, body);
            assert!(gen.is_captured_primitive("n"));
        });
    }

    #[test]
    fn strings_are_not_captured_by_reference() {
        use_arena(|arena| {
            let prims = Primitives::new(arena);
            let mut gen = CodeGen::new(arena, &prims);
            let s = arena.store_name("s");
            let body = arena.alloc_slice(&[var_decl(arena, s, prims.str_), lambda_reading(arena, s)]);
            scan_captured_primitives(&mut gen, body);
            assert!(!gen.is_captured_primitive("s"));
        });
    }

    #[test]
    fn arrays_are_captured_because_push_rebinds() {
        use_arena(|arena| {
            let prims = Primitives::new(arena);
            let mut gen = CodeGen::new(arena, &prims);
            let v = arena.store_name("v");
            let arr_ty = arena.alloc(Type::Array(prims.long));
            let body = arena.alloc_slice(&[var_decl(arena, v, arr_ty), lambda_reading(arena, v)]);
            scan_captured_primitives(&mut gen, body);
            assert!(gen.is_captured_primitive("v"));
        });
    }

    #[test]
    fn references_outside_lambdas_are_not_captures() {
        use_arena(|arena| {
            let prims = Primitives::new(arena);
            let mut gen = CodeGen::new(arena, &prims);
            let n = arena.store_name("n");
            let read = arena.alloc(Expr::new(ExprKind::Variable(n), Location::default()));
            let stmt = arena.alloc(Stmt::new(StmtKind::Expression(read), Location::default()));
            let body = arena.alloc_slice(&[var_decl(arena, n, prims.long), stmt]);
            scan_captured_primitives(&mut gen, body);
            assert!(!gen.is_captured_primitive("n"));
        });
    }

    #[test]
    fn lambda_parameters_shadow_outer_locals() {
        use_arena(|arena| {
            let prims = Primitives::new(arena);
            let mut gen = CodeGen::new(arena, &prims);
            let n = arena.store_name("n");
            let var = arena.alloc(Expr::new(ExprKind::Variable(n), Location::default()));
            let lambda = arena.alloc(LambdaExpr {
                params: arena.alloc_slice(&[crate::ast::Param {
                    name: n,
                    ty: prims.long,
                    mem_qual: MemoryQualifier::Default,
                }]),
                ret: None,
                body: LambdaBody::Expr(var),
            });
            let expr = arena.alloc(Expr::new(ExprKind::Lambda(lambda), Location::default()));
            let stmt = arena.alloc(Stmt::new(StmtKind::Expression(expr), Location::default()));
            let body = arena.alloc_slice(&[var_decl(arena, n, prims.long), stmt]);
            scan_captured_primitives(&mut gen, body);
            assert!(!gen.is_captured_primitive("n"));
        });
    }

    #[test]
    fn declarations_are_visible_to_their_own_initializers() {
        use_arena(|arena| {
            let prims = Primitives::new(arena);
            let mut gen = CodeGen::new(arena, &prims);
            let n = arena.store_name("n");
            // var n: long = (lambda reading n)
            let var = arena.alloc(Expr::new(ExprKind::Variable(n), Location::default()));
            let lambda = arena.alloc(LambdaExpr { params: &[], ret: None, body: LambdaBody::Expr(var) });
            let init = arena.alloc(Expr::new(ExprKind::Lambda(lambda), Location::default()));
            let resolved = OnceCell::new();
            let _ = resolved.set(prims.long);
            let decl = arena.alloc(VarDeclStmt {
                name: n,
                declared_ty: Some(prims.long),
                ty: resolved,
                initializer: Some(init),
                mem_qual: MemoryQualifier::Default,
                sync_mod: SyncModifier::None,
                is_static: false,
                has_pending_elements: Cell::new(false),
                loc: Location::default(),
            });
            let stmt = arena.alloc(Stmt::new(StmtKind::VarDecl(decl), Location::default()));
            let body = arena.alloc_slice(&[stmt]);
            scan_captured_primitives(&mut gen, body);
            assert!(gen.is_captured_primitive("n"));
        });
    }
}
