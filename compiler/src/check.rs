//! The type checker.
//!
//! Walks every module statement, resolves names against the symbol table,
//! attaches a resolved [`Type`] to each expression, and enforces the
//! compile-time side of the concurrency model: a spawn marks its binding
//! pending and freezes the variables it captured; a sync is the only
//! transition out of pending; reads of pending bindings and writes to
//! frozen ones are errors. Self-recursive calls in return position are
//! marked for the tail-call rewrite in code generation.

use std::collections::HashSet;

use log::debug;

use crate::arena::CompileArena;
use crate::ast::{
    BinaryOp, Expr, ExprKind, FunctionStmt, LambdaBody, Literal, MemoryQualifier, Module, Stmt,
    StmtKind, SyncModifier, UnaryOp, VarDeclStmt,
};
use crate::error::{Error, ErrorKind, Result};
use crate::location::Location;
use crate::symbol::{Symbol, SymbolKind, SymbolTable, ThreadState};
use crate::types::{Primitives, Type};

/// Approximate C layout size of a type, for the large-struct heap decision
/// and sized struct promotion.
pub fn c_size_of(ty: &Type<'_>) -> usize {
    match ty {
        Type::Int | Type::Long | Type::UInt | Type::Double => 8,
        Type::Int32 | Type::UInt32 | Type::Float | Type::Bool => 4,
        Type::Char | Type::Byte => 1,
        Type::Any => 24,
        Type::Struct { size, .. } => *size,
        // Handles and unresolved names are pointer-sized.
        _ => 8,
    }
}

pub struct Checker<'c, 'arena> {
    arena: &'c CompileArena<'arena>,
    prims: &'c Primitives<'arena>,
    pub table: SymbolTable<'arena>,
    current_fn: Option<&'arena FunctionStmt<'arena>>,
    /// Return-type contexts of the lambdas currently being checked; `None`
    /// means the lambda carries no annotation and its returns are free.
    lambda_rets: Vec<Option<&'arena Type<'arena>>>,
    /// Names declared inside the innermost `private` block, for the direct
    /// escape check.
    private_locals: Vec<HashSet<&'arena str>>,
    next_struct_id: i32,
    checked_imports: HashSet<usize>,
}

impl<'c, 'arena> Checker<'c, 'arena> {
    pub fn new(arena: &'c CompileArena<'arena>, prims: &'c Primitives<'arena>) -> Self {
        Checker {
            arena,
            prims,
            table: SymbolTable::new(),
            current_fn: None,
            lambda_rets: Vec::new(),
            private_locals: Vec::new(),
            next_struct_id: 1,
            checked_imports: HashSet::new(),
        }
    }

    /// Checks a whole module (imports included), consuming the checker.
    pub fn check_module(mut self, module: &Module<'arena>) -> Result<SymbolTable<'arena>> {
        self.hoist(module.stmts)?;
        for stmt in module.stmts {
            self.check_stmt(stmt)?;
        }
        Ok(self.table)
    }

    /// Declares module-level names before any body is checked, so forward
    /// and mutually recursive references resolve.
    fn hoist(&mut self, stmts: &'arena [&'arena Stmt<'arena>]) -> Result<()> {
        // pragma alias attaches to the next function statement
        let mut pending_alias: Option<&'arena str> = None;
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Pragma(crate::ast::PragmaKind::Alias(alias)) => {
                    pending_alias = Some(*alias);
                }
                StmtKind::Function(func) => {
                    if let Some(alias) = pending_alias.take() {
                        func.c_alias.set(Some(alias));
                    }
                    self.declare_function(func)?;
                }
                StmtKind::StructDecl(decl) => {
                    let mut size = 0usize;
                    let mut fields = Vec::with_capacity(decl.fields.len());
                    for f in decl.fields {
                        let ty = self.resolve_type(f.ty, stmt.loc)?;
                        let fsize = c_size_of(ty).max(1);
                        // 8-byte alignment keeps the estimate conservative.
                        size = (size + 7) / 8 * 8 + fsize;
                        fields.push(crate::types::Field { name: f.name, ty });
                    }
                    size = (size + 7) / 8 * 8;
                    let id = self.next_struct_id;
                    self.next_struct_id += 1;
                    let ty = self.arena.alloc(Type::Struct {
                        name: decl.name,
                        fields: self.arena.alloc_slice(&fields),
                        id,
                        size,
                    });
                    self.table.add_type(decl.name, ty);
                }
                StmtKind::TypeDecl { name, ty } => {
                    let resolved = self.resolve_type(ty, stmt.loc)?;
                    self.table.add_type(name, resolved);
                }
                StmtKind::Import(import) => {
                    if let Some(imported) = import.module.get() {
                        let key = imported.as_ptr() as usize;
                        if !self.checked_imports.insert(key) {
                            continue;
                        }
                        if import.namespace.is_some() {
                            // Namespaced imports still need their functions
                            // declared so namespaced calls resolve; nesting
                            // is flattened into the namespace symbol.
                            self.hoist_namespace(import, imported)?;
                        } else {
                            self.hoist(imported)?;
                            for inner in imported {
                                self.check_stmt(inner)?;
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn hoist_namespace(
        &mut self,
        import: &'arena crate::ast::ImportStmt<'arena>,
        imported: &'arena [&'arena Stmt<'arena>],
    ) -> Result<()> {
        let ns_name = import.namespace.unwrap_or_default();
        // Check the imported module in its own scope first.
        self.table.push_scope();
        self.hoist(imported)?;
        for inner in imported {
            self.check_stmt(inner)?;
        }
        // Collect its functions and globals into the namespace symbol.
        let mut members = Vec::new();
        for inner in imported {
            match &inner.kind {
                StmtKind::Function(func) => {
                    if let Some(sym) = self.table.lookup(func.name) {
                        members.push(clone_symbol(sym));
                    }
                }
                StmtKind::VarDecl(decl) => {
                    if let Some(sym) = self.table.lookup(decl.name) {
                        members.push(clone_symbol(sym));
                    }
                }
                _ => {}
            }
        }
        self.table.pop_scope();
        let ns_sym = self.table.add_symbol_full(
            self.arena.store_name(ns_name),
            self.prims.void,
            SymbolKind::Namespace,
            MemoryQualifier::Default,
        );
        ns_sym.namespace_symbols = members;
        ns_sym.canonical_module = import.canonical.get();
        Ok(())
    }

    fn declare_function(&mut self, func: &'arena FunctionStmt<'arena>) -> Result<()> {
        let mut params = Vec::with_capacity(func.params.len());
        for p in func.params {
            params.push(self.resolve_type(p.ty, func.loc)?);
        }
        let ret = self.resolve_type(func.return_ty, func.loc)?;
        let fn_ty = self.arena.alloc(Type::Function {
            params: self.arena.alloc_slice(&params),
            ret,
        });
        let sym = self.table.add_symbol_full(
            func.name,
            fn_ty,
            SymbolKind::Global,
            MemoryQualifier::Default,
        );
        sym.is_function = true;
        sym.is_native = func.is_native;
        sym.c_alias = func.c_alias.get();
        sym.declared_func_mod = func.modifier;
        sym.func_mod = func.modifier;
        Ok(())
    }

    /// Replaces `Named` references by their registered definitions.
    fn resolve_type(&self, ty: &'arena Type<'arena>, loc: Location) -> Result<&'arena Type<'arena>> {
        match ty {
            Type::Named(name) => self
                .table
                .lookup_type(name)
                .map(|s| s.ty)
                .ok_or_else(|| Error::new(ErrorKind::UnknownType((*name).to_owned()), loc)),
            Type::Array(elem) => {
                let resolved = self.resolve_type(elem, loc)?;
                if core::ptr::eq(resolved, *elem) {
                    Ok(ty)
                } else {
                    Ok(self.arena.alloc(Type::Array(resolved)))
                }
            }
            _ => Ok(ty),
        }
    }

    // ---- statements ----------------------------------------------------

    pub fn check_stmt(&mut self, stmt: &'arena Stmt<'arena>) -> Result<()> {
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                if let ExprKind::SyncExpr { name } = &expr.kind {
                    self.check_sync(name, stmt.loc)?;
                    expr.set_ty(self.prims.void);
                } else {
                    self.check_expr(expr)?;
                }
                Ok(())
            }
            StmtKind::VarDecl(decl) => self.check_var_decl(decl, stmt.loc),
            StmtKind::Return { value } => self.check_return(*value, stmt.loc),
            StmtKind::Block(stmts) => {
                self.table.push_scope();
                for s in *stmts {
                    self.check_stmt(s)?;
                }
                self.table.pop_scope();
                Ok(())
            }
            StmtKind::PrivateBlock(stmts) => {
                self.table.push_scope();
                self.table.enter_arena();
                self.private_locals.push(HashSet::new());
                let result = stmts.iter().try_for_each(|s| self.check_stmt(s));
                self.private_locals.pop();
                self.table.exit_arena();
                self.table.pop_scope();
                result
            }
            StmtKind::If { condition, then_branch, else_branch } => {
                let cond_ty = self.check_expr(condition)?;
                self.expect(self.prims.bool_, cond_ty, condition.loc)?;
                self.check_stmt(then_branch)?;
                else_branch.map_or(Ok(()), |e| self.check_stmt(e))
            }
            StmtKind::While { condition, body } => {
                let cond_ty = self.check_expr(condition)?;
                self.expect(self.prims.bool_, cond_ty, condition.loc)?;
                self.table.enter_loop();
                let result = self.check_stmt(body);
                self.table.exit_loop();
                result
            }
            StmtKind::For { var, start, end, body } => {
                let start_ty = self.check_expr(start)?;
                let end_ty = self.check_expr(end)?;
                if !start_ty.is_integral() || !end_ty.is_integral() {
                    return Err(Error::new(
                        ErrorKind::TypeMismatch("integral bound".into(), start_ty.display_name()),
                        stmt.loc,
                    ));
                }
                self.table.push_scope();
                self.table.add_symbol(var, self.prims.long);
                self.table.enter_loop();
                let result = self.check_stmt(body);
                self.table.exit_loop();
                self.table.pop_scope();
                result
            }
            StmtKind::ForEach { var, iterable, body } => {
                let iter_ty = self.check_expr(iterable)?;
                let elem = iter_ty.element().ok_or_else(|| {
                    Error::new(
                        ErrorKind::TypeMismatch("array".into(), iter_ty.display_name()),
                        iterable.loc,
                    )
                })?;
                self.table.push_scope();
                self.table.add_symbol(var, elem);
                self.table.enter_loop();
                let result = self.check_stmt(body);
                self.table.exit_loop();
                self.table.pop_scope();
                result
            }
            StmtKind::Break => {
                if self.table.in_loop() {
                    Ok(())
                } else {
                    Err(Error::new(ErrorKind::OutsideLoop("break".into()), stmt.loc))
                }
            }
            StmtKind::Continue => {
                if self.table.in_loop() {
                    Ok(())
                } else {
                    Err(Error::new(ErrorKind::OutsideLoop("continue".into()), stmt.loc))
                }
            }
            StmtKind::Lock { lock_expr, body } => {
                self.check_expr(lock_expr)?;
                self.check_stmt(body)
            }
            StmtKind::Function(func) => self.check_function(func),
            // Handled during hoisting.
            StmtKind::Import(_) | StmtKind::Pragma(_) | StmtKind::TypeDecl { .. } | StmtKind::StructDecl(_) => Ok(()),
        }
    }

    fn check_var_decl(&mut self, decl: &'arena VarDeclStmt<'arena>, loc: Location) -> Result<()> {
        // An annotated declaration is in scope inside its own initializer,
        // so a recursive lambda can reference the name being bound. An
        // unannotated one needs the initializer's type first.
        let ty = match decl.declared_ty {
            Some(declared) => {
                let declared = self.resolve_type(declared, loc)?;
                self.validate_as_ref(decl, declared, loc)?;
                self.record_var_symbol(decl, declared);
                if let Some(init) = decl.initializer {
                    let init_ty = self.check_expr(init)?;
                    self.expect_assignable(declared, init_ty, loc)?;
                }
                declared
            }
            None => {
                let init = decl.initializer.ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidQualifier(format!(
                            "{} needs a type or initializer",
                            decl.name
                        )),
                        loc,
                    )
                })?;
                let ty = self.check_expr(init)?;
                self.validate_as_ref(decl, ty, loc)?;
                self.record_var_symbol(decl, ty);
                ty
            }
        };
        let _ = decl.ty.set(ty);
        if let Some(set) = self.private_locals.last_mut() {
            set.insert(decl.name);
        }

        // A spawn initializer puts the binding into the pending state and
        // freezes every variable the spawned call captured.
        if let Some(init) = decl.initializer {
            if let ExprKind::Spawn { call } = &init.kind {
                self.table.mark_pending(decl.name);
                let mut frozen = Vec::new();
                if let ExprKind::Call { args, .. } = &call.kind {
                    for arg in *args {
                        if let ExprKind::Variable(arg_name) = &arg.kind {
                            self.table.freeze(arg_name);
                            frozen.push(*arg_name);
                        }
                    }
                }
                if let Some(sym) = self.table.lookup_mut(decl.name) {
                    sym.frozen_args = frozen;
                }
            }
        }
        Ok(())
    }

    fn validate_as_ref(
        &self,
        decl: &'arena VarDeclStmt<'arena>,
        ty: &'arena Type<'arena>,
        loc: Location,
    ) -> Result<()> {
        if decl.mem_qual == MemoryQualifier::AsRef
            && !ty.is_primitive()
            && !matches!(ty, Type::Struct { .. })
        {
            return Err(Error::new(
                ErrorKind::InvalidQualifier(format!("{} cannot be declared as ref", ty.display_name())),
                loc,
            ));
        }
        Ok(())
    }

    fn record_var_symbol(&mut self, decl: &'arena VarDeclStmt<'arena>, ty: &'arena Type<'arena>) {
        let kind = if self.current_fn.is_none() { SymbolKind::Global } else { SymbolKind::Local };
        let sym = self.table.add_symbol_full(decl.name, ty, kind, decl.mem_qual);
        if decl.sync_mod == SyncModifier::Atomic {
            sym.sync_mod = SyncModifier::Atomic;
        }
        if decl.has_pending_elements.get() {
            sym.has_pending_elements = true;
        }
    }

    fn check_sync(&mut self, name: &'arena str, loc: Location) -> Result<()> {
        let state = self
            .table
            .lookup(name)
            .map(|s| s.thread_state)
            .ok_or_else(|| Error::new(ErrorKind::UnknownIdentifier(name.to_owned()), loc))?;
        let has_pending_elems = self.table.lookup(name).is_some_and(|s| s.has_pending_elements);
        match state {
            ThreadState::Pending => {
                let frozen: Vec<_> = self
                    .table
                    .lookup(name)
                    .map(|s| s.frozen_args.clone())
                    .unwrap_or_default();
                self.table.mark_synchronized(name);
                for f in frozen {
                    self.table.unfreeze(f);
                }
                Ok(())
            }
            ThreadState::Synchronized => Err(Error::new(ErrorKind::DoubleSync(name.to_owned()), loc)),
            ThreadState::Normal if has_pending_elems => Ok(()),
            ThreadState::Normal => Err(Error::new(ErrorKind::NotPending(name.to_owned()), loc)),
        }
    }

    fn check_return(&mut self, value: Option<&'arena Expr<'arena>>, loc: Location) -> Result<()> {
        // Inside a lambda, returns belong to the lambda, not the enclosing
        // function; an unannotated lambda leaves them unconstrained.
        let expected = match self.lambda_rets.last() {
            Some(Some(ret)) => Some(*ret),
            Some(None) => None,
            None => Some(self.current_fn.map_or(self.prims.void, |f| f.return_ty)),
        };
        match value {
            Some(expr) => {
                let ty = self.check_expr(expr)?;
                // Direct escape of a private-block heap local.
                if let ExprKind::Variable(name) = &expr.kind {
                    if ty.is_handle()
                        && self.private_locals.last().is_some_and(|set| set.contains(name))
                    {
                        return Err(Error::new(ErrorKind::PrivateEscape((*name).to_owned()), loc));
                    }
                }
                match expected {
                    Some(expected) => {
                        let expected = self.resolve_type(expected, loc)?;
                        self.expect_assignable(expected, ty, loc)
                    }
                    None => Ok(()),
                }
            }
            None => match expected {
                Some(expected) if !matches!(expected, Type::Void) => Err(Error::new(
                    ErrorKind::TypeMismatch(expected.display_name(), "void".into()),
                    loc,
                )),
                _ => Ok(()),
            },
        }
    }

    fn check_function(&mut self, func: &'arena FunctionStmt<'arena>) -> Result<()> {
        if !self.table.lookup(func.name).is_some_and(|s| s.is_function) {
            self.declare_function(func)?;
        }
        if func.is_native && func.body.is_empty() {
            return Ok(());
        }

        debug!("checking function {}", func.name);
        let outer_fn = self.current_fn.replace(func);
        self.table.push_scope();
        self.table.enter_arena();
        for p in func.params {
            let ty = self.resolve_type(p.ty, func.loc)?;
            self.table
                .add_symbol_full(p.name, ty, SymbolKind::Param, p.mem_qual);
        }

        // Arrays that accumulate spawn results before a sync need their
        // pending-elements companion; find them before the body is walked.
        let pending_arrays = collect_pending_push_targets(func.body);
        let result = (|| {
            for stmt in func.body {
                if let StmtKind::VarDecl(decl) = &stmt.kind {
                    if pending_arrays.contains(decl.name) {
                        decl.has_pending_elements.set(true);
                    }
                }
                self.check_stmt(stmt)?;
            }
            Ok(())
        })();

        self.table.exit_arena();
        self.table.pop_scope();
        self.current_fn = outer_fn;
        result?;

        mark_tail_calls(func);
        Ok(())
    }

    // ---- expressions ---------------------------------------------------

    pub fn check_expr(&mut self, expr: &'arena Expr<'arena>) -> Result<&'arena Type<'arena>> {
        let ty = self.infer_expr(expr)?;
        expr.set_ty(ty);
        Ok(ty)
    }

    fn infer_expr(&mut self, expr: &'arena Expr<'arena>) -> Result<&'arena Type<'arena>> {
        let loc = expr.loc;
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(match lit {
                // Integer literals are 64-bit; `int` is an annotation-side
                // narrowing, not a literal type.
                Literal::Int(_) | Literal::Long(_) => self.prims.long,
                Literal::Double(_) => self.prims.double,
                Literal::Str(_) => self.prims.str_,
                Literal::Char(_) => self.prims.char_,
                Literal::Bool(_) => self.prims.bool_,
            }),
            ExprKind::Variable(name) => {
                let sym = self
                    .table
                    .lookup(name)
                    .ok_or_else(|| Error::new(ErrorKind::UnknownIdentifier((*name).to_owned()), loc))?;
                if sym.thread_state == ThreadState::Pending {
                    return Err(Error::new(ErrorKind::PendingUse((*name).to_owned()), loc));
                }
                Ok(sym.ty)
            }
            ExprKind::Unary { op, operand } => {
                let ty = self.check_expr(operand)?;
                match op {
                    UnaryOp::Neg if ty.is_numeric() => Ok(ty),
                    UnaryOp::Not => {
                        self.expect(self.prims.bool_, ty, operand.loc)?;
                        Ok(self.prims.bool_)
                    }
                    UnaryOp::Neg => Err(Error::new(
                        ErrorKind::TypeMismatch("numeric".into(), ty.display_name()),
                        loc,
                    )),
                }
            }
            ExprKind::Binary { op, left, right } => {
                let lt = self.check_expr(left)?;
                let rt = self.check_expr(right)?;
                self.binary_result(*op, lt, rt, loc)
            }
            ExprKind::Assign { name, value } => {
                let value_ty = self.check_expr(value)?;
                self.check_mutation(name, loc)?;
                let var_ty = self
                    .table
                    .lookup(name)
                    .map(|s| s.ty)
                    .ok_or_else(|| Error::new(ErrorKind::UnknownIdentifier((*name).to_owned()), loc))?;
                self.expect_assignable(var_ty, value_ty, loc)?;
                Ok(var_ty)
            }
            ExprKind::CompoundAssign { name, op, value } => {
                let value_ty = self.check_expr(value)?;
                self.check_mutation(name, loc)?;
                let var_ty = self
                    .table
                    .lookup(name)
                    .map(|s| s.ty)
                    .ok_or_else(|| Error::new(ErrorKind::UnknownIdentifier((*name).to_owned()), loc))?;
                self.binary_result(*op, var_ty, value_ty, loc)?;
                Ok(var_ty)
            }
            ExprKind::Call { name, namespace, args, .. } => {
                // `print`/`println` accept a single value of any type.
                if namespace.is_none() && (*name == "print" || *name == "println") {
                    for arg in *args {
                        self.check_expr(arg)?;
                    }
                    return Ok(self.prims.void);
                }
                let fn_ty = match namespace {
                    Some(ns) => self
                        .table
                        .lookup_namespaced(ns, name)
                        .map(|s| s.ty)
                        .ok_or_else(|| {
                            Error::new(ErrorKind::UnknownIdentifier(format!("{ns}.{name}")), loc)
                        })?,
                    None => self
                        .table
                        .lookup(name)
                        .map(|s| s.ty)
                        .ok_or_else(|| Error::new(ErrorKind::UnknownIdentifier((*name).to_owned()), loc))?,
                };
                self.check_call(fn_ty, name, args, loc)
            }
            ExprKind::CallValue { callee, args } => {
                let callee_ty = self.check_expr(callee)?;
                self.check_call(callee_ty, "closure", args, loc)
            }
            ExprKind::MethodCall { receiver, method, args } => {
                self.check_method_call(receiver, method, args, loc)
            }
            ExprKind::Member { object, field } => {
                // `ns.x` reaches a namespaced global, not a struct field.
                if let ExprKind::Variable(ns) = &object.kind {
                    if self.table.lookup(ns).is_some_and(Symbol::is_namespace) {
                        let ty = self
                            .table
                            .lookup_namespaced(ns, field)
                            .map(|s| s.ty)
                            .ok_or_else(|| {
                                Error::new(
                                    ErrorKind::UnknownIdentifier(format!("{ns}.{field}")),
                                    loc,
                                )
                            })?;
                        object.set_ty(self.prims.void);
                        return Ok(ty);
                    }
                }
                let obj_ty = self.check_expr(object)?;
                self.field_type(obj_ty, field, loc)
            }
            ExprKind::MemberAssign { object, field, value } => {
                let obj_ty = self.check_expr(object)?;
                let field_ty = self.field_type(obj_ty, field, loc)?;
                let value_ty = self.check_expr(value)?;
                self.expect_assignable(field_ty, value_ty, loc)?;
                Ok(field_ty)
            }
            ExprKind::Index { array, index } => {
                let arr_ty = self.check_expr(array)?;
                let idx_ty = self.check_expr(index)?;
                if !idx_ty.is_integral() {
                    return Err(Error::new(
                        ErrorKind::TypeMismatch("integral index".into(), idx_ty.display_name()),
                        index.loc,
                    ));
                }
                match arr_ty {
                    Type::Array(elem) => Ok(elem),
                    Type::Str => Ok(self.prims.char_),
                    Type::Any => Ok(self.prims.any),
                    _ => Err(Error::new(
                        ErrorKind::TypeMismatch("array".into(), arr_ty.display_name()),
                        array.loc,
                    )),
                }
            }
            ExprKind::IndexAssign { array, index, value } => {
                let arr_ty = self.check_expr(array)?;
                let idx_ty = self.check_expr(index)?;
                if !idx_ty.is_integral() {
                    return Err(Error::new(
                        ErrorKind::TypeMismatch("integral index".into(), idx_ty.display_name()),
                        index.loc,
                    ));
                }
                let elem = arr_ty.element().ok_or_else(|| {
                    Error::new(ErrorKind::TypeMismatch("array".into(), arr_ty.display_name()), array.loc)
                })?;
                let value_ty = self.check_expr(value)?;
                self.expect_assignable(elem, value_ty, loc)?;
                Ok(elem)
            }
            ExprKind::ArrayLiteral { elements } => {
                let mut elem_ty: Option<&'arena Type<'arena>> = None;
                for e in *elements {
                    let ty = if matches!(e.kind, ExprKind::Spread { .. }) {
                        let spread_ty = self.check_expr(e)?;
                        spread_ty.element().ok_or_else(|| {
                            Error::new(
                                ErrorKind::TypeMismatch("array".into(), spread_ty.display_name()),
                                e.loc,
                            )
                        })?
                    } else {
                        self.check_expr(e)?
                    };
                    elem_ty = Some(match elem_ty {
                        None => ty,
                        Some(prev) if prev == ty => prev,
                        Some(prev) if prev.is_numeric() && ty.is_numeric() => self.widen(prev, ty),
                        Some(_) => self.prims.any,
                    });
                }
                let elem = elem_ty.unwrap_or(self.prims.void);
                Ok(self.arena.alloc(Type::Array(elem)))
            }
            ExprKind::SizedArray { len, default } => {
                let len_ty = self.check_expr(len)?;
                if !len_ty.is_integral() {
                    return Err(Error::new(
                        ErrorKind::TypeMismatch("integral length".into(), len_ty.display_name()),
                        len.loc,
                    ));
                }
                let elem = self.check_expr(default)?;
                Ok(self.arena.alloc(Type::Array(elem)))
            }
            ExprKind::Slice { array, start, end, step } => {
                let arr_ty = self.check_expr(array)?;
                for bound in [start, end, step].into_iter().flatten() {
                    let ty = self.check_expr(bound)?;
                    if !ty.is_integral() {
                        return Err(Error::new(
                            ErrorKind::TypeMismatch("integral bound".into(), ty.display_name()),
                            bound.loc,
                        ));
                    }
                }
                if arr_ty.element().is_none() {
                    return Err(Error::new(
                        ErrorKind::TypeMismatch("array".into(), arr_ty.display_name()),
                        array.loc,
                    ));
                }
                Ok(arr_ty)
            }
            ExprKind::Range { start, end } => {
                for bound in [start, end] {
                    let ty = self.check_expr(bound)?;
                    if !ty.is_integral() {
                        return Err(Error::new(
                            ErrorKind::TypeMismatch("integral bound".into(), ty.display_name()),
                            bound.loc,
                        ));
                    }
                }
                Ok(self.arena.alloc(Type::Array(self.prims.long)))
            }
            ExprKind::Spread { array } => self.check_expr(array),
            ExprKind::Interpolated { parts } => {
                for p in *parts {
                    self.check_expr(p)?;
                }
                Ok(self.prims.str_)
            }
            ExprKind::Lambda(lambda) => self.check_lambda(lambda, loc),
            ExprKind::Spawn { call } => self.check_expr(call),
            ExprKind::SyncExpr { name } => {
                let ty = self
                    .table
                    .lookup(name)
                    .map(|s| s.ty)
                    .ok_or_else(|| Error::new(ErrorKind::UnknownIdentifier((*name).to_owned()), loc))?;
                self.check_sync(name, loc)?;
                Ok(ty)
            }
            ExprKind::TypeOf { operand } => {
                self.check_expr(operand)?;
                Ok(self.prims.str_)
            }
            ExprKind::Is { operand, ty } => {
                let operand_ty = self.check_expr(operand)?;
                if !matches!(operand_ty, Type::Any) {
                    return Err(Error::new(
                        ErrorKind::TypeMismatch("any".into(), operand_ty.display_name()),
                        operand.loc,
                    ));
                }
                self.resolve_type(ty, loc)?;
                Ok(self.prims.bool_)
            }
            ExprKind::AsType { operand, ty } => {
                let operand_ty = self.check_expr(operand)?;
                let target = self.resolve_type(ty, loc)?;
                let ok = matches!(operand_ty, Type::Any)
                    || matches!(target, Type::Any)
                    || (operand_ty.is_numeric() && target.is_numeric())
                    || operand_ty == target;
                if ok {
                    Ok(target)
                } else {
                    Err(Error::new(
                        ErrorKind::TypeMismatch(target.display_name(), operand_ty.display_name()),
                        loc,
                    ))
                }
            }
            ExprKind::StructLiteral { name, fields } => {
                let ty = self
                    .table
                    .lookup_type(name)
                    .map(|s| s.ty)
                    .ok_or_else(|| Error::new(ErrorKind::UnknownType((*name).to_owned()), loc))?;
                let Type::Struct { fields: decl_fields, .. } = ty else {
                    return Err(Error::new(ErrorKind::UnknownType((*name).to_owned()), loc));
                };
                for (fname, fvalue) in *fields {
                    let decl = decl_fields.iter().find(|f| f.name == *fname).ok_or_else(|| {
                        Error::new(ErrorKind::UnknownField((*name).to_owned(), (*fname).to_owned()), loc)
                    })?;
                    let vt = self.check_expr(fvalue)?;
                    self.expect_assignable(decl.ty, vt, fvalue.loc)?;
                }
                Ok(ty)
            }
            ExprKind::Match { scrutinee, arms } => {
                let scrut_ty = self.check_expr(scrutinee)?;
                let mut out: Option<&'arena Type<'arena>> = None;
                for arm in *arms {
                    if let Some(pat) = arm.pattern {
                        let pat_ty = self.check_expr(pat)?;
                        self.expect_assignable(scrut_ty, pat_ty, pat.loc)?;
                    }
                    let vt = self.check_expr(arm.value)?;
                    out = Some(match out {
                        None => vt,
                        Some(prev) if prev == vt => prev,
                        Some(prev) if prev.is_numeric() && vt.is_numeric() => self.widen(prev, vt),
                        Some(_) => self.prims.any,
                    });
                }
                Ok(out.unwrap_or(self.prims.void))
            }
        }
    }

    fn check_lambda(
        &mut self,
        lambda: &'arena crate::ast::LambdaExpr<'arena>,
        loc: Location,
    ) -> Result<&'arena Type<'arena>> {
        self.table.push_scope();
        let mut params = Vec::with_capacity(lambda.params.len());
        for p in lambda.params {
            let ty = self.resolve_type(p.ty, loc)?;
            self.table.add_symbol_full(p.name, ty, SymbolKind::Param, p.mem_qual);
            params.push(ty);
        }
        self.lambda_rets.push(lambda.ret);
        let body_ty = match &lambda.body {
            LambdaBody::Expr(expr) => self.check_expr(expr)?,
            LambdaBody::Block(stmts) => {
                let mut result = Ok(());
                for s in *stmts {
                    result = self.check_stmt(s);
                    if result.is_err() {
                        break;
                    }
                }
                if let Err(err) = result {
                    self.lambda_rets.pop();
                    self.table.pop_scope();
                    return Err(err);
                }
                lambda.ret.unwrap_or(self.prims.void)
            }
        };
        self.lambda_rets.pop();
        self.table.pop_scope();
        let ret = lambda.ret.unwrap_or(body_ty);
        Ok(self.arena.alloc(Type::Function {
            params: self.arena.alloc_slice(&params),
            ret,
        }))
    }

    fn check_call(
        &mut self,
        fn_ty: &'arena Type<'arena>,
        name: &str,
        args: &'arena [&'arena Expr<'arena>],
        loc: Location,
    ) -> Result<&'arena Type<'arena>> {
        let Type::Function { params, ret } = fn_ty else {
            return Err(Error::new(ErrorKind::NotAFunction(name.to_owned()), loc));
        };
        if params.len() != args.len() {
            return Err(Error::new(
                ErrorKind::WrongArity(name.to_owned(), params.len(), args.len()),
                loc,
            ));
        }
        for (param, arg) in params.iter().zip(args.iter()) {
            let arg_ty = self.check_expr(arg)?;
            self.expect_assignable(param, arg_ty, arg.loc)?;
        }
        Ok(ret)
    }

    fn check_method_call(
        &mut self,
        receiver: &'arena Expr<'arena>,
        method: &'arena str,
        args: &'arena [&'arena Expr<'arena>],
        loc: Location,
    ) -> Result<&'arena Type<'arena>> {
        // `ns.f(args)` is a namespaced call spelled through member syntax.
        if let ExprKind::Variable(ns) = &receiver.kind {
            if self.table.lookup(ns).is_some_and(Symbol::is_namespace) {
                let fn_ty = self
                    .table
                    .lookup_namespaced(ns, method)
                    .map(|s| s.ty)
                    .ok_or_else(|| {
                        Error::new(ErrorKind::UnknownIdentifier(format!("{ns}.{method}")), loc)
                    })?;
                receiver.set_ty(self.prims.void);
                return self.check_call(fn_ty, method, args, loc);
            }
        }
        let recv_ty = self.check_expr(receiver)?;
        for arg in args {
            self.check_expr(arg)?;
        }
        match recv_ty {
            Type::Array(elem) => match method {
                "push" | "push_copy" | "insert" | "remove" | "clone" | "reverse" | "concat" => Ok(recv_ty),
                "pop" => Ok(elem),
                "len" => Ok(self.prims.long),
                "index_of" => Ok(self.prims.long),
                "contains" => Ok(self.prims.bool_),
                "join" | "to_string" => Ok(self.prims.str_),
                "clear" => Ok(self.prims.void),
                _ => Err(Error::new(
                    ErrorKind::UnknownField(recv_ty.display_name(), method.to_owned()),
                    loc,
                )),
            },
            Type::Str => match method {
                "len" => Ok(self.prims.long),
                "to_string" => Ok(self.prims.str_),
                _ => Err(Error::new(
                    ErrorKind::UnknownField("str".into(), method.to_owned()),
                    loc,
                )),
            },
            // UFCS: a struct method is a free function whose first
            // parameter takes the receiver.
            Type::Struct { .. } => {
                let fn_ty = self
                    .table
                    .lookup(method)
                    .filter(|s| s.is_function)
                    .map(|s| s.ty)
                    .ok_or_else(|| Error::new(ErrorKind::UnknownIdentifier(method.to_owned()), loc))?;
                let Type::Function { params, ret } = fn_ty else {
                    return Err(Error::new(ErrorKind::NotAFunction(method.to_owned()), loc));
                };
                if params.len() != args.len() + 1 {
                    return Err(Error::new(
                        ErrorKind::WrongArity(method.to_owned(), params.len(), args.len() + 1),
                        loc,
                    ));
                }
                Ok(ret)
            }
            _ => Err(Error::new(
                ErrorKind::UnknownField(recv_ty.display_name(), method.to_owned()),
                loc,
            )),
        }
    }

    fn field_type(
        &self,
        obj_ty: &'arena Type<'arena>,
        field: &str,
        loc: Location,
    ) -> Result<&'arena Type<'arena>> {
        match obj_ty {
            Type::Struct { name, fields, .. } => fields
                .iter()
                .find(|f| f.name == field)
                .map(|f| f.ty)
                .ok_or_else(|| {
                    Error::new(ErrorKind::UnknownField((*name).to_owned(), field.to_owned()), loc)
                }),
            Type::Array(_) | Type::Str if field == "len" => Ok(self.prims.long),
            _ => Err(Error::new(
                ErrorKind::UnknownField(obj_ty.display_name(), field.to_owned()),
                loc,
            )),
        }
    }

    fn check_mutation(&self, name: &str, loc: Location) -> Result<()> {
        if self.table.is_frozen(name) {
            return Err(Error::new(ErrorKind::FrozenMutation(name.to_owned()), loc));
        }
        Ok(())
    }

    fn binary_result(
        &self,
        op: BinaryOp,
        lt: &'arena Type<'arena>,
        rt: &'arena Type<'arena>,
        loc: Location,
    ) -> Result<&'arena Type<'arena>> {
        if op.is_logical() {
            self.expect(self.prims.bool_, lt, loc)?;
            self.expect(self.prims.bool_, rt, loc)?;
            return Ok(self.prims.bool_);
        }
        if op.is_comparison() {
            let comparable = lt == rt
                || (lt.is_numeric() && rt.is_numeric())
                || matches!(lt, Type::Any)
                || matches!(rt, Type::Any);
            if !comparable {
                return Err(Error::new(
                    ErrorKind::TypeMismatch(lt.display_name(), rt.display_name()),
                    loc,
                ));
            }
            return Ok(self.prims.bool_);
        }
        // Arithmetic; + doubles as string and array concatenation.
        if op == BinaryOp::Add {
            if matches!(lt, Type::Str) || matches!(rt, Type::Str) {
                return Ok(self.prims.str_);
            }
            if let (Type::Array(_), Type::Array(_)) = (lt, rt) {
                if lt == rt {
                    return Ok(lt);
                }
            }
        }
        if lt.is_numeric() && rt.is_numeric() {
            return Ok(self.widen(lt, rt));
        }
        Err(Error::new(
            ErrorKind::TypeMismatch(lt.display_name(), rt.display_name()),
            loc,
        ))
    }

    fn widen(&self, a: &'arena Type<'arena>, b: &'arena Type<'arena>) -> &'arena Type<'arena> {
        if a == b {
            return a;
        }
        if a.is_float() || b.is_float() {
            return self.prims.double;
        }
        self.prims.long
    }

    fn expect(
        &self,
        expected: &'arena Type<'arena>,
        got: &'arena Type<'arena>,
        loc: Location,
    ) -> Result<()> {
        if expected == got {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::TypeMismatch(expected.display_name(), got.display_name()),
                loc,
            ))
        }
    }

    /// Assignment compatibility: exact match, numeric widening, boxing into
    /// `any` (including typed arrays into `any[]`), and empty array
    /// literals into any array type.
    fn expect_assignable(
        &self,
        target: &'arena Type<'arena>,
        got: &'arena Type<'arena>,
        loc: Location,
    ) -> Result<()> {
        let ok = target == got
            || matches!(target, Type::Any)
            || (target.is_numeric() && got.is_numeric())
            || matches!((target, got), (Type::Array(t), Type::Array(g))
                if matches!(t, Type::Any) || matches!(g, Type::Void) || **t == **g
                    || (t.is_numeric() && g.is_numeric())
                    || (t.array_depth() == g.array_depth() && matches!(t.base_element(), Type::Any)));
        if ok {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::TypeMismatch(target.display_name(), got.display_name()),
                loc,
            ))
        }
    }
}

fn clone_symbol<'arena>(sym: &crate::symbol::Symbol<'arena>) -> crate::symbol::Symbol<'arena> {
    crate::symbol::Symbol {
        name: sym.name,
        ty: sym.ty,
        kind: sym.kind,
        mem_qual: sym.mem_qual,
        sync_mod: sym.sync_mod,
        func_mod: sym.func_mod,
        declared_func_mod: sym.declared_func_mod,
        is_function: sym.is_function,
        is_native: sym.is_native,
        c_alias: sym.c_alias,
        arena_depth: sym.arena_depth,
        declaration_scope_depth: sym.declaration_scope_depth,
        thread_state: sym.thread_state,
        frozen_state: sym.frozen_state,
        frozen_args: sym.frozen_args.clone(),
        has_pending_elements: sym.has_pending_elements,
        is_static: sym.is_static,
        c_name: sym.c_name.clone(),
        c_ptr_name: sym.c_ptr_name.clone(),
        namespace_symbols: Vec::new(),
        canonical_module: sym.canonical_module,
    }
}

/// Finds arrays that receive `push(spawn …)` before the body's sync points.
fn collect_pending_push_targets<'arena>(body: &'arena [&'arena Stmt<'arena>]) -> HashSet<&'arena str> {
    fn walk_expr<'arena>(expr: &'arena Expr<'arena>, out: &mut HashSet<&'arena str>) {
        if let ExprKind::MethodCall { receiver, method, args } = &expr.kind {
            if *method == "push" {
                if let (ExprKind::Variable(name), Some(arg)) = (&receiver.kind, args.first()) {
                    if matches!(arg.kind, ExprKind::Spawn { .. }) {
                        out.insert(name);
                    }
                }
            }
        }
    }
    fn walk_stmt<'arena>(stmt: &'arena Stmt<'arena>, out: &mut HashSet<&'arena str>) {
        match &stmt.kind {
            StmtKind::Expression(e) => walk_expr(e, out),
            StmtKind::VarDecl(decl) => {
                if let Some(init) = decl.initializer {
                    walk_expr(init, out);
                }
            }
            StmtKind::Block(stmts) | StmtKind::PrivateBlock(stmts) => {
                for s in *stmts {
                    walk_stmt(s, out);
                }
            }
            StmtKind::If { then_branch, else_branch, .. } => {
                walk_stmt(then_branch, out);
                if let Some(e) = else_branch {
                    walk_stmt(e, out);
                }
            }
            StmtKind::While { body, .. }
            | StmtKind::For { body, .. }
            | StmtKind::ForEach { body, .. }
            | StmtKind::Lock { body, .. } => walk_stmt(body, out),
            _ => {}
        }
    }
    let mut out = HashSet::new();
    for stmt in body {
        walk_stmt(stmt, &mut out);
    }
    out
}

/// Marks self-recursive calls in return position so code generation can
/// rewrite them into the tail loop.
fn mark_tail_calls<'arena>(func: &'arena FunctionStmt<'arena>) {
    fn walk<'arena>(stmt: &'arena Stmt<'arena>, func: &'arena FunctionStmt<'arena>) {
        match &stmt.kind {
            StmtKind::Return { value: Some(expr) } => mark_expr(expr, func),
            StmtKind::Block(stmts) | StmtKind::PrivateBlock(stmts) => {
                for s in *stmts {
                    walk(s, func);
                }
            }
            StmtKind::If { then_branch, else_branch, .. } => {
                walk(then_branch, func);
                if let Some(e) = else_branch {
                    walk(e, func);
                }
            }
            StmtKind::While { body, .. }
            | StmtKind::For { body, .. }
            | StmtKind::ForEach { body, .. }
            | StmtKind::Lock { body, .. } => walk(body, func),
            _ => {}
        }
    }
    fn mark_expr<'arena>(expr: &'arena Expr<'arena>, func: &'arena FunctionStmt<'arena>) {
        match &expr.kind {
            ExprKind::Call { name, namespace, args, is_tail_call } => {
                if namespace.is_none() && *name == func.name && args.len() == func.params.len() {
                    is_tail_call.set(true);
                }
            }
            // `return cond ? f(…) : g(…)` keeps tail position in both arms.
            ExprKind::Match { arms, .. } => {
                for arm in *arms {
                    mark_expr(arm.value, func);
                }
            }
            _ => {}
        }
    }
    for stmt in func.body {
        walk(stmt, func);
    }
}

/// True when a function statement contains at least one marked tail call.
pub fn function_has_marked_tail_calls<'arena>(func: &'arena FunctionStmt<'arena>) -> bool {
    fn expr_has<'arena>(expr: &'arena Expr<'arena>) -> bool {
        match &expr.kind {
            ExprKind::Call { is_tail_call, .. } => is_tail_call.get(),
            ExprKind::Match { arms, .. } => arms.iter().any(|a| expr_has(a.value)),
            _ => false,
        }
    }
    fn stmt_has<'arena>(stmt: &'arena Stmt<'arena>) -> bool {
        match &stmt.kind {
            StmtKind::Return { value: Some(expr) } => expr_has(expr),
            StmtKind::Block(stmts) | StmtKind::PrivateBlock(stmts) => stmts.iter().any(|s| stmt_has(s)),
            StmtKind::If { then_branch, else_branch, .. } => {
                stmt_has(then_branch) || else_branch.is_some_and(|e| stmt_has(e))
            }
            StmtKind::While { body, .. }
            | StmtKind::For { body, .. }
            | StmtKind::ForEach { body, .. }
            | StmtKind::Lock { body, .. } => stmt_has(body),
            _ => false,
        }
    }
    func.body.iter().any(|s| stmt_has(s))
}
