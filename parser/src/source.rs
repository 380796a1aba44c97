//! Lowering from pest pairs to the compiler AST.

use std::sync::OnceLock;

use compiler::arena::CompileArena;
use compiler::ast::{
    BinaryOp, Expr, ExprKind, FunctionModifier, FunctionStmt, ImportStmt, LambdaBody, LambdaExpr,
    Literal, MatchArm, MemoryQualifier, Module, Param, PragmaKind, Stmt, StmtKind, StructDecl,
    SyncModifier, UnaryOp, VarDeclStmt,
};
use compiler::error::{Error, ErrorKind, Result};
use compiler::location::Location;
use compiler::types::{Field, Type};
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;

use crate::error::convert;

#[derive(Parser)]
#[grammar = "grammar.pest"]
pub struct SennaParser;

fn pratt() -> &'static PrattParser<Rule> {
    static PRATT: OnceLock<PrattParser<Rule>> = OnceLock::new();
    PRATT.get_or_init(|| {
        PrattParser::new()
            .op(Op::infix(Rule::op_assign, Assoc::Right)
                | Op::infix(Rule::op_add_assign, Assoc::Right)
                | Op::infix(Rule::op_sub_assign, Assoc::Right)
                | Op::infix(Rule::op_mul_assign, Assoc::Right)
                | Op::infix(Rule::op_div_assign, Assoc::Right)
                | Op::infix(Rule::op_mod_assign, Assoc::Right))
            .op(Op::infix(Rule::op_or, Assoc::Left))
            .op(Op::infix(Rule::op_and, Assoc::Left))
            .op(Op::infix(Rule::op_eq, Assoc::Left) | Op::infix(Rule::op_ne, Assoc::Left))
            .op(Op::infix(Rule::op_lt, Assoc::Left)
                | Op::infix(Rule::op_le, Assoc::Left)
                | Op::infix(Rule::op_gt, Assoc::Left)
                | Op::infix(Rule::op_ge, Assoc::Left))
            .op(Op::infix(Rule::op_range, Assoc::Left))
            .op(Op::infix(Rule::op_add, Assoc::Left) | Op::infix(Rule::op_sub, Assoc::Left))
            .op(Op::infix(Rule::op_mul, Assoc::Left)
                | Op::infix(Rule::op_div, Assoc::Left)
                | Op::infix(Rule::op_mod, Assoc::Left))
            .op(Op::prefix(Rule::op_neg)
                | Op::prefix(Rule::op_not)
                | Op::prefix(Rule::op_spawn)
                | Op::prefix(Rule::op_sync))
            .op(Op::postfix(Rule::call_args)
                | Op::postfix(Rule::index_suffix)
                | Op::postfix(Rule::slice_suffix)
                | Op::postfix(Rule::member_suffix)
                | Op::postfix(Rule::as_suffix)
                | Op::postfix(Rule::is_suffix))
    })
}

fn loc_of(pair: &Pair<'_, Rule>) -> Location {
    let span = pair.as_span();
    Location::new(span.start_pos().line_col(), span.end_pos().line_col())
}

fn syntax_error(msg: &str, loc: Location) -> Error {
    Error::new(ErrorKind::Syntax(msg.to_owned()), loc)
}

/// Parses a whole source file into a module.
pub fn parse_module<'arena>(
    arena: &CompileArena<'arena>,
    source: &str,
) -> Result<Module<'arena>> {
    let mut pairs = SennaParser::parse(Rule::program, source).map_err(convert)?;
    let program = pairs.next().expect("program rule always matches once");
    let mut stmts = Vec::new();
    for pair in program.into_inner() {
        if pair.as_rule() == Rule::EOI {
            continue;
        }
        stmts.push(build_top(arena, pair)?);
    }
    Ok(Module { stmts: arena.alloc_slice(&stmts) })
}

/// Parses a single expression (used by string interpolation).
pub fn parse_expression<'arena>(
    arena: &CompileArena<'arena>,
    source: &str,
) -> Result<&'arena Expr<'arena>> {
    let mut pairs = SennaParser::parse(Rule::expr, source).map_err(convert)?;
    let pair = pairs
        .next()
        .ok_or_else(|| syntax_error("empty interpolation", Location::default()))?;
    build_expr(arena, pair)
}

// ---------------------------------------------------------------------------
// Top-level declarations
// ---------------------------------------------------------------------------

fn build_top<'arena>(
    arena: &CompileArena<'arena>,
    pair: Pair<'_, Rule>,
) -> Result<&'arena Stmt<'arena>> {
    let loc = loc_of(&pair);
    match pair.as_rule() {
        Rule::import_stmt => {
            let mut inner = pair.into_inner();
            let path = string_contents(arena, &inner.next().expect("import path"))?;
            let namespace = inner.next().map(|p| arena.store_name(p.as_str()));
            let import = arena.alloc(ImportStmt {
                path,
                namespace,
                module: core::cell::Cell::new(None),
                canonical: core::cell::Cell::new(None),
            });
            Ok(arena.alloc(Stmt::new(StmtKind::Import(import), loc)))
        }
        Rule::pragma_stmt => {
            let mut inner = pair.into_inner();
            let kind_pair = inner.next().expect("pragma kind");
            let value = string_contents(arena, &inner.next().expect("pragma value"))?;
            let kind = match kind_pair.as_str() {
                "alias" => PragmaKind::Alias(value),
                "include" => PragmaKind::Include(value),
                "link" => PragmaKind::Link(value),
                other => {
                    return Err(syntax_error(&format!("unknown pragma {other}"), loc));
                }
            };
            Ok(arena.alloc(Stmt::new(StmtKind::Pragma(kind), loc)))
        }
        Rule::struct_decl => {
            let mut inner = pair.into_inner();
            let name = arena.store_name(inner.next().expect("struct name").as_str());
            let mut fields = Vec::new();
            for field in inner {
                let mut parts = field.into_inner();
                let fname = arena.store_name(parts.next().expect("field name").as_str());
                let fty = build_type(arena, parts.next().expect("field type"))?;
                fields.push(Field { name: fname, ty: fty });
            }
            let decl = arena.alloc(StructDecl {
                name,
                fields: arena.alloc_slice(&fields),
                loc,
            });
            Ok(arena.alloc(Stmt::new(StmtKind::StructDecl(decl), loc)))
        }
        Rule::type_decl => {
            let mut inner = pair.into_inner();
            let name = arena.store_name(inner.next().expect("type name").as_str());
            let ty = build_type(arena, inner.next().expect("type body"))?;
            Ok(arena.alloc(Stmt::new(StmtKind::TypeDecl { name, ty }, loc)))
        }
        Rule::func_decl => build_function(arena, pair),
        Rule::var_decl => build_var_decl(arena, pair),
        _ => build_stmt(arena, pair),
    }
}

fn build_function<'arena>(
    arena: &CompileArena<'arena>,
    pair: Pair<'_, Rule>,
) -> Result<&'arena Stmt<'arena>> {
    let loc = loc_of(&pair);
    let mut modifier = FunctionModifier::Default;
    let mut is_native = false;
    let mut name = None;
    let mut params: &'arena [Param<'arena>] = &[];
    let mut return_ty: &'arena Type<'arena> = arena.alloc(Type::Void);
    let mut body: Vec<&'arena Stmt<'arena>> = Vec::new();
    let mut has_body = false;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::func_mod => match part.as_str() {
                "shared" => modifier = FunctionModifier::Shared,
                "private" => modifier = FunctionModifier::Private,
                "native" => is_native = true,
                _ => {}
            },
            Rule::ident => name = Some(arena.store_name(part.as_str())),
            Rule::param_list => params = build_params(arena, part)?,
            Rule::type_expr => return_ty = build_type(arena, part)?,
            Rule::block => {
                has_body = true;
                body = build_block_stmts(arena, part)?;
            }
            Rule::expr_body => {
                // `f(...) = expr` sugar: a single-return body.
                has_body = true;
                let inner = part.into_inner().next().expect("expression body");
                let expr_loc = loc_of(&inner);
                let value = build_expr(arena, inner)?;
                body =
                    vec![arena.alloc(Stmt::new(StmtKind::Return { value: Some(value) }, expr_loc))];
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| syntax_error("function needs a name", loc))?;
    let func = arena.alloc(FunctionStmt {
        name,
        params,
        return_ty,
        body: arena.alloc_slice(&body),
        modifier,
        is_native: is_native || !has_body,
        c_alias: core::cell::Cell::new(None),
        loc,
    });
    Ok(arena.alloc(Stmt::new(StmtKind::Function(func), loc)))
}

fn build_params<'arena>(
    arena: &CompileArena<'arena>,
    pair: Pair<'_, Rule>,
) -> Result<&'arena [Param<'arena>]> {
    let mut params = Vec::new();
    for param in pair.into_inner() {
        let mut inner = param.into_inner();
        let name = arena.store_name(inner.next().expect("param name").as_str());
        let ty = build_type(arena, inner.next().expect("param type"))?;
        let mem_qual = inner.next().map_or(MemoryQualifier::Default, |q| {
            match q.into_inner().next().map(|k| k.as_str()) {
                Some("val") => MemoryQualifier::AsVal,
                Some("ref") => MemoryQualifier::AsRef,
                _ => MemoryQualifier::Default,
            }
        });
        params.push(Param { name, ty, mem_qual });
    }
    Ok(arena.alloc_slice(&params))
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

fn build_type<'arena>(
    arena: &CompileArena<'arena>,
    pair: Pair<'_, Rule>,
) -> Result<&'arena Type<'arena>> {
    let mut inner = pair.into_inner();
    let base = inner.next().expect("base type");
    let mut ty = build_base_type(arena, base)?;
    for suffix in inner {
        if suffix.as_rule() == Rule::array_suffix {
            ty = arena.alloc(Type::Array(ty));
        }
    }
    Ok(ty)
}

fn build_base_type<'arena>(
    arena: &CompileArena<'arena>,
    pair: Pair<'_, Rule>,
) -> Result<&'arena Type<'arena>> {
    let inner = pair.into_inner().next().expect("base type content");
    match inner.as_rule() {
        Rule::fn_type => {
            let mut params = Vec::new();
            let mut ret: &'arena Type<'arena> = arena.alloc(Type::Void);
            let parts: Vec<_> = inner.into_inner().collect();
            let count = parts.len();
            for (i, part) in parts.into_iter().enumerate() {
                let ty = build_type(arena, part)?;
                // The final type after the colon is the return type; pest
                // flattens them, so the last child is the return when the
                // source had one.
                if i + 1 == count {
                    ret = ty;
                } else {
                    params.push(ty);
                }
            }
            Ok(arena.alloc(Type::Function {
                params: arena.alloc_slice(&params),
                ret,
            }))
        }
        Rule::ident => Ok(named_type(arena, inner.as_str())),
        _ => Err(syntax_error("bad type", loc_of(&inner))),
    }
}

fn named_type<'arena>(arena: &CompileArena<'arena>, name: &str) -> &'arena Type<'arena> {
    arena.alloc(match name {
        "int" => Type::Int,
        "long" => Type::Long,
        "int32" => Type::Int32,
        "uint" => Type::UInt,
        "uint32" => Type::UInt32,
        "double" => Type::Double,
        "float" => Type::Float,
        "str" => Type::Str,
        "char" => Type::Char,
        "bool" => Type::Bool,
        "byte" => Type::Byte,
        "void" => Type::Void,
        "any" => Type::Any,
        other => Type::Named(arena.store_name(other)),
    })
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

fn build_block_stmts<'arena>(
    arena: &CompileArena<'arena>,
    pair: Pair<'_, Rule>,
) -> Result<Vec<&'arena Stmt<'arena>>> {
    pair.into_inner().map(|p| build_stmt(arena, p)).collect()
}

fn build_stmt<'arena>(
    arena: &CompileArena<'arena>,
    pair: Pair<'_, Rule>,
) -> Result<&'arena Stmt<'arena>> {
    let loc = loc_of(&pair);
    match pair.as_rule() {
        Rule::var_decl => build_var_decl(arena, pair),
        Rule::return_stmt => {
            let value = match pair.into_inner().next() {
                Some(inner) => Some(build_expr(arena, inner)?),
                None => None,
            };
            Ok(arena.alloc(Stmt::new(StmtKind::Return { value }, loc)))
        }
        Rule::if_stmt => {
            let mut inner = pair.into_inner();
            let condition = build_expr(arena, inner.next().expect("if condition"))?;
            let then_pair = inner.next().expect("then block");
            let then_loc = loc_of(&then_pair);
            let then_branch = arena.alloc(Stmt::new(
                StmtKind::Block(arena.alloc_slice(&build_block_stmts(arena, then_pair)?)),
                then_loc,
            ));
            let else_branch = match inner.next() {
                Some(p) if p.as_rule() == Rule::if_stmt => Some(build_stmt(arena, p)?),
                Some(p) => {
                    let else_loc = loc_of(&p);
                    Some(&*arena.alloc(Stmt::new(
                        StmtKind::Block(arena.alloc_slice(&build_block_stmts(arena, p)?)),
                        else_loc,
                    )))
                }
                None => None,
            };
            Ok(arena.alloc(Stmt::new(
                StmtKind::If { condition, then_branch, else_branch },
                loc,
            )))
        }
        Rule::while_stmt => {
            let mut inner = pair.into_inner();
            let condition = build_expr(arena, inner.next().expect("while condition"))?;
            let body_pair = inner.next().expect("while body");
            let body_loc = loc_of(&body_pair);
            let body = arena.alloc(Stmt::new(
                StmtKind::Block(arena.alloc_slice(&build_block_stmts(arena, body_pair)?)),
                body_loc,
            ));
            Ok(arena.alloc(Stmt::new(StmtKind::While { condition, body }, loc)))
        }
        Rule::for_stmt => {
            let mut inner = pair.into_inner();
            let var = arena.store_name(inner.next().expect("loop variable").as_str());
            let iterable = build_expr(arena, inner.next().expect("loop iterable"))?;
            let body_pair = inner.next().expect("loop body");
            let body_loc = loc_of(&body_pair);
            let body = arena.alloc(Stmt::new(
                StmtKind::Block(arena.alloc_slice(&build_block_stmts(arena, body_pair)?)),
                body_loc,
            ));
            // `for x in a..b` iterates the range directly; any other
            // iterable is a foreach over its elements.
            let kind = match &iterable.kind {
                ExprKind::Range { start, end } => StmtKind::For { var, start, end, body },
                _ => StmtKind::ForEach { var, iterable, body },
            };
            Ok(arena.alloc(Stmt::new(kind, loc)))
        }
        Rule::lock_stmt => {
            let mut inner = pair.into_inner();
            let lock_expr = build_expr(arena, inner.next().expect("lock target"))?;
            let body_pair = inner.next().expect("lock body");
            let body_loc = loc_of(&body_pair);
            let body = arena.alloc(Stmt::new(
                StmtKind::Block(arena.alloc_slice(&build_block_stmts(arena, body_pair)?)),
                body_loc,
            ));
            Ok(arena.alloc(Stmt::new(StmtKind::Lock { lock_expr, body }, loc)))
        }
        Rule::private_block => {
            let block = pair.into_inner().next().expect("private body");
            let stmts = build_block_stmts(arena, block)?;
            Ok(arena.alloc(Stmt::new(StmtKind::PrivateBlock(arena.alloc_slice(&stmts)), loc)))
        }
        Rule::break_stmt => Ok(arena.alloc(Stmt::new(StmtKind::Break, loc))),
        Rule::continue_stmt => Ok(arena.alloc(Stmt::new(StmtKind::Continue, loc))),
        Rule::sync_stmt => {
            let name = arena.store_name(pair.into_inner().next().expect("sync target").as_str());
            let expr = arena.alloc(Expr::new(ExprKind::SyncExpr { name }, loc));
            Ok(arena.alloc(Stmt::new(StmtKind::Expression(expr), loc)))
        }
        Rule::block => {
            let stmts = build_block_stmts(arena, pair)?;
            Ok(arena.alloc(Stmt::new(StmtKind::Block(arena.alloc_slice(&stmts)), loc)))
        }
        Rule::expr_stmt => {
            let expr = build_expr(arena, pair.into_inner().next().expect("expression"))?;
            Ok(arena.alloc(Stmt::new(StmtKind::Expression(expr), loc)))
        }
        other => Err(syntax_error(&format!("unexpected statement {other:?}"), loc)),
    }
}

fn build_var_decl<'arena>(
    arena: &CompileArena<'arena>,
    pair: Pair<'_, Rule>,
) -> Result<&'arena Stmt<'arena>> {
    let loc = loc_of(&pair);
    let mut is_static = false;
    let mut sync_mod = SyncModifier::None;
    let mut name = None;
    let mut declared_ty = None;
    let mut mem_qual = MemoryQualifier::Default;
    let mut initializer = None;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::var_mod => match part.as_str() {
                "static" => is_static = true,
                "atomic" => sync_mod = SyncModifier::Atomic,
                _ => {}
            },
            Rule::ident => name = Some(arena.store_name(part.as_str())),
            Rule::type_expr => declared_ty = Some(build_type(arena, part)?),
            Rule::mem_qual => {
                mem_qual = match part.into_inner().next().map(|k| k.as_str()) {
                    Some("val") => MemoryQualifier::AsVal,
                    Some("ref") => MemoryQualifier::AsRef,
                    _ => MemoryQualifier::Default,
                };
            }
            Rule::expr => initializer = Some(build_expr(arena, part)?),
            _ => {}
        }
    }

    let name = name.ok_or_else(|| syntax_error("variable needs a name", loc))?;
    let decl = arena.alloc(VarDeclStmt {
        name,
        declared_ty,
        ty: core::cell::OnceCell::new(),
        initializer,
        mem_qual,
        sync_mod,
        is_static,
        has_pending_elements: core::cell::Cell::new(false),
        loc,
    });
    Ok(arena.alloc(Stmt::new(StmtKind::VarDecl(decl), loc)))
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

pub fn build_expr<'arena>(
    arena: &CompileArena<'arena>,
    pair: Pair<'_, Rule>,
) -> Result<&'arena Expr<'arena>> {
    let loc = loc_of(&pair);
    let result = pratt()
        .map_primary(|p| build_primary(arena, p))
        .map_prefix(|op, rhs| {
            let rhs = rhs?;
            let op_loc = loc_of(&op);
            let kind = match op.as_rule() {
                Rule::op_neg => ExprKind::Unary { op: UnaryOp::Neg, operand: rhs },
                Rule::op_not => ExprKind::Unary { op: UnaryOp::Not, operand: rhs },
                Rule::op_spawn => ExprKind::Spawn { call: rhs },
                Rule::op_sync => match &rhs.kind {
                    ExprKind::Variable(name) => ExprKind::SyncExpr { name: *name },
                    _ => return Err(syntax_error("sync expects a variable", op_loc)),
                },
                _ => return Err(syntax_error("unexpected prefix", op_loc)),
            };
            Ok(&*arena.alloc(Expr::new(kind, op_loc)))
        })
        .map_postfix(|lhs, op| {
            let lhs = lhs?;
            build_postfix(arena, lhs, op)
        })
        .map_infix(|lhs, op, rhs| {
            let lhs = lhs?;
            let rhs = rhs?;
            build_infix(arena, lhs, op, rhs, loc)
        })
        .parse(pair.into_inner());
    result
}

fn build_infix<'arena>(
    arena: &CompileArena<'arena>,
    lhs: &'arena Expr<'arena>,
    op: Pair<'_, Rule>,
    rhs: &'arena Expr<'arena>,
    loc: Location,
) -> Result<&'arena Expr<'arena>> {
    let kind = match &lhs.kind {
        _ if op.as_rule() != Rule::op_assign => return build_infix_rest(arena, lhs, op, rhs, loc),
        ExprKind::Variable(name) => ExprKind::Assign { name: *name, value: rhs },
        ExprKind::Index { array, index } => {
            ExprKind::IndexAssign { array: *array, index: *index, value: rhs }
        }
        ExprKind::Member { object, field } => {
            ExprKind::MemberAssign { object: *object, field: *field, value: rhs }
        }
        _ => return Err(syntax_error("invalid assignment target", loc)),
    };
    Ok(arena.alloc(Expr::new(kind, loc)))
}

fn build_infix_rest<'arena>(
    arena: &CompileArena<'arena>,
    lhs: &'arena Expr<'arena>,
    op: Pair<'_, Rule>,
    rhs: &'arena Expr<'arena>,
    loc: Location,
) -> Result<&'arena Expr<'arena>> {
    let kind = match op.as_rule() {
        Rule::op_add_assign
        | Rule::op_sub_assign
        | Rule::op_mul_assign
        | Rule::op_div_assign
        | Rule::op_mod_assign => {
            let bin_op = match op.as_rule() {
                Rule::op_add_assign => BinaryOp::Add,
                Rule::op_sub_assign => BinaryOp::Sub,
                Rule::op_mul_assign => BinaryOp::Mul,
                Rule::op_div_assign => BinaryOp::Div,
                _ => BinaryOp::Mod,
            };
            match &lhs.kind {
                ExprKind::Variable(name) => {
                    ExprKind::CompoundAssign { name: *name, op: bin_op, value: rhs }
                }
                _ => return Err(syntax_error("invalid assignment target", loc)),
            }
        }
        Rule::op_range => ExprKind::Range { start: lhs, end: rhs },
        rule => {
            let bin_op = match rule {
                Rule::op_add => BinaryOp::Add,
                Rule::op_sub => BinaryOp::Sub,
                Rule::op_mul => BinaryOp::Mul,
                Rule::op_div => BinaryOp::Div,
                Rule::op_mod => BinaryOp::Mod,
                Rule::op_eq => BinaryOp::Eq,
                Rule::op_ne => BinaryOp::Ne,
                Rule::op_lt => BinaryOp::Lt,
                Rule::op_le => BinaryOp::Le,
                Rule::op_gt => BinaryOp::Gt,
                Rule::op_ge => BinaryOp::Ge,
                Rule::op_and => BinaryOp::And,
                Rule::op_or => BinaryOp::Or,
                _ => return Err(syntax_error("unexpected operator", loc)),
            };
            ExprKind::Binary { op: bin_op, left: lhs, right: rhs }
        }
    };
    Ok(arena.alloc(Expr::new(kind, loc)))
}

fn build_postfix<'arena>(
    arena: &CompileArena<'arena>,
    lhs: &'arena Expr<'arena>,
    op: Pair<'_, Rule>,
) -> Result<&'arena Expr<'arena>> {
    let loc = loc_of(&op);
    let kind = match op.as_rule() {
        Rule::call_args => {
            let mut args = Vec::new();
            for arg in op.into_inner() {
                args.push(build_expr(arena, arg)?);
            }
            let args = arena.alloc_slice(&args);
            match &lhs.kind {
                ExprKind::Variable(name) => ExprKind::Call {
                    name: *name,
                    namespace: None,
                    args,
                    is_tail_call: core::cell::Cell::new(false),
                },
                _ => ExprKind::CallValue { callee: lhs, args },
            }
        }
        Rule::index_suffix => {
            let index = build_expr(arena, op.into_inner().next().expect("index"))?;
            ExprKind::Index { array: lhs, index }
        }
        Rule::slice_suffix => {
            let mut bounds: Vec<Option<&'arena Expr<'arena>>> = Vec::new();
            for bound in op.into_inner() {
                match bound.into_inner().next() {
                    Some(e) => bounds.push(Some(build_expr(arena, e)?)),
                    None => bounds.push(None),
                }
            }
            ExprKind::Slice {
                array: lhs,
                start: bounds.first().copied().flatten(),
                end: bounds.get(1).copied().flatten(),
                step: bounds.get(2).copied().flatten(),
            }
        }
        Rule::member_suffix => {
            let mut inner = op.into_inner();
            let field = arena.store_name(inner.next().expect("member name").as_str());
            match inner.next() {
                Some(call) => {
                    let mut args = Vec::new();
                    for arg in call.into_inner() {
                        args.push(build_expr(arena, arg)?);
                    }
                    ExprKind::MethodCall {
                        receiver: lhs,
                        method: field,
                        args: arena.alloc_slice(&args),
                    }
                }
                None => ExprKind::Member { object: lhs, field },
            }
        }
        Rule::as_suffix => {
            let ty = build_type(arena, op.into_inner().next().expect("cast type"))?;
            ExprKind::AsType { operand: lhs, ty }
        }
        Rule::is_suffix => {
            let ty = build_type(arena, op.into_inner().next().expect("test type"))?;
            ExprKind::Is { operand: lhs, ty }
        }
        _ => return Err(syntax_error("unexpected postfix", loc)),
    };
    Ok(arena.alloc(Expr::new(kind, loc)))
}

fn build_primary<'arena>(
    arena: &CompileArena<'arena>,
    pair: Pair<'_, Rule>,
) -> Result<&'arena Expr<'arena>> {
    let loc = loc_of(&pair);
    let kind = match pair.as_rule() {
        Rule::integer => {
            let value: i64 = pair
                .as_str()
                .parse()
                .map_err(|_| syntax_error("integer literal out of range", loc))?;
            ExprKind::Literal(Literal::Int(value))
        }
        Rule::float => {
            let value: f64 = pair
                .as_str()
                .parse()
                .map_err(|_| syntax_error("bad float literal", loc))?;
            ExprKind::Literal(Literal::Double(value))
        }
        Rule::string => return build_string(arena, &pair),
        Rule::char_lit => {
            let inner = pair.as_str();
            let body = &inner[1..inner.len() - 1];
            let c = unescape_char(body).ok_or_else(|| syntax_error("bad char literal", loc))?;
            ExprKind::Literal(Literal::Char(c))
        }
        Rule::bool_true => ExprKind::Literal(Literal::Bool(true)),
        Rule::bool_false => ExprKind::Literal(Literal::Bool(false)),
        Rule::ident => ExprKind::Variable(arena.store_name(pair.as_str())),
        Rule::paren => return build_expr(arena, pair.into_inner().next().expect("inner")),
        Rule::typeof_expr => {
            let operand = build_expr(arena, pair.into_inner().next().expect("typeof operand"))?;
            ExprKind::TypeOf { operand }
        }
        Rule::lambda => return build_lambda(arena, pair),
        Rule::if_expr => {
            // `if c then a else b` desugars to a two-arm match on the
            // condition.
            let mut inner = pair.into_inner();
            let cond = build_expr(arena, inner.next().expect("condition"))?;
            let then_val = build_expr(arena, inner.next().expect("then value"))?;
            let else_val = build_expr(arena, inner.next().expect("else value"))?;
            let true_lit = arena.alloc(Expr::new(ExprKind::Literal(Literal::Bool(true)), loc));
            let arms = vec![
                MatchArm { pattern: Some(&*true_lit), value: then_val },
                MatchArm { pattern: None, value: else_val },
            ];
            ExprKind::Match { scrutinee: cond, arms: arena.alloc(arms).as_slice() }
        }
        Rule::struct_lit => {
            let mut inner = pair.into_inner();
            let name = arena.store_name(inner.next().expect("struct name").as_str());
            let mut fields = Vec::new();
            for field in inner {
                let mut parts = field.into_inner();
                let fname = arena.store_name(parts.next().expect("field name").as_str());
                let value = build_expr(arena, parts.next().expect("field value"))?;
                fields.push((fname, value));
            }
            ExprKind::StructLiteral { name, fields: arena.alloc_slice(&fields) }
        }
        Rule::sized_array => {
            let mut inner = pair.into_inner();
            let default = build_expr(arena, inner.next().expect("default value"))?;
            let len = build_expr(arena, inner.next().expect("length"))?;
            ExprKind::SizedArray { len, default }
        }
        Rule::array_lit => {
            let mut elements = Vec::new();
            for elem in pair.into_inner() {
                let inner = elem.into_inner().next().expect("array element");
                match inner.as_rule() {
                    Rule::spread => {
                        let spread_loc = loc_of(&inner);
                        let array =
                            build_expr(arena, inner.into_inner().next().expect("spread array"))?;
                        elements.push(
                            &*arena.alloc(Expr::new(ExprKind::Spread { array }, spread_loc)),
                        );
                    }
                    _ => elements.push(build_expr(arena, inner)?),
                }
            }
            ExprKind::ArrayLiteral { elements: arena.alloc_slice(&elements) }
        }
        Rule::match_expr => {
            let mut inner = pair.into_inner();
            let scrutinee = build_expr(arena, inner.next().expect("scrutinee"))?;
            let mut arms = Vec::new();
            for arm in inner {
                let mut parts = arm.into_inner();
                let pat_pair = parts.next().expect("pattern");
                let pattern = match pat_pair.as_rule() {
                    Rule::wildcard => None,
                    _ => Some(build_expr(arena, pat_pair)?),
                };
                let value = build_expr(arena, parts.next().expect("arm value"))?;
                arms.push(MatchArm { pattern, value });
            }
            ExprKind::Match { scrutinee, arms: arena.alloc(arms).as_slice() }
        }
        other => return Err(syntax_error(&format!("unexpected primary {other:?}"), loc)),
    };
    Ok(arena.alloc(Expr::new(kind, loc)))
}

fn build_lambda<'arena>(
    arena: &CompileArena<'arena>,
    pair: Pair<'_, Rule>,
) -> Result<&'arena Expr<'arena>> {
    let loc = loc_of(&pair);
    let mut params: &'arena [Param<'arena>] = &[];
    let mut ret = None;
    let mut body = None;
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::param_list => params = build_params(arena, part)?,
            Rule::type_expr => ret = Some(build_type(arena, part)?),
            Rule::block => {
                let stmts = build_block_stmts(arena, part)?;
                body = Some(LambdaBody::Block(arena.alloc_slice(&stmts)));
            }
            Rule::expr => body = Some(LambdaBody::Expr(build_expr(arena, part)?)),
            _ => {}
        }
    }
    let body = body.ok_or_else(|| syntax_error("lambda needs a body", loc))?;
    let lambda = arena.alloc(LambdaExpr { params, ret, body });
    Ok(arena.alloc(Expr::new(ExprKind::Lambda(lambda), loc)))
}

// ---------------------------------------------------------------------------
// Strings and interpolation
// ---------------------------------------------------------------------------

fn string_contents<'arena>(
    arena: &CompileArena<'arena>,
    pair: &Pair<'_, Rule>,
) -> Result<&'arena str> {
    let raw = pair.as_str();
    let body = &raw[1..raw.len() - 1];
    Ok(arena.store_name(&unescape(body)))
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn unescape_char(body: &str) -> Option<char> {
    let mut chars = body.chars();
    match chars.next()? {
        '\\' => match chars.next()? {
            'n' => Some('\n'),
            't' => Some('\t'),
            'r' => Some('\r'),
            '0' => Some('\0'),
            other => Some(other),
        },
        c => Some(c),
    }
}

/// Builds a string literal, splitting `{expr}` interpolation segments.
fn build_string<'arena>(
    arena: &CompileArena<'arena>,
    pair: &Pair<'_, Rule>,
) -> Result<&'arena Expr<'arena>> {
    let loc = loc_of(pair);
    let raw = pair.as_str();
    let body = &raw[1..raw.len() - 1];

    if !body.contains('{') {
        let text = arena.store_name(&unescape(body));
        return Ok(arena.alloc(Expr::new(ExprKind::Literal(Literal::Str(text)), loc)));
    }

    let mut parts: Vec<&'arena Expr<'arena>> = Vec::new();
    let mut literal = String::new();
    let mut rest = body;
    while let Some(open) = rest.find('{') {
        // An escaped brace stays literal.
        if open > 0 && rest.as_bytes()[open - 1] == b'\\' {
            literal.push_str(&rest[..open - 1]);
            literal.push('{');
            rest = &rest[open + 1..];
            continue;
        }
        literal.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| syntax_error("unterminated interpolation", loc))?;
        if !literal.is_empty() {
            let text = arena.store_name(&unescape(&literal));
            parts.push(arena.alloc(Expr::new(ExprKind::Literal(Literal::Str(text)), loc)));
            literal.clear();
        }
        let inner = &after[..close];
        parts.push(parse_expression(arena, inner)?);
        rest = &after[close + 1..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        let text = arena.store_name(&unescape(&literal));
        parts.push(arena.alloc(Expr::new(ExprKind::Literal(Literal::Str(text)), loc)));
    }

    Ok(arena.alloc(Expr::new(
        ExprKind::Interpolated { parts: arena.alloc_slice(&parts) },
        loc,
    )))
}

#[cfg(test)]
mod tests {
    use compiler::arena::use_arena;
    use compiler::ast::{ExprKind, Literal, StmtKind};

    use super::*;

    fn first_stmt_kind(source: &str, f: impl for<'a> Fn(&StmtKind<'a>) -> bool) -> bool {
        use_arena(|arena| {
            let module = parse_module(arena, source).unwrap();
            f(&module.stmts[0].kind)
        })
    }

    #[test]
    fn parses_var_declarations_with_qualifiers() {
        assert!(first_stmt_kind("var n: int = 0", |k| {
            matches!(k, StmtKind::VarDecl(d) if d.name == "n" && d.initializer.is_some())
        }));
        assert!(first_stmt_kind("var s: str as val = name", |k| {
            matches!(k, StmtKind::VarDecl(d) if d.mem_qual == MemoryQualifier::AsVal)
        }));
        assert!(first_stmt_kind("atomic var c: long = 0", |k| {
            matches!(k, StmtKind::VarDecl(d) if d.sync_mod == SyncModifier::Atomic)
        }));
    }

    #[test]
    fn parses_function_forms() {
        assert!(first_stmt_kind("inc(n: int): int { return n }", |k| {
            matches!(k, StmtKind::Function(f)
                if f.name == "inc" && f.params.len() == 1 && !f.is_native)
        }));
        assert!(first_stmt_kind("double(n: long): long = n * 2", |k| {
            matches!(k, StmtKind::Function(f) if f.body.len() == 1)
        }));
        assert!(first_stmt_kind("shared fill(v: int[]): int[] { return v }", |k| {
            matches!(k, StmtKind::Function(f) if f.modifier == FunctionModifier::Shared)
        }));
        assert!(first_stmt_kind("native puts(s: str): int", |k| {
            matches!(k, StmtKind::Function(f) if f.is_native && f.body.is_empty())
        }));
    }

    #[test]
    fn for_over_range_and_arrays_differ() {
        assert!(first_stmt_kind("main() { for i in 0..10 { } }", |k| {
            matches!(k, StmtKind::Function(f)
                if matches!(f.body[0].kind, StmtKind::For { .. }))
        }));
        assert!(first_stmt_kind("main() { for x in xs { } }", |k| {
            matches!(k, StmtKind::Function(f)
                if matches!(f.body[0].kind, StmtKind::ForEach { .. }))
        }));
    }

    #[test]
    fn precedence_binds_products_before_sums() {
        use_arena(|arena| {
            let module = parse_module(arena, "main() { var x: int = 1 + 2 * 3 }").unwrap();
            let StmtKind::Function(f) = &module.stmts[0].kind else { panic!("function") };
            let StmtKind::VarDecl(decl) = &f.body[0].kind else { panic!("decl") };
            let ExprKind::Binary { op, right, .. } = &decl.initializer.unwrap().kind else {
                panic!("binary")
            };
            assert_eq!(*op, BinaryOp::Add);
            assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
        });
    }

    #[test]
    fn postfix_chains_parse() {
        use_arena(|arena| {
            let module = parse_module(arena, "main() { v.push(3) }").unwrap();
            let StmtKind::Function(f) = &module.stmts[0].kind else { panic!("function") };
            let StmtKind::Expression(e) = &f.body[0].kind else { panic!("expr") };
            assert!(matches!(&e.kind, ExprKind::MethodCall { method, .. } if *method == "push"));
        });
    }

    #[test]
    fn slices_keep_defaulted_bounds() {
        use_arena(|arena| {
            let module = parse_module(arena, "main() { var s: int[] = a[1:] }").unwrap();
            let StmtKind::Function(f) = &module.stmts[0].kind else { panic!("function") };
            let StmtKind::VarDecl(decl) = &f.body[0].kind else { panic!("decl") };
            let ExprKind::Slice { start, end, step, .. } = &decl.initializer.unwrap().kind else {
                panic!("slice")
            };
            assert!(start.is_some());
            assert!(end.is_none());
            assert!(step.is_none());
        });
    }

    #[test]
    fn lambdas_and_spawn_parse_as_prefix_forms() {
        use_arena(|arena| {
            let module =
                parse_module(arena, "main() { var f = (a: int): int => a + 1 }").unwrap();
            let StmtKind::Function(f) = &module.stmts[0].kind else { panic!("function") };
            let StmtKind::VarDecl(decl) = &f.body[0].kind else { panic!("decl") };
            assert!(matches!(decl.initializer.unwrap().kind, ExprKind::Lambda(_)));
        });
        use_arena(|arena| {
            let module = parse_module(arena, "main() { var r = spawn slow() }").unwrap();
            let StmtKind::Function(f) = &module.stmts[0].kind else { panic!("function") };
            let StmtKind::VarDecl(decl) = &f.body[0].kind else { panic!("decl") };
            assert!(matches!(decl.initializer.unwrap().kind, ExprKind::Spawn { .. }));
        });
    }

    #[test]
    fn interpolated_strings_split_parts() {
        use_arena(|arena| {
            let module = parse_module(arena, r#"main() { println("a {x} b") }"#).unwrap();
            let StmtKind::Function(f) = &module.stmts[0].kind else { panic!("function") };
            let StmtKind::Expression(e) = &f.body[0].kind else { panic!("expr") };
            let ExprKind::Call { args, .. } = &e.kind else { panic!("call") };
            let ExprKind::Interpolated { parts } = &args[0].kind else { panic!("interp") };
            assert_eq!(parts.len(), 3);
            assert!(matches!(parts[0].kind, ExprKind::Literal(Literal::Str("a "))));
            assert!(matches!(parts[1].kind, ExprKind::Variable("x")));
        });
    }

    #[test]
    fn imports_and_pragmas_parse() {
        assert!(first_stmt_kind(r#"import "lib/util.sn" as util"#, |k| {
            matches!(k, StmtKind::Import(i) if i.namespace == Some("util"))
        }));
        assert!(first_stmt_kind(r#"pragma link("m")"#, |k| {
            matches!(k, StmtKind::Pragma(PragmaKind::Link("m")))
        }));
    }

    #[test]
    fn match_and_if_expressions_parse() {
        use_arena(|arena| {
            let module = parse_module(
                arena,
                "classify(n: long): str = match n { 0 => \"zero\", _ => \"other\" }",
            )
            .unwrap();
            let StmtKind::Function(f) = &module.stmts[0].kind else { panic!("function") };
            let StmtKind::Return { value: Some(v) } = &f.body[0].kind else { panic!("return") };
            let ExprKind::Match { arms, .. } = &v.kind else { panic!("match") };
            assert_eq!(arms.len(), 2);
            assert!(arms[1].pattern.is_none());
        });
        use_arena(|arena| {
            let module =
                parse_module(arena, "pick(n: long): long = if n < 0 then 0 else n").unwrap();
            let StmtKind::Function(f) = &module.stmts[0].kind else { panic!("function") };
            let StmtKind::Return { value: Some(v) } = &f.body[0].kind else { panic!("return") };
            assert!(matches!(v.kind, ExprKind::Match { .. }));
        });
    }
}
