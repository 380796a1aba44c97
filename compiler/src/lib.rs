//! The Senna compiler.
//!
//! Parsed modules (see the `parser` crate) run through name and type
//! checking, AST-level optimization, and C code generation. All
//! compile-time data lives in a single bump arena scoped by
//! [`arena::use_arena`].

#![deny(
    clippy::complexity,
    clippy::correctness,
    clippy::perf,
    clippy::style,
    clippy::suspicious
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::too_many_lines
)]
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::wildcard_imports,
    )
)]

pub mod arena;
pub mod ast;
pub mod check;
pub mod codegen;
pub mod error;
pub mod location;
pub mod optimize;
pub mod resolve;
pub mod symbol;
pub mod types;

use arena::CompileArena;
use ast::Module;
use types::Primitives;

/// Runs the checked part of the pipeline: type checking, optimization, C
/// generation. Import resolution must have happened already.
pub fn compile<'arena>(
    arena: &CompileArena<'arena>,
    module: &Module<'arena>,
) -> error::Result<codegen::COutput> {
    let prims = Primitives::new(arena);
    let checker = check::Checker::new(arena, &prims);
    checker.check_module(module)?;
    let optimized = optimize::optimize_module(arena, module);
    codegen::generate(arena, &prims, &optimized)
}
