//! Parser for Senna source text, built on pest.
//!
//! The grammar lives in `grammar.pest`; a `PrattParser` resolves operator
//! precedence. The builder in [`source`] lowers pest pairs into the AST of
//! the `compiler` crate, allocating every node in the compile-time arena.

#![deny(
    clippy::complexity,
    clippy::correctness,
    clippy::perf,
    clippy::style,
    clippy::suspicious
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::result_large_err,
    clippy::too_many_lines
)]
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::wildcard_imports,
    )
)]

#[macro_use]
extern crate pest_derive;

pub mod error;
pub mod source;

pub use source::{parse_expression, parse_module};
