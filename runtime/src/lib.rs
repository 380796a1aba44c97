//! The Senna runtime.
//!
//! Compiled Senna programs are C translation units; every heap-shaped value
//! they manipulate lives behind a fat handle owned by an arena. This crate
//! provides those arenas together with the array, string, dynamic-value and
//! thread services the generated code calls into, exposed as a C ABI through
//! the [`ffi`] module. It is built both as a `staticlib` (linked into the
//! final executable) and as an `rlib` (so the invariants can be tested from
//! Rust).

#![deny(
    clippy::complexity,
    clippy::correctness,
    clippy::perf,
    clippy::style,
    clippy::suspicious
)]
#![allow(
    clippy::missing_safety_doc,
    clippy::module_name_repetitions,
    clippy::new_without_default,
    clippy::too_many_arguments
)]
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::wildcard_imports,
    )
)]

pub mod any;
pub mod arena;
pub mod array;
pub mod ffi;
pub mod string;
pub mod thread;

/// Prints a one-line diagnostic and terminates the process.
///
/// The runtime never recovers from a failure: misuse (dead handles, double
/// sync, tag mismatches) and resource exhaustion all funnel through here.
pub(crate) fn fatal(msg: &str) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}
