//! Compilation errors.
//!
//! Every error carries a [`Location`] so the toplevel can print a
//! file:line:column diagnostic with a caret hint. The compiler recovers
//! locally only in the parser and the checker; the code generator treats
//! every internal check as fatal.

use derive_more::Display;

use crate::location::Location;

/// The kinds of failure a compilation can surface.
#[non_exhaustive]
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum ErrorKind {
    /// Unknown identifier.
    #[display(fmt = "unknown identifier {_0}")]
    UnknownIdentifier(String),

    /// Unknown type name.
    #[display(fmt = "unknown type {_0}")]
    UnknownType(String),

    /// These two types mismatch.
    #[display(fmt = "expected {_0}, got {_1}")]
    TypeMismatch(String, String),

    /// A non-function value was called.
    #[display(fmt = "{_0} is not a function")]
    NotAFunction(String),

    /// Wrong number of call arguments.
    #[display(fmt = "{_0} expects {_1} arguments, received {_2}")]
    WrongArity(String, usize, usize),

    /// Bad qualifier combination.
    #[display(fmt = "invalid qualifier: {_0}")]
    InvalidQualifier(String),

    /// A spawn result was read before its sync.
    #[display(fmt = "{_0} is pending; sync it before use")]
    PendingUse(String),

    /// A handle was synced twice.
    #[display(fmt = "{_0} has already been synchronized")]
    DoubleSync(String),

    /// Sync on something that was never spawned.
    #[display(fmt = "{_0} is not a pending thread handle")]
    NotPending(String),

    /// A variable frozen by a pending spawn was mutated.
    #[display(fmt = "{_0} is frozen by a pending spawn")]
    FrozenMutation(String),

    /// break/continue outside a loop.
    #[display(fmt = "{_0} outside of a loop")]
    OutsideLoop(String),

    /// A heap-shaped value escapes a private block.
    #[display(fmt = "{_0} cannot escape its private block")]
    PrivateEscape(String),

    /// Unknown struct field.
    #[display(fmt = "{_0} has no field {_1}")]
    UnknownField(String, String),

    /// Import failure (unreadable file, cycle).
    #[display(fmt = "cannot import {_0}: {_1}")]
    Import(String, String),

    /// Syntax error, reported by the parser.
    #[display(fmt = "{_0}")]
    Syntax(String),

    /// An internal invariant did not hold; this is a compiler bug.
    #[display(fmt = "internal error: {_0}")]
    Internal(String),
}

/// A located compilation error.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
#[display(fmt = "{kind}")]
pub struct Error {
    pub kind: ErrorKind,
    pub location: Location,
}

impl Error {
    #[inline]
    #[must_use]
    pub const fn new(kind: ErrorKind, location: Location) -> Self {
        Error { kind, location }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
