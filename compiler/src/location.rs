//! Source positions attached to AST nodes and diagnostics.

use derive_more::Display;

/// A line/column pair, 1-based, as reported to the user.
#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq, Ord, PartialOrd)]
#[display(fmt = "{line}:{column}")]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// A half-open span in a source file.
#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq)]
#[display(fmt = "{start}")]
pub struct Location {
    pub start: Position,
    pub end: Position,
}

impl Location {
    /// Builds a location from two (line, column) pairs.
    #[inline]
    #[must_use]
    pub const fn new(start: (usize, usize), end: (usize, usize)) -> Self {
        Location {
            start: Position { line: start.0, column: start.1 },
            end: Position { line: end.0, column: end.1 },
        }
    }
}
