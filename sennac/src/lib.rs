//! Sennac, the Senna compiler driver.
//!
//! `sennac` denotes the toplevel executable: it loads the entry module and
//! its imports, runs the pipeline (check, optimize, generate C), and either
//! writes the translation unit or hands it to the host C compiler together
//! with the runtime static library.

#![deny(
    clippy::complexity,
    clippy::correctness,
    clippy::perf,
    clippy::style,
    clippy::suspicious
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::wildcard_imports,
    )
)]

pub mod driver;

use std::cmp::max;

use colored::Colorize;
use compiler::error::Error;
use compiler::location::Location;

/// Displays a compilation failure with its caret hint.
pub fn display_error(err: &Error, path: &str, color: bool) {
    let mark = if color { "\u{2717}".red().to_string() } else { "\u{2717}".to_owned() };
    eprintln!(
        "{mark} {path}:{}:{}: {err}",
        err.location.start.line, err.location.start.column
    );
    if err.location.start.line > 0 {
        eprintln!("  {}", pretty_print_loc(err.location));
    }
}

/// Pretty print a location as carets under the offending columns.
fn pretty_print_loc(loc: Location) -> String {
    if loc.start.line == loc.end.line {
        if loc.start.column + 1 >= loc.end.column {
            format!("{:0w$}^", "", w = loc.start.column.saturating_sub(1))
        } else {
            format!(
                "{:0w1$}^{:-<w2$}^",
                "",
                "",
                w1 = loc.start.column.saturating_sub(1),
                w2 = loc.end.column - loc.start.column - 2
            )
        }
    } else {
        format!(" {:-<w$}^", "", w = max(loc.start.column, loc.end.column).saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_pretty_print_loc() {
        assert_eq!(pretty_print_loc(Location::new((1, 3), (1, 3))), "  ^".to_owned());
        assert_eq!(pretty_print_loc(Location::new((1, 3), (1, 4))), "  ^".to_owned());
        assert_eq!(pretty_print_loc(Location::new((1, 3), (1, 5))), "  ^^".to_owned());
        assert_eq!(pretty_print_loc(Location::new((1, 3), (1, 6))), "  ^-^".to_owned());
        assert_eq!(pretty_print_loc(Location::new((1, 3), (1, 7))), "  ^--^".to_owned());
    }

    /// Robustness against multilines
    #[test]
    fn robust_pretty_print_loc() {
        pretty_print_loc(Location::new((2, 3), (2, 3)));
        pretty_print_loc(Location::new((1, 3), (2, 3)));
        pretty_print_loc(Location::new((1, 3), (2, 1)));
    }
}
