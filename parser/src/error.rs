//! Conversion from pest parse errors to located compiler errors.

use compiler::error::{Error, ErrorKind};
use compiler::location::Location;
use pest::error::{ErrorVariant, LineColLocation};

use crate::source::Rule;

pub fn convert(err: pest::error::Error<Rule>) -> Error {
    let (start, end) = match err.line_col {
        LineColLocation::Pos((l, c)) => ((l, c), (l, c + 1)),
        LineColLocation::Span(s, e) => (s, e),
    };
    let message = match &err.variant {
        ErrorVariant::ParsingError { positives, .. } => {
            let expected: Vec<_> = positives.iter().map(|r| format!("{r:?}")).collect();
            if expected.is_empty() {
                "unexpected input".to_owned()
            } else {
                format!("expected one of: {}", expected.join(", "))
            }
        }
        ErrorVariant::CustomError { message } => message.clone(),
    };
    Error::new(ErrorKind::Syntax(message), Location::new(start, end))
}
