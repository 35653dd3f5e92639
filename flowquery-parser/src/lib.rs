//! FlowQuery Parser
//!
//! AST node model (C4), the Shunting-Yard expression parser (C5, parse
//! half), and the operation parser (C7): turns a token stream from
//! `flowquery-lexer` into a `Vec<Operation>` executed in source order by
//! `flowquery-runtime`.

pub mod ast;
pub mod cursor;
pub mod error;
pub mod expr;
pub mod operations;

pub use ast::*;
pub use error::ParseError;

use flowquery_core::Span;
use flowquery_lexer::tokenize;

/// Tokenize and parse a complete FlowQuery source string into its operation
/// chain, executed top-to-bottom by the runtime.
pub fn parse(source: &str) -> Result<Vec<Operation>, ParseError> {
    let tokens = tokenize(source).map_err(ParseError::Lex)?;
    let mut cursor = cursor::Cursor::new(tokens);
    operations::parse_program(&mut cursor)
}

/// Placeholder span used for synthesised nodes (e.g. implicit aliases) that
/// do not correspond to a single source location.
pub(crate) fn synthetic_span() -> Span {
    Span::dummy()
}
