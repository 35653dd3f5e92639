use thiserror::Error;

/// Errors raised while parsing a JSON text into a [`crate::Value`], used by
/// the `tojson` builtin and by the built-in JSON `LOAD` path.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum JsonError {
    #[error("unexpected end of JSON input")]
    UnexpectedEof,
    #[error("unexpected character '{0}' at byte {1}")]
    UnexpectedChar(char, usize),
    #[error("invalid number literal at byte {0}")]
    InvalidNumber(usize),
    #[error("invalid escape sequence at byte {0}")]
    InvalidEscape(usize),
    #[error("trailing characters after JSON value at byte {0}")]
    TrailingCharacters(usize),
}
