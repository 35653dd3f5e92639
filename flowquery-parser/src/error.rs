use flowquery_core::Span;
use flowquery_lexer::LexError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("unexpected token {found:?} at line {line}, col {col}", line = span.line, col = span.col)]
    UnexpectedToken { found: String, span: Span },

    #[error("expected whitespace or a comment between tokens at line {line}, col {col}", line = span.line, col = span.col)]
    ExpectedWhitespace { span: Span },

    #[error("unknown function '{name}' at line {line}, col {col}", line = span.line, col = span.col)]
    UnknownFunction { name: String, span: Span },

    #[error("function '{name}' expects {expected} argument(s), got {got} at line {line}, col {col}", line = span.line, col = span.col)]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
        span: Span,
    },

    #[error("aggregate functions must not nest (inside '{outer}') at line {line}, col {col}", line = span.line, col = span.col)]
    NestedAggregate { outer: String, span: Span },

    #[error("expression requires an explicit AS alias at line {line}, col {col}", line = span.line, col = span.col)]
    MissingAlias { span: Span },

    #[error("a query may contain only one RETURN clause (second at line {line}, col {col})", line = span.line, col = span.col)]
    DuplicateReturn { span: Span },

    #[error("a query must end in RETURN, RETURN … WHERE …, or a YIELD-less terminal CALL")]
    InvalidTerminalOperation { span: Span },

    #[error("UNWIND requires a sequence-producing expression at line {line}, col {col}", line = span.line, col = span.col)]
    UnwindNotSequence { span: Span },

    #[error("WHERE requires a boolean-producing expression, not a mapping or array literal, at line {line}, col {col}", line = span.line, col = span.col)]
    WhereNotBoolean { span: Span },

    #[error("CALL followed by further operations requires a YIELD clause at line {line}, col {col}", line = span.line, col = span.col)]
    CallRequiresYield { span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::Lex(_) => crate::synthetic_span(),
            ParseError::UnexpectedToken { span, .. }
            | ParseError::ExpectedWhitespace { span }
            | ParseError::UnknownFunction { span, .. }
            | ParseError::ArityMismatch { span, .. }
            | ParseError::NestedAggregate { span, .. }
            | ParseError::MissingAlias { span }
            | ParseError::DuplicateReturn { span }
            | ParseError::InvalidTerminalOperation { span }
            | ParseError::UnwindNotSequence { span }
            | ParseError::WhereNotBoolean { span }
            | ParseError::CallRequiresYield { span } => *span,
        }
    }
}
