use flowquery_core::Span;
use flowquery_parser::ParseError;
use thiserror::Error;

/// Execution-time failures (§7's second taxonomy): raised only after parsing
/// has succeeded, while the driver is running the operation chain.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("reference to undeclared binding '{name}' at line {line}, col {col}", line = span.line, col = span.col)]
    UndeclaredReference { name: String, span: Span },

    #[error("call to unknown function '{name}' at line {line}, col {col}", line = span.line, col = span.col)]
    UnknownFunction { name: String, span: Span },

    #[error("'{name}' expects {expected} argument(s), got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("type error in '{op}': {detail}")]
    TypeError { op: String, detail: String },

    #[error("sum() cannot mix numbers and strings in the same group")]
    MixedSumTypes,

    #[error("LOAD request to '{url}' failed: {detail}")]
    LoadFailed { url: String, detail: String },

    #[error("LOAD response body was not valid {format}: {detail}")]
    InvalidResponseBody { format: String, detail: String },

    #[error("async provider '{name}' failed: {detail}")]
    ProviderFailed { name: String, detail: String },

    #[error("CALL/LOAD yielded a scalar but no single alias was bound for it")]
    ScalarYieldMissingAlias,

    #[error(transparent)]
    Json(#[from] flowquery_core::JsonError),
}

/// Unifies parse-time and execution-time failures for the embedding API
/// (`Runner`). Lives here, not in `flowquery-core`, since core cannot depend
/// on the parser/runtime crates that define its variants.
#[derive(Debug, Error)]
pub enum FlowQueryError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("execution error: {0}")]
    Exec(#[from] ExecError),
}
