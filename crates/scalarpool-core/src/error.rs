use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration and catalog failures. These are precondition errors: they
/// surface from constructors, never from a pending evaluation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(String),
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Catalog(e.to_string())
    }
}

/// Failure delivered to an individual evaluation request.
///
/// Cloned once per affected request, so every caller whose expression was in
/// a failing statement sees the same cause.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("statement returned no rows (expected {expected})")]
    EmptyResult { expected: usize },

    #[error("unexpected result shape: {0}")]
    Shape(String),

    #[error("result decode failed: {0}")]
    Decode(String),

    #[error("evaluator closed before the request completed")]
    Closed,
}
