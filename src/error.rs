//! Error types for the compile, merge, post-process and query phases.
//!
//! Parse and evaluation errors live with the expression language in
//! [`crate::expression::error`]; backend errors live with the directory
//! binding. [`QueryError`] wraps all of them and names the failing phase.

use crate::directory::DirectoryError;
use crate::expression::{ExpressionError, ParseError};
use crate::value::ValueType;
use thiserror::Error;

/// What went wrong while compiling an expression for a backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Attribute {attribute} has type {actual}, expected {expected}")]
    IncompatibleType {
        attribute: String,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("Resolvable name '{0}' is reserved")]
    ReservedName(String),

    #[error("Unsupported construct: {0}")]
    Unsupported(String),

    #[error("Invalid literal: {0}")]
    InvalidLiteral(String),
}

/// Compile error carrying the backend and the expression being compiled
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Cannot compile '{expression}' for backend {backend}: {kind}")]
pub struct CompileError {
    pub backend: &'static str,
    pub expression: String,
    pub kind: CompileErrorKind,
}

impl CompileError {
    pub fn new(backend: &'static str, expression: impl Into<String>, kind: CompileErrorKind) -> Self {
        Self {
            backend,
            expression: expression.into(),
            kind,
        }
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;

/// Errors raised while merging a compiled filter for one request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("Filter has not been compiled")]
    NotCompiled,

    #[error("Failed to evaluate '{expression}': {source}")]
    Evaluation {
        expression: String,
        #[source]
        source: ExpressionError,
    },

    #[error("Failed to render deferred filter part: {0}")]
    Render(#[from] CompileError),
}

/// Result type for merging
pub type MergeResult<T> = Result<T, MergeError>;

/// Errors raised by post-processors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PostProcessError {
    #[error("Failed to evaluate post-processor data '{expression}': {source}")]
    Data {
        expression: String,
        #[source]
        source: ExpressionError,
    },

    #[error("Post-processor {processor} failed: {message}")]
    Failed { processor: String, message: String },
}

impl PostProcessError {
    pub fn failed(processor: impl Into<String>, message: impl Into<String>) -> Self {
        PostProcessError::Failed {
            processor: processor.into(),
            message: message.into(),
        }
    }
}

/// Result type for post-processing
pub type PostProcessResult<T> = Result<T, PostProcessError>;

/// Error from any phase of running a query
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Execution error: {0}")]
    Execute(#[from] DirectoryError),

    #[error("Post-processing error: {0}")]
    PostProcess(#[from] PostProcessError),
}

impl QueryError {
    /// Name of the phase that failed
    pub fn phase(&self) -> &'static str {
        match self {
            QueryError::Parse(_) => "parse",
            QueryError::Compile(_) => "compile",
            QueryError::Merge(_) => "merge",
            QueryError::Execute(_) => "execute",
            QueryError::PostProcess(_) => "post-process",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_carries_context() {
        let err = CompileError::new(
            "directory",
            "object.a + 1 > 2",
            CompileErrorKind::Unsupported("arithmetic over attributes".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "Cannot compile 'object.a + 1 > 2' for backend directory: Unsupported construct: arithmetic over attributes"
        );
    }

    #[test]
    fn test_query_error_phase() {
        let err: QueryError = ParseError::new("Unexpected end of expression", 3..3).into();
        assert_eq!(err.phase(), "parse");

        let err: QueryError = MergeError::NotCompiled.into();
        assert_eq!(err.phase(), "merge");

        let err: QueryError = PostProcessError::failed("limit", "bad threshold").into();
        assert_eq!(err.phase(), "post-process");
        assert_eq!(
            err.to_string(),
            "Post-processing error: Post-processor limit failed: bad threshold"
        );
    }
}
