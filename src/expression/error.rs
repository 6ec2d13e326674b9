//! Error types for parsing and evaluating expressions.

use crate::value::ValueType;
use std::ops::Range;
use thiserror::Error;

/// Malformed expression text
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} at {}..{}", span.start, span.end)]
pub struct ParseError {
    pub message: String,
    /// Byte range of the offending input
    pub span: Range<usize>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Range<usize>) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Result type for parsing
pub type ParseResult<T> = Result<T, ParseError>;

/// Conflicts detected while building an operand registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Keyword '{keyword}' is already registered as a {existing} operand, cannot register it as a {requested} operand")]
    KeywordConflict {
        keyword: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("Invalid operand keyword: '{0}'")]
    InvalidKeyword(String),
}

/// Errors that can occur during expression evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Invalid operand types for operator {operator}: left={left_type}, right={right_type:?}")]
    InvalidOperandTypes {
        operator: String,
        left_type: ValueType,
        right_type: Option<ValueType>,
    },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Function {function} expects {expected} arguments, got {actual}")]
    FunctionArgumentCount {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("Cannot convert {actual} to {expected}")]
    Conversion {
        expected: ValueType,
        actual: ValueType,
    },

    #[error("Expression evaluation error: {message}")]
    EvaluationError { message: String },
}

/// Result type for expression evaluation
pub type ExpressionResult<T> = Result<T, ExpressionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParseError::new("Unterminated string literal", 4..9);
        assert_eq!(err.to_string(), "Unterminated string literal at 4..9");

        let err = RegistryError::KeywordConflict {
            keyword: "not".to_string(),
            existing: "left-unary",
            requested: "binary",
        };
        assert_eq!(
            err.to_string(),
            "Keyword 'not' is already registered as a left-unary operand, cannot register it as a binary operand"
        );

        let err = ExpressionError::InvalidOperandTypes {
            operator: "-".to_string(),
            left_type: ValueType::String,
            right_type: Some(ValueType::Number),
        };
        assert_eq!(
            err.to_string(),
            "Invalid operand types for operator -: left=STRING, right=Some(Number)"
        );

        assert_eq!(ExpressionError::DivisionByZero.to_string(), "Division by zero");

        let err = ExpressionError::FunctionArgumentCount {
            function: "lower".to_string(),
            expected: "1".to_string(),
            actual: 2,
        };
        assert_eq!(err.to_string(), "Function lower expects 1 arguments, got 2");
    }
}
