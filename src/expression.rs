//! Expression language: tokenizer, operand registry, parser, AST and
//! in-process evaluation.
//!
//! This module provides:
//! - Tokenizing expression text embedded in larger templates
//! - A keyword registry that maps operator and function names to operands
//! - A precedence-climbing parser producing an [`Expression`] tree
//! - Evaluation of expressions against a [`crate::resolve::Resolver`]
//! - A versioned binary wire form for parsed expressions

pub mod error;
pub mod eval;
pub mod expr;
pub mod operand;
pub mod parser;
pub mod token;
pub mod wire;

pub use error::{
    ExpressionError, ExpressionResult, ParseError, ParseResult, RegistryError,
};
pub use eval::{like_match, values_equal, ExpressionEvaluator};
pub use expr::{is_object_path, Expression, OBJECT_ROOT};
pub use operand::{BinaryOperator, FunctionKind, Operand, OperandRegistry, UnaryOperator};
pub use parser::{ExpressionParser, Parsed};
pub use token::{TokenKind, Tokenizer};
