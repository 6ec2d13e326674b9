//! Expression AST definitions.

use crate::expression::operand::{BinaryOperator, FunctionKind, UnaryOperator};
use crate::value::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Root segment that refers to the row being filtered
pub const OBJECT_ROOT: &str = "object";

/// Expression tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Literal constant value
    Literal { value: Value, value_type: ValueType },

    /// Dotted path such as `object.name` or `user.id`
    Variable { path: String, expected: ValueType },

    /// Function call
    Function {
        function: FunctionKind,
        operands: Vec<Expression>,
        expected: ValueType,
    },

    /// Unary operation
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },

    /// Binary operation
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    /// Create a literal expression
    pub fn literal(value: impl Into<Value>) -> Self {
        let value = value.into();
        let value_type = value.value_type();
        Expression::Literal { value, value_type }
    }

    /// Create a NULL literal
    pub fn null() -> Self {
        Self::literal(Value::Null)
    }

    /// Create a variable expression
    pub fn variable(path: impl Into<String>) -> Self {
        Expression::Variable {
            path: path.into(),
            expected: ValueType::Any,
        }
    }

    /// Create a function call expression
    pub fn function(function: FunctionKind, operands: Vec<Expression>) -> Self {
        Expression::Function {
            function,
            operands,
            expected: ValueType::Any,
        }
    }

    /// Create a binary operation expression
    pub fn binary_op(op: BinaryOperator, left: Expression, right: Expression) -> Self {
        Expression::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Create a unary operation expression
    pub fn unary_op(op: UnaryOperator, operand: Expression) -> Self {
        Expression::UnaryOp {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Self::binary_op(BinaryOperator::And, left, right)
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Self::binary_op(BinaryOperator::Or, left, right)
    }

    pub fn not_expr(operand: Expression) -> Self {
        Self::unary_op(UnaryOperator::Not, operand)
    }

    pub fn eq(left: Expression, right: Expression) -> Self {
        Self::binary_op(BinaryOperator::Eq, left, right)
    }

    pub fn gt(left: Expression, right: Expression) -> Self {
        Self::binary_op(BinaryOperator::Gt, left, right)
    }

    pub fn lt(left: Expression, right: Expression) -> Self {
        Self::binary_op(BinaryOperator::Lt, left, right)
    }

    /// Record the type the surrounding context expects from this node.
    /// Only leaves and function calls carry an expectation.
    pub fn with_expected(self, expected: ValueType) -> Self {
        match self {
            Expression::Variable { path, .. } => Expression::Variable { path, expected },
            Expression::Function {
                function, operands, ..
            } => Expression::Function {
                function,
                operands,
                expected,
            },
            other => other,
        }
    }

    /// Type this node evaluates to, as far as it is known without data
    pub fn output_type(&self) -> ValueType {
        match self {
            Expression::Literal { value_type, .. } => *value_type,
            Expression::Variable { expected, .. } => *expected,
            Expression::Function { function, .. } => function.output_type(),
            Expression::UnaryOp { op, .. } => op.output_type(),
            Expression::BinaryOp { op, .. } => op.output_type(),
        }
    }

    /// Check if this expression can be evaluated without any data
    pub fn is_constant(&self) -> bool {
        match self {
            Expression::Literal { .. } => true,
            Expression::Variable { .. } => false,
            Expression::Function {
                function, operands, ..
            } => !function.is_volatile() && operands.iter().all(Expression::is_constant),
            Expression::UnaryOp { operand, .. } => operand.is_constant(),
            Expression::BinaryOp { left, right, .. } => left.is_constant() && right.is_constant(),
        }
    }

    /// Check if this expression refers to the row being filtered
    pub fn references_object(&self) -> bool {
        match self {
            Expression::Literal { .. } => false,
            Expression::Variable { path, .. } => is_object_path(path),
            Expression::Function { operands, .. } => {
                operands.iter().any(Expression::references_object)
            }
            Expression::UnaryOp { operand, .. } => operand.references_object(),
            Expression::BinaryOp { left, right, .. } => {
                left.references_object() || right.references_object()
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expression::BinaryOp { op, .. } => op.precedence(),
            // `not` binds looser than comparisons
            Expression::UnaryOp {
                op: UnaryOperator::Not,
                ..
            } => 2,
            Expression::UnaryOp { .. } => 6,
            _ => u8::MAX,
        }
    }
}

/// Check if a path addresses the row being filtered
pub fn is_object_path(path: &str) -> bool {
    path == OBJECT_ROOT
        || path
            .strip_prefix(OBJECT_ROOT)
            .is_some_and(|rest| rest.starts_with('.'))
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expression, min_precedence: u8) -> fmt::Result {
    if expr.precedence() < min_precedence {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

fn write_literal(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Null => f.write_str("null"),
        Value::String(s) => {
            f.write_str("'")?;
            for ch in s.chars() {
                match ch {
                    '\'' | '\\' => write!(f, "\\{}", ch)?,
                    '\n' => f.write_str("\\n")?,
                    '\t' => f.write_str("\\t")?,
                    '\r' => f.write_str("\\r")?,
                    other => write!(f, "{}", other)?,
                }
            }
            f.write_str("'")
        }
        Value::Collection(items) => {
            f.write_str("[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_literal(f, item)?;
            }
            f.write_str("]")
        }
        other => f.write_str(&other.to_text()),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal { value, .. } => write_literal(f, value),
            Expression::Variable { path, .. } => f.write_str(path),
            Expression::Function {
                function, operands, ..
            } => {
                write!(f, "{}(", function.name())?;
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", operand)?;
                }
                f.write_str(")")
            }
            Expression::UnaryOp { op, operand } => match op {
                UnaryOperator::Not => {
                    f.write_str("not ")?;
                    write_operand(f, operand, BinaryOperator::Eq.precedence())
                }
                UnaryOperator::Negate => {
                    f.write_str("-")?;
                    write_operand(f, operand, self.precedence())
                }
                UnaryOperator::IsNull | UnaryOperator::NotNull => {
                    write_operand(f, operand, self.precedence())?;
                    write!(f, " {}", op.as_str())
                }
            },
            Expression::BinaryOp { op, left, right } => {
                let precedence = op.precedence();
                write_operand(f, left, precedence)?;
                write!(f, " {} ", op.as_str())?;
                // Left associativity: an equal-precedence right child needs parentheses
                write_operand(f, right, precedence + 1)
            }
        }
    }
}
