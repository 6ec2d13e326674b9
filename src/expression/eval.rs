//! Expression evaluation implementation.

use crate::expression::{
    BinaryOperator, Expression, ExpressionError, ExpressionResult, FunctionKind, UnaryOperator,
};
use crate::resolve::Resolver;
use crate::value::{Value, ValueType};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// Evaluator for expressions against a resolver
pub struct ExpressionEvaluator<'a> {
    resolver: &'a dyn Resolver,
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn new(resolver: &'a dyn Resolver) -> Self {
        Self { resolver }
    }

    /// Evaluate an expression and return the result
    pub fn evaluate(&self, expr: &Expression) -> ExpressionResult<Value> {
        match expr {
            Expression::Literal { value, .. } => Ok(value.clone()),

            // Unknown paths evaluate to NULL
            Expression::Variable { path, .. } => {
                Ok(self.resolver.resolve(path).unwrap_or(Value::Null))
            }

            Expression::Function {
                function, operands, ..
            } => {
                let args = operands
                    .iter()
                    .map(|operand| self.evaluate(operand))
                    .collect::<ExpressionResult<Vec<_>>>()?;
                evaluate_function(*function, args)
            }

            Expression::UnaryOp { op, operand } => {
                let value = self.evaluate(operand)?;
                evaluate_unary_op(*op, value)
            }

            Expression::BinaryOp { op, left, right } => match op {
                BinaryOperator::And | BinaryOperator::Or => self.evaluate_logical(*op, left, right),
                _ => {
                    let left_val = self.evaluate(left)?;
                    let right_val = self.evaluate(right)?;
                    evaluate_binary_op(*op, left_val, right_val)
                }
            },
        }
    }

    /// AND/OR with short circuit and three-valued NULL logic
    fn evaluate_logical(
        &self,
        op: BinaryOperator,
        left: &Expression,
        right: &Expression,
    ) -> ExpressionResult<Value> {
        let short_circuit = op == BinaryOperator::Or;
        let left_val = truth(op, self.evaluate(left)?)?;
        if left_val == Some(short_circuit) {
            return Ok(Value::Boolean(short_circuit));
        }
        let right_val = truth(op, self.evaluate(right)?)?;
        match (left_val, right_val) {
            (_, Some(b)) if b == short_circuit => Ok(Value::Boolean(short_circuit)),
            (Some(_), Some(_)) => Ok(Value::Boolean(!short_circuit)),
            _ => Ok(Value::Null),
        }
    }
}

fn truth(op: BinaryOperator, value: Value) -> ExpressionResult<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(b)),
        other => Err(ExpressionError::InvalidOperandTypes {
            operator: op.as_str().to_string(),
            left_type: other.value_type(),
            right_type: None,
        }),
    }
}

fn invalid_operands(op: &str, left: &Value, right: Option<&Value>) -> ExpressionError {
    ExpressionError::InvalidOperandTypes {
        operator: op.to_string(),
        left_type: left.value_type(),
        right_type: right.map(Value::value_type),
    }
}

/// Evaluate a function over already evaluated arguments
pub fn evaluate_function(function: FunctionKind, args: Vec<Value>) -> ExpressionResult<Value> {
    if !function.accepts(args.len()) {
        return Err(ExpressionError::FunctionArgumentCount {
            function: function.name().to_string(),
            expected: function.arity_description(),
            actual: args.len(),
        });
    }

    match function {
        FunctionKind::Concat => Ok(Value::String(
            args.iter().map(Value::to_text).collect::<String>(),
        )),
        FunctionKind::Lower | FunctionKind::Upper => match &args[0] {
            Value::Null => Ok(Value::Null),
            value => {
                let text = value.to_text();
                Ok(Value::String(if function == FunctionKind::Lower {
                    text.to_lowercase()
                } else {
                    text.to_uppercase()
                }))
            }
        },
        FunctionKind::IsEmpty => Ok(Value::Boolean(match &args[0] {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Collection(items) => items.is_empty(),
            Value::Bytes(bytes) => bytes.is_empty(),
            _ => false,
        })),
        FunctionKind::Size => Ok(Value::Integer(match &args[0] {
            Value::Null => 0,
            Value::String(s) => s.chars().count() as i64,
            Value::Collection(items) => items.len() as i64,
            Value::Bytes(bytes) => bytes.len() as i64,
            _ => 1,
        })),
        FunctionKind::Now => {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).map_err(|e| {
                ExpressionError::EvaluationError {
                    message: format!("System clock before epoch: {}", e),
                }
            })?;
            Ok(Value::Date(now.as_secs() as i64))
        }
    }
}

/// Evaluate a unary operation
pub fn evaluate_unary_op(op: UnaryOperator, operand: Value) -> ExpressionResult<Value> {
    match op {
        UnaryOperator::Not => match operand {
            Value::Null => Ok(Value::Null),
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            other => Err(invalid_operands(op.as_str(), &other, None)),
        },

        UnaryOperator::Negate => match operand {
            Value::Null => Ok(Value::Null),
            Value::Integer(i) => i
                .checked_neg()
                .map(Value::Integer)
                .ok_or_else(|| ExpressionError::EvaluationError {
                    message: "Integer overflow".to_string(),
                }),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => match other.coerce(ValueType::Number) {
                Some(number) if !number.is_null() => evaluate_unary_op(op, number),
                _ => Err(invalid_operands(op.as_str(), &other, None)),
            },
        },

        UnaryOperator::IsNull => Ok(Value::Boolean(operand.is_null())),

        UnaryOperator::NotNull => Ok(Value::Boolean(!operand.is_null())),
    }
}

/// Evaluate a non-logical binary operation
pub fn evaluate_binary_op(op: BinaryOperator, left: Value, right: Value) -> ExpressionResult<Value> {
    match op {
        BinaryOperator::And | BinaryOperator::Or => {
            let l = truth(op, left)?;
            let r = truth(op, right)?;
            Ok(match (op, l, r) {
                (BinaryOperator::And, Some(false), _) | (BinaryOperator::And, _, Some(false)) => {
                    Value::Boolean(false)
                }
                (BinaryOperator::Or, Some(true), _) | (BinaryOperator::Or, _, Some(true)) => {
                    Value::Boolean(true)
                }
                (_, Some(a), Some(_)) => Value::Boolean(a),
                _ => Value::Null,
            })
        }

        BinaryOperator::Eq => Ok(Value::Boolean(values_equal(&left, &right))),
        BinaryOperator::Ne => Ok(Value::Boolean(!values_equal(&left, &right))),

        BinaryOperator::Lt | BinaryOperator::Le | BinaryOperator::Gt | BinaryOperator::Ge => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            let ordering = compare_aligned(&left, &right)
                .ok_or_else(|| invalid_operands(op.as_str(), &left, Some(&right)))?;
            Ok(Value::Boolean(match op {
                BinaryOperator::Lt => ordering == Ordering::Less,
                BinaryOperator::Le => ordering != Ordering::Greater,
                BinaryOperator::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }

        BinaryOperator::Like => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Boolean(like_match(&left.to_text(), &right.to_text())))
        }

        BinaryOperator::ContainsOneOf | BinaryOperator::ContainsNone => {
            let candidates = right.elements();
            let found = left
                .elements()
                .iter()
                .any(|item| candidates.iter().any(|c| values_equal(item, c)));
            Ok(Value::Boolean(if op == BinaryOperator::ContainsOneOf {
                found
            } else {
                !found
            }))
        }

        BinaryOperator::Add
        | BinaryOperator::Sub
        | BinaryOperator::Mul
        | BinaryOperator::Div
        | BinaryOperator::Mod => evaluate_arithmetic(op, left, right),
    }
}

fn evaluate_arithmetic(op: BinaryOperator, left: Value, right: Value) -> ExpressionResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    if op == BinaryOperator::Add
        && (matches!(left, Value::String(_)) || matches!(right, Value::String(_)))
    {
        return Ok(Value::String(format!("{}{}", left.to_text(), right.to_text())));
    }

    let overflow = || ExpressionError::EvaluationError {
        message: "Integer overflow".to_string(),
    };

    match (&left, &right) {
        (Value::Date(d), Value::Integer(i)) if op == BinaryOperator::Add => {
            d.checked_add(*i).map(Value::Date).ok_or_else(overflow)
        }
        (Value::Date(d), Value::Integer(i)) if op == BinaryOperator::Sub => {
            d.checked_sub(*i).map(Value::Date).ok_or_else(overflow)
        }
        (Value::Integer(a), Value::Integer(b)) => {
            let (a, b) = (*a, *b);
            match op {
                BinaryOperator::Add => a.checked_add(b).map(Value::Integer).ok_or_else(overflow),
                BinaryOperator::Sub => a.checked_sub(b).map(Value::Integer).ok_or_else(overflow),
                BinaryOperator::Mul => a.checked_mul(b).map(Value::Integer).ok_or_else(overflow),
                BinaryOperator::Div if b == 0 => Err(ExpressionError::DivisionByZero),
                BinaryOperator::Div => match a.checked_rem(b) {
                    Some(0) => a.checked_div(b).map(Value::Integer).ok_or_else(overflow),
                    Some(_) => Ok(Value::Float(a as f64 / b as f64)),
                    None => Err(overflow()),
                },
                BinaryOperator::Mod if b == 0 => Err(ExpressionError::DivisionByZero),
                _ => a.checked_rem(b).map(Value::Integer).ok_or_else(overflow),
            }
        }
        _ => {
            let (Some(a), Some(b)) = (numeric(&left), numeric(&right)) else {
                return Err(invalid_operands(op.as_str(), &left, Some(&right)));
            };
            if matches!(op, BinaryOperator::Div | BinaryOperator::Mod) && b == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            Ok(Value::Float(match op {
                BinaryOperator::Add => a + b,
                BinaryOperator::Sub => a - b,
                BinaryOperator::Mul => a * b,
                BinaryOperator::Div => a / b,
                _ => a % b,
            }))
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    value
        .coerce(ValueType::Number)
        .and_then(|number| number.as_f64())
}

/// Equality where numeric and textual forms of the same number match
pub fn values_equal(left: &Value, right: &Value) -> bool {
    if left.loosely_equals(right) {
        return true;
    }
    compare_aligned(left, right) == Some(Ordering::Equal)
}

/// Compare two values, converting strings when the other side is numeric
fn compare_aligned(left: &Value, right: &Value) -> Option<Ordering> {
    if let Some(ordering) = left.compare(right) {
        return Some(ordering);
    }
    match (left, right) {
        (Value::String(_), other) | (other, Value::String(_)) => {
            let target = other.value_type();
            if !matches!(target, ValueType::Number | ValueType::Date | ValueType::Boolean) {
                return None;
            }
            let l = left.coerce(target)?;
            let r = right.coerce(target)?;
            l.compare(&r)
        }
        _ => None,
    }
}

/// SQL-style pattern match: `%` matches any run, `_` any single character
pub fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // Iterative matcher with backtracking to the last `%`
    let (mut t, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|ch| *ch == '%')
}

impl Expression {
    /// Evaluate this expression against a resolver
    pub fn evaluate(&self, resolver: &dyn Resolver) -> ExpressionResult<Value> {
        ExpressionEvaluator::new(resolver).evaluate(self)
    }

    /// Evaluate as a predicate; NULL counts as false
    pub fn matches(&self, resolver: &dyn Resolver) -> ExpressionResult<bool> {
        match self.evaluate(resolver)? {
            Value::Boolean(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(ExpressionError::Conversion {
                expected: ValueType::Boolean,
                actual: other.value_type(),
            }),
        }
    }
}
