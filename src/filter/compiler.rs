//! Expression to filter part compilation.
//!
//! Every node compiles to one of five shapes:
//! - a constant, folded at compile time,
//! - a dynamic value that only the request can supply (paths outside
//!   `object`, volatile functions), evaluated in-process at merge time,
//! - an attribute of the row,
//! - a computed backend expression over attributes,
//! - a predicate.
//!
//! Whenever a dynamic value has to be rendered by the backend, the part is
//! wrapped in a [`FilterPartGenerator`] that evaluates the value against the
//! request and renders it then. Such parts are rendered once at compile
//! time with NULL in place of the dynamic values so that constructs the
//! backend cannot express fail during compilation, not during merge.

use super::dialect::{FilterDialect, Term};
use super::part::{FilterPart, FilterPartGenerator};
use super::request::ExpressionQueryRequest;
use super::schema::AttributeDefinition;
use crate::error::{CompileError, CompileErrorKind, MergeError, MergeResult};
use crate::expression::{
    is_object_path, BinaryOperator, Expression, UnaryOperator, OBJECT_ROOT,
};
use crate::value::{Value, ValueType};
use std::sync::Arc;

type CompileStep<T> = Result<T, CompileErrorKind>;

/// Map an `object.*` path to the backend attribute it names
pub fn resolve_attribute<'d>(
    dialect: &'d dyn FilterDialect,
    path: &str,
    expected: ValueType,
) -> CompileStep<&'d AttributeDefinition> {
    let name = path
        .strip_prefix(OBJECT_ROOT)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| CompileErrorKind::UnknownAttribute(path.to_string()))?;
    let attribute = dialect
        .attribute(name)
        .ok_or_else(|| CompileErrorKind::UnknownAttribute(path.to_string()))?;

    if !expected.is_compatible_with(attribute.value_type) {
        return Err(CompileErrorKind::IncompatibleType {
            attribute: path.to_string(),
            expected,
            actual: attribute.value_type,
        });
    }
    Ok(attribute)
}

/// Truth value of a constant in filter position; NULL never matches
fn truth_of(value: &Value) -> CompileStep<bool> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(CompileErrorKind::Unsupported(format!(
            "{} value used as a predicate",
            other.value_type()
        ))),
    }
}

enum Compiled {
    Constant(Value),
    Dynamic(Arc<Expression>),
    Attribute(AttributeDefinition),
    Computed(FilterPart, ValueType),
    Predicate(FilterPart),
}

impl Compiled {
    /// Whether the node is known without touching the backend
    fn is_value(&self) -> bool {
        matches!(self, Compiled::Constant(_) | Compiled::Dynamic(_))
    }
}

#[derive(Clone)]
enum Slot {
    Ready(Term),
    Deferred(Arc<Expression>),
}

impl Slot {
    fn trial(&self) -> Term {
        match self {
            Slot::Ready(term) => term.clone(),
            Slot::Deferred(_) => Term::Value(Value::Null),
        }
    }
}

pub(crate) struct Compiler {
    dialect: Arc<dyn FilterDialect>,
    /// Source text, reported by errors raised at merge time
    provenance: String,
}

impl Compiler {
    pub(crate) fn new(dialect: Arc<dyn FilterDialect>, provenance: String) -> Self {
        Self {
            dialect,
            provenance,
        }
    }

    /// Compile an expression used as a filter condition
    pub(crate) fn compile_predicate(&self, expr: &Expression) -> CompileStep<FilterPart> {
        let compiled = self.compile(expr)?;
        self.into_predicate(compiled)
    }

    fn compile(&self, expr: &Expression) -> CompileStep<Compiled> {
        match expr {
            Expression::Literal { value, .. } => Ok(Compiled::Constant(value.clone())),

            Expression::Variable { path, expected } => {
                if is_object_path(path) {
                    let attribute = resolve_attribute(self.dialect.as_ref(), path, *expected)?;
                    Ok(Compiled::Attribute(attribute.clone()))
                } else {
                    Ok(Compiled::Dynamic(Arc::new(expr.clone())))
                }
            }

            Expression::Function {
                function, operands, ..
            } => {
                let args = operands
                    .iter()
                    .map(|operand| self.compile(operand))
                    .collect::<CompileStep<Vec<_>>>()?;
                if let Some(folded) = self.fold(expr, &args.iter().collect::<Vec<_>>())? {
                    return Ok(folded);
                }

                let slots = args
                    .into_iter()
                    .map(|arg| self.slot(arg))
                    .collect::<CompileStep<Vec<_>>>()?;
                let function = *function;
                let part = self.defer(slots, move |dialect, terms| dialect.function(function, terms))?;
                Ok(Compiled::Computed(part, function.output_type()))
            }

            Expression::UnaryOp { op, operand } => self.compile_unary(expr, *op, operand),

            Expression::BinaryOp { op, left, right } => match op {
                BinaryOperator::And | BinaryOperator::Or => self.compile_junction(expr, *op),
                op if op.is_comparison() => self.compile_comparison(expr, *op, left, right),
                _ => self.compile_arithmetic(expr, *op, left, right),
            },
        }
    }

    fn compile_unary(
        &self,
        expr: &Expression,
        op: UnaryOperator,
        operand: &Expression,
    ) -> CompileStep<Compiled> {
        let compiled = self.compile(operand)?;
        if let Some(folded) = self.fold(expr, &[&compiled])? {
            return Ok(folded);
        }

        match op {
            UnaryOperator::Not => {
                let predicate = self.into_predicate(compiled)?;
                Ok(Compiled::Predicate(self.dialect.negation(predicate)))
            }
            UnaryOperator::Negate => {
                let slots = vec![Slot::Ready(Term::Value(Value::Integer(0))), self.slot(compiled)?];
                let part = self.defer(slots, |dialect, terms| {
                    dialect.arithmetic(BinaryOperator::Sub, &terms[0], &terms[1])
                })?;
                Ok(Compiled::Computed(part, ValueType::Number))
            }
            UnaryOperator::IsNull | UnaryOperator::NotNull => {
                if matches!(compiled, Compiled::Predicate(_)) {
                    return Err(CompileErrorKind::Unsupported(format!(
                        "{} applied to a predicate",
                        op.as_str()
                    )));
                }
                let is_null = op == UnaryOperator::IsNull;
                let slots = vec![self.slot(compiled)?];
                let part = self.defer(slots, move |dialect, terms| {
                    dialect.null_check(&terms[0], is_null)
                })?;
                Ok(Compiled::Predicate(part))
            }
        }
    }

    fn compile_junction(&self, expr: &Expression, op: BinaryOperator) -> CompileStep<Compiled> {
        let mut operands = Vec::new();
        flatten(op, expr, &mut operands);
        let compiled = operands
            .into_iter()
            .map(|operand| self.compile(operand))
            .collect::<CompileStep<Vec<_>>>()?;
        if let Some(folded) = self.fold(expr, &compiled.iter().collect::<Vec<_>>())? {
            return Ok(folded);
        }

        // `false` absorbs a conjunction and `true` a disjunction
        let absorbing = op == BinaryOperator::Or;
        let mut parts = Vec::with_capacity(compiled.len());
        for node in compiled {
            match node {
                Compiled::Constant(value) => {
                    if truth_of(&value)? == absorbing {
                        return Ok(Compiled::Constant(Value::Boolean(absorbing)));
                    }
                }
                other => parts.push(self.into_predicate(other)?),
            }
        }

        if parts.len() == 1 {
            return Ok(Compiled::Predicate(parts.remove(0)));
        }
        Ok(Compiled::Predicate(self.dialect.junction(op, parts)))
    }

    fn compile_comparison(
        &self,
        expr: &Expression,
        op: BinaryOperator,
        left: &Expression,
        right: &Expression,
    ) -> CompileStep<Compiled> {
        let left = self.compile(left)?;
        let right = self.compile(right)?;
        if let Some(folded) = self.fold(expr, &[&left, &right])? {
            return Ok(folded);
        }

        // Keep the backend term on the left
        let (op, left, right) = if left.is_value() {
            let flipped = match op {
                BinaryOperator::ContainsOneOf | BinaryOperator::ContainsNone => Some(op),
                _ => op.flip(),
            }
            .ok_or_else(|| {
                CompileErrorKind::Unsupported(format!(
                    "'{}' with the attribute on the right-hand side",
                    op.as_str()
                ))
            })?;
            (flipped, right, left)
        } else {
            (op, left, right)
        };

        let slots = vec![self.slot(left)?, self.slot(right)?];
        let part = self.defer(slots, move |dialect, terms| {
            dialect.comparison(op, &terms[0], &terms[1])
        })?;
        Ok(Compiled::Predicate(part))
    }

    fn compile_arithmetic(
        &self,
        expr: &Expression,
        op: BinaryOperator,
        left: &Expression,
        right: &Expression,
    ) -> CompileStep<Compiled> {
        let left = self.compile(left)?;
        let right = self.compile(right)?;
        if let Some(folded) = self.fold(expr, &[&left, &right])? {
            return Ok(folded);
        }

        let slots = vec![self.slot(left)?, self.slot(right)?];
        let textual = op == BinaryOperator::Add
            && slots
                .iter()
                .any(|slot| matches!(slot, Slot::Ready(term) if term.value_type() == ValueType::String));
        let part = self.defer(slots, move |dialect, terms| {
            dialect.arithmetic(op, &terms[0], &terms[1])
        })?;
        let value_type = if textual {
            ValueType::String
        } else {
            ValueType::Number
        };
        Ok(Compiled::Computed(part, value_type))
    }

    /// Fold a node whose operands need no backend: constants are evaluated
    /// now, anything involving the request is evaluated at merge time
    fn fold(&self, expr: &Expression, args: &[&Compiled]) -> CompileStep<Option<Compiled>> {
        if !args.iter().all(|arg| arg.is_value()) {
            return Ok(None);
        }
        if expr.is_constant() && args.iter().all(|arg| matches!(arg, Compiled::Constant(_))) {
            let value = ExpressionQueryRequest::new()
                .evaluate(expr)
                .map_err(|e| CompileErrorKind::InvalidLiteral(format!("{}: {}", expr, e)))?;
            return Ok(Some(Compiled::Constant(value)));
        }
        Ok(Some(Compiled::Dynamic(Arc::new(expr.clone()))))
    }

    fn slot(&self, compiled: Compiled) -> CompileStep<Slot> {
        match compiled {
            Compiled::Constant(value) => Ok(Slot::Ready(Term::Value(value))),
            Compiled::Dynamic(expr) => Ok(Slot::Deferred(expr)),
            Compiled::Attribute(attribute) => Ok(Slot::Ready(Term::Attribute(attribute))),
            Compiled::Computed(part, value_type) => Ok(Slot::Ready(Term::Computed(part, value_type))),
            Compiled::Predicate(_) => Err(CompileErrorKind::Unsupported(
                "predicate used as a value".to_string(),
            )),
        }
    }

    fn into_predicate(&self, compiled: Compiled) -> CompileStep<FilterPart> {
        match compiled {
            Compiled::Predicate(part) => Ok(part),
            Compiled::Constant(value) => Ok(self.dialect.truth(truth_of(&value)?)),
            Compiled::Dynamic(expr) => self.defer(vec![Slot::Deferred(expr)], |dialect, terms| {
                match &terms[0] {
                    Term::Value(value) => Ok(dialect.truth(truth_of(value)?)),
                    _ => Err(CompileErrorKind::Unsupported(
                        "backend term used as a deferred predicate".to_string(),
                    )),
                }
            }),
            Compiled::Attribute(attribute) => {
                if !ValueType::Boolean.is_compatible_with(attribute.value_type) {
                    return Err(CompileErrorKind::IncompatibleType {
                        attribute: format!("{}.{}", OBJECT_ROOT, attribute.name),
                        expected: ValueType::Boolean,
                        actual: attribute.value_type,
                    });
                }
                // A bare boolean attribute means `attr = true`
                self.dialect.comparison(
                    BinaryOperator::Eq,
                    &Term::Attribute(attribute),
                    &Term::Value(Value::Boolean(true)),
                )
            }
            Compiled::Computed(part, value_type) => {
                if !ValueType::Boolean.is_compatible_with(value_type) {
                    return Err(CompileErrorKind::Unsupported(format!(
                        "{} expression used as a predicate",
                        value_type
                    )));
                }
                self.dialect.comparison(
                    BinaryOperator::Eq,
                    &Term::Computed(part, value_type),
                    &Term::Value(Value::Boolean(true)),
                )
            }
        }
    }

    /// Render now when every operand is known, otherwise defer to merge time
    fn defer<F>(&self, slots: Vec<Slot>, render: F) -> CompileStep<FilterPart>
    where
        F: Fn(&dyn FilterDialect, &[Term]) -> CompileStep<FilterPart> + Send + Sync + 'static,
    {
        let trial: Vec<Term> = slots.iter().map(Slot::trial).collect();
        let rendered = render(self.dialect.as_ref(), &trial)?;
        if slots.iter().all(|slot| matches!(slot, Slot::Ready(_))) {
            return Ok(rendered);
        }

        let dialect = Arc::clone(&self.dialect);
        let provenance = self.provenance.clone();
        Ok(FilterPart::deferred(FilterPartGenerator::new(
            move |request: &ExpressionQueryRequest| {
                let terms = slots
                    .iter()
                    .map(|slot| match slot {
                        Slot::Ready(term) => Ok(term.clone()),
                        Slot::Deferred(expr) => request.evaluate(expr).map(Term::Value).map_err(
                            |source| MergeError::Evaluation {
                                expression: expr.to_string(),
                                source,
                            },
                        ),
                    })
                    .collect::<MergeResult<Vec<_>>>()?;
                render(dialect.as_ref(), &terms).map_err(|kind| {
                    MergeError::Render(CompileError::new(dialect.name(), provenance.clone(), kind))
                })
            },
        )))
    }
}

/// Collect the operands of a chain of the same junction operator
fn flatten<'e>(op: BinaryOperator, expr: &'e Expression, out: &mut Vec<&'e Expression>) {
    match expr {
        Expression::BinaryOp {
            op: inner,
            left,
            right,
        } if *inner == op => {
            flatten(op, left, out);
            flatten(op, right, out);
        }
        other => out.push(other),
    }
}
