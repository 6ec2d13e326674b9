//! Backend rendering contract.
//!
//! The compiler decides *what* a node means (attribute, constant, deferred
//! value, computed expression or predicate); a [`FilterDialect`] decides how
//! each of those renders in the backend's native filter language.

use super::part::FilterPart;
use super::schema::AttributeDefinition;
use crate::error::CompileErrorKind;
use crate::expression::{BinaryOperator, FunctionKind};
use crate::value::{Value, ValueType};

/// Concrete operand handed to a dialect
#[derive(Debug, Clone)]
pub enum Term {
    Attribute(AttributeDefinition),
    /// Backend-side computation such as `age + ?`
    Computed(FilterPart, ValueType),
    Value(Value),
}

impl Term {
    pub fn value_type(&self) -> ValueType {
        match self {
            Term::Attribute(attr) => attr.value_type,
            Term::Computed(_, value_type) => *value_type,
            Term::Value(value) => value.value_type(),
        }
    }

    /// Whether the term lives on the backend side
    pub fn is_backend(&self) -> bool {
        !matches!(self, Term::Value(_))
    }
}

/// Renders compiled nodes into a backend's filter language
pub trait FilterDialect: Send + Sync {
    /// Backend name used in diagnostics
    fn name(&self) -> &'static str;

    /// Look up an attribute by the name used after `object.`
    fn attribute(&self, name: &str) -> Option<&AttributeDefinition>;

    /// Reference to an attribute
    fn attribute_part(&self, attribute: &AttributeDefinition) -> FilterPart;

    /// Literal formatted for a slot of type `expected`
    fn literal_part(&self, value: &Value, expected: ValueType) -> Result<FilterPart, CompileErrorKind>;

    /// Comparison whose left side is a backend term
    fn comparison(
        &self,
        op: BinaryOperator,
        left: &Term,
        right: &Term,
    ) -> Result<FilterPart, CompileErrorKind>;

    /// `isnull` / `notnull` check on a backend term
    fn null_check(&self, term: &Term, is_null: bool) -> Result<FilterPart, CompileErrorKind>;

    /// AND/OR over predicates, in order
    fn junction(&self, op: BinaryOperator, parts: Vec<FilterPart>) -> FilterPart;

    fn negation(&self, part: FilterPart) -> FilterPart;

    /// Predicate that is always true or always false
    fn truth(&self, value: bool) -> FilterPart;

    /// Arithmetic where at least one side is a backend term
    fn arithmetic(
        &self,
        op: BinaryOperator,
        left: &Term,
        right: &Term,
    ) -> Result<FilterPart, CompileErrorKind>;

    /// Function call where at least one argument is a backend term
    fn function(&self, function: FunctionKind, args: &[Term]) -> Result<FilterPart, CompileErrorKind>;
}

/// Coerce a literal to the type its slot expects
pub fn coerce_literal(value: &Value, expected: ValueType) -> Result<Value, CompileErrorKind> {
    value.coerce(expected).ok_or_else(|| {
        CompileErrorKind::InvalidLiteral(format!(
            "cannot use {} value '{}' as {}",
            value.value_type(),
            value.to_text(),
            expected
        ))
    })
}
