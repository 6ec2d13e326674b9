//! Tabular (SQL) filter dialect.
//!
//! Renders `WHERE`-clause fragments with `?` bind parameters. Only the
//! rendering side exists here; executing the statement is left to whatever
//! relational client the host uses.

use crate::error::CompileErrorKind;
use crate::expression::{BinaryOperator, FunctionKind};
use crate::filter::dialect::{coerce_literal, FilterDialect, Term};
use crate::filter::part::FilterPart;
use crate::filter::schema::{AttributeDefinition, AttributeSchema};
use crate::value::{Value, ValueType};

/// SQL dialect over a column schema
#[derive(Debug, Clone, Default)]
pub struct TabularDialect {
    schema: AttributeSchema,
}

impl TabularDialect {
    pub fn new(schema: AttributeSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    fn term_part(&self, term: &Term, expected: ValueType) -> Result<FilterPart, CompileErrorKind> {
        match term {
            Term::Attribute(attr) => Ok(self.attribute_part(attr)),
            Term::Computed(part, _) => Ok(part.clone()),
            Term::Value(value) => self.literal_part(value, expected),
        }
    }

    fn membership(
        &self,
        op: BinaryOperator,
        left: &Term,
        right: &Term,
    ) -> Result<FilterPart, CompileErrorKind> {
        let Term::Value(candidates) = right else {
            return Err(CompileErrorKind::Unsupported(format!(
                "'{}' against a column",
                op.as_str()
            )));
        };
        let target = left.value_type();
        if target == ValueType::Collection {
            return Err(CompileErrorKind::Unsupported(
                "collection-valued columns".to_string(),
            ));
        }

        let negated = op == BinaryOperator::ContainsNone;
        let elements = candidates.elements();
        if elements.is_empty() {
            return Ok(self.truth(negated));
        }
        let params = elements
            .iter()
            .map(|element| coerce_literal(element, target))
            .collect::<Result<Vec<_>, _>>()?;
        let placeholders = vec!["?"; params.len()].join(", ");

        let column = self.term_part(left, target)?;
        let keyword = if negated { " NOT IN (" } else { " IN (" };
        let predicate = FilterPart::new()
            .part(column.clone())
            .text(keyword)
            .part(FilterPart::with_params(placeholders, params))
            .text(")");
        if negated && is_nullable(left) {
            return Ok(FilterPart::from_text("(")
                .part(predicate)
                .text(" OR ")
                .part(column)
                .text(" IS NULL)"));
        }
        Ok(predicate)
    }
}

fn is_nullable(term: &Term) -> bool {
    matches!(term, Term::Attribute(attr) if attr.nullable)
}

fn comparison_operator(op: BinaryOperator) -> Option<&'static str> {
    match op {
        BinaryOperator::Eq => Some(" = "),
        BinaryOperator::Ne => Some(" != "),
        BinaryOperator::Lt => Some(" < "),
        BinaryOperator::Le => Some(" <= "),
        BinaryOperator::Gt => Some(" > "),
        BinaryOperator::Ge => Some(" >= "),
        BinaryOperator::Like => Some(" LIKE "),
        _ => None,
    }
}

impl FilterDialect for TabularDialect {
    fn name(&self) -> &'static str {
        "tabular"
    }

    fn attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        self.schema.get(name)
    }

    fn attribute_part(&self, attribute: &AttributeDefinition) -> FilterPart {
        FilterPart::from_text(&attribute.backend_name)
    }

    fn literal_part(&self, value: &Value, expected: ValueType) -> Result<FilterPart, CompileErrorKind> {
        let value = coerce_literal(value, expected)?;
        if let Value::Object(_) = value {
            return Err(CompileErrorKind::InvalidLiteral(
                "objects cannot be bound as parameters".to_string(),
            ));
        }
        Ok(FilterPart::with_params("?", vec![value]))
    }

    fn comparison(
        &self,
        op: BinaryOperator,
        left: &Term,
        right: &Term,
    ) -> Result<FilterPart, CompileErrorKind> {
        if matches!(op, BinaryOperator::ContainsOneOf | BinaryOperator::ContainsNone) {
            return self.membership(op, left, right);
        }

        if let Term::Value(Value::Null) = right {
            return match op {
                BinaryOperator::Eq => self.null_check(left, true),
                BinaryOperator::Ne => self.null_check(left, false),
                _ => Ok(self.truth(false)),
            };
        }

        // Boolean expressions are predicates already
        if let (Term::Computed(part, ValueType::Boolean), Term::Value(Value::Boolean(b))) = (left, right)
        {
            let matches_true = *b == (op == BinaryOperator::Eq);
            if matches!(op, BinaryOperator::Eq | BinaryOperator::Ne) {
                return Ok(if matches_true {
                    part.clone()
                } else {
                    self.negation(part.clone())
                });
            }
        }

        let sql_op = comparison_operator(op).ok_or_else(|| {
            CompileErrorKind::Unsupported(format!("'{}' as a comparison", op.as_str()))
        })?;
        let target = match (op, left.value_type()) {
            (BinaryOperator::Like, _) => ValueType::String,
            (_, ValueType::Any) => right.value_type(),
            (_, value_type) => value_type,
        };

        let left_part = self.term_part(left, target)?;
        let predicate = FilterPart::new()
            .part(left_part.clone())
            .text(sql_op)
            .part(self.term_part(right, target)?);

        // `!=` must also match rows where the column is NULL
        if op == BinaryOperator::Ne && is_nullable(left) {
            return Ok(FilterPart::from_text("(")
                .part(predicate)
                .text(" OR ")
                .part(left_part)
                .text(" IS NULL)"));
        }
        Ok(predicate)
    }

    fn null_check(&self, term: &Term, is_null: bool) -> Result<FilterPart, CompileErrorKind> {
        if let Term::Value(value) = term {
            return Ok(self.truth(value.is_null() == is_null));
        }
        let part = self.term_part(term, ValueType::Any)?;
        Ok(part.text(if is_null { " IS NULL" } else { " IS NOT NULL" }))
    }

    fn junction(&self, op: BinaryOperator, parts: Vec<FilterPart>) -> FilterPart {
        let separator = if op == BinaryOperator::Or { " OR " } else { " AND " };
        let mut junction = FilterPart::from_text("(");
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                junction.push_text(separator, Vec::new());
            }
            junction.push_part(part);
        }
        junction.text(")")
    }

    fn negation(&self, part: FilterPart) -> FilterPart {
        FilterPart::from_text("NOT (").part(part).text(")")
    }

    fn truth(&self, value: bool) -> FilterPart {
        FilterPart::from_text(if value { "1 = 1" } else { "1 = 0" })
    }

    fn arithmetic(
        &self,
        op: BinaryOperator,
        left: &Term,
        right: &Term,
    ) -> Result<FilterPart, CompileErrorKind> {
        let textual = op == BinaryOperator::Add
            && (left.value_type() == ValueType::String || right.value_type() == ValueType::String);
        let (sql_op, target) = match op {
            BinaryOperator::Add if textual => (" || ", ValueType::String),
            BinaryOperator::Add => (" + ", ValueType::Number),
            BinaryOperator::Sub => (" - ", ValueType::Number),
            BinaryOperator::Mul => (" * ", ValueType::Number),
            BinaryOperator::Div => (" / ", ValueType::Number),
            BinaryOperator::Mod => (" % ", ValueType::Number),
            other => {
                return Err(CompileErrorKind::Unsupported(format!(
                    "'{}' as arithmetic",
                    other.as_str()
                )))
            }
        };
        Ok(FilterPart::from_text("(")
            .part(self.term_part(left, target)?)
            .text(sql_op)
            .part(self.term_part(right, target)?)
            .text(")"))
    }

    fn function(&self, function: FunctionKind, args: &[Term]) -> Result<FilterPart, CompileErrorKind> {
        let argument_type = function.argument_type();
        let parts = args
            .iter()
            .map(|arg| self.term_part(arg, argument_type))
            .collect::<Result<Vec<_>, _>>()?;

        let call = |name: &str, part: &FilterPart| {
            FilterPart::from_text(format!("{}(", name)).part(part.clone()).text(")")
        };
        match (function, parts.as_slice()) {
            (FunctionKind::Lower, [arg]) => Ok(call("LOWER", arg)),
            (FunctionKind::Upper, [arg]) => Ok(call("UPPER", arg)),
            (FunctionKind::Size, [arg]) => Ok(call("LENGTH", arg)),
            (FunctionKind::IsEmpty, [arg]) => Ok(FilterPart::from_text("(")
                .part(arg.clone())
                .text(" IS NULL OR ")
                .part(arg.clone())
                .part(FilterPart::with_params(" = ?", vec![Value::string("")]))
                .text(")")),
            (FunctionKind::Concat, parts) if !parts.is_empty() => {
                let mut concat = FilterPart::from_text("(");
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        concat.push_text(" || ", Vec::new());
                    }
                    concat.push_part(part.clone());
                }
                Ok(concat.text(")"))
            }
            (function, _) => Err(CompileErrorKind::Unsupported(format!(
                "{}() over columns",
                function.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{DatasourceFilter, ExpressionQueryRequest};
    use crate::expression::ExpressionParser;
    use std::sync::Arc;

    fn filter(code: &str) -> anyhow::Result<DatasourceFilter> {
        let schema = AttributeSchema::new()
            .with(AttributeDefinition::new("age", ValueType::Number))
            .with(AttributeDefinition::new("name", ValueType::String).with_backend_name("last_name"))
            .with(AttributeDefinition::new("email", ValueType::String).nullable())
            .with(AttributeDefinition::new("created", ValueType::Date));
        let expr = ExpressionParser::default().parse_str(code)?;
        let mut filter = DatasourceFilter::new(Arc::new(TabularDialect::new(schema)));
        filter.compile(&expr)?;
        Ok(filter)
    }

    fn render(code: &str) -> anyhow::Result<(String, Vec<Value>)> {
        let merged = filter(code)?.merge(&ExpressionQueryRequest::new())?;
        Ok(merged.into_parts())
    }

    #[test]
    fn test_conjunction_with_parameters() -> anyhow::Result<()> {
        let (statement, params) = render("object.age > 30 and object.name = 'Smith'")?;
        assert_eq!(statement, "(age > ? AND last_name = ?)");
        assert_eq!(params, vec![Value::Integer(30), Value::string("Smith")]);
        Ok(())
    }

    #[test]
    fn test_null_safe_comparisons() -> anyhow::Result<()> {
        assert_eq!(render("object.email == null")?.0, "email IS NULL");
        assert_eq!(render("object.email notnull")?.0, "email IS NOT NULL");
        assert_eq!(
            render("object.email != 'a@b'")?,
            (
                "(email != ? OR email IS NULL)".to_string(),
                vec![Value::string("a@b")]
            )
        );
        // Non-nullable columns need no NULL branch
        assert_eq!(render("object.age != 3")?.0, "age != ?");
        Ok(())
    }

    #[test]
    fn test_membership() -> anyhow::Result<()> {
        let parser = ExpressionParser::default();
        let expr = parser.parse_str("object.age containsoneof user.ages")?;
        let mut filter = filter("true")?;
        filter.compile(&expr)?;

        let ages = crate::resolve::MapResolvable::new()
            .with("ages", vec![18, 21])
            .into_shared();
        let request = ExpressionQueryRequest::new().with_resolver(Arc::new(
            crate::resolve::PropertyResolver::new().with_root("user", ages),
        ));
        let (statement, params) = filter.merge(&request)?.into_parts();
        assert_eq!(statement, "age IN (?, ?)");
        assert_eq!(params, vec![Value::Integer(18), Value::Integer(21)]);

        assert_eq!(render("object.email containsnone 'x'")?.0, "(email NOT IN (?) OR email IS NULL)");
        // Empty candidate lists collapse to constants
        assert_eq!(render("object.age containsoneof user.none")?.0, "1 = 0");
        Ok(())
    }

    #[test]
    fn test_functions_and_arithmetic() -> anyhow::Result<()> {
        let (statement, params) = render("lower(object.name) like 'sm%' and object.age + 1 >= 18")?;
        assert_eq!(statement, "(LOWER(last_name) LIKE ? AND (age + ?) >= ?)");
        assert_eq!(
            params,
            vec![Value::string("sm%"), Value::Integer(1), Value::Integer(18)]
        );

        assert_eq!(
            render("concat(object.name, '-', object.email) == 'a-b'")?.0,
            "(last_name || ? || email) = ?"
        );
        assert_eq!(render("isempty(object.email)")?.0, "(email IS NULL OR email = ?)");
        assert_eq!(render("not isempty(object.email)")?.0, "NOT ((email IS NULL OR email = ?))");
        Ok(())
    }

    #[test]
    fn test_column_to_column_and_literal_coercion() -> anyhow::Result<()> {
        assert_eq!(render("object.age < object.created")?.0, "age < created");
        assert_eq!(
            render("object.age == '42'")?,
            ("age = ?".to_string(), vec![Value::Integer(42)])
        );
        assert_eq!(render("not (object.age > 1 or object.age < 0)")?.0, "NOT ((age > ? OR age < ?))");
        Ok(())
    }
}
