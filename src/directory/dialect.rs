//! Directory (RFC 4515) filter dialect.
//!
//! Values are rendered as `?` placeholders and substituted by
//! [`bind_filter`] just before the search is sent, the same way a
//! parameterised search API takes a filter plus arguments. Text written
//! inline (substring patterns) is escaped immediately, including `?`, so
//! the only bare `?` characters left in a statement are placeholders.

use super::connection::{DirectoryError, DirectoryResult};
use crate::error::CompileErrorKind;
use crate::expression::{BinaryOperator, FunctionKind};
use crate::filter::dialect::{coerce_literal, FilterDialect, Term};
use crate::filter::part::FilterPart;
use crate::filter::schema::{AttributeDefinition, AttributeSchema};
use crate::value::{Value, ValueType};
use std::fmt::Write;

const PRESENT_ANY: &str = "(objectClass=*)";

/// RFC 4515 dialect over a directory attribute schema
#[derive(Debug, Clone, Default)]
pub struct DirectoryDialect {
    schema: AttributeSchema,
}

impl DirectoryDialect {
    pub fn new(schema: AttributeSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    fn attribute_of<'t>(&self, term: &'t Term) -> Result<&'t AttributeDefinition, CompileErrorKind> {
        match term {
            Term::Attribute(attr) => Ok(attr),
            Term::Computed(..) => Err(CompileErrorKind::Unsupported(
                "computed expressions in directory filters".to_string(),
            )),
            Term::Value(_) => Err(CompileErrorKind::Unsupported(
                "comparison without an attribute".to_string(),
            )),
        }
    }

    fn value_of<'t>(&self, term: &'t Term) -> Result<&'t Value, CompileErrorKind> {
        match term {
            Term::Value(value) => Ok(value),
            _ => Err(CompileErrorKind::Unsupported(
                "attribute-to-attribute comparison".to_string(),
            )),
        }
    }

    /// `(attr<op>?)` with the value coerced to the attribute's type
    fn item(
        &self,
        attr: &AttributeDefinition,
        op: &str,
        value: &Value,
        target: ValueType,
    ) -> Result<FilterPart, CompileErrorKind> {
        Ok(FilterPart::from_text(format!("({}{}", attr.backend_name, op))
            .part(self.literal_part(value, target)?)
            .text(")"))
    }

    fn presence(&self, attr: &AttributeDefinition) -> FilterPart {
        FilterPart::from_text(format!("({}=*)", attr.backend_name))
    }

    /// Negated predicate that also matches entries lacking the attribute
    fn negated(&self, attr: &AttributeDefinition, part: FilterPart) -> FilterPart {
        let negation = self.negation(part);
        if !attr.nullable {
            return negation;
        }
        let absent = self.negation(self.presence(attr));
        self.junction(BinaryOperator::Or, vec![negation, absent])
    }

    fn membership(
        &self,
        op: BinaryOperator,
        attr: &AttributeDefinition,
        candidates: &Value,
    ) -> Result<FilterPart, CompileErrorKind> {
        let negated = op == BinaryOperator::ContainsNone;
        let elements = candidates.elements();
        if elements.is_empty() {
            return Ok(self.truth(negated));
        }

        let mut items = elements
            .iter()
            .map(|element| self.item(attr, "=", element, attr.value_type))
            .collect::<Result<Vec<_>, _>>()?;
        let any = if items.len() == 1 {
            items.remove(0)
        } else {
            self.junction(BinaryOperator::Or, items)
        };
        Ok(if negated { self.negated(attr, any) } else { any })
    }

    fn substring(&self, attr: &AttributeDefinition, pattern: &Value) -> Result<FilterPart, CompileErrorKind> {
        let pattern = coerce_literal(pattern, ValueType::String)?;
        let Some(pattern) = pattern.as_str() else {
            return Ok(self.truth(false));
        };
        if pattern.contains('_') {
            return Err(CompileErrorKind::Unsupported(
                "single-character wildcard '_' in directory patterns".to_string(),
            ));
        }
        let assertion = pattern
            .split('%')
            .map(|chunk| escape_value(chunk.as_bytes()))
            .collect::<Vec<_>>()
            .join("*");
        Ok(FilterPart::from_text(format!("({}={})", attr.backend_name, assertion)))
    }
}

impl FilterDialect for DirectoryDialect {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        self.schema.get(name)
    }

    fn attribute_part(&self, attribute: &AttributeDefinition) -> FilterPart {
        FilterPart::from_text(&attribute.backend_name)
    }

    fn literal_part(&self, value: &Value, expected: ValueType) -> Result<FilterPart, CompileErrorKind> {
        let value = coerce_literal(value, expected)?;
        match value {
            Value::Object(_) | Value::Collection(_) => Err(CompileErrorKind::InvalidLiteral(format!(
                "{} values cannot appear in a directory assertion",
                value.value_type()
            ))),
            value => Ok(FilterPart::with_params("?", vec![value])),
        }
    }

    fn comparison(
        &self,
        op: BinaryOperator,
        left: &Term,
        right: &Term,
    ) -> Result<FilterPart, CompileErrorKind> {
        let attr = self.attribute_of(left)?;
        let value = self.value_of(right)?;

        match op {
            BinaryOperator::ContainsOneOf | BinaryOperator::ContainsNone => {
                return self.membership(op, attr, value)
            }
            _ if value.is_null() => {
                return match op {
                    BinaryOperator::Eq => self.null_check(left, true),
                    BinaryOperator::Ne => self.null_check(left, false),
                    _ => Ok(self.truth(false)),
                };
            }
            BinaryOperator::Like => return self.substring(attr, value),
            _ => {}
        }

        let target = match attr.value_type {
            ValueType::Any => value.value_type(),
            value_type => value_type,
        };
        // Directory filters only know >= and <=; strict forms negate the
        // opposite bound, which an absent attribute never satisfies
        match op {
            BinaryOperator::Eq => self.item(attr, "=", value, target),
            BinaryOperator::Ne => Ok(self.negated(attr, self.item(attr, "=", value, target)?)),
            BinaryOperator::Ge => self.item(attr, ">=", value, target),
            BinaryOperator::Le => self.item(attr, "<=", value, target),
            BinaryOperator::Gt => Ok(self.negation(self.item(attr, "<=", value, target)?)),
            BinaryOperator::Lt => Ok(self.negation(self.item(attr, ">=", value, target)?)),
            other => Err(CompileErrorKind::Unsupported(format!(
                "'{}' as a comparison",
                other.as_str()
            ))),
        }
    }

    fn null_check(&self, term: &Term, is_null: bool) -> Result<FilterPart, CompileErrorKind> {
        if let Term::Value(value) = term {
            return Ok(self.truth(value.is_null() == is_null));
        }
        let present = self.presence(self.attribute_of(term)?);
        Ok(if is_null { self.negation(present) } else { present })
    }

    fn junction(&self, op: BinaryOperator, parts: Vec<FilterPart>) -> FilterPart {
        let mut junction = FilterPart::from_text(if op == BinaryOperator::Or { "(|" } else { "(&" });
        for part in parts {
            junction.push_part(part);
        }
        junction.text(")")
    }

    fn negation(&self, part: FilterPart) -> FilterPart {
        FilterPart::from_text("(!").part(part).text(")")
    }

    fn truth(&self, value: bool) -> FilterPart {
        if value {
            FilterPart::from_text(PRESENT_ANY)
        } else {
            FilterPart::from_text(format!("(!{})", PRESENT_ANY))
        }
    }

    fn arithmetic(
        &self,
        op: BinaryOperator,
        _left: &Term,
        _right: &Term,
    ) -> Result<FilterPart, CompileErrorKind> {
        Err(CompileErrorKind::Unsupported(format!(
            "arithmetic '{}' over directory attributes",
            op.as_str()
        )))
    }

    fn function(&self, function: FunctionKind, _args: &[Term]) -> Result<FilterPart, CompileErrorKind> {
        Err(CompileErrorKind::Unsupported(format!(
            "{}() over directory attributes",
            function.name()
        )))
    }
}

/// Escape an assertion value per RFC 4515. `?` is escaped as well so it
/// can never be mistaken for a placeholder.
pub fn escape_value(bytes: &[u8]) -> String {
    let mut escaped = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'*' | b'(' | b')' | b'\\' | b'?' | 0 => {
                let _ = write!(escaped, "\\{:02x}", b);
            }
            b if b.is_ascii() => escaped.push(char::from(b)),
            // Multi-byte UTF-8 is legal in assertion values, but a lone
            // byte of it is not, so raw bytes are hex-escaped
            b => {
                let _ = write!(escaped, "\\{:02x}", b);
            }
        }
    }
    escaped
}

fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii() {
            escaped.push_str(&escape_value(&[c as u8]));
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Format a bound value as an assertion value
pub fn format_value(value: &Value) -> DirectoryResult<String> {
    match value {
        Value::String(s) => Ok(escape_text(s)),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(escape_text(&f.to_string())),
        Value::Boolean(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Value::Date(secs) => Ok(generalized_time(*secs)),
        Value::Bytes(bytes) => Ok(escape_value(bytes)),
        other => Err(DirectoryError::InvalidFilter {
            filter: String::new(),
            message: format!("cannot bind {} value", other.value_type()),
        }),
    }
}

/// Substitute bound values for the `?` placeholders of a merged statement
pub fn bind_filter(statement: &str, params: &[Value]) -> DirectoryResult<String> {
    let invalid = |message: String| DirectoryError::InvalidFilter {
        filter: statement.to_string(),
        message,
    };

    let mut bound = String::with_capacity(statement.len());
    let mut params = params.iter();
    for c in statement.chars() {
        if c != '?' {
            bound.push(c);
            continue;
        }
        let value = params
            .next()
            .ok_or_else(|| invalid("more placeholders than parameters".to_string()))?;
        let text = format_value(value).map_err(|e| match e {
            DirectoryError::InvalidFilter { message, .. } => invalid(message),
            other => other,
        })?;
        bound.push_str(&text);
    }
    if params.next().is_some() {
        return Err(invalid("more parameters than placeholders".to_string()));
    }
    Ok(bound)
}

/// Render seconds since the epoch as `YYYYMMDDHHMMSSZ`
pub fn generalized_time(secs: i64) -> String {
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}Z",
        year,
        month,
        day,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

/// Parse `YYYYMMDDHHMMSS[.fraction]Z` into seconds since the epoch
pub fn parse_generalized_time(text: &str) -> Option<i64> {
    let text = text.strip_suffix('Z')?;
    let digits = match text.split_once('.') {
        Some((digits, fraction)) if fraction.bytes().all(|b| b.is_ascii_digit()) => digits,
        Some(_) => return None,
        None => text,
    };
    if digits.len() != 14 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let field = |range: std::ops::Range<usize>| digits[range].parse::<i64>().ok();
    let (year, month, day) = (field(0..4)?, field(4..6)?, field(6..8)?);
    let (hour, minute, second) = (field(8..10)?, field(10..12)?, field(12..14)?);
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) || hour > 23 || minute > 59 || second > 60 {
        return None;
    }
    let days = days_from_civil(year, month, day);
    Some(days * 86_400 + hour * 3600 + minute * 60 + second)
}

fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let yoe = year.rem_euclid(400);
    let doy = (153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Proleptic Gregorian date for a day count relative to 1970-01-01
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ExpressionParser;
    use crate::filter::{DatasourceFilter, ExpressionQueryRequest};
    use std::sync::Arc;

    fn schema() -> AttributeSchema {
        AttributeSchema::new()
            .with(AttributeDefinition::new("age", ValueType::Number))
            .with(AttributeDefinition::new("name", ValueType::String).with_backend_name("sn"))
            .with(AttributeDefinition::new("mail", ValueType::String).nullable())
            .with(AttributeDefinition::new("active", ValueType::Boolean))
            .with(AttributeDefinition::new("created", ValueType::Date).with_backend_name("createTimestamp"))
    }

    fn compile(code: &str) -> anyhow::Result<DatasourceFilter> {
        let expr = ExpressionParser::default().parse_str(code)?;
        let mut filter = DatasourceFilter::new(Arc::new(DirectoryDialect::new(schema())));
        filter.compile(&expr)?;
        Ok(filter)
    }

    fn render(code: &str) -> anyhow::Result<String> {
        let (statement, params) = compile(code)?
            .merge(&ExpressionQueryRequest::new())?
            .into_parts();
        Ok(bind_filter(&statement, &params)?)
    }

    #[test]
    fn test_conjunction_uses_native_syntax() -> anyhow::Result<()> {
        let merged = compile("object.age > 30 and object.name = 'Smith'")?
            .merge(&ExpressionQueryRequest::new())?;
        assert_eq!(merged.statement(), "(&(!(age<=?))(sn=?))");
        assert_eq!(merged.params(), &[Value::Integer(30), Value::string("Smith")]);
        assert_eq!(
            bind_filter(merged.statement(), merged.params())?,
            "(&(!(age<=30))(sn=Smith))"
        );
        Ok(())
    }

    #[test]
    fn test_comparisons() -> anyhow::Result<()> {
        assert_eq!(render("object.age >= 18")?, "(age>=18)");
        assert_eq!(render("object.age < 18")?, "(!(age>=18))");
        assert_eq!(render("18 < object.age")?, "(!(age<=18))");
        assert_eq!(render("object.name != 'x'")?, "(!(sn=x))");
        assert_eq!(render("object.mail != 'x'")?, "(|(!(mail=x))(!(mail=*)))");
        assert_eq!(render("object.active")?, "(active=TRUE)");
        assert_eq!(render("object.created >= 86400")?, "(createTimestamp>=19700102000000Z)");
        Ok(())
    }

    #[test]
    fn test_null_checks_and_constants() -> anyhow::Result<()> {
        assert_eq!(render("object.mail isnull")?, "(!(mail=*))");
        assert_eq!(render("object.mail notnull")?, "(mail=*)");
        assert_eq!(render("object.mail == null")?, "(!(mail=*))");
        assert_eq!(render("object.age > null")?, "(!(objectClass=*))");
        assert_eq!(render("1 == 1")?, "(objectClass=*)");
        Ok(())
    }

    #[test]
    fn test_like_and_membership() -> anyhow::Result<()> {
        assert_eq!(render("object.name like 'Sm%th%'")?, "(sn=Sm*th*)");
        assert_eq!(render("object.name like '%(a)?%'")?, "(sn=*\\28a\\29\\3f*)");
        let user = crate::resolve::MapResolvable::new()
            .with("ages", vec![1, 2])
            .into_shared();
        let request = ExpressionQueryRequest::new().with_resolver(Arc::new(
            crate::resolve::PropertyResolver::new().with_root("user", user),
        ));
        let (statement, params) = compile("object.age containsoneof user.ages")?
            .merge(&request)?
            .into_parts();
        assert_eq!(bind_filter(&statement, &params)?, "(|(age=1)(age=2))");
        assert_eq!(render("object.age containsoneof user.none")?, "(!(objectClass=*))");
        assert_eq!(render("object.name containsoneof 'a'")?, "(sn=a)");
        assert_eq!(render("object.mail containsnone 'a'")?, "(|(!(mail=a))(!(mail=*)))");
        Ok(())
    }

    #[test]
    fn test_unsupported_constructs() {
        for code in [
            "object.age == object.age",
            "object.age + 1 > 2",
            "lower(object.name) == 'a'",
            "object.name like 'a_c'",
        ] {
            assert!(compile(code).is_err(), "{} should not compile", code);
        }
    }

    #[test]
    fn test_value_escaping() -> DirectoryResult<()> {
        assert_eq!(escape_value(b"a*b(c)\\d\0"), "a\\2ab\\28c\\29\\5cd\\00");
        assert_eq!(
            bind_filter("(cn=?)", &[Value::string("Ünïcode*")])?,
            "(cn=Ünïcode\\2a)"
        );
        assert_eq!(bind_filter("(photo=?)", &[Value::Bytes(vec![0xff, 0x41])])?, "(photo=\\ffA)");
        assert!(matches!(
            bind_filter("(cn=?)(sn=?)", &[Value::string("a")]),
            Err(DirectoryError::InvalidFilter { .. })
        ));
        assert!(bind_filter("(cn=?)", &[Value::string("a"), Value::Null]).is_err());
        Ok(())
    }

    #[test]
    fn test_generalized_time() {
        assert_eq!(generalized_time(0), "19700101000000Z");
        assert_eq!(generalized_time(951_782_400), "20000229000000Z");
        assert_eq!(generalized_time(1_700_000_000), "20231114221320Z");
        assert_eq!(generalized_time(-1), "19691231235959Z");
        assert_eq!(parse_generalized_time("20231114221320Z"), Some(1_700_000_000));
        assert_eq!(parse_generalized_time("20000229000000.5Z"), Some(951_782_400));
        assert_eq!(parse_generalized_time("2023111422132Z"), None);
        assert_eq!(parse_generalized_time("20231314221320Z"), None);
    }
}
