//! Per-execution request context.

use crate::expression::{Expression, ExpressionResult};
use crate::resolve::Resolver;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Sort order for an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One key of a multi-key sort
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub attribute: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn new(attribute: impl Into<String>, order: SortOrder) -> Self {
        Self {
            attribute: attribute.into(),
            order,
        }
    }

    /// Parse `attr`, `attr:asc` or `attr:desc`
    pub fn parse(spec: &str) -> Option<Self> {
        let (attribute, order) = match spec.split_once(':') {
            Some((attribute, order)) => {
                let order = match order.to_ascii_lowercase().as_str() {
                    "asc" => SortOrder::Asc,
                    "desc" => SortOrder::Desc,
                    _ => return None,
                };
                (attribute, order)
            }
            None => (spec, SortOrder::Asc),
        };
        if attribute.is_empty() {
            return None;
        }
        Some(Self::new(attribute, order))
    }
}

/// Resolver that knows nothing
struct EmptyResolver;

impl Resolver for EmptyResolver {
    fn resolve(&self, _path: &str) -> Option<Value> {
        None
    }
}

/// Context threaded through merge, execution and post-processing: the
/// resolver for non-row paths plus pagination, sorting and projection.
#[derive(Clone, Default)]
pub struct ExpressionQueryRequest {
    resolver: Option<Arc<dyn Resolver>>,
    start: usize,
    count: Option<usize>,
    sorting: Vec<SortKey>,
    attributes: Vec<String>,
}

impl ExpressionQueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Offset of the first row to return
    pub fn with_start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    /// Maximum number of rows to return
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_sort(mut self, attribute: impl Into<String>, order: SortOrder) -> Self {
        self.sorting.push(SortKey::new(attribute, order));
        self
    }

    /// Attributes to fetch; empty means all
    pub fn with_attributes(mut self, attributes: Vec<String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn resolver(&self) -> Option<&Arc<dyn Resolver>> {
        self.resolver.as_ref()
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn count(&self) -> Option<usize> {
        self.count
    }

    pub fn sorting(&self) -> &[SortKey] {
        &self.sorting
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Resolve a path through the request's resolver
    pub fn resolve(&self, path: &str) -> Option<Value> {
        self.resolver.as_ref().and_then(|r| r.resolve(path))
    }

    /// Evaluate an expression against the request's resolver
    pub fn evaluate(&self, expr: &Expression) -> ExpressionResult<Value> {
        match &self.resolver {
            Some(resolver) => expr.evaluate(resolver.as_ref()),
            None => expr.evaluate(&EmptyResolver),
        }
    }

    /// Copy of this request that resolves through `resolver` instead
    pub(crate) fn rebind(&self, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            resolver: Some(resolver),
            ..self.clone()
        }
    }
}

impl fmt::Debug for ExpressionQueryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionQueryRequest")
            .field("resolver", &self.resolver.is_some())
            .field("start", &self.start)
            .field("count", &self.count)
            .field("sorting", &self.sorting)
            .field("attributes", &self.attributes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{MapResolvable, PropertyResolver};

    #[test]
    fn test_request_builders() {
        let request = ExpressionQueryRequest::new()
            .with_start(10)
            .with_count(5)
            .with_sort("sn", SortOrder::Desc)
            .with_attributes(vec!["cn".to_string()]);
        assert_eq!(request.start(), 10);
        assert_eq!(request.count(), Some(5));
        assert_eq!(request.sorting(), &[SortKey::new("sn", SortOrder::Desc)]);
        assert_eq!(request.attributes(), &["cn".to_string()]);
        assert!(request.resolver().is_none());
    }

    #[test]
    fn test_evaluate_without_resolver_sees_nulls() -> ExpressionResult<()> {
        let request = ExpressionQueryRequest::new();
        let expr = Expression::variable("user.id");
        assert_eq!(request.evaluate(&expr)?, Value::Null);

        let user = MapResolvable::new().with("id", 7).into_shared();
        let request = request.with_resolver(Arc::new(PropertyResolver::new().with_root("user", user)));
        assert_eq!(request.evaluate(&expr)?, Value::Integer(7));
        assert_eq!(request.resolve("user.id"), Some(Value::Integer(7)));
        Ok(())
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!(SortKey::parse("cn"), Some(SortKey::new("cn", SortOrder::Asc)));
        assert_eq!(
            SortKey::parse("age:DESC"),
            Some(SortKey::new("age", SortOrder::Desc))
        );
        assert_eq!(SortKey::parse("age:up"), None);
        assert_eq!(SortKey::parse(":asc"), None);
    }
}
