//! Result-list transforms applied after backend execution.
//!
//! A post-processor handles what a backend cannot express natively. It sees
//! only [`Resolvable`] rows plus the value of its bound data expression,
//! evaluated once for the whole execution.

use super::request::{SortKey, SortOrder};
use crate::error::{PostProcessError, PostProcessResult};
use crate::expression::{Expression, OBJECT_ROOT};
use crate::resolve::{navigate, split_root, Resolvable, Resolver};
use crate::value::{Value, ValueType};
use std::cmp::Ordering;
use std::sync::Arc;

/// Root under which a row-level predicate sees the processor's data
pub const DATA_ROOT: &str = "data";

/// Transform of the final row list
pub trait PostProcessor: Send + Sync {
    /// Name used in diagnostics
    fn name(&self) -> &str;

    /// Filter, reorder or annotate `rows` in place
    fn process(&self, rows: &mut Vec<Arc<dyn Resolvable>>, data: &Value) -> PostProcessResult<()>;
}

/// Keeps at most `data` rows
#[derive(Debug, Clone, Copy, Default)]
pub struct LimitProcessor;

impl PostProcessor for LimitProcessor {
    fn name(&self) -> &str {
        "limit"
    }

    fn process(&self, rows: &mut Vec<Arc<dyn Resolvable>>, data: &Value) -> PostProcessResult<()> {
        let limit = match data.coerce(ValueType::Number) {
            // No threshold means no limit
            Some(Value::Null) => return Ok(()),
            Some(Value::Integer(n)) if n >= 0 => n as usize,
            Some(Value::Float(f)) if f >= 0.0 => f as usize,
            _ => {
                return Err(PostProcessError::failed(
                    self.name(),
                    format!("invalid threshold '{}'", data.to_text()),
                ))
            }
        };
        rows.truncate(limit);
        Ok(())
    }
}

/// Sorts rows by the keys given as data: a single `attr[:asc|desc]`
/// string or a collection of them. NULLs sort first in ascending order
/// and last in descending order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortProcessor;

impl SortProcessor {
    fn keys(&self, data: &Value) -> PostProcessResult<Vec<SortKey>> {
        data.elements()
            .iter()
            .map(|spec| {
                spec.as_str().and_then(SortKey::parse).ok_or_else(|| {
                    PostProcessError::failed(
                        self.name(),
                        format!("invalid sort key '{}'", spec.to_text()),
                    )
                })
            })
            .collect()
    }
}

fn compare_keys(a: &dyn Resolvable, b: &dyn Resolvable, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let left = a.get(&key.attribute).unwrap_or(Value::Null);
        let right = b.get(&key.attribute).unwrap_or(Value::Null);
        let ordering = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => left.compare(&right).unwrap_or(Ordering::Equal),
        };
        let ordering = match key.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

impl PostProcessor for SortProcessor {
    fn name(&self) -> &str {
        "sort"
    }

    fn process(&self, rows: &mut Vec<Arc<dyn Resolvable>>, data: &Value) -> PostProcessResult<()> {
        let keys = self.keys(data)?;
        rows.sort_by(|a, b| compare_keys(a.as_ref(), b.as_ref(), &keys));
        Ok(())
    }
}

/// Resolves `object.*` against one row and `data.*` against the
/// processor's data
struct RowResolver<'a> {
    row: &'a Arc<dyn Resolvable>,
    data: &'a Value,
}

impl Resolver for RowResolver<'_> {
    fn resolve(&self, path: &str) -> Option<Value> {
        let (root, rest) = split_root(path);
        let segments: Vec<&str> = rest.map(|rest| rest.split('.').collect()).unwrap_or_default();
        match root {
            OBJECT_ROOT => navigate(&Value::object(Arc::clone(self.row)), &segments),
            DATA_ROOT => navigate(self.data, &segments),
            _ => None,
        }
    }
}

/// Keeps the rows for which an expression holds, evaluated in-process
#[derive(Debug, Clone)]
pub struct ExpressionFilterProcessor {
    predicate: Expression,
}

impl ExpressionFilterProcessor {
    pub fn new(predicate: Expression) -> Self {
        Self { predicate }
    }
}

impl PostProcessor for ExpressionFilterProcessor {
    fn name(&self) -> &str {
        "expression-filter"
    }

    fn process(&self, rows: &mut Vec<Arc<dyn Resolvable>>, data: &Value) -> PostProcessResult<()> {
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows.drain(..) {
            let resolver = RowResolver { row: &row, data };
            let matches = self
                .predicate
                .matches(&resolver)
                .map_err(|e| PostProcessError::failed("expression-filter", e.to_string()))?;
            if matches {
                kept.push(row);
            }
        }
        *rows = kept;
        Ok(())
    }
}
