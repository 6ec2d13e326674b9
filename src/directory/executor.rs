//! Runs merged filters against a pooled directory.

use super::config::DirectoryConfig;
use super::connection::{DirectoryError, DirectoryResult, Entry, SearchRequest};
use super::dialect::{bind_filter, parse_generalized_time};
use super::pool::ConnectionPool;
use crate::error::QueryError;
use crate::filter::{AttributeSchema, DatasourceFilter, ExpressionQueryRequest, MergedFilter, SortKey};
use crate::resolve::{MapResolvable, Resolvable};
use crate::value::{Value, ValueType};
use log::{debug, warn};
use std::sync::Arc;

/// Rows produced by one execution
pub struct QueryResult {
    pub rows: Vec<Arc<dyn Resolvable>>,
    /// The server stopped at its size limit before the requested page was full
    pub truncated: bool,
    /// Entries read from the server, including those skipped by the start offset
    pub consumed: usize,
}

/// Executes merged directory filters
pub struct DirectoryExecutor {
    pool: ConnectionPool,
    config: DirectoryConfig,
    schema: AttributeSchema,
}

impl DirectoryExecutor {
    pub fn new(pool: ConnectionPool, config: DirectoryConfig) -> Self {
        Self {
            pool,
            config,
            schema: AttributeSchema::new(),
        }
    }

    /// Map backend attribute names to schema property names and types
    pub fn with_schema(mut self, schema: AttributeSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Merge, execute and post-process `filter` for one request
    pub fn query(
        &self,
        filter: &DatasourceFilter,
        request: &ExpressionQueryRequest,
    ) -> Result<QueryResult, QueryError> {
        let merged = filter.merge(request)?;
        let mut result = self.execute(&merged)?;
        filter.post_process(&mut result.rows, request)?;
        Ok(result)
    }

    /// Run one merged filter and collect the requested page of rows
    pub fn execute(&self, merged: &MergedFilter) -> DirectoryResult<QueryResult> {
        let request = merged.request();
        let search = self.search_request(merged)?;
        let start = request.start();
        let count = request.count();
        if count == Some(0) {
            debug!("Empty page requested for {}; skipping search", search.filter);
            return Ok(QueryResult {
                rows: Vec::new(),
                truncated: false,
                consumed: 0,
            });
        }

        let mut conn = self.pool.checkout()?;
        let mut rows = Vec::new();
        let mut consumed = 0;
        let mut truncated = false;
        for entry in conn.search(&search)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(DirectoryError::SizeLimitExceeded) => {
                    debug!(
                        "Size limit reached after {} entries for {}; returning partial results",
                        consumed, search.filter
                    );
                    truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            consumed += 1;
            if consumed <= start {
                continue;
            }
            rows.push(self.to_row(entry));
            if count.is_some_and(|count| rows.len() >= count) {
                break;
            }
        }

        debug!(
            "Directory search {} under '{}' returned {} rows",
            search.filter,
            search.base,
            rows.len()
        );
        Ok(QueryResult {
            rows,
            truncated,
            consumed,
        })
    }

    fn search_request(&self, merged: &MergedFilter) -> DirectoryResult<SearchRequest> {
        let request = merged.request();
        let attributes = if request.attributes().is_empty() {
            &self.config.attributes
        } else {
            request.attributes()
        };
        // Servers read a zero size limit as unlimited
        let page_limit = request
            .count()
            .filter(|&count| count > 0)
            .map(|count| request.start().saturating_add(count));
        let size_limit = match (self.config.size_limit, page_limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        Ok(SearchRequest {
            base: self.config.base.clone(),
            scope: self.config.scope,
            filter: bind_filter(merged.statement(), merged.params())?,
            attributes: attributes.iter().map(|name| self.backend_name(name)).collect(),
            sort: request
                .sorting()
                .iter()
                .map(|key| SortKey::new(self.backend_name(&key.attribute), key.order))
                .collect(),
            size_limit,
        })
    }

    fn backend_name(&self, property: &str) -> String {
        self.schema
            .get(property)
            .map(|attr| attr.backend_name.clone())
            .unwrap_or_else(|| property.to_string())
    }

    fn to_row(&self, entry: Entry) -> Arc<dyn Resolvable> {
        let mut row = MapResolvable::new();
        for (name, raw_values) in entry.attributes {
            let attr = self.schema.by_backend_name(&name);
            let binary = self.config.is_binary(&name) || attr.is_some_and(|attr| attr.binary);
            let value_type = attr.map_or(ValueType::Any, |attr| attr.value_type);
            let property = attr.map_or(name, |attr| attr.name.clone());

            let mut values: Vec<Value> = raw_values
                .into_iter()
                .map(|raw| decode(raw, binary, value_type))
                .collect();
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Collection(values)
            };
            row.insert(property, value);
        }

        let identity = &self.config.identity_attribute;
        if row.contains(identity) {
            warn!(
                "Entry {} has a '{}' attribute; keeping the DN as its identity",
                entry.dn, identity
            );
        }
        row.insert(identity.clone(), Value::String(entry.dn));
        row.into_shared()
    }
}

fn decode(raw: Vec<u8>, binary: bool, value_type: ValueType) -> Value {
    if binary {
        return Value::Bytes(raw);
    }
    let text = match String::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => return Value::Bytes(e.into_bytes()),
    };
    match value_type {
        ValueType::Date => match parse_generalized_time(&text) {
            Some(secs) => Value::Date(secs),
            None => Value::String(text),
        },
        ValueType::Number | ValueType::Boolean => {
            Value::string(text.as_str()).coerce(value_type).unwrap_or(Value::String(text))
        }
        _ => Value::String(text),
    }
}
