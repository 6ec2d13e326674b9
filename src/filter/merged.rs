//! Flattened statement for one execution.

use super::request::ExpressionQueryRequest;
use crate::value::Value;

/// Statement text plus ordered bind parameters, built for one request
#[derive(Debug, Clone)]
pub struct MergedFilter {
    statement: String,
    params: Vec<Value>,
    request: ExpressionQueryRequest,
}

impl MergedFilter {
    pub fn new(request: ExpressionQueryRequest) -> Self {
        Self {
            statement: String::new(),
            params: Vec::new(),
            request,
        }
    }

    /// Append text and the parameters it references
    pub fn append(&mut self, text: &str, params: &[Value]) {
        self.statement.push_str(text);
        self.params.extend_from_slice(params);
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn request(&self) -> &ExpressionQueryRequest {
        &self.request
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.statement, self.params)
    }
}
