//! Directory binding configuration.

use super::connection::SearchScope;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where and how searches run, and how entries map to rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Search base DN
    pub base: String,
    pub scope: SearchScope,
    /// Row property that holds the entry's DN
    pub identity_attribute: String,
    /// Attributes whose values are raw bytes
    pub binary_attributes: Vec<String>,
    /// Attributes to fetch when the request names none; empty means all
    pub attributes: Vec<String>,
    /// Upper bound on entries per search
    pub size_limit: Option<usize>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base: String::new(),
            scope: SearchScope::Subtree,
            identity_attribute: "dn".to_string(),
            binary_attributes: Vec::new(),
            attributes: Vec::new(),
            size_limit: None,
        }
    }
}

impl DirectoryConfig {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_identity_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.identity_attribute = attribute.into();
        self
    }

    pub fn with_binary_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.binary_attributes.push(attribute.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_size_limit(mut self, size_limit: usize) -> Self {
        self.size_limit = Some(size_limit);
        self
    }

    pub fn is_binary(&self, attribute: &str) -> bool {
        self.binary_attributes
            .iter()
            .any(|name| name.eq_ignore_ascii_case(attribute))
    }
}

/// Connection pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_connections: usize,
    /// How long a checkout waits for a free connection
    pub checkout_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            checkout_timeout_ms: 5000,
        }
    }
}

impl PoolConfig {
    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_millis(self.checkout_timeout_ms)
    }
}
