//! Directory connection contract.

use crate::filter::SortKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur talking to a directory
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DirectoryError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection pool exhausted: no connection available within {timeout_ms}ms")]
    PoolExhausted { timeout_ms: u64 },

    #[error("Invalid filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Search failed: {0}")]
    Search(String),

    /// The server stopped returning entries at its size limit
    #[error("Size limit exceeded")]
    SizeLimitExceeded,
}

/// Result type for directory operations
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// How far below the search base a search reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchScope {
    /// Only the base entry itself
    Base,
    /// Direct children of the base
    OneLevel,
    /// The base and everything below it
    #[default]
    Subtree,
}

/// One search as sent to the server
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub filter: String,
    /// Attributes to return; empty means all
    pub attributes: Vec<String>,
    /// Server-side sort control
    pub sort: Vec<SortKey>,
    pub size_limit: Option<usize>,
}

/// Raw directory entry: a DN and multi-valued byte attributes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub dn: String,
    pub attributes: BTreeMap<String, Vec<Vec<u8>>>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add a text value to an attribute
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(attribute, value.into().into_bytes());
        self
    }

    /// Add a raw value to an attribute
    pub fn with_bytes(mut self, attribute: impl Into<String>, value: Vec<u8>) -> Self {
        self.push(attribute, value);
        self
    }

    pub fn push(&mut self, attribute: impl Into<String>, value: Vec<u8>) {
        self.attributes.entry(attribute.into()).or_default().push(value);
    }

    /// Values of an attribute, matching the name without regard to ASCII case
    pub fn values(&self, attribute: &str) -> Option<&[Vec<u8>]> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values.as_slice())
    }
}

/// Stream of search results. A size-limit error ends the stream.
pub type EntryStream<'a> = Box<dyn Iterator<Item = DirectoryResult<Entry>> + 'a>;

/// A live connection to a directory server
pub trait DirectoryConnection: Send {
    fn search(&mut self, request: &SearchRequest) -> DirectoryResult<EntryStream<'_>>;

    /// Whether the connection can go back into a pool
    fn is_valid(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_values() {
        let entry = Entry::new("cn=a,dc=example")
            .with("mail", "a@example.org")
            .with("mail", "b@example.org")
            .with_bytes("jpegPhoto", vec![0xff, 0xd8]);
        assert_eq!(entry.values("MAIL").map(<[_]>::len), Some(2));
        assert_eq!(entry.values("jpegphoto"), Some(&[vec![0xff, 0xd8]][..]));
        assert_eq!(entry.values("cn"), None);
    }

    #[test]
    fn test_default_scope() {
        assert_eq!(SearchScope::default(), SearchScope::Subtree);
    }
}
