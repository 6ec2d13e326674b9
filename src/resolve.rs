//! Dotted-path navigation over object graphs.
//!
//! A [`Resolvable`] exposes named properties; a property may itself hold a
//! [`Value::Object`], so a path such as `object.parent.name` walks the graph
//! one segment at a time. The same navigation backs in-process evaluation
//! and the rows returned by backends.

use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// An object whose properties can be looked up by name
pub trait Resolvable: Send + Sync {
    /// Get a single property, or `None` when the object has no such property
    fn get(&self, property: &str) -> Option<Value>;

    /// Names of the properties this object exposes
    fn keys(&self) -> Vec<String>;
}

/// Resolves complete dotted paths, including the root segment
pub trait Resolver: Send + Sync {
    fn resolve(&self, path: &str) -> Option<Value>;
}

/// Resolvable backed by an ordered property map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapResolvable {
    properties: BTreeMap<String, Value>,
}

impl MapResolvable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion
    pub fn with(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(property.into(), value.into());
        self
    }

    pub fn insert(&mut self, property: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.properties.insert(property.into(), value.into())
    }

    pub fn contains(&self, property: &str) -> bool {
        self.properties.contains_key(property)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn into_shared(self) -> Arc<dyn Resolvable> {
        Arc::new(self)
    }
}

impl Resolvable for MapResolvable {
    fn get(&self, property: &str) -> Option<Value> {
        self.properties.get(property).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }
}

/// Walk the remaining path segments starting at `value`.
///
/// Navigating into a collection maps the rest of the path over every
/// element and yields the collection of results.
pub fn navigate(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Object(object) => {
            let next = object.0.get(first)?;
            navigate(&next, rest)
        }
        Value::Collection(items) => {
            let mapped: Vec<Value> = items
                .iter()
                .filter_map(|item| navigate(item, segments))
                .collect();
            Some(Value::Collection(mapped))
        }
        _ => None,
    }
}

/// Resolver over a set of named root objects
#[derive(Clone, Default)]
pub struct PropertyResolver {
    roots: HashMap<String, Arc<dyn Resolvable>>,
}

impl PropertyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, name: impl Into<String>, root: Arc<dyn Resolvable>) -> Self {
        self.roots.insert(name.into(), root);
        self
    }

    pub fn insert_root(
        &mut self,
        name: impl Into<String>,
        root: Arc<dyn Resolvable>,
    ) -> Option<Arc<dyn Resolvable>> {
        self.roots.insert(name.into(), root)
    }

    pub fn root(&self, name: &str) -> Option<&Arc<dyn Resolvable>> {
        self.roots.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl Resolver for PropertyResolver {
    fn resolve(&self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let (root_name, rest) = segments.split_first()?;
        let root = self.roots.get(*root_name)?;
        navigate(&Value::object(root.clone()), rest)
    }
}

/// Split a dotted path into its root segment and the remainder
pub fn split_root(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((root, rest)) => (root, Some(rest)),
        None => (path, None),
    }
}
