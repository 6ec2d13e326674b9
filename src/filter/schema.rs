//! Attribute schema a backend exposes to the compiler.

use crate::value::ValueType;
use std::collections::BTreeMap;

/// One filterable attribute of a backend
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDefinition {
    /// Name used in expressions after `object.`
    pub name: String,
    /// Column or attribute name in the backend
    pub backend_name: String,
    pub value_type: ValueType,
    pub nullable: bool,
    /// Values are raw bytes rather than text
    pub binary: bool,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        let name = name.into();
        Self {
            backend_name: name.clone(),
            name,
            value_type,
            nullable: false,
            binary: false,
        }
    }

    pub fn with_backend_name(mut self, backend_name: impl Into<String>) -> Self {
        self.backend_name = backend_name.into();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn binary(mut self) -> Self {
        self.binary = true;
        self
    }

    /// Parse a declaration of the form `name[=backend]:TYPE[?]`.
    /// A trailing `?` marks the attribute nullable.
    pub fn parse(declaration: &str) -> Option<Self> {
        let (name, type_name) = declaration.split_once(':')?;
        let (type_name, nullable) = match type_name.strip_suffix('?') {
            Some(stripped) => (stripped, true),
            None => (type_name, false),
        };
        let value_type = ValueType::from_name(type_name.trim())?;
        let (name, backend_name) = match name.split_once('=') {
            Some((name, backend)) => (name.trim(), backend.trim()),
            None => (name.trim(), name.trim()),
        };
        if name.is_empty() || backend_name.is_empty() {
            return None;
        }

        let mut def = Self::new(name, value_type).with_backend_name(backend_name);
        def.nullable = nullable;
        Some(def)
    }
}

/// Attributes keyed by expression name
#[derive(Debug, Clone, Default)]
pub struct AttributeSchema {
    attributes: BTreeMap<String, AttributeDefinition>,
}

impl AttributeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, attribute: AttributeDefinition) -> Self {
        self.insert(attribute);
        self
    }

    pub fn insert(&mut self, attribute: AttributeDefinition) -> Option<AttributeDefinition> {
        self.attributes.insert(attribute.name.clone(), attribute)
    }

    pub fn get(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attributes.get(name)
    }

    /// Find an attribute by its backend name, ignoring ASCII case
    pub fn by_backend_name(&self, backend_name: &str) -> Option<&AttributeDefinition> {
        self.attributes
            .values()
            .find(|attr| attr.backend_name.eq_ignore_ascii_case(backend_name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.attributes.values()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_declaration() {
        let attr = AttributeDefinition::parse("age:NUMBER").unwrap();
        assert_eq!(attr.name, "age");
        assert_eq!(attr.backend_name, "age");
        assert_eq!(attr.value_type, ValueType::Number);
        assert!(!attr.nullable);

        let attr = AttributeDefinition::parse("name=sn:string?").unwrap();
        assert_eq!(attr.name, "name");
        assert_eq!(attr.backend_name, "sn");
        assert_eq!(attr.value_type, ValueType::String);
        assert!(attr.nullable);

        assert!(AttributeDefinition::parse("age").is_none());
        assert!(AttributeDefinition::parse("age:BLOB").is_none());
        assert!(AttributeDefinition::parse(":NUMBER").is_none());
    }

    #[test]
    fn test_schema_lookup() {
        let schema = AttributeSchema::new()
            .with(AttributeDefinition::new("name", ValueType::String).with_backend_name("sn"))
            .with(AttributeDefinition::new("photo", ValueType::Any).binary());
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.get("name").map(|a| a.backend_name.as_str()), Some("sn"));
        assert_eq!(schema.by_backend_name("SN").map(|a| a.name.as_str()), Some("name"));
        assert!(schema.get("photo").is_some_and(|a| a.binary));
        assert!(schema.get("sn").is_none());
    }
}
