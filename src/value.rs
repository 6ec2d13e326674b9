//! Values flowing through expressions, filters and result rows.
//!
//! [`ValueType`] is the closed type vocabulary shared by the parser, the
//! filter compiler and every backend. [`Value`] is the runtime
//! representation; each value reports exactly one `ValueType`.

use crate::resolve::Resolvable;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Types known to the expression engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Any,
    Boolean,
    Collection,
    Date,
    Null,
    Number,
    String,
    Object,
}

impl ValueType {
    /// Check whether a value of type `actual` may be used where `self` is expected
    pub fn is_compatible_with(&self, actual: ValueType) -> bool {
        match (*self, actual) {
            (ValueType::Any, _) | (_, ValueType::Any) => true,
            (_, ValueType::Null) | (ValueType::Null, _) => true,
            (expected, actual) => expected == actual,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Any => "ANY",
            ValueType::Boolean => "BOOLEAN",
            ValueType::Collection => "COLLECTION",
            ValueType::Date => "DATE",
            ValueType::Null => "NULL",
            ValueType::Number => "NUMBER",
            ValueType::String => "STRING",
            ValueType::Object => "OBJECT",
        }
    }

    /// Parse a type name as written in attribute declarations
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "ANY" => Some(ValueType::Any),
            "BOOLEAN" => Some(ValueType::Boolean),
            "COLLECTION" => Some(ValueType::Collection),
            "DATE" => Some(ValueType::Date),
            "NULL" => Some(ValueType::Null),
            "NUMBER" => Some(ValueType::Number),
            "STRING" => Some(ValueType::String),
            "OBJECT" => Some(ValueType::Object),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to a navigable object
#[derive(Clone)]
pub struct ObjectRef(pub Arc<dyn Resolvable>);

impl ObjectRef {
    pub fn new(object: Arc<dyn Resolvable>) -> Self {
        Self(object)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:p})", Arc::as_ptr(&self.0))
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

/// Runtime values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Seconds since the Unix epoch
    Date(i64),
    Collection(Vec<Value>),
    Bytes(Vec<u8>),
    #[serde(skip)]
    Object(ObjectRef),
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Value::String(value.into())
    }

    pub fn object(object: Arc<dyn Resolvable>) -> Self {
        Value::Object(ObjectRef::new(object))
    }

    /// Get the type of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) | Value::Float(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Date(_) => ValueType::Date,
            Value::Collection(_) => ValueType::Collection,
            // Raw bytes carry no type of their own
            Value::Bytes(_) => ValueType::Any,
            Value::Object(_) => ValueType::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Date(d) => Some(*d as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Textual form used when a backend renders the value inline
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Date(d) => d.to_string(),
            Value::Collection(items) => items
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(","),
            Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Value::Object(_) => String::new(),
        }
    }

    /// Elements of this value viewed as a collection; scalars become one element
    pub fn elements(&self) -> Vec<Value> {
        match self {
            Value::Null => Vec::new(),
            Value::Collection(items) => items.clone(),
            other => vec![other.clone()],
        }
    }

    /// Convert this value to the given type, or `None` when no sensible
    /// conversion exists
    pub fn coerce(&self, target: ValueType) -> Option<Value> {
        if self.is_null() {
            return Some(Value::Null);
        }

        match target {
            ValueType::Any => Some(self.clone()),
            ValueType::Null => None,
            ValueType::Boolean => match self {
                Value::Boolean(_) => Some(self.clone()),
                Value::Integer(0) => Some(Value::Boolean(false)),
                Value::Integer(1) => Some(Value::Boolean(true)),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Some(Value::Boolean(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => {
                    Some(Value::Boolean(false))
                }
                _ => None,
            },
            ValueType::Number => match self {
                Value::Integer(_) | Value::Float(_) => Some(self.clone()),
                Value::Boolean(b) => Some(Value::Integer(i64::from(*b))),
                Value::Date(d) => Some(Value::Integer(*d)),
                Value::String(s) => parse_number(s.trim()),
                _ => None,
            },
            ValueType::String => match self {
                Value::String(_) => Some(self.clone()),
                Value::Boolean(_) | Value::Integer(_) | Value::Float(_) | Value::Date(_) => {
                    Some(Value::String(self.to_text()))
                }
                Value::Bytes(bytes) => String::from_utf8(bytes.clone()).ok().map(Value::String),
                _ => None,
            },
            ValueType::Date => match self {
                Value::Date(_) => Some(self.clone()),
                Value::Integer(i) => Some(Value::Date(*i)),
                Value::Float(f) => Some(Value::Date(f.trunc() as i64)),
                Value::String(s) => s.trim().parse::<i64>().ok().map(Value::Date),
                _ => None,
            },
            ValueType::Collection => match self {
                Value::Collection(_) => Some(self.clone()),
                other => Some(Value::Collection(vec![other.clone()])),
            },
            ValueType::Object => match self {
                Value::Object(_) => Some(self.clone()),
                _ => None,
            },
        }
    }

    /// Order two non-null values of comparable types
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Equality with numeric promotion, used by evaluation and matching
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Collection(a), Value::Collection(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            (a, b) => a.compare(b) == Some(Ordering::Equal),
        }
    }
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Value::Float)
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::Collection(values.into_iter().map(Into::into).collect())
    }
}
