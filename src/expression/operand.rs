//! Operand vocabulary and the keyword registry.
//!
//! Every keyword the parser understands lives in exactly one of four
//! namespaces: functions, left-unary (prefix) operators, right-unary
//! (postfix) operators and binary operators. The registry is built once and
//! only read afterwards.

use super::error::RegistryError;
use super::token::is_single_keyword;
use crate::value::ValueType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Binary operators supported in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    // Logical
    Or,
    And,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    ContainsOneOf,
    ContainsNone,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOperator {
    /// Binding strength, higher binds tighter
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOperator::Or => 1,
            BinaryOperator::And => 2,
            BinaryOperator::Eq
            | BinaryOperator::Ne
            | BinaryOperator::Lt
            | BinaryOperator::Le
            | BinaryOperator::Gt
            | BinaryOperator::Ge
            | BinaryOperator::Like
            | BinaryOperator::ContainsOneOf
            | BinaryOperator::ContainsNone => 3,
            BinaryOperator::Add | BinaryOperator::Sub => 4,
            BinaryOperator::Mul | BinaryOperator::Div | BinaryOperator::Mod => 5,
        }
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }

    pub fn is_comparison(&self) -> bool {
        self.precedence() == 3
    }

    pub fn is_arithmetic(&self) -> bool {
        self.precedence() >= 4
    }

    /// Types the left and right operands are expected to have
    pub fn operand_types(&self) -> (ValueType, ValueType) {
        match self {
            BinaryOperator::Or | BinaryOperator::And => (ValueType::Boolean, ValueType::Boolean),
            BinaryOperator::Like => (ValueType::String, ValueType::String),
            BinaryOperator::ContainsOneOf | BinaryOperator::ContainsNone => {
                (ValueType::Any, ValueType::Collection)
            }
            // `+` also concatenates strings
            BinaryOperator::Add => (ValueType::Any, ValueType::Any),
            BinaryOperator::Sub | BinaryOperator::Mul | BinaryOperator::Div | BinaryOperator::Mod => {
                (ValueType::Number, ValueType::Number)
            }
            _ => (ValueType::Any, ValueType::Any),
        }
    }

    /// Type of the value this operator produces
    pub fn output_type(&self) -> ValueType {
        match self {
            BinaryOperator::Add => ValueType::Any,
            op if op.is_arithmetic() => ValueType::Number,
            _ => ValueType::Boolean,
        }
    }

    /// Operator to use when the operands are swapped, if the operator allows it
    pub fn flip(&self) -> Option<BinaryOperator> {
        match self {
            BinaryOperator::Eq => Some(BinaryOperator::Eq),
            BinaryOperator::Ne => Some(BinaryOperator::Ne),
            BinaryOperator::Lt => Some(BinaryOperator::Gt),
            BinaryOperator::Le => Some(BinaryOperator::Ge),
            BinaryOperator::Gt => Some(BinaryOperator::Lt),
            BinaryOperator::Ge => Some(BinaryOperator::Le),
            _ => None,
        }
    }

    /// Canonical keyword for this operator
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOperator::Or => "or",
            BinaryOperator::And => "and",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
            BinaryOperator::Like => "like",
            BinaryOperator::ContainsOneOf => "containsoneof",
            BinaryOperator::ContainsNone => "containsnone",
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
        }
    }
}

/// Unary operators supported in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    Not,
    Negate,
    IsNull,
    NotNull,
}

impl UnaryOperator {
    pub fn operand_type(&self) -> ValueType {
        match self {
            UnaryOperator::Not => ValueType::Boolean,
            UnaryOperator::Negate => ValueType::Number,
            UnaryOperator::IsNull | UnaryOperator::NotNull => ValueType::Any,
        }
    }

    pub fn output_type(&self) -> ValueType {
        match self {
            UnaryOperator::Negate => ValueType::Number,
            _ => ValueType::Boolean,
        }
    }

    /// Whether the operator is written after its operand
    pub fn is_postfix(&self) -> bool {
        matches!(self, UnaryOperator::IsNull | UnaryOperator::NotNull)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOperator::Not => "not",
            UnaryOperator::Negate => "-",
            UnaryOperator::IsNull => "isnull",
            UnaryOperator::NotNull => "notnull",
        }
    }
}

/// Built-in functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    Concat,
    Lower,
    Upper,
    IsEmpty,
    Size,
    Now,
}

impl FunctionKind {
    pub fn name(&self) -> &'static str {
        match self {
            FunctionKind::Concat => "concat",
            FunctionKind::Lower => "lower",
            FunctionKind::Upper => "upper",
            FunctionKind::IsEmpty => "isempty",
            FunctionKind::Size => "size",
            FunctionKind::Now => "now",
        }
    }

    /// Minimum and optional maximum number of arguments
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            FunctionKind::Concat => (1, None),
            FunctionKind::Lower | FunctionKind::Upper => (1, Some(1)),
            FunctionKind::IsEmpty | FunctionKind::Size => (1, Some(1)),
            FunctionKind::Now => (0, Some(0)),
        }
    }

    pub fn accepts(&self, count: usize) -> bool {
        let (min, max) = self.arity();
        count >= min && max.map_or(true, |max| count <= max)
    }

    /// Human readable arity for diagnostics
    pub fn arity_description(&self) -> String {
        match self.arity() {
            (min, Some(max)) if min == max => min.to_string(),
            (min, Some(max)) => format!("{}..{}", min, max),
            (min, None) => format!("at least {}", min),
        }
    }

    pub fn argument_type(&self) -> ValueType {
        match self {
            FunctionKind::Concat | FunctionKind::Lower | FunctionKind::Upper => ValueType::String,
            _ => ValueType::Any,
        }
    }

    pub fn output_type(&self) -> ValueType {
        match self {
            FunctionKind::Concat | FunctionKind::Lower | FunctionKind::Upper => ValueType::String,
            FunctionKind::IsEmpty => ValueType::Boolean,
            FunctionKind::Size => ValueType::Number,
            FunctionKind::Now => ValueType::Date,
        }
    }

    /// Whether two evaluations may yield different results
    pub fn is_volatile(&self) -> bool {
        matches!(self, FunctionKind::Now)
    }
}

/// A keyword's meaning, tagged with the namespace it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Function(FunctionKind),
    LeftUnary(UnaryOperator),
    RightUnary(UnaryOperator),
    Binary(BinaryOperator),
}

impl Operand {
    pub fn namespace(&self) -> &'static str {
        match self {
            Operand::Function(_) => "function",
            Operand::LeftUnary(_) => "left-unary",
            Operand::RightUnary(_) => "right-unary",
            Operand::Binary(_) => "binary",
        }
    }
}

const STANDARD_OPERANDS: &[(&str, Operand)] = &[
    ("or", Operand::Binary(BinaryOperator::Or)),
    ("||", Operand::Binary(BinaryOperator::Or)),
    ("and", Operand::Binary(BinaryOperator::And)),
    ("&&", Operand::Binary(BinaryOperator::And)),
    ("==", Operand::Binary(BinaryOperator::Eq)),
    ("=", Operand::Binary(BinaryOperator::Eq)),
    ("!=", Operand::Binary(BinaryOperator::Ne)),
    ("<", Operand::Binary(BinaryOperator::Lt)),
    ("<=", Operand::Binary(BinaryOperator::Le)),
    (">", Operand::Binary(BinaryOperator::Gt)),
    (">=", Operand::Binary(BinaryOperator::Ge)),
    ("like", Operand::Binary(BinaryOperator::Like)),
    ("containsoneof", Operand::Binary(BinaryOperator::ContainsOneOf)),
    ("containsnone", Operand::Binary(BinaryOperator::ContainsNone)),
    ("+", Operand::Binary(BinaryOperator::Add)),
    ("-", Operand::Binary(BinaryOperator::Sub)),
    ("*", Operand::Binary(BinaryOperator::Mul)),
    ("/", Operand::Binary(BinaryOperator::Div)),
    ("%", Operand::Binary(BinaryOperator::Mod)),
    ("not", Operand::LeftUnary(UnaryOperator::Not)),
    ("!", Operand::LeftUnary(UnaryOperator::Not)),
    ("isnull", Operand::RightUnary(UnaryOperator::IsNull)),
    ("notnull", Operand::RightUnary(UnaryOperator::NotNull)),
    ("concat", Operand::Function(FunctionKind::Concat)),
    ("lower", Operand::Function(FunctionKind::Lower)),
    ("upper", Operand::Function(FunctionKind::Upper)),
    ("isempty", Operand::Function(FunctionKind::IsEmpty)),
    ("size", Operand::Function(FunctionKind::Size)),
    ("now", Operand::Function(FunctionKind::Now)),
];

/// Keyword lookup table, one map per namespace
#[derive(Debug, Clone, Default)]
pub struct OperandRegistry {
    functions: HashMap<String, FunctionKind>,
    left_unary: HashMap<String, UnaryOperator>,
    right_unary: HashMap<String, UnaryOperator>,
    binary: HashMap<String, BinaryOperator>,
}

impl OperandRegistry {
    /// Create a registry without any keywords
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a registry holding the standard vocabulary
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for (keyword, operand) in STANDARD_OPERANDS {
            registry.insert(keyword.to_string(), *operand);
        }
        registry
    }

    /// Build a registry from explicit keyword/operand pairs, failing on the
    /// first cross-namespace conflict
    pub fn from_operands<'a>(
        operands: impl IntoIterator<Item = (&'a str, Operand)>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::empty();
        for (keyword, operand) in operands {
            registry.register(keyword, operand)?;
        }
        Ok(registry)
    }

    /// Register a keyword, returning the operand it replaced in the same
    /// namespace. A keyword already used by another namespace is rejected,
    /// as is one the tokenizer would split into several tokens.
    pub fn register(
        &mut self,
        keyword: &str,
        operand: Operand,
    ) -> Result<Option<Operand>, RegistryError> {
        let keyword = normalize(keyword);
        if !is_single_keyword(&keyword) {
            return Err(RegistryError::InvalidKeyword(keyword));
        }

        if let Some(existing) = self.lookup(&keyword) {
            if existing.namespace() != operand.namespace() {
                return Err(RegistryError::KeywordConflict {
                    keyword,
                    existing: existing.namespace(),
                    requested: operand.namespace(),
                });
            }
        }

        Ok(self.insert(keyword, operand))
    }

    /// Look up a keyword in all namespaces
    pub fn create_operand(&self, keyword: &str) -> Option<Operand> {
        self.lookup(&normalize(keyword))
    }

    /// Total number of registered keywords
    pub fn len(&self) -> usize {
        self.functions.len() + self.left_unary.len() + self.right_unary.len() + self.binary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, keyword: &str) -> Option<Operand> {
        if let Some(function) = self.functions.get(keyword) {
            return Some(Operand::Function(*function));
        }
        if let Some(op) = self.left_unary.get(keyword) {
            return Some(Operand::LeftUnary(*op));
        }
        if let Some(op) = self.right_unary.get(keyword) {
            return Some(Operand::RightUnary(*op));
        }
        self.binary.get(keyword).map(|op| Operand::Binary(*op))
    }

    fn insert(&mut self, keyword: String, operand: Operand) -> Option<Operand> {
        match operand {
            Operand::Function(function) => self
                .functions
                .insert(keyword, function)
                .map(Operand::Function),
            Operand::LeftUnary(op) => self.left_unary.insert(keyword, op).map(Operand::LeftUnary),
            Operand::RightUnary(op) => self
                .right_unary
                .insert(keyword, op)
                .map(Operand::RightUnary),
            Operand::Binary(op) => self.binary.insert(keyword, op).map(Operand::Binary),
        }
    }
}

fn normalize(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}
