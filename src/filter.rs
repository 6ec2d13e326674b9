//! Compilation of expressions into backend-native filters.
//!
//! A [`DatasourceFilter`] compiles an [`crate::expression::Expression`] once
//! into a tree of [`FilterPart`]s using a backend's [`FilterDialect`]. Each
//! execution then merges the tree into a [`MergedFilter`] for its
//! [`ExpressionQueryRequest`]; parts that depend on the request are produced
//! by [`FilterPartGenerator`]s during that merge.

pub mod compiler;
pub mod datasource;
pub mod dialect;
pub mod merged;
pub mod part;
pub mod postprocess;
pub mod request;
pub mod schema;

pub use datasource::DatasourceFilter;
pub use dialect::{FilterDialect, Term};
pub use merged::MergedFilter;
pub use part::{FilterPart, FilterPartGenerator, FilterPartItem};
pub use postprocess::{
    ExpressionFilterProcessor, LimitProcessor, PostProcessor, SortProcessor, DATA_ROOT,
};
pub use request::{ExpressionQueryRequest, SortKey, SortOrder};
pub use schema::{AttributeDefinition, AttributeSchema};
