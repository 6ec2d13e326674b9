//! Filter fragments.
//!
//! A [`FilterPart`] is an ordered list of items: static text with its bind
//! parameters, nested parts, and generators that produce a part only when
//! the filter is merged for a concrete request. Item order mirrors the
//! left-to-right order of the source expression, and parameters travel with
//! the text that references them, so flattening the tree keeps text and
//! parameters in lockstep.

use super::merged::MergedFilter;
use super::request::ExpressionQueryRequest;
use crate::error::MergeResult;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

type GenerateFn = dyn Fn(&ExpressionQueryRequest) -> MergeResult<FilterPart> + Send + Sync;

/// Deferred producer of a filter part, invoked at merge time
#[derive(Clone)]
pub struct FilterPartGenerator {
    generate: Arc<GenerateFn>,
}

impl FilterPartGenerator {
    pub fn new(
        generate: impl Fn(&ExpressionQueryRequest) -> MergeResult<FilterPart> + Send + Sync + 'static,
    ) -> Self {
        Self {
            generate: Arc::new(generate),
        }
    }

    pub fn generate(&self, request: &ExpressionQueryRequest) -> MergeResult<FilterPart> {
        (self.generate)(request)
    }
}

impl fmt::Debug for FilterPartGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FilterPartGenerator")
    }
}

/// One child of a filter part
#[derive(Debug, Clone)]
pub enum FilterPartItem {
    Text { text: String, params: Vec<Value> },
    Part(FilterPart),
    Generator(FilterPartGenerator),
}

/// Composable backend filter fragment
#[derive(Debug, Clone, Default)]
pub struct FilterPart {
    items: Vec<FilterPartItem>,
}

impl FilterPart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Part holding static text without parameters
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new().text(text)
    }

    /// Part holding static text and the parameters it references
    pub fn with_params(text: impl Into<String>, params: Vec<Value>) -> Self {
        let mut part = Self::new();
        part.push_text(text, params);
        part
    }

    /// Part whose content is produced at merge time
    pub fn deferred(generator: FilterPartGenerator) -> Self {
        Self {
            items: vec![FilterPartItem::Generator(generator)],
        }
    }

    /// Builder-style text append
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text, Vec::new());
        self
    }

    /// Builder-style nested part append
    pub fn part(mut self, part: FilterPart) -> Self {
        self.push_part(part);
        self
    }

    pub fn push_text(&mut self, text: impl Into<String>, params: Vec<Value>) {
        let text = text.into();
        // Adjacent static text collapses into one item
        if let Some(FilterPartItem::Text {
            text: last,
            params: last_params,
        }) = self.items.last_mut()
        {
            last.push_str(&text);
            last_params.extend(params);
            return;
        }
        self.items.push(FilterPartItem::Text { text, params });
    }

    pub fn push_part(&mut self, part: FilterPart) {
        self.items.push(FilterPartItem::Part(part));
    }

    pub fn push_generator(&mut self, generator: FilterPartGenerator) {
        self.items.push(FilterPartItem::Generator(generator));
    }

    pub fn items(&self) -> &[FilterPartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Check whether merging depends on the request
    pub fn is_deferred(&self) -> bool {
        self.items.iter().any(|item| match item {
            FilterPartItem::Text { .. } => false,
            FilterPartItem::Part(part) => part.is_deferred(),
            FilterPartItem::Generator(_) => true,
        })
    }

    /// Append this part to `merged`, depth first. Generators are invoked
    /// with the merged filter's request and their output merged in place.
    /// The part itself is never modified.
    pub fn merge_into(&self, merged: &mut MergedFilter) -> MergeResult<()> {
        for item in &self.items {
            match item {
                FilterPartItem::Text { text, params } => merged.append(text, params),
                FilterPartItem::Part(part) => part.merge_into(merged)?,
                FilterPartItem::Generator(generator) => {
                    let part = generator.generate(merged.request())?;
                    part.merge_into(merged)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MergeError;

    #[test]
    fn test_merge_preserves_order() -> MergeResult<()> {
        let part = FilterPart::new()
            .text("(")
            .part(FilterPart::with_params("a = ?", vec![Value::Integer(1)]))
            .text(" AND ")
            .part(FilterPart::with_params("b = ?", vec![Value::string("x")]))
            .text(")");

        let request = ExpressionQueryRequest::new();
        let mut merged = MergedFilter::new(request);
        part.merge_into(&mut merged)?;
        assert_eq!(merged.statement(), "(a = ? AND b = ?)");
        assert_eq!(merged.params(), &[Value::Integer(1), Value::string("x")]);
        Ok(())
    }

    #[test]
    fn test_generator_sees_request() -> MergeResult<()> {
        let generator = FilterPartGenerator::new(|request: &ExpressionQueryRequest| {
            Ok(FilterPart::with_params(
                "offset = ?",
                vec![Value::Integer(request.start() as i64)],
            ))
        });
        let part = FilterPart::from_text("x AND ").part(FilterPart::deferred(generator));
        assert!(part.is_deferred());

        let mut merged = MergedFilter::new(ExpressionQueryRequest::new().with_start(20));
        part.merge_into(&mut merged)?;
        assert_eq!(merged.statement(), "x AND offset = ?");
        assert_eq!(merged.params(), &[Value::Integer(20)]);

        // The tree is unchanged and can be merged again for another request
        let mut merged = MergedFilter::new(ExpressionQueryRequest::new().with_start(40));
        part.merge_into(&mut merged)?;
        assert_eq!(merged.params(), &[Value::Integer(40)]);
        Ok(())
    }

    #[test]
    fn test_failing_generator_aborts_merge() {
        let part = FilterPart::from_text("a").part(FilterPart::deferred(FilterPartGenerator::new(
            |_: &ExpressionQueryRequest| Err(MergeError::NotCompiled),
        )));
        let mut merged = MergedFilter::new(ExpressionQueryRequest::new());
        assert_eq!(part.merge_into(&mut merged), Err(MergeError::NotCompiled));
    }

    #[test]
    fn test_adjacent_text_collapses() {
        let part = FilterPart::from_text("a").text("b");
        assert_eq!(part.items().len(), 1);
        assert!(!part.is_deferred());
    }
}
