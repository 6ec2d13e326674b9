//! Per-backend compilation context.

use super::compiler::{resolve_attribute, Compiler};
use super::dialect::FilterDialect;
use super::merged::MergedFilter;
use super::part::FilterPart;
use super::postprocess::PostProcessor;
use super::request::ExpressionQueryRequest;
use crate::error::{
    CompileError, CompileErrorKind, CompileResult, MergeError, MergeResult, PostProcessError,
    PostProcessResult,
};
use crate::expression::{is_object_path, Expression, OBJECT_ROOT};
use crate::resolve::{navigate, split_root, Resolvable, Resolver};
use crate::value::{Value, ValueType};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

/// Processor plus the expression that supplies its data
struct PostProcessorBinding {
    processor: Arc<dyn PostProcessor>,
    data: Expression,
}

/// Resolution order for non-row paths: the custom resolver when one is
/// set, the named base resolvables otherwise, then the request's resolver
struct ResolverChain {
    custom: Option<Arc<dyn Resolver>>,
    bases: Arc<HashMap<String, Arc<dyn Resolvable>>>,
    fallback: Option<Arc<dyn Resolver>>,
}

impl Resolver for ResolverChain {
    fn resolve(&self, path: &str) -> Option<Value> {
        let own = match &self.custom {
            Some(custom) => custom.resolve(path),
            None => {
                let (root, rest) = split_root(path);
                self.bases.get(root).and_then(|base| {
                    let segments: Vec<&str> =
                        rest.map(|rest| rest.split('.').collect()).unwrap_or_default();
                    navigate(&Value::object(Arc::clone(base)), &segments)
                })
            }
        };
        own.or_else(|| self.fallback.as_ref().and_then(|r| r.resolve(path)))
    }
}

/// An expression compiled for one backend.
///
/// Compilation and registration of resolvables and post-processors take
/// `&mut self`; once compiled, [`DatasourceFilter::merge`] takes `&self`
/// and can run concurrently for many requests.
pub struct DatasourceFilter {
    dialect: Arc<dyn FilterDialect>,
    base_resolvables: Arc<HashMap<String, Arc<dyn Resolvable>>>,
    custom_resolver: Option<Arc<dyn Resolver>>,
    root: Option<FilterPart>,
    post_processors: Vec<PostProcessorBinding>,
    expression: String,
}

impl DatasourceFilter {
    pub fn new(dialect: Arc<dyn FilterDialect>) -> Self {
        Self {
            dialect,
            base_resolvables: Arc::new(HashMap::new()),
            custom_resolver: None,
            root: None,
            post_processors: Vec::new(),
            expression: String::new(),
        }
    }

    /// Name of the backend this filter compiles for
    pub fn backend(&self) -> &'static str {
        self.dialect.name()
    }

    pub fn dialect(&self) -> &Arc<dyn FilterDialect> {
        &self.dialect
    }

    /// Source text of the compiled expression
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn root(&self) -> Option<&FilterPart> {
        self.root.as_ref()
    }

    fn error(&self, kind: CompileErrorKind) -> CompileError {
        CompileError::new(self.backend(), self.expression.clone(), kind)
    }

    /// Compile `expr` into this filter's root part, replacing any earlier
    /// compilation. On error the filter holds no root.
    pub fn compile(&mut self, expr: &Expression) -> CompileResult<()> {
        self.root = None;
        self.expression = expr.to_string();

        let compiler = Compiler::new(Arc::clone(&self.dialect), self.expression.clone());
        let root = compiler
            .compile_predicate(expr)
            .map_err(|kind| self.error(kind))?;

        debug!(
            "Compiled '{}' for {} backend (deferred: {})",
            self.expression,
            self.backend(),
            root.is_deferred()
        );
        self.root = Some(root);
        Ok(())
    }

    /// Backend name of the attribute an `object.*` path refers to
    pub fn get_variable_name(&self, path: &str, expected: ValueType) -> CompileResult<String> {
        resolve_attribute(self.dialect.as_ref(), path, expected)
            .map(|attr| attr.backend_name.clone())
            .map_err(|kind| self.error(kind))
    }

    pub fn generate_constant_filter_part(&self, text: impl Into<String>, params: Vec<Value>) -> FilterPart {
        FilterPart::with_params(text, params)
    }

    pub fn generate_variable_filter_part(
        &self,
        path: &str,
        expected: ValueType,
    ) -> CompileResult<FilterPart> {
        resolve_attribute(self.dialect.as_ref(), path, expected)
            .map(|attr| self.dialect.attribute_part(attr))
            .map_err(|kind| self.error(kind))
    }

    pub fn generate_literal_filter_part(
        &self,
        value: &Value,
        expected: ValueType,
    ) -> CompileResult<FilterPart> {
        self.dialect
            .literal_part(value, expected)
            .map_err(|kind| self.error(kind))
    }

    /// Register a named root for path resolution, returning the resolvable
    /// previously registered under that name
    pub fn add_base_resolvable(
        &mut self,
        name: impl Into<String>,
        resolvable: Arc<dyn Resolvable>,
    ) -> CompileResult<Option<Arc<dyn Resolvable>>> {
        let name = name.into();
        if name == OBJECT_ROOT {
            return Err(self.error(CompileErrorKind::ReservedName(name)));
        }
        Ok(Arc::make_mut(&mut self.base_resolvables).insert(name, resolvable))
    }

    /// Use `resolver` instead of the base resolvables, or resume using them
    /// with `None`. The base resolvables are kept either way.
    pub fn set_custom_resolver(&mut self, resolver: Option<Arc<dyn Resolver>>) {
        self.custom_resolver = resolver;
    }

    fn attribute_path(attribute: &str) -> String {
        if is_object_path(attribute) {
            attribute.to_string()
        } else {
            format!("{}.{}", OBJECT_ROOT, attribute)
        }
    }

    /// Whether the attribute may hold NULL; accepts `name` or `object.name`
    pub fn allows_null_values(&self, attribute: &str) -> CompileResult<bool> {
        let path = Self::attribute_path(attribute);
        resolve_attribute(self.dialect.as_ref(), &path, ValueType::Any)
            .map(|attr| attr.nullable)
            .map_err(|kind| self.error(kind))
    }

    pub fn get_value_type(&self, attribute: &str) -> CompileResult<ValueType> {
        let path = Self::attribute_path(attribute);
        resolve_attribute(self.dialect.as_ref(), &path, ValueType::Any)
            .map(|attr| attr.value_type)
            .map_err(|kind| self.error(kind))
    }

    pub fn has_post_processors(&self) -> bool {
        !self.post_processors.is_empty()
    }

    /// Bind a processor; `data` is evaluated once per execution
    pub fn add_post_processor(&mut self, processor: Arc<dyn PostProcessor>, data: Expression) {
        self.post_processors
            .push(PostProcessorBinding { processor, data });
    }

    /// Resolver used for a request: this filter's chain in front of the
    /// request's own resolver
    pub fn resolver_for(&self, request: &ExpressionQueryRequest) -> Arc<dyn Resolver> {
        Arc::new(ResolverChain {
            custom: self.custom_resolver.clone(),
            bases: Arc::clone(&self.base_resolvables),
            fallback: request.resolver().cloned(),
        })
    }

    /// Resolve a non-row path the way merge and post-processing do
    pub fn resolve(&self, path: &str, request: &ExpressionQueryRequest) -> Option<Value> {
        self.resolver_for(request).resolve(path)
    }

    /// Flatten the compiled filter for one request. The filter is not
    /// modified, and nothing is returned unless the whole merge succeeds.
    pub fn merge(&self, request: &ExpressionQueryRequest) -> MergeResult<MergedFilter> {
        let root = self.root.as_ref().ok_or(MergeError::NotCompiled)?;
        let mut merged = MergedFilter::new(request.rebind(self.resolver_for(request)));
        root.merge_into(&mut merged)?;

        debug!(
            "Merged {} filter: {} ({} parameters)",
            self.backend(),
            merged.statement(),
            merged.params().len()
        );
        Ok(merged)
    }

    /// Run the post-processors in registration order over `rows`. Each
    /// data expression is evaluated once against `request`.
    pub fn post_process(
        &self,
        rows: &mut Vec<Arc<dyn Resolvable>>,
        request: &ExpressionQueryRequest,
    ) -> PostProcessResult<()> {
        if self.post_processors.is_empty() {
            return Ok(());
        }

        let request = request.rebind(self.resolver_for(request));
        for binding in &self.post_processors {
            let data = request
                .evaluate(&binding.data)
                .map_err(|source| PostProcessError::Data {
                    expression: binding.data.to_string(),
                    source,
                })?;
            let before = rows.len();
            binding.processor.process(rows, &data)?;
            debug!(
                "Post-processor {} kept {} of {} rows",
                binding.processor.name(),
                rows.len(),
                before
            );
        }
        Ok(())
    }
}
