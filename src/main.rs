//! exprql - compile filter expressions into backend queries

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser as ClapParser, ValueEnum};
use exprql::directory::{bind_filter, DirectoryDialect};
use exprql::expression::{wire, ExpressionParser};
use exprql::filter::{
    AttributeDefinition, AttributeSchema, DatasourceFilter, ExpressionQueryRequest, FilterDialect,
    SortKey,
};
use exprql::resolve::{MapResolvable, PropertyResolver};
use exprql::tabular::TabularDialect;
use exprql::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Backend {
    Tabular,
    Directory,
}

/// Compile an expression into a backend filter and print the merged statement
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Expression to compile, e.g. "object.age > 30 and object.name = 'Smith'"
    expression: String,

    /// Backend to compile for
    #[arg(short, long, value_enum, default_value = "tabular")]
    backend: Backend,

    /// Attribute declaration `name[=backend]:TYPE[?]`; `?` marks it nullable
    #[arg(short, long = "attribute")]
    attributes: Vec<String>,

    /// Request variable `root.property=value`
    #[arg(short = 'v', long = "var")]
    vars: Vec<String>,

    /// Rows to skip
    #[arg(long, default_value = "0")]
    start: usize,

    /// Maximum rows to return
    #[arg(long)]
    count: Option<usize>,

    /// Sort key `attribute[:asc|desc]`
    #[arg(short, long)]
    sort: Vec<String>,

    /// Print the encoded expression size
    #[arg(long)]
    wire: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let mut schema = AttributeSchema::new();
    for declaration in &args.attributes {
        let attribute = AttributeDefinition::parse(declaration)
            .ok_or_else(|| anyhow!("Invalid attribute declaration '{}'", declaration))?;
        schema.insert(attribute);
    }

    let dialect: Arc<dyn FilterDialect> = match args.backend {
        Backend::Tabular => Arc::new(TabularDialect::new(schema)),
        Backend::Directory => Arc::new(DirectoryDialect::new(schema)),
    };

    let expression = ExpressionParser::default()
        .parse_str(&args.expression)
        .context("Failed to parse expression")?;
    if args.wire {
        let encoded = wire::encode(&expression).context("Failed to encode expression")?;
        println!("wire: {} bytes", encoded.len());
    }

    let mut filter = DatasourceFilter::new(dialect);
    filter
        .compile(&expression)
        .context("Failed to compile expression")?;

    let request = build_request(&args)?;
    let merged = filter.merge(&request).context("Failed to merge filter")?;

    println!("statement: {}", merged.statement());
    let params: Vec<String> = merged.params().iter().map(format_param).collect();
    println!("params: [{}]", params.join(", "));
    if let Backend::Directory = args.backend {
        let bound = bind_filter(merged.statement(), merged.params())
            .context("Failed to bind directory filter")?;
        println!("filter: {}", bound);
    }

    Ok(())
}

fn build_request(args: &Args) -> Result<ExpressionQueryRequest> {
    let mut roots: BTreeMap<String, MapResolvable> = BTreeMap::new();
    for var in &args.vars {
        let (path, value) = var
            .split_once('=')
            .ok_or_else(|| anyhow!("Variable '{}' is not of the form root.property=value", var))?;
        let Some((root, property)) = path.split_once('.') else {
            bail!("Variable path '{}' needs a root and a property", path);
        };
        roots
            .entry(root.to_string())
            .or_default()
            .insert(property, parse_literal(value));
    }

    let mut resolver = PropertyResolver::new();
    for (name, root) in roots {
        resolver.insert_root(name, root.into_shared());
    }
    let mut request = ExpressionQueryRequest::new()
        .with_resolver(Arc::new(resolver))
        .with_start(args.start);
    if let Some(count) = args.count {
        request = request.with_count(count);
    }
    for spec in &args.sort {
        let key = SortKey::parse(spec).ok_or_else(|| anyhow!("Invalid sort key '{}'", spec))?;
        request = request.with_sort(key.attribute, key.order);
    }
    Ok(request)
}

/// Interpret a command-line value; comma-separated values become a collection
fn parse_literal(text: &str) -> Value {
    if text.contains(',') {
        return Value::Collection(text.split(',').map(|item| parse_literal(item.trim())).collect());
    }
    if text.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(b) = text.parse::<bool>() {
        return Value::Boolean(b);
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::Integer(i);
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => Value::Float(f),
        _ => Value::string(text),
    }
}

fn format_param(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s),
        Value::Null => "NULL".to_string(),
        other => other.to_text(),
    }
}
