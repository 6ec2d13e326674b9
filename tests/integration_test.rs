use exprql::directory::{
    bind_filter, ConnectionPool, DirectoryConfig, DirectoryConnection, DirectoryDialect,
    DirectoryError, DirectoryExecutor, DirectoryResult, Entry, EntryStream, InMemoryDirectory,
    PoolConfig, SearchRequest,
};
use exprql::error::{CompileErrorKind, PostProcessResult, QueryError};
use exprql::expression::ExpressionParser;
use exprql::filter::{
    AttributeDefinition, AttributeSchema, DatasourceFilter, ExpressionQueryRequest,
    FilterDialect, LimitProcessor, PostProcessor,
};
use exprql::resolve::{MapResolvable, PropertyResolver, Resolvable, Resolver};
use exprql::tabular::TabularDialect;
use exprql::value::{Value, ValueType};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn schema() -> AttributeSchema {
    AttributeSchema::new()
        .with(AttributeDefinition::new("age", ValueType::Number))
        .with(AttributeDefinition::new("name", ValueType::String))
        .with(AttributeDefinition::new("a", ValueType::Number))
        .with(AttributeDefinition::new("b", ValueType::Number))
        .with(AttributeDefinition::new("c", ValueType::Number))
}

fn compile(dialect: Arc<dyn FilterDialect>, code: &str) -> anyhow::Result<DatasourceFilter> {
    let expr = ExpressionParser::default().parse_str(code)?;
    let mut filter = DatasourceFilter::new(dialect);
    filter.compile(&expr)?;
    Ok(filter)
}

fn tabular(code: &str) -> anyhow::Result<DatasourceFilter> {
    compile(Arc::new(TabularDialect::new(schema())), code)
}

fn directory(code: &str) -> anyhow::Result<DatasourceFilter> {
    compile(Arc::new(DirectoryDialect::new(schema())), code)
}

fn people() -> InMemoryDirectory {
    let dir = InMemoryDirectory::new();
    for (name, age) in [("Smith", "34"), ("Jones", "9"), ("Smith", "41"), ("Brown", "52")] {
        dir.add(
            Entry::new(format!("cn={}-{},dc=example", name, age))
                .with("name", name)
                .with("age", age),
        );
    }
    dir
}

/// Connection wrapper that counts searches
struct CountingConnection {
    inner: InMemoryDirectory,
    searches: Arc<AtomicUsize>,
}

impl DirectoryConnection for CountingConnection {
    fn search(&mut self, request: &SearchRequest) -> DirectoryResult<EntryStream<'_>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(request)
    }
}

fn executor(dir: InMemoryDirectory, searches: Arc<AtomicUsize>) -> DirectoryExecutor {
    let pool = ConnectionPool::new(PoolConfig::default(), move || {
        Ok(Box::new(CountingConnection {
            inner: dir.clone(),
            searches: Arc::clone(&searches),
        }) as Box<dyn DirectoryConnection>)
    });
    DirectoryExecutor::new(pool, DirectoryConfig::new("dc=example")).with_schema(schema())
}

fn request_with(root: &str, resolvable: MapResolvable) -> ExpressionQueryRequest {
    ExpressionQueryRequest::new().with_resolver(Arc::new(
        PropertyResolver::new().with_root(root, resolvable.into_shared()),
    ))
}

#[test]
fn test_tabular_conjunction() -> anyhow::Result<()> {
    let merged = tabular("object.age > 30 and object.name = 'Smith'")?
        .merge(&ExpressionQueryRequest::new())?;
    assert_eq!(merged.statement(), "(age > ? AND name = ?)");
    assert_eq!(merged.params(), &[Value::Integer(30), Value::string("Smith")]);
    Ok(())
}

#[test]
fn test_directory_conjunction() -> anyhow::Result<()> {
    let merged = directory("object.age > 30 and object.name = 'Smith'")?
        .merge(&ExpressionQueryRequest::new())?;
    assert_eq!(merged.statement(), "(&(!(age<=?))(name=?))");
    assert_eq!(merged.params(), &[Value::Integer(30), Value::string("Smith")]);
    assert_eq!(
        bind_filter(merged.statement(), merged.params())?,
        "(&(!(age<=30))(name=Smith))"
    );

    let result = executor(people(), Arc::new(AtomicUsize::new(0)))
        .query(&directory("object.age > 30 and object.name = 'Smith'")?, &ExpressionQueryRequest::new())?;
    let dns: Vec<_> = result.rows.iter().filter_map(|row| row.get("dn")).collect();
    assert_eq!(
        dns,
        vec![Value::string("cn=Smith-34,dc=example"), Value::string("cn=Smith-41,dc=example")]
    );
    Ok(())
}

#[test]
fn test_post_processor_limit_from_data() -> anyhow::Result<()> {
    for (threshold, expected) in [(2, 2), (10, 4)] {
        let mut filter = directory("object.age notnull")?;
        let data = ExpressionParser::default().parse_str("object.count")?;
        filter.add_post_processor(Arc::new(LimitProcessor), data);

        let request = request_with("object", MapResolvable::new().with("count", threshold));
        let result = executor(people(), Arc::new(AtomicUsize::new(0))).query(&filter, &request)?;
        assert_eq!(result.rows.len(), expected);
    }
    Ok(())
}

#[test]
fn test_merge_is_deterministic() -> anyhow::Result<()> {
    let filter = tabular("object.a = 1 and object.name like 'x%' or object.age >= user.min")?;
    let request = request_with("user", MapResolvable::new().with("min", 18));
    let first = filter.merge(&request)?.into_parts();
    for _ in 0..10 {
        assert_eq!(filter.merge(&request)?.into_parts(), first);
    }
    Ok(())
}

#[test]
fn test_source_order_is_preserved() -> anyhow::Result<()> {
    let code = "object.a = 1 and (object.b = 2 or object.c = 3)";
    let (statement, params) = tabular(code)?.merge(&ExpressionQueryRequest::new())?.into_parts();
    assert_eq!(statement, "(a = ? AND (b = ? OR c = ?))");
    assert_eq!(params, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);

    let (statement, params) = directory(code)?.merge(&ExpressionQueryRequest::new())?.into_parts();
    assert_eq!(statement, "(&(a=?)(|(b=?)(c=?)))");
    assert_eq!(params, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
    Ok(())
}

#[test]
fn test_object_is_reserved_for_every_backend() -> anyhow::Result<()> {
    for mut filter in [tabular("true")?, directory("true")?] {
        let err = filter
            .add_base_resolvable("object", MapResolvable::new().into_shared())
            .err();
        assert!(matches!(
            err.map(|e| e.kind),
            Some(CompileErrorKind::ReservedName(name)) if name == "object"
        ));
    }
    Ok(())
}

#[test]
fn test_custom_resolver_replaces_base_resolvables() -> anyhow::Result<()> {
    let mut filter = tabular("object.age > user.min")?;
    filter.add_base_resolvable("user", MapResolvable::new().with("min", 1).into_shared())?;
    let request = request_with("user", MapResolvable::new().with("min", 99));
    let params = |filter: &DatasourceFilter| -> anyhow::Result<Vec<Value>> {
        Ok(filter.merge(&request)?.into_parts().1)
    };

    assert_eq!(params(&filter)?, vec![Value::Integer(1)]);

    let custom = PropertyResolver::new().with_root("user", MapResolvable::new().with("min", 5).into_shared());
    filter.set_custom_resolver(Some(Arc::new(custom)));
    assert_eq!(params(&filter)?, vec![Value::Integer(5)]);

    filter.set_custom_resolver(None);
    assert_eq!(params(&filter)?, vec![Value::Integer(1)]);
    Ok(())
}

/// Records its runs and drops every row after the first
struct RecordingProcessor {
    name: &'static str,
    log: Arc<Mutex<Vec<(String, Value)>>>,
}

impl PostProcessor for RecordingProcessor {
    fn name(&self) -> &str {
        self.name
    }

    fn process(&self, rows: &mut Vec<Arc<dyn Resolvable>>, data: &Value) -> PostProcessResult<()> {
        self.log.lock().push((self.name.to_string(), data.clone()));
        rows.truncate(1);
        Ok(())
    }
}

/// Resolver that counts lookups of one path
struct CountingResolver {
    lookups: AtomicUsize,
}

impl Resolver for CountingResolver {
    fn resolve(&self, path: &str) -> Option<Value> {
        if path == "ctx.marker" {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            return Some(Value::string("m"));
        }
        None
    }
}

#[test]
fn test_post_processors_run_once_in_order() -> anyhow::Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let parser = ExpressionParser::default();
    let mut filter = directory("object.age > 0")?;
    for name in ["first", "second"] {
        let processor = RecordingProcessor {
            name,
            log: Arc::clone(&log),
        };
        filter.add_post_processor(Arc::new(processor), parser.parse_str("ctx.marker")?);
    }

    let searches = Arc::new(AtomicUsize::new(0));
    let resolver = Arc::new(CountingResolver {
        lookups: AtomicUsize::new(0),
    });
    let request = ExpressionQueryRequest::new().with_resolver(resolver.clone());
    let result = executor(people(), Arc::clone(&searches)).query(&filter, &request)?;

    assert_eq!(result.rows.len(), 1);
    assert_eq!(searches.load(Ordering::SeqCst), 1);
    assert_eq!(resolver.lookups.load(Ordering::SeqCst), 2);
    assert_eq!(
        *log.lock(),
        vec![
            ("first".to_string(), Value::string("m")),
            ("second".to_string(), Value::string("m"))
        ]
    );
    Ok(())
}

#[test]
fn test_size_limit_returns_collected_rows() -> anyhow::Result<()> {
    let dir = people().with_size_limit(3);
    let result = executor(dir, Arc::new(AtomicUsize::new(0)))
        .query(&directory("object.age >= 0")?, &ExpressionQueryRequest::new())?;
    assert!(result.truncated);
    assert_eq!(result.rows.len(), 3);
    assert_eq!(result.consumed, result.rows.len());
    Ok(())
}

/// Connection whose searches fail after the first entry
struct FailingConnection;

impl DirectoryConnection for FailingConnection {
    fn search(&mut self, _request: &SearchRequest) -> DirectoryResult<EntryStream<'_>> {
        Ok(Box::new(
            vec![
                Ok(Entry::new("cn=a,dc=example")),
                Err(DirectoryError::Search("server went away".to_string())),
            ]
            .into_iter(),
        ))
    }
}

#[test]
fn test_connection_released_when_search_fails() -> anyhow::Result<()> {
    let pool = ConnectionPool::new(
        PoolConfig {
            max_connections: 1,
            checkout_timeout_ms: 50,
        },
        || Ok(Box::new(FailingConnection) as Box<dyn DirectoryConnection>),
    );
    let executor = DirectoryExecutor::new(pool, DirectoryConfig::new("dc=example"));
    let filter = directory("object.age > 1")?;

    for _ in 0..3 {
        let err = executor.query(&filter, &ExpressionQueryRequest::new()).err();
        assert!(matches!(err, Some(QueryError::Execute(DirectoryError::Search(_)))));
        assert_eq!(err.map(|e| e.phase()), Some("execute"));
    }
    assert_eq!(executor.pool().idle_count(), 1);
    Ok(())
}

#[test]
fn test_concurrent_merges() -> anyhow::Result<()> {
    let filter = tabular("object.age > user.min and object.name = user.name")?;
    thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let filter = &filter;
                s.spawn(move || -> anyhow::Result<()> {
                    let user = MapResolvable::new()
                        .with("min", i)
                        .with("name", format!("user{}", i));
                    let request = request_with("user", user);
                    for _ in 0..50 {
                        let (statement, params) = filter.merge(&request)?.into_parts();
                        assert_eq!(statement, "(age > ? AND name = ?)");
                        assert_eq!(
                            params,
                            vec![Value::Integer(i64::from(i)), Value::string(format!("user{}", i))]
                        );
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("merge thread panicked"))??;
        }
        Ok(())
    })
}
