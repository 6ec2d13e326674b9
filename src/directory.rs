//! Directory-service backend.
//!
//! Compiled filters render to RFC 4515 search filters through
//! [`DirectoryDialect`]; a [`DirectoryExecutor`] binds the parameters,
//! runs the search on a pooled [`DirectoryConnection`] and maps entries to
//! rows:
//!
//! - **ConnectionPool**: bounded set of connections handed out as RAII guards
//! - **InMemoryDirectory**: connection answering searches from in-memory entries
//! - **DirectoryConfig**: search base, scope and entry-to-row mapping

pub mod config;
pub mod connection;
pub mod dialect;
pub mod executor;
pub mod memory;
pub mod pool;

pub use config::{DirectoryConfig, PoolConfig};
pub use connection::{
    DirectoryConnection, DirectoryError, DirectoryResult, Entry, EntryStream, SearchRequest,
    SearchScope,
};
pub use dialect::{bind_filter, DirectoryDialect};
pub use executor::{DirectoryExecutor, QueryResult};
pub use memory::{InMemoryDirectory, LdapFilter};
pub use pool::{ConnectionPool, PooledConnection};
