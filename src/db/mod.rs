//! Analytical database access
//!
//! Read-only execution and schema introspection against a PostgreSQL store.
//! Both concerns are traits so stages can run against the in-tree mock.

use crate::core::{Result, ResultBlock};
use async_trait::async_trait;

/// Canned in-memory store for tests
pub mod mock;

/// Schema introspection to markdown
pub mod introspect;
/// Connection pool construction
pub mod pool;

/// Read-only statement execution
pub mod executor;

pub use executor::PgExecutor;
pub use introspect::PgIntrospector;
pub use mock::MockStore;
pub use pool::{connect_pool, DbConfig};

/// Read-only execution of one or more SQL statements.
///
/// Per-statement failures yield a [`ResultBlock`] with `error` set rather
/// than aborting the batch.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute each statement under a read-only transaction
    async fn execute_read(&self, statements: &[String]) -> Result<Vec<ResultBlock>>;
}

/// Markdown rendering of a schema's tables, columns and constraints
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    /// Describe a schema (optionally one table) as markdown.
    ///
    /// A non-existent schema yields an empty string; permission failures
    /// propagate as `db_error`.
    async fn describe(
        &self,
        schema: &str,
        table: Option<&str>,
        include_fks: bool,
        max_fk_values: u32,
    ) -> Result<String>;
}
