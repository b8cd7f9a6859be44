//! Canned in-memory store for tests
//!
//! Serves a fixed schema description and fixed rows for every statement, and
//! counts calls so cancellation tests can assert that no further database
//! work happened after a cut-off.

use crate::core::{Result, ResultBlock};
use crate::db::{SchemaIntrospector, SqlExecutor};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Scripted executor + introspector
pub struct MockStore {
    schema_md: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    fail_matching: Mutex<Vec<String>>,
    execute_calls: AtomicUsize,
    describe_calls: AtomicUsize,
}

impl MockStore {
    /// Store serving the given schema markdown and no rows
    pub fn new(schema_md: impl Into<String>) -> Self {
        Self {
            schema_md: schema_md.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            fail_matching: Mutex::new(Vec::new()),
            execute_calls: AtomicUsize::new(0),
            describe_calls: AtomicUsize::new(0),
        }
    }

    /// Serve these columns and rows for every statement
    pub fn with_result(mut self, columns: Vec<&str>, rows: Vec<Vec<Value>>) -> Self {
        self.columns = columns.into_iter().map(str::to_string).collect();
        self.rows = rows;
        self
    }

    /// Fail any statement containing the given fragment
    pub fn failing_on(self, fragment: impl Into<String>) -> Self {
        self.fail_matching
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(fragment.into());
        self
    }

    /// Number of `execute_read` statements served
    pub fn executed_statements(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    /// Number of `describe` calls served
    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlExecutor for MockStore {
    async fn execute_read(&self, statements: &[String]) -> Result<Vec<ResultBlock>> {
        let fail_fragments = self.fail_matching.lock().unwrap_or_else(|e| e.into_inner()).clone();

        Ok(statements
            .iter()
            .enumerate()
            .map(|(index, sql)| {
                self.execute_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(fragment) = fail_fragments.iter().find(|f| sql.contains(f.as_str())) {
                    return ResultBlock {
                        sql_index: index,
                        sql: sql.clone(),
                        error: Some(format!("statement failed: matched '{fragment}'")),
                        ..Default::default()
                    };
                }
                ResultBlock {
                    sql_index: index,
                    sql: sql.clone(),
                    columns: self.columns.clone(),
                    rows: self.rows.clone(),
                    row_count: self.rows.len(),
                    error: None,
                }
            })
            .collect())
    }
}

#[async_trait]
impl SchemaIntrospector for MockStore {
    async fn describe(
        &self,
        _schema: &str,
        _table: Option<&str>,
        _include_fks: bool,
        _max_fk_values: u32,
    ) -> Result<String> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.schema_md.clone())
    }
}
