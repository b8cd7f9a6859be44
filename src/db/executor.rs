//! Read-only SQL execution against PostgreSQL
//!
//! Each statement runs in its own read-only transaction on a pooled
//! connection. Values are coerced to JSON-serialisable forms: binary columns
//! to base64, timestamps to ISO-8601 strings and arbitrary-precision
//! numerics to decimal strings to avoid precision loss.

use crate::core::{Result, ResultBlock};
use crate::db::SqlExecutor;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Row, TypeInfo};

/// PostgreSQL-backed executor
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    /// Wrap a connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run_one(&self, index: usize, sql: &str) -> ResultBlock {
        let mut block = ResultBlock {
            sql_index: index,
            sql: sql.to_string(),
            ..Default::default()
        };

        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                block.error = Some(format!("connection acquisition failed: {e}"));
                return block;
            },
        };

        if let Err(e) = sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await {
            block.error = Some(format!("failed to enter read-only transaction: {e}"));
            return block;
        }

        match sqlx::query(sql).fetch_all(&mut *tx).await {
            Ok(rows) => {
                if let Some(first) = rows.first() {
                    block.columns = first.columns().iter().map(|c| c.name().to_string()).collect();
                }
                block.rows = rows.iter().map(row_to_json).collect();
                block.row_count = block.rows.len();
            },
            Err(e) => {
                block.error = Some(format!("statement failed: {e}"));
            },
        }

        tx.rollback().await.ok();
        block
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute_read(&self, statements: &[String]) -> Result<Vec<ResultBlock>> {
        let mut blocks = Vec::with_capacity(statements.len());
        for (index, sql) in statements.iter().enumerate() {
            tracing::debug!(index, %sql, "executing statement");
            let block = self.run_one(index, sql).await;
            if let Some(error) = &block.error {
                tracing::warn!(index, %error, "statement failed");
            } else {
                tracing::debug!(index, rows = block.row_count, "statement succeeded");
            }
            blocks.push(block);
        }
        Ok(blocks)
    }
}

fn row_to_json(row: &PgRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|index| column_value_to_json(row, index))
        .collect()
}

/// Decode one column into JSON by declared type, falling back to a textual
/// representation for types without a native JSON form.
fn column_value_to_json(row: &PgRow, index: usize) -> Value {
    let type_name = row.columns()[index].type_info().name().to_uppercase();

    match type_name.as_str() {
        "INT2" => decode(row, index, |v: i16| Value::from(v)),
        "INT4" => decode(row, index, |v: i32| Value::from(v)),
        "INT8" | "OID" => decode(row, index, |v: i64| Value::from(v)),
        "FLOAT4" => decode(row, index, |v: f32| float_value(f64::from(v))),
        "FLOAT8" => decode(row, index, float_value),
        // Decimal strings keep full precision across the JSON boundary
        "NUMERIC" => decode(row, index, |v: rust_decimal::Decimal| Value::from(v.to_string())),
        "BOOL" => decode(row, index, |v: bool| Value::from(v)),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => {
            decode(row, index, |v: String| Value::from(v))
        },
        "TIMESTAMPTZ" => decode(row, index, |v: DateTime<Utc>| Value::from(v.to_rfc3339())),
        "TIMESTAMP" => decode(row, index, |v: NaiveDateTime| {
            Value::from(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }),
        "DATE" => decode(row, index, |v: NaiveDate| Value::from(v.to_string())),
        "TIME" => decode(row, index, |v: NaiveTime| Value::from(v.to_string())),
        "BYTEA" => decode(row, index, |v: Vec<u8>| Value::from(BASE64.encode(v))),
        "JSON" | "JSONB" => decode(row, index, |v: Value| v),
        "UUID" => decode(row, index, |v: uuid::Uuid| Value::from(v.to_string())),
        _ => decode(row, index, |v: String| Value::from(v)),
    }
}

fn decode<'r, T, F>(row: &'r PgRow, index: usize, into_json: F) -> Value
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    F: FnOnce(T) -> Value,
{
    match row.try_get::<Option<T>, usize>(index) {
        Ok(Some(value)) => into_json(value),
        Ok(None) => Value::Null,
        Err(_) => row
            .try_get::<Option<String>, usize>(index)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}

fn float_value(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or_else(|| Value::from(v.to_string()))
}
