//! Schema introspection to markdown
//!
//! Renders a schema's tables, columns, constraints and foreign keys as a
//! markdown section per table, one row per column. Each FK column also gets
//! a value-range hint: up to `max_fk_values` distinct values sampled from
//! the referenced column, so downstream SQL synthesis has grounded filter
//! values to work with.

use crate::core::Result;
use crate::db::SchemaIntrospector;
use async_trait::async_trait;
use itertools::Itertools;
use sqlx::postgres::PgPool;
use sqlx::Row;

const TABLES_SQL: &str = "\
SELECT table_name FROM information_schema.tables \
WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
ORDER BY table_name";

const COLUMNS_SQL: &str = "\
SELECT
    c.column_name,
    c.data_type,
    c.is_nullable,
    c.column_default,
    pgd.description AS column_comment,
    ccu.table_name AS foreign_table,
    ccu.column_name AS foreign_column
FROM information_schema.columns c
LEFT JOIN pg_catalog.pg_statio_all_tables st
    ON c.table_schema = st.schemaname AND c.table_name = st.relname
LEFT JOIN pg_catalog.pg_description pgd
    ON pgd.objoid = st.relid AND pgd.objsubid = c.ordinal_position
LEFT JOIN information_schema.key_column_usage kcu
    ON c.table_name = kcu.table_name
    AND c.column_name = kcu.column_name
    AND c.table_schema = kcu.table_schema
LEFT JOIN information_schema.table_constraints tc
    ON kcu.constraint_name = tc.constraint_name
    AND kcu.table_schema = tc.table_schema
    AND tc.constraint_type = 'FOREIGN KEY'
LEFT JOIN information_schema.constraint_column_usage ccu
    ON tc.constraint_name = ccu.constraint_name
    AND tc.table_schema = ccu.table_schema
WHERE c.table_schema = $1 AND c.table_name = $2
ORDER BY c.ordinal_position";

#[derive(Debug, Default)]
struct ColumnInfo {
    name: String,
    data_type: String,
    nullable: String,
    default: String,
    comment: String,
    foreign_table: Option<String>,
    foreign_column: Option<String>,
    foreign_range: String,
}

/// PostgreSQL-backed introspector over the information schema
pub struct PgIntrospector {
    pool: PgPool,
}

impl PgIntrospector {
    /// Wrap a connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn table_names(&self, schema: &str, table: Option<&str>) -> Result<Vec<String>> {
        let rows = sqlx::query(TABLES_SQL).bind(schema).fetch_all(&self.pool).await?;
        let mut names: Vec<String> = rows.iter().map(|r| r.get::<String, _>(0)).collect();
        if let Some(filter) = table {
            names.retain(|n| n == filter);
        }
        Ok(names)
    }

    async fn columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(COLUMNS_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get::<String, _>("column_name"),
                data_type: row.get::<String, _>("data_type"),
                nullable: row.get::<String, _>("is_nullable"),
                default: row.get::<Option<String>, _>("column_default").unwrap_or_default(),
                comment: row.get::<Option<String>, _>("column_comment").unwrap_or_default(),
                foreign_table: row.get::<Option<String>, _>("foreign_table"),
                foreign_column: row.get::<Option<String>, _>("foreign_column"),
                foreign_range: String::new(),
            })
            .collect())
    }

    /// Sample up to `max_fk_values` distinct values from the referenced
    /// column. One extra row is fetched to detect truncation.
    async fn fk_value_range(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        max_fk_values: u32,
    ) -> String {
        let sql = format!(
            "SELECT DISTINCT \"{column}\"::text FROM \"{schema}\".\"{table}\" \
             WHERE \"{column}\" IS NOT NULL ORDER BY 1 LIMIT {}",
            max_fk_values + 1
        );

        match sqlx::query(&sql).fetch_all(&self.pool).await {
            Ok(rows) => {
                let values: Vec<String> =
                    rows.iter().filter_map(|r| r.get::<Option<String>, _>(0)).collect();
                if values.len() as u32 > max_fk_values {
                    let shown = values[..max_fk_values as usize].iter().join(", ");
                    format!("{shown} ...")
                } else {
                    values.iter().join(", ")
                }
            },
            Err(e) => format!("(unavailable: {e})"),
        }
    }
}

#[async_trait]
impl SchemaIntrospector for PgIntrospector {
    async fn describe(
        &self,
        schema: &str,
        table: Option<&str>,
        include_fks: bool,
        max_fk_values: u32,
    ) -> Result<String> {
        let tables = self.table_names(schema, table).await?;
        let mut sections = Vec::with_capacity(tables.len());

        for table in &tables {
            let mut columns = self.columns(schema, table).await?;

            if include_fks {
                for col in &mut columns {
                    if let (Some(ft), Some(fc)) = (&col.foreign_table, &col.foreign_column) {
                        col.foreign_range =
                            self.fk_value_range(schema, ft, fc, max_fk_values).await;
                    }
                }
            }

            sections.push(table_to_markdown(table, &columns));
            tracing::debug!(%table, columns = columns.len(), "table described");
        }

        Ok(sections.join("\n\n"))
    }
}

fn table_to_markdown(table: &str, columns: &[ColumnInfo]) -> String {
    let mut md = format!(
        "### Table: {table}\n\n\
         | column | type | nullable | default | comment | fk table | fk column | fk values |\n\
         |--------|------|----------|---------|---------|----------|-----------|-----------|\n"
    );
    for col in columns {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
            col.name,
            col.data_type,
            col.nullable,
            col.default,
            col.comment,
            col.foreign_table.as_deref().unwrap_or(""),
            col.foreign_column.as_deref().unwrap_or(""),
            col.foreign_range,
        ));
    }
    md.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_to_markdown_shape() {
        let columns = vec![
            ColumnInfo {
                name: "acct_period".to_string(),
                data_type: "date".to_string(),
                nullable: "NO".to_string(),
                ..Default::default()
            },
            ColumnInfo {
                name: "org_id".to_string(),
                data_type: "integer".to_string(),
                nullable: "YES".to_string(),
                foreign_table: Some("dim_org_struc".to_string()),
                foreign_column: Some("id".to_string()),
                foreign_range: "1, 2, 3".to_string(),
                ..Default::default()
            },
        ];

        let md = table_to_markdown("fact_profit", &columns);
        assert!(md.starts_with("### Table: fact_profit"));
        assert!(md.contains("| acct_period | date | NO |"));
        assert!(md.contains("| dim_org_struc | id | 1, 2, 3 |"));
    }
}
