//! Statement execution and tabular reduction
//!
//! Runs every accepted statement that has not been executed yet, appends the
//! normalized result blocks in statement order and re-renders the markdown
//! summary. A failing statement becomes an error notice in the summary; the
//! stage never aborts the batch.

use crate::core::{PipelineState, ResultBlock, Result, StageOutcome};
use crate::db::SqlExecutor;
use crate::subgraph::{StageContext, Subgraph, SubgraphKind};
use async_trait::async_trait;
use itertools::Itertools;
use serde_json::Value;
use std::sync::Arc;

const STAGE: &str = "fetch_data";

/// Executes accepted SQL and renders the tabular summary
pub struct FetchDataStep {
    executor: Arc<dyn SqlExecutor>,
    max_cell_chars: usize,
}

impl FetchDataStep {
    /// Build the stage
    pub fn new(executor: Arc<dyn SqlExecutor>, max_cell_chars: usize) -> Self {
        Self {
            executor,
            max_cell_chars,
        }
    }
}

#[async_trait]
impl Subgraph for FetchDataStep {
    async fn invoke(&self, state: &mut PipelineState, ctx: &StageContext) -> Result<()> {
        let already_fetched = state.raw_data.len();
        let pending: Vec<String> = state.sql[already_fetched..].to_vec();

        if !pending.is_empty() {
            if ctx.cancel.is_cancelled() {
                state.push_history(STAGE, StageOutcome::Cancelled, "cancelled before execution");
                return Ok(());
            }

            tracing::info!(statements = pending.len(), "executing pending statements");
            let blocks = self.executor.execute_read(&pending).await?;

            for mut block in blocks {
                block.sql_index += already_fetched;
                match &block.error {
                    Some(error) => {
                        state.push_history(
                            STAGE,
                            StageOutcome::DbError,
                            format!("statement {} failed: {error}", block.sql_index + 1),
                        );
                    },
                    None => {
                        state.push_history(
                            STAGE,
                            StageOutcome::Ok,
                            format!("statement {} returned {} rows", block.sql_index + 1, block.row_count),
                        );
                    },
                }
                state.raw_data.push(block);
            }
        }

        state.md = render_markdown(&state.raw_data, self.max_cell_chars);
        Ok(())
    }

    fn name(&self) -> &str {
        STAGE
    }

    fn kind(&self) -> SubgraphKind {
        SubgraphKind::FetchData
    }
}

/// One `## Statement i` section per block: the statement, a row count and a
/// pipe table (or an error notice).
fn render_markdown(blocks: &[ResultBlock], max_cell_chars: usize) -> String {
    let mut md = String::new();

    for block in blocks {
        md.push_str(&format!("## Statement {}\n\n", block.sql_index + 1));
        md.push_str(&format!("```sql\n{}\n```\n\n", block.sql));

        if let Some(error) = &block.error {
            md.push_str(&format!("> query failed: {error}\n\n"));
            continue;
        }

        md.push_str(&format!("**Rows**: {}\n\n", block.row_count));

        if block.rows.is_empty() {
            md.push_str("_no rows_\n\n");
            continue;
        }

        md.push_str(&format!("| {} |\n", block.columns.iter().join(" | ")));
        md.push_str(&format!(
            "|{}\n",
            block.columns.iter().map(|_| "---|").join("")
        ));
        for row in &block.rows {
            let cells = row
                .iter()
                .map(|value| format_cell(value, max_cell_chars))
                .join(" | ");
            md.push_str(&format!("| {cells} |\n"));
        }
        md.push('\n');
    }

    md.trim_end().to_string()
}

fn format_cell(value: &Value, max_cell_chars: usize) -> String {
    let raw = match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let escaped = raw.replace('|', "\\|").replace('\n', "<br>");

    if escaped.chars().count() > max_cell_chars {
        let truncated: String = escaped.chars().take(max_cell_chars).collect();
        format!("{truncated}…")
    } else {
        escaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MockStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_fetch_appends_blocks_and_renders_table() {
        let store = Arc::new(MockStore::new("").with_result(
            vec!["account", "total"],
            vec![
                vec![json!("retail"), json!("1200.50")],
                vec![json!("wholesale"), json!(900)],
            ],
        ));
        let step = FetchDataStep::new(store, 200);

        let mut state = PipelineState::new("q");
        state.sql = vec!["SELECT account, SUM(amt) FROM fact_revenue GROUP BY account".to_string()];
        step.invoke(&mut state, &StageContext::default()).await.unwrap();

        assert_eq!(state.raw_data.len(), 1);
        assert_eq!(state.raw_data[0].sql_index, 0);
        assert_eq!(state.raw_data[0].row_count, 2);
        assert!(state.md.contains("## Statement 1"));
        assert!(state.md.contains("| account | total |"));
        assert!(state.md.contains("| retail | 1200.50 |"));
    }

    #[tokio::test]
    async fn test_fetch_only_runs_pending_statements() {
        let store = Arc::new(MockStore::new("").with_result(vec!["n"], vec![vec![json!(1)]]));
        let step = FetchDataStep::new(store.clone(), 200);

        let mut state = PipelineState::new("q");
        state.sql = vec!["SELECT 1".to_string()];
        step.invoke(&mut state, &StageContext::default()).await.unwrap();

        state.sql.push("SELECT 2".to_string());
        step.invoke(&mut state, &StageContext::default()).await.unwrap();

        assert_eq!(state.raw_data.len(), 2);
        assert_eq!(state.raw_data[1].sql_index, 1);
        assert_eq!(state.raw_data[1].sql, "SELECT 2");
        assert_eq!(store.executed_statements(), 2);
    }

    #[tokio::test]
    async fn test_failed_statement_renders_notice_without_aborting() {
        let store = Arc::new(
            MockStore::new("")
                .with_result(vec!["n"], vec![vec![json!(1)]])
                .failing_on("bad_table"),
        );
        let step = FetchDataStep::new(store, 200);

        let mut state = PipelineState::new("q");
        state.sql = vec![
            "SELECT * FROM bad_table".to_string(),
            "SELECT 1".to_string(),
        ];
        step.invoke(&mut state, &StageContext::default()).await.unwrap();

        assert_eq!(state.raw_data.len(), 2);
        assert!(state.raw_data[0].error.is_some());
        assert!(state.md.contains("> query failed:"));
        assert!(state
            .history
            .iter()
            .any(|e| e.outcome == StageOutcome::DbError));
    }

    #[tokio::test]
    async fn test_empty_result_renders_no_rows_marker() {
        let store = Arc::new(MockStore::new(""));
        let step = FetchDataStep::new(store, 200);

        let mut state = PipelineState::new("q");
        state.sql = vec!["SELECT 1 WHERE false".to_string()];
        step.invoke(&mut state, &StageContext::default()).await.unwrap();

        assert!(state.md.contains("_no rows_"));
    }

    #[test]
    fn test_cell_escaping_and_truncation() {
        assert_eq!(format_cell(&json!("a|b\nc"), 200), "a\\|b<br>c");
        assert_eq!(format_cell(&Value::Null, 200), "NULL");
        let long = "x".repeat(300);
        let cell = format_cell(&json!(long), 200);
        assert_eq!(cell.chars().count(), 201);
        assert!(cell.ends_with('…'));
    }
}
