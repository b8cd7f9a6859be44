//! SQL synthesis with validation and self-repair
//!
//! State machine for one sub-query: Prepare → Synthesise → Validate →
//! (Accept | Repair) → Terminal. Repair feeds the validator's message back
//! into the prompt and costs one unit of the retry budget; exhaustion leaves
//! `sql_error` set and the plan step unfilled for the orchestrator to skip.

use crate::core::{FinsightError, PipelineState, Result, StageOutcome};
use crate::db::SchemaIntrospector;
use crate::llm::chain::vars;
use crate::llm::{JsonStructOutputParser, LanguageModel, LlmChain, PromptTemplate};
use crate::sql::SqlValidator;
use crate::subgraph::{StageContext, Subgraph, SubgraphKind};
use async_trait::async_trait;
use std::sync::Arc;

const STAGE: &str = "generate_sql";

const GENERATE_TEMPLATE: &str = "\
You are an expert PostgreSQL analyst. Write one SELECT statement that answers \
the sub-question below against the described schema.

Rules:
* A single SELECT (a CTE-wrapped SELECT is fine); never more than one \
statement and never a write.
* Use only tables and columns from the schema description.
* If a previous attempt failed, fix the reported problem.

Output strict JSON and nothing else:
{{\"sql\": \"<statement>\", \"explanation\": \"<one sentence>\"}}

Sub-question: {sub_query}

Schema:
{db_struc}

Previous error (empty if none):
{prior_error}";

/// Configuration for the SQL generation stage
#[derive(Debug, Clone)]
pub struct GenerateSqlOptions {
    /// Repair attempts per plan step
    pub retry_budget: u32,
    /// Schema introspected for the prompt
    pub schema: String,
    /// Distinct values sampled per FK column
    pub max_fk_values: u32,
}

impl Default for GenerateSqlOptions {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            schema: "public".to_string(),
            max_fk_values: 30,
        }
    }
}

/// Synthesises, validates and repairs SQL for one plan step
pub struct GenerateSqlStep {
    chain: LlmChain,
    introspector: Arc<dyn SchemaIntrospector>,
    validator: SqlValidator,
    options: GenerateSqlOptions,
}

impl GenerateSqlStep {
    /// Build the stage
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        introspector: Arc<dyn SchemaIntrospector>,
        options: GenerateSqlOptions,
    ) -> Result<Self> {
        let chain = LlmChain::new(
            PromptTemplate::new(GENERATE_TEMPLATE)?,
            llm,
            Arc::new(JsonStructOutputParser::new()?),
        );
        Ok(Self {
            chain,
            introspector,
            validator: SqlValidator::new(),
            options,
        })
    }

    fn extract_sql(json_text: &str) -> Result<String> {
        let value: serde_json::Value = serde_json::from_str(json_text).map_err(|e| {
            FinsightError::Parse {
                message: format!("completion is not valid JSON: {e}"),
            }
        })?;
        value
            .get("sql")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FinsightError::Parse {
                message: "completion JSON has no 'sql' field".to_string(),
            })
    }
}

#[async_trait]
impl Subgraph for GenerateSqlStep {
    async fn invoke(&self, state: &mut PipelineState, ctx: &StageContext) -> Result<()> {
        let sub_query = state
            .plan
            .get(state.current_plan_idx)
            .cloned()
            .ok_or_else(|| crate::config_error!(
                "plan index {} out of range ({} steps)",
                state.current_plan_idx,
                state.plan.len()
            ))?;

        // Prepare: lazily fill the schema description, reset the budget.
        if state.db_struc.is_none() {
            if ctx.cancel.is_cancelled() {
                state.push_history(STAGE, StageOutcome::Cancelled, "cancelled before introspection");
                return Ok(());
            }
            let md = self
                .introspector
                .describe(&self.options.schema, None, true, self.options.max_fk_values)
                .await?;
            state.db_struc = Some(md);
        }
        state.retries_remaining = self.options.retry_budget;
        state.sql_error = None;

        let attempts = self.options.retry_budget + 1;
        for attempt in 1..=attempts {
            if ctx.cancel.is_cancelled() {
                state.push_history(STAGE, StageOutcome::Cancelled, "cancelled before LLM call");
                return Ok(());
            }

            let db_struc = state.db_struc.clone().unwrap_or_default();
            let prior_error = state.sql_error.clone().unwrap_or_default();
            let inputs = vars([
                ("sub_query", sub_query.as_str()),
                ("db_struc", db_struc.as_str()),
                ("prior_error", prior_error.as_str()),
            ]);

            // Synthesise
            let (outcome, tokens) = match self.chain.invoke_with_response(&inputs).await {
                Ok((json_text, response)) => {
                    let tokens = (response.prompt_tokens, response.completion_tokens);
                    match Self::extract_sql(&json_text) {
                        Ok(candidate) => {
                            // Validate
                            match self.validator.validate(&candidate) {
                                Ok(()) => {
                                    tracing::info!(attempt, sql = %candidate, "sql accepted");
                                    state.sql.push(candidate);
                                    state.sql_error = None;
                                    state.push_history_tokens(
                                        STAGE,
                                        StageOutcome::Ok,
                                        format!("accepted on attempt {attempt}"),
                                        tokens.0,
                                        tokens.1,
                                    );
                                    return Ok(());
                                },
                                Err(e) => {
                                    tracing::warn!(attempt, error = %e, "sql rejected");
                                    state.sql_error =
                                        Some(format!("{e}\nSQL: {candidate}"));
                                    (StageOutcome::ValidationError, tokens)
                                },
                            }
                        },
                        Err(e) => {
                            tracing::warn!(attempt, error = %e, "completion unparseable");
                            state.sql_error = Some(e.to_string());
                            (StageOutcome::ParseError, tokens)
                        },
                    }
                },
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(attempt, error = %e, "llm call failed");
                    let outcome = match &e {
                        FinsightError::Parse { .. } => StageOutcome::ParseError,
                        _ => StageOutcome::LlmError,
                    };
                    state.sql_error = Some(e.to_string());
                    (outcome, (0, 0))
                },
                Err(e) => return Err(e),
            };

            state.push_history_tokens(
                STAGE,
                outcome,
                format!("attempt {attempt}: {}", state.sql_error.as_deref().unwrap_or("")),
                tokens.0,
                tokens.1,
            );

            // Repair or give up
            if state.retries_remaining == 0 {
                tracing::warn!(sub_query = %sub_query, "retry budget exhausted");
                state.push_history(
                    STAGE,
                    StageOutcome::BudgetExhausted,
                    format!("no valid SQL after {attempt} attempts"),
                );
                return Ok(());
            }
            state.retries_remaining -= 1;
        }

        Ok(())
    }

    fn name(&self) -> &str {
        STAGE
    }

    fn kind(&self) -> SubgraphKind {
        SubgraphKind::GenerateSql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MockStore;
    use crate::llm::ScriptedLlm;

    fn step(llm: Arc<ScriptedLlm>, budget: u32) -> (GenerateSqlStep, Arc<MockStore>) {
        let store = Arc::new(MockStore::new("### Table: fact_profit"));
        let step = GenerateSqlStep::new(
            llm,
            store.clone(),
            GenerateSqlOptions {
                retry_budget: budget,
                ..Default::default()
            },
        )
        .unwrap();
        (step, store)
    }

    fn prepared_state(sub_query: &str) -> PipelineState {
        let mut state = PipelineState::new(sub_query);
        state.plan = vec![sub_query.to_string()];
        state.current_plan_idx = 0;
        state
    }

    #[tokio::test]
    async fn test_accepts_valid_sql_first_try() {
        let llm = Arc::new(ScriptedLlm::from_responses([
            "{\"sql\": \"SELECT id FROM fact_profit;\", \"explanation\": \"ids\"}",
        ]));
        let (step, store) = step(llm, 3);

        let mut state = prepared_state("profit ids");
        step.invoke(&mut state, &StageContext::default()).await.unwrap();

        assert_eq!(state.sql, vec!["SELECT id FROM fact_profit;".to_string()]);
        assert!(state.sql_error.is_none());
        assert_eq!(state.retries_remaining, 3);
        assert_eq!(store.describe_calls(), 1);
    }

    #[tokio::test]
    async fn test_repairs_after_validation_failure() {
        let llm = Arc::new(ScriptedLlm::from_responses([
            "{\"sql\": \"SELEKT id FROM fact_profit\"}",
            "{\"sql\": \"SELECT id FROM fact_profit;\"}",
        ]));
        let (step, _) = step(llm.clone(), 3);

        let mut state = prepared_state("profit ids");
        step.invoke(&mut state, &StageContext::default()).await.unwrap();

        assert_eq!(state.sql.len(), 1);
        assert!(state.sql_error.is_none());
        // One repair consumed exactly one unit of budget
        assert_eq!(state.retries_remaining, 2);
        assert_eq!(llm.call_count(), 2);
        assert!(state
            .history
            .iter()
            .any(|e| e.outcome == StageOutcome::ValidationError));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_leaves_step_unfilled() {
        let llm = Arc::new(ScriptedLlm::from_responses([
            "{\"sql\": \"SELEKT 1\"}",
            "{\"sql\": \"SELEKT 2\"}",
            "{\"sql\": \"SELEKT 3\"}",
        ]));
        let (step, _) = step(llm, 2);

        let mut state = prepared_state("unanswerable");
        step.invoke(&mut state, &StageContext::default()).await.unwrap();

        assert!(state.sql.is_empty());
        assert!(state.sql_error.is_some());
        assert_eq!(state.retries_remaining, 0);
        assert_eq!(
            state.history.last().unwrap().outcome,
            StageOutcome::BudgetExhausted
        );
    }

    #[tokio::test]
    async fn test_write_attempt_is_rejected_not_executed() {
        let llm = Arc::new(ScriptedLlm::from_responses([
            "{\"sql\": \"DROP TABLE fact_profit;\"}",
            "{\"sql\": \"SELECT id FROM fact_profit;\"}",
        ]));
        let (step, _) = step(llm, 3);

        let mut state = prepared_state("drop it");
        step.invoke(&mut state, &StageContext::default()).await.unwrap();

        assert_eq!(state.sql, vec!["SELECT id FROM fact_profit;".to_string()]);
        assert!(state
            .history
            .iter()
            .any(|e| e.outcome == StageOutcome::ValidationError
                && e.detail.contains("SELECT statements")));
    }

    #[tokio::test]
    async fn test_reuses_cached_schema_description() {
        let llm = Arc::new(ScriptedLlm::from_responses([
            "{\"sql\": \"SELECT 1\"}",
        ]));
        let (step, store) = step(llm, 3);

        let mut state = prepared_state("anything");
        state.db_struc = Some("### cached".to_string());
        step.invoke(&mut state, &StageContext::default()).await.unwrap();

        assert_eq!(store.describe_calls(), 0);
    }
}
