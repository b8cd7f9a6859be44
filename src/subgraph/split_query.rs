//! Plan decomposition
//!
//! Asks the model to break a multi-aspect analytical question into an
//! ordered list of single-table sub-queries. On persistent parse failure the
//! plan degrades to the original question so the downstream path still
//! works, just without decomposition.

use crate::core::{PipelineState, Result, StageOutcome};
use crate::llm::chain::vars;
use crate::llm::parsers::extract_json_array;
use crate::llm::{CleanOutputParser, LanguageModel, LlmChain, PromptTemplate};
use crate::subgraph::{StageContext, Subgraph, SubgraphKind};
use async_trait::async_trait;
use std::sync::Arc;

const STAGE: &str = "split_query";

const SPLIT_TEMPLATE: &str = "\
You are an expert at translating natural-language financial questions into \
PostgreSQL. Decide which of the known analytical tables the question touches \
and decompose it into one clear sub-question per table.

Known tables:
{tables}

Rules:
* Resolve relative periods (this year, last month, ...) into concrete dates.
* If one table can answer the question, do not split it; just restate it \
clearly against that table.
* If several tables are needed, emit one sub-question per table; together \
they must cover the original intent.
* Each sub-question must be directly translatable into a single SELECT.

Output a JSON array of strings and nothing else, e.g. \
[\"sub-question 1\", \"sub-question 2\"].

User question: {query}";

/// Decomposes a user question into the plan
pub struct SplitQueryStep {
    chain: LlmChain,
    retry_budget: u32,
}

impl SplitQueryStep {
    /// Build the stage against a model and the known table inventory
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        retry_budget: u32,
        known_tables: &[String],
    ) -> Result<Self> {
        let tables = known_tables
            .iter()
            .map(|t| format!("* {t}"))
            .collect::<Vec<_>>()
            .join("\n");
        let template = PromptTemplate::new(SPLIT_TEMPLATE.replace("{tables}", &tables))?;
        let chain = LlmChain::new(template, llm, Arc::new(CleanOutputParser::new()?));
        Ok(Self {
            chain,
            retry_budget,
        })
    }

    fn parse_plan(text: &str) -> Option<Vec<String>> {
        let array = extract_json_array(text)?;
        let plan: Vec<String> = serde_json::from_str(&array).ok()?;
        if plan.is_empty() {
            return None;
        }
        Some(plan)
    }
}

#[async_trait]
impl Subgraph for SplitQueryStep {
    async fn invoke(&self, state: &mut PipelineState, ctx: &StageContext) -> Result<()> {
        let inputs = vars([("query", state.query.as_str())]);

        for attempt in 0..=self.retry_budget {
            if ctx.cancel.is_cancelled() {
                state.push_history(STAGE, StageOutcome::Cancelled, "cancelled before LLM call");
                return Ok(());
            }

            match self.chain.invoke_with_response(&inputs).await {
                Ok((text, response)) => match Self::parse_plan(&text) {
                    Some(plan) => {
                        tracing::info!(sub_queries = plan.len(), "query split completed");
                        state.push_history_tokens(
                            STAGE,
                            StageOutcome::Ok,
                            format!("plan of {} sub-queries", plan.len()),
                            response.prompt_tokens,
                            response.completion_tokens,
                        );
                        state.plan = plan;
                        state.current_plan_idx = 0;
                        return Ok(());
                    },
                    None => {
                        tracing::warn!(attempt, "could not extract plan from completion");
                        state.push_history_tokens(
                            STAGE,
                            StageOutcome::ParseError,
                            format!("attempt {}: completion not a JSON array", attempt + 1),
                            response.prompt_tokens,
                            response.completion_tokens,
                        );
                    },
                },
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "split query LLM call failed");
                    state.push_history(
                        STAGE,
                        StageOutcome::LlmError,
                        format!("attempt {}: {e}", attempt + 1),
                    );
                },
            }
        }

        // Degrade gracefully: the original question becomes a one-step plan.
        tracing::warn!("falling back to single-step plan");
        state.push_history(
            STAGE,
            StageOutcome::Warning,
            "decomposition failed, falling back to the original question",
        );
        state.plan = vec![state.query.clone()];
        state.current_plan_idx = 0;
        Ok(())
    }

    fn name(&self) -> &str {
        STAGE
    }

    fn kind(&self) -> SubgraphKind {
        SubgraphKind::SplitQuery
    }
}
