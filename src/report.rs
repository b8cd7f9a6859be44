//! Analysis report generation
//!
//! Converts the fetched tabular summary plus the original question into a
//! structured financial analysis. The chain is tuned for long output; on LLM
//! failure the report stays unset and the orchestrator returns the
//! intermediate state.

use crate::core::{PipelineState, Result, StageOutcome};
use crate::llm::chain::vars;
use crate::llm::{CleanOutputParser, GenerationParams, LanguageModel, LlmChain, PromptTemplate};
use std::sync::Arc;

const STAGE: &str = "report";

const REPORT_TEMPLATE: &str = "\
You are a senior financial analyst. Using only the figures in the reference \
tables below, answer the user's question with a structured report.

Ground rules:
* Every claim must be backed by a number from the tables; never invent data.
* Use standard financial terminology and keep the language tight.
* If the tables cannot answer the question, say so instead of guessing.

Structure the report with exactly these sections:
* **Overview** - one paragraph summarising what the data shows.
* **Key indicators** - the figures that matter, as a list.
* **Trends** - growth, decline and notable movements, with percentages.
* **Risks** - what the numbers warn about.
* **Recommendations** - concrete next steps.

User question: {query}

Reference tables:
{md}";

/// Generates the final analysis report
#[derive(Clone)]
pub struct ReportGenerator {
    chain: LlmChain,
}

impl ReportGenerator {
    /// Bind the report chain, tuned for long-form output
    pub fn new(llm: Arc<dyn LanguageModel>) -> Result<Self> {
        let chain = LlmChain::new(
            PromptTemplate::new(REPORT_TEMPLATE)?,
            llm,
            Arc::new(CleanOutputParser::new()?),
        )
        .with_params(GenerationParams {
            max_tokens: Some(2048),
            temperature: Some(0.3),
            top_p: None,
        });
        Ok(Self { chain })
    }

    /// Produce the report for the accumulated state
    pub async fn generate(&self, state: &mut PipelineState) {
        let inputs = vars([("query", state.query.as_str()), ("md", state.md.as_str())]);

        match self.chain.invoke_with_response(&inputs).await {
            Ok((report, response)) => {
                tracing::info!(chars = report.len(), "analysis report generated");
                state.push_history_tokens(
                    STAGE,
                    StageOutcome::Ok,
                    "report generated",
                    response.prompt_tokens,
                    response.completion_tokens,
                );
                state.report = Some(report);
            },
            Err(e) => {
                tracing::error!(error = %e, "report generation failed");
                state.push_history(STAGE, StageOutcome::LlmError, e.to_string());
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;

    #[tokio::test]
    async fn test_report_populates_state() {
        let llm = Arc::new(ScriptedLlm::from_responses(["**Overview** revenue grew."]));
        let generator = ReportGenerator::new(llm.clone()).unwrap();

        let mut state = PipelineState::new("how did revenue do?");
        state.md = "## Statement 1\n| r |".to_string();
        generator.generate(&mut state).await;

        assert_eq!(state.report.as_deref(), Some("**Overview** revenue grew."));
        assert!(llm.prompts()[0].contains("how did revenue do?"));
        assert!(llm.prompts()[0].contains("## Statement 1"));
    }

    #[tokio::test]
    async fn test_report_failure_leaves_state_partial() {
        let llm = Arc::new(ScriptedLlm::from_responses(Vec::<String>::new()));
        let generator = ReportGenerator::new(llm).unwrap();

        let mut state = PipelineState::new("q");
        generator.generate(&mut state).await;

        assert!(state.report.is_none());
        assert_eq!(state.history.last().unwrap().outcome, StageOutcome::LlmError);
    }
}
