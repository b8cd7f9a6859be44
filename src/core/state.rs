//! Pipeline state threaded through all stages of one invocation
//!
//! A single mutable record owned by the orchestrator. Subgraphs receive a
//! mutable borrow for the duration of one `invoke` call and may only touch
//! their designated fields; `history` is append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString};

/// Outcome recorded for each completed stage step
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Stage completed normally
    Ok,
    /// Stage completed but degraded (e.g. plan fallback)
    Warning,
    /// A generated statement failed validation
    ValidationError,
    /// LLM output could not be parsed
    ParseError,
    /// The LLM backend failed
    LlmError,
    /// A statement failed at the database
    DbError,
    /// The retry budget for a plan step was depleted
    BudgetExhausted,
    /// Cooperative cancellation was observed
    Cancelled,
    /// A fatal error surfaced to the orchestrator
    Fatal,
}

/// Append-only audit record for one stage step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Stage name (e.g. `split_query`)
    pub stage: String,
    /// When the entry was recorded
    pub timestamp: DateTime<Utc>,
    /// Outcome of the step
    pub outcome: StageOutcome,
    /// Human-readable detail
    pub detail: String,
    /// Prompt tokens consumed by the step
    pub prompt_tokens: u64,
    /// Completion tokens produced by the step
    pub completion_tokens: u64,
}

/// Per-statement result block produced by the SQL executor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultBlock {
    /// Position of the statement in the accepted SQL list
    pub sql_index: usize,
    /// The executed statement
    pub sql: String,
    /// Column names in cursor order
    pub columns: Vec<String>,
    /// Materialised rows, JSON-coerced
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Number of rows returned
    pub row_count: usize,
    /// Set when the statement failed instead of aborting the batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The single record passed between stages of one invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineState {
    /// Original natural-language request, immutable after entry
    pub query: String,
    /// Ordered single-table sub-queries; empty means SplitQuery has not run
    pub plan: Vec<String>,
    /// Progress through the plan, `0 <= current_plan_idx <= plan.len()`
    pub current_plan_idx: usize,
    /// Accepted SQL statements in plan order
    pub sql: Vec<String>,
    /// Last validator error, cleared on each new generation attempt
    pub sql_error: Option<String>,
    /// Cached markdown description of the schema, populated lazily
    pub db_struc: Option<String>,
    /// Per-statement result blocks in statement order
    pub raw_data: Vec<ResultBlock>,
    /// Markdown rendering of `raw_data`
    pub md: String,
    /// Append-only audit log
    pub history: Vec<HistoryEntry>,
    /// Final analysis report, populated by the report generator
    pub report: Option<String>,
    /// Repair attempts left for the current plan step
    pub retries_remaining: u32,
}

impl PipelineState {
    /// Create a fresh state for one invocation
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Append a history entry without token counts
    pub fn push_history(&mut self, stage: &str, outcome: StageOutcome, detail: impl Into<String>) {
        self.push_history_tokens(stage, outcome, detail, 0, 0);
    }

    /// Append a history entry carrying token counts
    pub fn push_history_tokens(
        &mut self,
        stage: &str,
        outcome: StageOutcome,
        detail: impl Into<String>,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) {
        self.history.push(HistoryEntry {
            stage: stage.to_string(),
            timestamp: Utc::now(),
            outcome,
            detail: detail.into(),
            prompt_tokens,
            completion_tokens,
        });
    }

    /// Whether any stage surfaced a fatal error
    pub fn has_fatal(&self) -> bool {
        self.history.iter().any(|e| e.outcome == StageOutcome::Fatal)
    }

    /// Whether cancellation was already recorded as the latest entry
    pub fn ends_cancelled(&self) -> bool {
        matches!(
            self.history.last(),
            Some(entry) if entry.outcome == StageOutcome::Cancelled
        )
    }

    /// `success` as exposed to callers: a report exists and no fatal entry was recorded
    pub fn is_success(&self) -> bool {
        self.report.is_some() && !self.has_fatal()
    }

    /// Total tokens consumed across all recorded steps
    pub fn total_tokens(&self) -> u64 {
        self.history
            .iter()
            .map(|e| e.prompt_tokens + e.completion_tokens)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_append_only_helpers() {
        let mut state = PipelineState::new("q");
        state.push_history("split_query", StageOutcome::Ok, "plan of 2");
        state.push_history_tokens("generate_sql", StageOutcome::Ok, "accepted", 100, 40);

        assert_eq!(state.history.len(), 2);
        assert_eq!(state.history[0].stage, "split_query");
        assert_eq!(state.total_tokens(), 140);
    }

    #[test]
    fn test_success_requires_report_and_no_fatal() {
        let mut state = PipelineState::new("q");
        assert!(!state.is_success());

        state.report = Some("analysis".to_string());
        assert!(state.is_success());

        state.push_history("fetch_data", StageOutcome::Fatal, "connection refused");
        assert!(!state.is_success());
    }

    #[test]
    fn test_ends_cancelled() {
        let mut state = PipelineState::new("q");
        assert!(!state.ends_cancelled());
        state.push_history("pipeline", StageOutcome::Cancelled, "deadline");
        assert!(state.ends_cancelled());
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = PipelineState::new("top 5 revenue accounts");
        state.plan = vec!["sub".to_string()];
        state.raw_data.push(ResultBlock {
            sql_index: 0,
            sql: "SELECT 1".to_string(),
            columns: vec!["n".to_string()],
            rows: vec![vec![serde_json::json!(1)]],
            row_count: 1,
            error: None,
        });

        let encoded = serde_json::to_string(&state).unwrap();
        let decoded: PipelineState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.plan, state.plan);
        assert_eq!(decoded.raw_data[0].row_count, 1);
    }
}
