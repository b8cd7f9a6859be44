//! Composable pipeline stages
//!
//! Every stage implements the uniform [`Subgraph`] contract: it receives a
//! mutable borrow of the pipeline state, mutates only its designated fields
//! and appends to the audit history. Stages are independently invokable
//! through the registry and composable by the orchestrator.

use crate::core::{PipelineState, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString};
use tokio_util::sync::CancellationToken;

/// Plan decomposition stage
pub mod split_query;

/// SQL synthesis with validation and self-repair
pub mod generate_sql;

/// Statement execution and tabular reduction
pub mod fetch_data;

pub use fetch_data::FetchDataStep;
pub use generate_sql::GenerateSqlStep;
pub use split_query::SplitQueryStep;

/// Closed set of stage kinds known to the registry
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubgraphKind {
    /// Decomposes a question into single-table sub-queries
    SplitQuery,
    /// Synthesises and validates SQL for one sub-query
    GenerateSql,
    /// Executes accepted SQL and renders the tabular summary
    FetchData,
    /// User-registered stage
    Custom,
}

/// Per-invocation context handed to every stage.
///
/// Stages check the cancellation token at each suspension point; observing
/// it is a normal termination, recorded in history, never an error.
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    /// Cooperative cancellation signal for this invocation
    pub cancel: CancellationToken,
}

impl StageContext {
    /// Context carrying an existing token
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

/// Uniform stage contract
#[async_trait]
pub trait Subgraph: Send + Sync {
    /// Run the stage against the borrowed state.
    ///
    /// Recoverable failures are expressed through state (`sql_error`,
    /// `history`); only fatal conditions return `Err`.
    async fn invoke(&self, state: &mut PipelineState, ctx: &StageContext) -> Result<()>;

    /// Stage name as registered
    fn name(&self) -> &str;

    /// Stage kind
    fn kind(&self) -> SubgraphKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_strings() {
        assert_eq!(SubgraphKind::SplitQuery.to_string(), "split_query");
        assert_eq!(
            "generate_sql".parse::<SubgraphKind>().unwrap(),
            SubgraphKind::GenerateSql
        );
    }

    #[test]
    fn test_default_context_is_uncancelled() {
        let ctx = StageContext::default();
        assert!(!ctx.cancel.is_cancelled());
    }
}
