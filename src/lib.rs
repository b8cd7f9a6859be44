//! # finsight-core
//!
//! Staged workflow engine that turns natural-language financial questions
//! into executable analytical reports.
//!
//! Three cooperating subgraphs (query decomposition, SQL synthesis with
//! validation, data fetch with tabular reduction) are driven by a linear
//! orchestrator over a plan index, followed by an analysis report step. Stages share one typed [`core::PipelineState`] record, are
//! independently addressable through the [`registry::SubgraphRegistry`], and
//! can run one-shot or as a lazy stream of state snapshots.
//!
//! ## Quick start
//!
//! ```no_run
//! use finsight_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> finsight_core::Result<()> {
//! let config = FinsightConfig::default();
//! let pool = finsight_core::db::connect_pool(&config.db).await?;
//! let llm = finsight_core::llm::cache::shared(Some("default"), &config.llm)?;
//!
//! let service = WorkflowService::new(
//!     llm,
//!     Arc::new(finsight_core::db::PgExecutor::new(pool.clone())),
//!     Arc::new(finsight_core::db::PgIntrospector::new(pool)),
//!     config,
//! )?;
//! let state = service.run_pipeline("List the top 5 revenue accounts for 2025 Q1").await;
//! println!("success: {}", state.is_success());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// ================================
// MODULE DECLARATIONS
// ================================

/// Configuration management and validation
pub mod config;
/// Core error and state types
pub mod core;
/// Analytical database access (pool, executor, introspector)
pub mod db;
/// LLM client, parsers, chains and the instance cache
pub mod llm;
/// Pipeline orchestrator
pub mod pipeline;
/// Subgraph registry
pub mod registry;
/// Analysis report generation
pub mod report;
/// Invocation surface for the external facade
pub mod service;
/// SQL dialect validation
pub mod sql;
/// Composable pipeline stages
pub mod subgraph;

// ================================
// PUBLIC API EXPORTS
// ================================

/// Prelude module containing the most commonly used types
pub mod prelude {
    pub use crate::config::{FinsightConfig, PipelineConfig, Validatable};
    pub use crate::core::{FinsightError, PipelineState, Result, StageOutcome};
    pub use crate::pipeline::Pipeline;
    pub use crate::service::WorkflowService;
}

pub use crate::config::{FinsightConfig, PipelineConfig, Validatable, ValidationResult};
pub use crate::core::{
    ErrorSeverity, FinsightError, HistoryEntry, PipelineState, Result, ResultBlock, StageOutcome,
};
pub use crate::db::{DbConfig, MockStore, PgExecutor, PgIntrospector, SchemaIntrospector, SqlExecutor};
pub use crate::llm::{
    LanguageModel, LlmChain, LlmConfig, LlmResponse, OllamaLlm, PromptTemplate, ScriptedLlm,
};
pub use crate::pipeline::Pipeline;
pub use crate::registry::{SubgraphDescriptor, SubgraphRegistry};
pub use crate::report::ReportGenerator;
pub use crate::service::WorkflowService;
pub use crate::sql::SqlValidator;
pub use crate::subgraph::{StageContext, Subgraph, SubgraphKind};
