//! Core types shared by every stage: the error taxonomy and the pipeline state.

/// Unified error type and Result alias
pub mod error;
/// Pipeline state record and history types
pub mod state;

pub use error::{ErrorSeverity, FinsightError, Result};
pub use state::{HistoryEntry, PipelineState, ResultBlock, StageOutcome};
