//! Configuration for the workflow engine
//!
//! Nested sections with serde defaults, a [`Validatable`] trait collecting
//! errors and warnings, and JSON file round-tripping for deployments that
//! keep the engine config alongside the service config.

use crate::core::Result;
use crate::db::DbConfig;
use crate::llm::LlmConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Repair attempts per plan step in SQL generation
    #[serde(default = "default_retry_budget_sql")]
    pub retry_budget_sql: u32,
    /// Re-ask attempts when plan decomposition is unparseable
    #[serde(default = "default_retry_budget_split")]
    pub retry_budget_split: u32,
    /// Dispatch independent plan steps concurrently
    #[serde(default)]
    pub parallel_plan_steps: bool,
    /// Per-invocation deadline in seconds; absent means no deadline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_s: Option<f64>,
    /// Cell truncation width in the markdown summary
    #[serde(default = "default_max_cell_chars")]
    pub max_cell_chars: usize,
    /// Distinct values sampled per FK column during introspection
    #[serde(default = "default_max_fk_values")]
    pub max_fk_values: u32,
    /// Schema the introspector describes
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Analytical tables advertised to the decomposition prompt
    #[serde(default = "default_known_tables")]
    pub known_tables: Vec<String>,
}

fn default_retry_budget_sql() -> u32 {
    3
}

fn default_retry_budget_split() -> u32 {
    2
}

fn default_max_cell_chars() -> usize {
    200
}

fn default_max_fk_values() -> u32 {
    30
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_known_tables() -> Vec<String> {
    vec![
        "fact_profit (profit by account and accounting period)".to_string(),
        "fact_revenue (revenue and cost detail)".to_string(),
        "fact_expense (expense detail)".to_string(),
    ]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry_budget_sql: default_retry_budget_sql(),
            retry_budget_split: default_retry_budget_split(),
            parallel_plan_steps: false,
            deadline_s: None,
            max_cell_chars: default_max_cell_chars(),
            max_fk_values: default_max_fk_values(),
            schema: default_schema(),
            known_tables: default_known_tables(),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinsightConfig {
    /// LLM backend settings
    #[serde(default)]
    pub llm: LlmConfig,
    /// Analytical database settings
    #[serde(default)]
    pub db: DbConfig,
    /// Orchestrator settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl FinsightConfig {
    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Persist to a JSON file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Result of configuration validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Whether the configuration is usable
    pub is_valid: bool,
    /// Violations that make the configuration unusable
    pub errors: Vec<String>,
    /// Suspicious values that remain usable
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Create a passing result
    pub fn new() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    /// Record an error and mark the result failed
    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
        self.is_valid = false;
    }

    /// Record a warning; validity is unaffected
    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

/// Trait for configuration validation
pub trait Validatable {
    /// Validate with standard checks
    fn validate(&self) -> ValidationResult;
}

impl Validatable for FinsightConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Err(e) = self.llm.validate() {
            result.add_error(e.to_string());
        }
        if let Err(e) = self.db.validate() {
            result.add_error(e.to_string());
        }

        if self.pipeline.retry_budget_sql == 0 {
            result.add_warning(
                "pipeline.retry_budget_sql is 0; a single bad completion fails the plan step"
                    .to_string(),
            );
        }
        if self.pipeline.retry_budget_sql > 10 {
            result.add_warning(
                "pipeline.retry_budget_sql is very high (>10); invocations may run long"
                    .to_string(),
            );
        }
        if self.pipeline.max_cell_chars == 0 {
            result.add_error("pipeline.max_cell_chars must be positive".to_string());
        }
        if self.pipeline.known_tables.is_empty() {
            result.add_warning(
                "pipeline.known_tables is empty; decomposition has no table inventory".to_string(),
            );
        }
        if let Some(deadline) = self.pipeline.deadline_s {
            if deadline <= 0.0 {
                result.add_error("pipeline.deadline_s must be positive when set".to_string());
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FinsightConfig::default();
        let result = config.validate();
        assert!(result.is_valid, "errors: {:?}", result.errors);
        assert_eq!(config.pipeline.retry_budget_sql, 3);
        assert_eq!(config.pipeline.retry_budget_split, 2);
        assert!(!config.pipeline.parallel_plan_steps);
    }

    #[test]
    fn test_invalid_sections_collect_errors() {
        let mut config = FinsightConfig::default();
        config.llm.temperature = 5.0;
        config.db.url.clear();
        config.pipeline.deadline_s = Some(-1.0);

        let result = config.validate();
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 3);
    }

    #[test]
    fn test_zero_retry_budget_is_only_a_warning() {
        let mut config = FinsightConfig::default();
        config.pipeline.retry_budget_sql = 0;
        let result = config.validate();
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = std::env::temp_dir().join("finsight-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let mut config = FinsightConfig::default();
        config.pipeline.parallel_plan_steps = true;
        config.to_file(&path).unwrap();

        let loaded = FinsightConfig::from_file(&path).unwrap();
        assert!(loaded.pipeline.parallel_plan_steps);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let loaded: FinsightConfig =
            serde_json::from_str("{\"pipeline\": {\"retry_budget_sql\": 5}}").unwrap();
        assert_eq!(loaded.pipeline.retry_budget_sql, 5);
        assert_eq!(loaded.pipeline.retry_budget_split, 2);
        assert_eq!(loaded.llm.model_name, "llama3.2");
    }
}
