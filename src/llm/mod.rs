//! LLM client abstraction used uniformly by all stages
//!
//! Defines the configuration, the normalized response record and the
//! `LanguageModel` trait. The Ollama backend lives in [`ollama`], output
//! parsers in [`parsers`], the prompt/chain composer in [`chain`] and the
//! process-wide instance cache in [`cache`].

use crate::core::{FinsightError, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

/// Process-wide client instance cache
pub mod cache;
/// Prompt template and chain composition
pub mod chain;
/// Deterministic scripted model for tests
pub mod mock;
/// Ollama HTTP backend
pub mod ollama;
/// Output parsers for completions
pub mod parsers;

pub use chain::{LlmChain, PromptTemplate};
pub use mock::ScriptedLlm;
pub use ollama::OllamaLlm;
pub use parsers::{CleanOutputParser, JsonStructOutputParser, OutputParser};

/// LLM configuration, immutable once validated
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model name
    pub model_name: String,
    /// Backend base URL
    pub base_url: String,
    /// Sampling temperature, `[0, 2]`
    pub temperature: f32,
    /// Maximum tokens to generate, `[1, 10000]`
    pub max_tokens: u32,
    /// Nucleus sampling parameter, `[0, 1]`
    pub top_p: f32,
    /// Frequency penalty, `[-2, 2]`
    pub frequency_penalty: f32,
    /// Presence penalty, `[-2, 2]`
    pub presence_penalty: f32,
    /// Whether completions stream by default
    pub stream: bool,
    /// Request timeout in seconds
    pub timeout_s: u64,
    /// Retry attempts for transient backend failures
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_name: "llama3.2".to_string(),
            base_url: "http://localhost:11434".to_string(),
            temperature: 0.1,
            max_tokens: 1000,
            top_p: 0.9,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stream: false,
            timeout_s: 30,
            max_retries: 3,
        }
    }
}

impl LlmConfig {
    /// Validate field ranges, returning a `config_error` on the first violation
    pub fn validate(&self) -> Result<()> {
        if self.model_name.is_empty() {
            return Err(crate::config_error!("model_name cannot be empty"));
        }
        if self.base_url.is_empty() {
            return Err(crate::config_error!("base_url cannot be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(crate::config_error!(
                "temperature {} out of range [0, 2]",
                self.temperature
            ));
        }
        if self.max_tokens == 0 || self.max_tokens > 10_000 {
            return Err(crate::config_error!(
                "max_tokens {} out of range [1, 10000]",
                self.max_tokens
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(crate::config_error!("top_p {} out of range [0, 1]", self.top_p));
        }
        if !(-2.0..=2.0).contains(&self.frequency_penalty) {
            return Err(crate::config_error!(
                "frequency_penalty {} out of range [-2, 2]",
                self.frequency_penalty
            ));
        }
        if !(-2.0..=2.0).contains(&self.presence_penalty) {
            return Err(crate::config_error!(
                "presence_penalty {} out of range [-2, 2]",
                self.presence_penalty
            ));
        }
        if self.timeout_s == 0 {
            return Err(crate::config_error!("timeout_s must be positive"));
        }
        Ok(())
    }

    /// Apply a partial update, re-validating the result
    pub fn apply(&mut self, patch: LlmConfigPatch) -> Result<()> {
        let mut updated = self.clone();
        if let Some(model_name) = patch.model_name {
            updated.model_name = model_name;
        }
        if let Some(base_url) = patch.base_url {
            updated.base_url = base_url;
        }
        if let Some(temperature) = patch.temperature {
            updated.temperature = temperature;
        }
        if let Some(max_tokens) = patch.max_tokens {
            updated.max_tokens = max_tokens;
        }
        if let Some(top_p) = patch.top_p {
            updated.top_p = top_p;
        }
        if let Some(stream) = patch.stream {
            updated.stream = stream;
        }
        if let Some(timeout_s) = patch.timeout_s {
            updated.timeout_s = timeout_s;
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

/// Partial configuration update for `update_config`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfigPatch {
    /// New model name
    pub model_name: Option<String>,
    /// New base URL
    pub base_url: Option<String>,
    /// New temperature
    pub temperature: Option<f32>,
    /// New max tokens
    pub max_tokens: Option<u32>,
    /// New top_p
    pub top_p: Option<f32>,
    /// New streaming default
    pub stream: Option<bool>,
    /// New timeout
    pub timeout_s: Option<u64>,
}

/// Per-call overrides for a single completion
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationParams {
    /// Override max tokens for this call
    pub max_tokens: Option<u32>,
    /// Override temperature for this call
    pub temperature: Option<f32>,
    /// Override top_p for this call
    pub top_p: Option<f32>,
}

/// Normalized record of one completion round-trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Unique id assigned to the request
    pub request_id: String,
    /// Model that served the request
    pub model_name: String,
    /// Prompt sent to the backend
    pub prompt: String,
    /// Raw completion text
    pub response: String,
    /// Backend error, when the call failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration in seconds
    pub duration_s: f64,
    /// Tokens consumed by the prompt
    pub prompt_tokens: u64,
    /// Tokens produced by the completion
    pub completion_tokens: u64,
    /// Total tokens for the round-trip
    pub total_tokens: u64,
}

/// Finite lazy sequence of completion chunks
pub type ChunkStream = BoxStream<'static, Result<String>>;

/// Uniform completion contract consumed by every stage
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a prompt, returning the raw text
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Complete a prompt with per-call parameter overrides
    async fn complete_with_params(&self, prompt: &str, _params: GenerationParams) -> Result<String> {
        self.complete(prompt).await
    }

    /// Complete a prompt, returning the full response record
    async fn complete_with_response(&self, prompt: &str) -> Result<LlmResponse> {
        let started = std::time::Instant::now();
        let response = self.complete(prompt).await?;
        Ok(LlmResponse {
            request_id: uuid::Uuid::new_v4().to_string(),
            model_name: self.model_name(),
            prompt: prompt.to_string(),
            response,
            error: None,
            duration_s: started.elapsed().as_secs_f64(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        })
    }

    /// Stream a completion as a finite lazy chunk sequence.
    ///
    /// Consumers may drop the stream at any chunk; implementations must
    /// release the underlying connection on abandonment.
    async fn stream(&self, prompt: &str) -> Result<ChunkStream> {
        let text = self.complete(prompt).await?;
        Ok(futures::stream::once(async move { Ok(text) }).boxed())
    }

    /// Names of the models the backend can serve
    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Connectivity probe
    async fn is_available(&self) -> bool {
        true
    }

    /// Model identifier used in response records
    fn model_name(&self) -> String;
}

/// Map a backend error into the LLM variant with context
pub(crate) fn backend_error(context: &str, detail: impl std::fmt::Display) -> FinsightError {
    FinsightError::Llm {
        message: format!("{context}: {detail}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(LlmConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_range_violations() {
        let mut config = LlmConfig::default();
        config.temperature = 2.5;
        assert!(config.validate().is_err());

        let mut config = LlmConfig::default();
        config.max_tokens = 0;
        assert!(config.validate().is_err());

        let mut config = LlmConfig::default();
        config.model_name.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_patch_rejects_invalid_update() {
        let mut config = LlmConfig::default();
        let result = config.apply(LlmConfigPatch {
            top_p: Some(1.5),
            ..Default::default()
        });
        assert!(result.is_err());
        // Failed patch leaves the original untouched
        assert!((config.top_p - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_patch_applies_and_revalidates() {
        let mut config = LlmConfig::default();
        config
            .apply(LlmConfigPatch {
                temperature: Some(0.3),
                max_tokens: Some(2048),
                ..Default::default()
            })
            .unwrap();
        assert!((config.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.max_tokens, 2048);
    }
}
