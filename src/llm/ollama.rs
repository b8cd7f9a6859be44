//! Ollama LLM backend
//!
//! Completion is a POST to `{base_url}/api/generate`; model discovery is a
//! GET on `/api/tags`. The async path (including NDJSON streaming) rides
//! reqwest, the blocking path and the connection probe ride a ureq agent.

use crate::core::{FinsightError, Result};
use crate::llm::{
    backend_error, ChunkStream, GenerationParams, LanguageModel, LlmConfig, LlmConfigPatch,
    LlmResponse,
};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::StreamExt;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Ollama client for LLM inference
pub struct OllamaLlm {
    config: RwLock<LlmConfig>,
    http: reqwest::Client,
    agent: ureq::Agent,
}

impl OllamaLlm {
    /// Create a new client after validating the configuration
    pub fn new(config: LlmConfig) -> Result<Self> {
        config.validate()?;

        let timeout = Duration::from_secs(config.timeout_s);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FinsightError::Http)?;
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();

        tracing::info!(model = %config.model_name, base_url = %config.base_url, "ollama client initialized");
        Ok(Self {
            config: RwLock::new(config),
            http,
            agent,
        })
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> LlmConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Apply a partial configuration update
    pub fn update_config(&self, patch: LlmConfigPatch) -> Result<()> {
        let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
        guard.apply(patch)
    }

    fn generate_url(&self, config: &LlmConfig) -> String {
        format!("{}/api/generate", config.base_url)
    }

    fn tags_url(&self, config: &LlmConfig) -> String {
        format!("{}/api/tags", config.base_url)
    }

    fn request_body(config: &LlmConfig, prompt: &str, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": config.model_name,
            "prompt": prompt,
            "stream": stream,
            "options": {
                "temperature": config.temperature,
                "num_predict": config.max_tokens,
                "top_p": config.top_p,
                "frequency_penalty": config.frequency_penalty,
                "presence_penalty": config.presence_penalty,
            }
        })
    }

    fn apply_params(config: &mut LlmConfig, params: GenerationParams) {
        if let Some(max_tokens) = params.max_tokens {
            config.max_tokens = max_tokens;
        }
        if let Some(temperature) = params.temperature {
            config.temperature = temperature;
        }
        if let Some(top_p) = params.top_p {
            config.top_p = top_p;
        }
    }

    async fn generate(&self, config: &LlmConfig, prompt: &str) -> Result<LlmResponse> {
        let body = Self::request_body(config, prompt, false);
        let url = self.generate_url(config);
        let started = Instant::now();

        let mut last_error = None;
        for attempt in 1..=config.max_retries.max(1) {
            match self.post_once(&url, &body).await {
                Ok(value) => {
                    let text = value
                        .get("response")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| backend_error("invalid response format", &value))?
                        .to_string();
                    let prompt_tokens =
                        value.get("prompt_eval_count").and_then(|v| v.as_u64()).unwrap_or(0);
                    let completion_tokens =
                        value.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0);

                    return Ok(LlmResponse {
                        request_id: uuid::Uuid::new_v4().to_string(),
                        model_name: config.model_name.clone(),
                        prompt: prompt.to_string(),
                        response: text,
                        error: None,
                        duration_s: started.elapsed().as_secs_f64(),
                        prompt_tokens,
                        completion_tokens,
                        total_tokens: prompt_tokens + completion_tokens,
                    });
                },
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "ollama request failed");
                    last_error = Some(e);
                    if attempt < config.max_retries {
                        tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                    }
                },
            }
        }

        Err(backend_error(
            &format!("ollama request failed after {} attempts", config.max_retries.max(1)),
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    async fn post_once(&self, url: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(FinsightError::Http)?;
        let response = response.error_for_status().map_err(FinsightError::Http)?;
        response.json().await.map_err(FinsightError::Http)
    }

    /// Blocking completion over the ureq agent, for callers without a runtime
    pub fn complete_blocking(&self, prompt: &str) -> Result<String> {
        let config = self.config();
        let body = Self::request_body(&config, prompt, false);

        let response = self
            .agent
            .post(&self.generate_url(&config))
            .set("Content-Type", "application/json")
            .send_json(&body)
            .map_err(|e| backend_error("ollama request failed", e))?;
        let value: serde_json::Value = response
            .into_json()
            .map_err(|e| backend_error("failed to parse JSON response", e))?;

        value
            .get("response")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| backend_error("invalid response format", &value))
    }

    /// Blocking connectivity probe against `/api/tags`
    pub fn validate_connection(&self) -> bool {
        let config = self.config();
        self.agent.get(&self.tags_url(&config)).call().is_ok()
    }
}

#[async_trait]
impl LanguageModel for OllamaLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let config = self.config();
        Ok(self.generate(&config, prompt).await?.response)
    }

    async fn complete_with_params(&self, prompt: &str, params: GenerationParams) -> Result<String> {
        let mut config = self.config();
        Self::apply_params(&mut config, params);
        Ok(self.generate(&config, prompt).await?.response)
    }

    async fn complete_with_response(&self, prompt: &str) -> Result<LlmResponse> {
        let config = self.config();
        self.generate(&config, prompt).await
    }

    async fn stream(&self, prompt: &str) -> Result<ChunkStream> {
        let config = self.config();
        let body = Self::request_body(&config, prompt, true);
        let url = self.generate_url(&config);

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(FinsightError::Http)?
            .error_for_status()
            .map_err(FinsightError::Http)?;

        // Newline-delimited JSON objects; the sequence ends at `done: true`.
        // Dropping the stream drops the response body and releases the
        // connection.
        let stream = try_stream! {
            let mut body = response.bytes_stream();
            let mut buffer = Vec::new();

            'outer: while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(FinsightError::Http)?;
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let value: serde_json::Value = match serde_json::from_str(line) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if let Some(fragment) = value.get("response").and_then(|v| v.as_str()) {
                        if !fragment.is_empty() {
                            yield fragment.to_string();
                        }
                    }
                    if value.get("done").and_then(|v| v.as_bool()).unwrap_or(false) {
                        break 'outer;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let config = self.config();
        let value: serde_json::Value = self
            .http
            .get(self.tags_url(&config))
            .send()
            .await
            .map_err(FinsightError::Http)?
            .error_for_status()
            .map_err(FinsightError::Http)?
            .json()
            .await
            .map_err(FinsightError::Http)?;

        Ok(value
            .get("models")
            .and_then(|v| v.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn is_available(&self) -> bool {
        let config = self.config();
        match self.http.get(self.tags_url(&config)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn model_name(&self) -> String {
        self.config().model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let config = LlmConfig::default();
        let body = OllamaLlm::request_body(&config, "hello", false);
        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["prompt"], "hello");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 1000);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = LlmConfig::default();
        config.temperature = 9.0;
        assert!(OllamaLlm::new(config).is_err());
    }

    #[test]
    fn test_update_config_round_trip() {
        let client = OllamaLlm::new(LlmConfig::default()).unwrap();
        client
            .update_config(LlmConfigPatch {
                temperature: Some(0.5),
                ..Default::default()
            })
            .unwrap();
        assert!((client.config().temperature - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_params_override_only_requested_fields() {
        let mut config = LlmConfig::default();
        OllamaLlm::apply_params(
            &mut config,
            GenerationParams {
                max_tokens: Some(2048),
                temperature: Some(0.3),
                top_p: None,
            },
        );
        assert_eq!(config.max_tokens, 2048);
        assert!((config.temperature - 0.3).abs() < f32::EPSILON);
        assert!((config.top_p - 0.9).abs() < f32::EPSILON);
    }
}
