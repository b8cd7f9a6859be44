//! Deterministic scripted model for tests and offline runs
//!
//! Pops canned completions in order and records every prompt it receives, so
//! scenario tests can assert both the terminal state and the exact number of
//! backend calls.

use crate::core::Result;
use crate::llm::{backend_error, LanguageModel};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Scripted language model
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    /// Build from an ordered list of canned completions
    pub fn from_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Simulate network latency before each completion
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Append further canned completions to the script
    pub fn push_response(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response.into());
    }

    /// Prompts received so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of completions served
    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| backend_error("scripted model exhausted", "no responses left"))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec![self.model_name()])
    }

    fn model_name(&self) -> String {
        "scripted".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_pops_in_order_then_fails() {
        let llm = ScriptedLlm::from_responses(["one", "two"]);
        assert_eq!(llm.complete("a").await.unwrap(), "one");
        assert_eq!(llm.complete("b").await.unwrap(), "two");
        assert!(llm.complete("c").await.is_err());
        assert_eq!(llm.call_count(), 3);
        assert_eq!(llm.prompts(), vec!["a", "b", "c"]);
    }
}
