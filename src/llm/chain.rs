//! Prompt/chain composition
//!
//! Binds a template, a language model and an output parser into a single
//! invokable unit accepting a variable mapping. Missing variables fail with
//! `template_error` before any LLM call; excess variables are ignored.

use crate::core::{FinsightError, Result};
use crate::llm::{GenerationParams, LanguageModel, LlmResponse, OutputParser};
use std::collections::HashMap;
use std::sync::Arc;

/// Template with named `{placeholder}` slots.
///
/// `{{` and `}}` escape literal braces, which keeps JSON examples inside
/// prompts intact.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
    variables: Vec<String>,
}

impl PromptTemplate {
    /// Parse a template, discovering its placeholders
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let variables = scan_placeholders(&text)?;
        Ok(Self { text, variables })
    }

    /// Placeholder names in first-appearance order
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Render the template against a variable mapping
    pub fn render(&self, vars: &HashMap<String, String>) -> Result<String> {
        let mut out = String::with_capacity(self.text.len());
        let mut chars = self.text.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                },
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                },
                '{' => {
                    let mut name = String::new();
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            break;
                        }
                        name.push(inner);
                    }
                    let value = vars.get(&name).ok_or(FinsightError::Template {
                        variable: name.clone(),
                    })?;
                    out.push_str(value);
                },
                other => out.push(other),
            }
        }
        Ok(out)
    }
}

/// Collect placeholder names, rejecting unterminated slots
fn scan_placeholders(text: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
            },
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
            },
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    name.push(inner);
                }
                if !closed {
                    return Err(FinsightError::Template {
                        variable: format!("unterminated placeholder '{name}'"),
                    });
                }
                if !names.contains(&name) {
                    names.push(name);
                }
            },
            _ => {},
        }
    }
    Ok(names)
}

/// Template + model + parser bound into one invokable unit
#[derive(Clone)]
pub struct LlmChain {
    template: PromptTemplate,
    llm: Arc<dyn LanguageModel>,
    parser: Arc<dyn OutputParser>,
    params: Option<GenerationParams>,
}

impl LlmChain {
    /// Bind a template, model and parser
    pub fn new(
        template: PromptTemplate,
        llm: Arc<dyn LanguageModel>,
        parser: Arc<dyn OutputParser>,
    ) -> Self {
        Self {
            template,
            llm,
            parser,
            params: None,
        }
    }

    /// Apply per-call generation overrides on every invocation
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Render, complete and parse
    pub async fn invoke(&self, vars: &HashMap<String, String>) -> Result<String> {
        let (parsed, _) = self.invoke_with_response(vars).await?;
        Ok(parsed)
    }

    /// Render, complete and parse, also returning the response record
    pub async fn invoke_with_response(
        &self,
        vars: &HashMap<String, String>,
    ) -> Result<(String, LlmResponse)> {
        let prompt = self.template.render(vars)?;
        tracing::debug!(prompt_len = prompt.len(), "invoking chain");

        let response = match self.params {
            Some(params) => {
                let started = std::time::Instant::now();
                let text = self.llm.complete_with_params(&prompt, params).await?;
                LlmResponse {
                    request_id: uuid::Uuid::new_v4().to_string(),
                    model_name: self.llm.model_name(),
                    prompt: prompt.clone(),
                    response: text,
                    error: None,
                    duration_s: started.elapsed().as_secs_f64(),
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    total_tokens: 0,
                }
            },
            None => self.llm.complete_with_response(&prompt).await?,
        };

        let parsed = self.parser.parse(&response.response)?;
        Ok((parsed, response))
    }
}

/// Convenience constructor for a mapping of template variables
pub fn vars<const N: usize>(pairs: [(&str, &str); N]) -> HashMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
