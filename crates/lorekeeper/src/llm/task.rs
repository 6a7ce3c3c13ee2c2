//! LLM tasks: a prompt template paired with a validated output schema
//!
//! Every role the subsystem asks an LLM to play (extracting learnings,
//! writing a short summary, merging a long summary) is an [`LlmTask`] value.
//! Adding a role means adding a template and an output type, not a new
//! backend implementation.

use std::collections::HashMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::llm::provider::LanguageModel;
use crate::llm::types::{LlmError, Result};

/// Output types declare their own validation beyond what serde checks
pub trait OutputSchema {
    /// Return a description of the first violation, if any
    fn validate(&self) -> std::result::Result<(), String>;
}

/// A prompt with `{placeholder}` slots
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    name: &'static str,
    text: String,
}

impl PromptTemplate {
    pub fn new(name: &'static str, text: impl Into<String>) -> Self {
        Self {
            name,
            text: text.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Placeholders this template expects, in order of first appearance
    pub fn placeholders(&self) -> Vec<&str> {
        let mut found = Vec::new();
        let mut rest = self.text.as_str();
        while let Some(start) = rest.find('{') {
            let after = &rest[start + 1..];
            match placeholder_name(after) {
                Some(name) => {
                    if !found.contains(&name) {
                        found.push(name);
                    }
                    rest = &after[name.len() + 1..];
                }
                None => rest = after,
            }
        }
        found
    }

    /// Substitute every placeholder in one pass.
    ///
    /// Substituted values are never rescanned, so user text containing
    /// braces passes through untouched. Fails if a placeholder has no value.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String> {
        let values: HashMap<&str, &str> = vars.iter().copied().collect();
        let mut rendered = String::with_capacity(self.text.len() + 256);
        let mut rest = self.text.as_str();

        while let Some(start) = rest.find('{') {
            rendered.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match placeholder_name(after) {
                Some(name) => {
                    let value = values.get(name).ok_or_else(|| {
                        LlmError::Template(format!(
                            "Template '{}' has unresolved placeholder {{{}}}",
                            self.name, name
                        ))
                    })?;
                    rendered.push_str(value);
                    rest = &after[name.len() + 1..];
                }
                None => {
                    rendered.push('{');
                    rest = after;
                }
            }
        }
        rendered.push_str(rest);
        Ok(rendered)
    }
}

/// Returns the identifier if `s` starts with `identifier}`
fn placeholder_name(s: &str) -> Option<&str> {
    let end = s.find('}')?;
    let candidate = &s[..end];
    let valid = !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    valid.then_some(candidate)
}

/// Strip markdown code fences and surrounding prose from a JSON completion
pub fn extract_json(completion: &str) -> &str {
    let trimmed = completion.trim();
    let unfenced = if let Some(inner) = trimmed.strip_prefix("```") {
        let inner = inner.split_once('\n').map(|(_, body)| body).unwrap_or("");
        inner.trim_end().strip_suffix("```").unwrap_or(inner).trim()
    } else {
        trimmed
    };

    let start = unfenced.find(['{', '[']);
    let end = unfenced.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e >= s => &unfenced[s..=e],
        _ => unfenced,
    }
}

/// A named LLM role: render a template, submit it, validate the result
pub struct LlmTask<T> {
    template: PromptTemplate,
    _output: PhantomData<fn() -> T>,
}

impl<T> LlmTask<T>
where
    T: DeserializeOwned + OutputSchema,
{
    pub fn new(template: PromptTemplate) -> Self {
        Self {
            template,
            _output: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.template.name()
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Parse and validate a raw completion against the output schema
    pub fn parse(&self, completion: &str) -> Result<T> {
        let json = extract_json(completion);
        let output: T = serde_json::from_str(json).map_err(|e| {
            LlmError::ParseError(format!("{} returned invalid JSON: {e}", self.name()))
        })?;
        output
            .validate()
            .map_err(|violation| LlmError::SchemaViolation(format!("{}: {violation}", self.name())))?;
        Ok(output)
    }

    /// Render the template, submit it to `model`, and validate the output
    pub async fn run(&self, model: &dyn LanguageModel, vars: &[(&str, &str)]) -> Result<T> {
        let prompt = self.template.render(vars)?;
        debug!(task = self.name(), model = model.name(), "Submitting LLM task");
        let completion = model.complete(&prompt).await?;
        debug!(task = self.name(), "LLM task response: {}", completion);
        self.parse(&completion)
    }
}

impl<T> Clone for LlmTask<T> {
    fn clone(&self) -> Self {
        Self {
            template: self.template.clone(),
            _output: PhantomData,
        }
    }
}
