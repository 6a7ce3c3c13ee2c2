//! Language model trait for LLM-backed tasks
//!
//! Abstracts the inference backend (remote API, scripted mock) behind a
//! single completion call. Prompt rendering and output validation live in
//! [`crate::llm::LlmTask`], so backends never know which role they serve.

use async_trait::async_trait;

use crate::llm::types::LlmError;

/// Trait for LLM inference backends
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Submit a fully rendered prompt and return the raw completion text
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// Check if the backend can currently serve requests
    async fn is_available(&self) -> bool;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}
