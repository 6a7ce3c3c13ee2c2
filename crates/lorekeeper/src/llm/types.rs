//! LLM collaborator error types

/// Errors raised while talking to the LLM collaborator or validating its output
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Schema violation: {0}")]
    SchemaViolation(String),
    #[error("Template error: {0}")]
    Template(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type alias for LLM operations
pub type Result<T> = std::result::Result<T, LlmError>;
