//! Error types for Lorekeeper

use thiserror::Error;

use crate::llm::LlmError;

/// Main error type for Lorekeeper operations
#[derive(Error, Debug)]
pub enum MemoryError {
    /// The raw activity log could not be reached
    #[error("Log source unavailable: {0}")]
    SourceUnavailable(String),

    /// The extraction LLM errored or returned output that failed validation
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// A tier summary could not be synthesized
    #[error("Summarization failed: {0}")]
    SummarizationFailed(String),

    /// The category store lost connectivity or rejected an operation
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A write would break a store invariant (duplicate active long summary)
    #[error("Conflicting write: {0}")]
    Conflict(String),

    /// No record with this id exists
    #[error("Record not found: {0}")]
    NotFound(uuid::Uuid),

    /// A spawned consolidation task panicked or was cancelled
    #[error("Consolidation task failed: {0}")]
    TaskFailed(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding generation errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MemoryError {
    /// Wrap an LLM failure raised while learning from a batch
    pub fn extraction(err: LlmError) -> Self {
        MemoryError::ExtractionFailed(err.to_string())
    }

    /// Wrap an LLM failure raised while building a tier summary
    pub fn summarization(err: LlmError) -> Self {
        MemoryError::SummarizationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::Serialization(err.to_string())
    }
}

/// Result type alias for Lorekeeper operations
pub type Result<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MemoryError::SourceUnavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "Log source unavailable: connection refused");

        let err = MemoryError::StoreUnavailable("table missing".to_string());
        assert_eq!(err.to_string(), "Store unavailable: table missing");
    }

    #[test]
    fn test_llm_error_wrapping() {
        let err = MemoryError::extraction(LlmError::SchemaViolation("missing text".into()));
        assert!(matches!(err, MemoryError::ExtractionFailed(_)));
        assert!(err.to_string().contains("missing text"));

        let err = MemoryError::summarization(LlmError::ApiError("500".into()));
        assert!(matches!(err, MemoryError::SummarizationFailed(_)));
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse: std::result::Result<u32, _> = serde_json::from_str("not json");
        let err: MemoryError = parse.unwrap_err().into();
        assert!(matches!(err, MemoryError::Serialization(_)));
    }
}
