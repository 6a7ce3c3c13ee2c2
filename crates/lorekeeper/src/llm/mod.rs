//! LLM collaborator for learning extraction and summarization
//!
//! Each role the memory subsystem asks an LLM to play is an [`LlmTask`]: a
//! prompt template composed with a validated output schema, run against any
//! [`LanguageModel`] backend.

pub mod prompts;
pub mod provider;
pub mod remote;
pub mod task;
pub mod types;

pub use provider::LanguageModel;
pub use remote::RemoteModel;
pub use task::{LlmTask, OutputSchema, PromptTemplate};
pub use types::LlmError;
