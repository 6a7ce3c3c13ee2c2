//! Lorekeeper - tiered long-term memory for persona-driven agents
//!
//! Raw activity is learned into categorized memory records, consolidated up a
//! summarization ladder (raw → short → mid → long) and served back to the
//! agent as categorized context for its reasoning prompts.

pub mod activity;
pub mod config;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod system;
pub mod testing;

pub use error::{MemoryError, Result};
pub use memory::{Category, MemoryRecord, RetrievedContext, Tier};
pub use system::MemorySystem;
