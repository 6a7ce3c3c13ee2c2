//! Raw activity log consumed by the learning extractor
//!
//! The log is append-only and ordered per session. Every entry carries a
//! per-session sequence number; consumers track how far they have read with a
//! cursor (the last sequence number seen, `0` for the beginning).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod batch;
pub mod in_memory;

pub use batch::ExtractionBatch;
pub use in_memory::InMemoryLogSource;

/// Role of the participant that produced a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Someone talking to the persona
    User,
    /// The persona itself
    Assistant,
    /// Platform or agent-loop notices
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A single raw activity entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position within the session, strictly increasing from 1
    pub seq: u64,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only ordered log of agent activity
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Entries of `session_id` with `seq > cursor`, oldest first.
    ///
    /// Fails with `SourceUnavailable` when the log cannot be reached.
    async fn fetch_since(&self, session_id: &str, cursor: u64) -> Result<Vec<LogEntry>>;

    /// Drop entries of `session_id` with `seq <= up_to`.
    ///
    /// Only called after the entries were learned and consolidated.
    async fn clear(&self, session_id: &str, up_to: u64) -> Result<()>;

    /// Sessions that still hold entries
    async fn sessions(&self) -> Result<Vec<String>>;
}
