//! Process-local activity log

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::activity::{LogEntry, LogSource, Role};
use crate::error::Result;

#[derive(Default)]
struct SessionLog {
    entries: Vec<LogEntry>,
    last_seq: u64,
}

/// Activity log kept in memory, keyed by session id
#[derive(Default)]
pub struct InMemoryLogSource {
    sessions: RwLock<BTreeMap<String, SessionLog>>,
}

impl InMemoryLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its sequence number
    pub async fn append(&self, session_id: &str, role: Role, text: impl Into<String>) -> u64 {
        let mut sessions = self.sessions.write().await;
        let log = sessions.entry(session_id.to_string()).or_default();
        log.last_seq += 1;
        log.entries.push(LogEntry {
            seq: log.last_seq,
            role,
            text: text.into(),
            timestamp: Utc::now(),
        });
        log.last_seq
    }

    /// Entries still held for a session
    pub async fn pending(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map_or(0, |log| log.entries.len())
    }
}

#[async_trait]
impl LogSource for InMemoryLogSource {
    async fn fetch_since(&self, session_id: &str, cursor: u64) -> Result<Vec<LogEntry>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .map(|log| {
                log.entries
                    .iter()
                    .filter(|e| e.seq > cursor)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn clear(&self, session_id: &str, up_to: u64) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(log) = sessions.get_mut(session_id) {
            log.entries.retain(|e| e.seq > up_to);
        }
        Ok(())
    }

    async fn sessions(&self) -> Result<Vec<String>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .iter()
            .filter(|(_, log)| !log.entries.is_empty())
            .map(|(id, _)| id.clone())
            .collect())
    }
}
