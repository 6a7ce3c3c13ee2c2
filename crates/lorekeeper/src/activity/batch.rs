//! Extraction batches: the transient unit handed to the learning extractor

use chrono::{DateTime, Utc};

use crate::activity::LogEntry;

/// Ordered entries of one session, read for one extraction pass
#[derive(Debug, Clone)]
pub struct ExtractionBatch {
    pub session_id: String,
    pub entries: Vec<LogEntry>,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractionBatch {
    pub fn new(session_id: impl Into<String>, entries: Vec<LogEntry>) -> Self {
        Self {
            session_id: session_id.into(),
            entries,
            extracted_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Sequence number of the newest entry in the batch
    pub fn last_seq(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.seq).max()
    }

    /// Format entries as XML prompt context for LLM consumption
    ///
    /// Returns a string in the format:
    /// ```xml
    /// <conversation session="s1">
    /// <entry seq="1" role="user">content...</entry>
    /// <entry seq="2" role="assistant">content...</entry>
    /// </conversation>
    /// ```
    pub fn to_prompt_context(&self) -> String {
        let session = escape_xml(&self.session_id);
        if self.entries.is_empty() {
            return format!("<conversation session=\"{session}\"></conversation>");
        }

        let capacity = self.entries.iter().map(|e| e.text.len() + 48).sum::<usize>() + 64;
        let mut result = String::with_capacity(capacity);
        result.push_str(&format!("<conversation session=\"{session}\">\n"));

        for entry in &self.entries {
            result.push_str(&format!(
                "<entry seq=\"{}\" role=\"{}\">{}</entry>\n",
                entry.seq,
                entry.role.as_str(),
                escape_xml(&entry.text)
            ));
        }

        result.push_str("</conversation>");
        result
    }
}

/// Escape special XML characters in content
pub(crate) fn escape_xml(content: &str) -> String {
    content
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
