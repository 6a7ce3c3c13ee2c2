//! Learning extractor: raw activity in, categorized raw memory records out
//!
//! One LLM call per batch partitions the activity into the fixed taxonomy.
//! Candidates are validated and deduplicated, then written all-or-nothing.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activity::ExtractionBatch;
use crate::config::{ExtractionConfig, PersonaConfig};
use crate::error::{MemoryError, Result};
use crate::llm::{LanguageModel, LlmTask, OutputSchema, prompts};
use crate::memory::types::{Category, MemoryRecord, Tier};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::storage::{CategoryStore, RecordFilter, SimilaritySearch};

/// One learning as proposed by the LLM, before validation
#[derive(Debug, Clone, Deserialize)]
pub struct CandidateLearning {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// The extraction task's output: a flat array of candidates
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct ExtractionOutput {
    pub learnings: Vec<CandidateLearning>,
}

impl OutputSchema for ExtractionOutput {
    // Individual candidates are filtered later; only the array shape is checked
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// What one extraction pass did
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub session_id: String,
    /// Candidates returned by the LLM
    pub candidates: usize,
    /// Dropped for a missing or unknown category, or empty text
    pub discarded_invalid: usize,
    /// Dropped as repeats within the batch or of an unconsumed raw record
    pub discarded_duplicates: usize,
    /// Ids of the raw records written
    pub written: Vec<Uuid>,
}

pub struct LearningExtractor {
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn CategoryStore>,
    search: Arc<dyn SimilaritySearch>,
    persona: PersonaConfig,
    dedup_threshold: f32,
    retry: RetryPolicy,
    task: LlmTask<ExtractionOutput>,
}

impl LearningExtractor {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn CategoryStore>,
        search: Arc<dyn SimilaritySearch>,
        persona: PersonaConfig,
        config: &ExtractionConfig,
    ) -> Self {
        Self {
            model,
            store,
            search,
            persona,
            dedup_threshold: config.dedup_threshold,
            retry: config.retry_policy(),
            task: LlmTask::new(prompts::extraction()),
        }
    }

    /// Learn from a batch.
    ///
    /// On LLM failure after retries, returns `ExtractionFailed` and writes
    /// nothing, so the batch can be retried on the next cycle.
    pub async fn extract(&self, batch: &ExtractionBatch) -> Result<ExtractionReport> {
        let mut report = ExtractionReport {
            session_id: batch.session_id.clone(),
            ..Default::default()
        };
        if batch.is_empty() {
            debug!(session = %batch.session_id, "Empty batch, nothing to extract");
            return Ok(report);
        }

        let output = self.request(batch).await?;
        report.candidates = output.learnings.len();

        let learned_through = batch.last_seq().unwrap_or_default();
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        for candidate in output.learnings {
            let Some(record) = Self::to_record(candidate, &batch.session_id) else {
                report.discarded_invalid += 1;
                continue;
            };
            let record = record.learned_at(learned_through);

            if !seen.insert((record.category.clone(), normalize(&record.text))) {
                report.discarded_duplicates += 1;
                continue;
            }

            if self.is_known(&record).await? {
                debug!(category = %record.category, "Dropping already-known learning: {}", record.text);
                report.discarded_duplicates += 1;
                continue;
            }

            accepted.push(record);
        }

        report.written = accepted.iter().map(|r| r.id).collect();
        self.store.write_all(accepted).await?;

        info!(
            session = %batch.session_id,
            candidates = report.candidates,
            written = report.written.len(),
            invalid = report.discarded_invalid,
            duplicates = report.discarded_duplicates,
            "Extracted learnings from {} entries",
            batch.len()
        );
        Ok(report)
    }

    async fn request(&self, batch: &ExtractionBatch) -> Result<ExtractionOutput> {
        let conversation = batch.to_prompt_context();
        let vars = [
            ("persona_name", self.persona.name.as_str()),
            ("persona_bio", self.persona.bio.as_str()),
            ("conversation", conversation.as_str()),
        ];

        retry_with_backoff(&self.retry, self.task.name(), || {
            self.task.run(self.model.as_ref(), &vars)
        })
        .await
        .map_err(|e| {
            warn!(session = %batch.session_id, "Extraction failed, batch left for next cycle: {}", e);
            MemoryError::extraction(e)
        })
    }

    /// Validate a candidate into a raw record
    fn to_record(candidate: CandidateLearning, session_id: &str) -> Option<MemoryRecord> {
        let text = candidate.text?.trim().to_string();
        if text.is_empty() {
            return None;
        }
        let category = Category::from_label(&candidate.category?, candidate.user_id.as_deref())?;
        Some(MemoryRecord::raw(category, text, Some(session_id.to_string())))
    }

    /// Whether an unconsumed raw record in the same category is too similar
    async fn is_known(&self, record: &MemoryRecord) -> Result<bool> {
        let filter = RecordFilter::for_category(record.category.clone())
            .with_tier(Tier::Raw)
            .unconsumed_only();
        let nearest = self.search.query(&record.text, &filter, 1).await?;
        Ok(nearest
            .first()
            .is_some_and(|hit| hit.score > self.dedup_threshold))
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
