//! Process-local category store and similarity search
//!
//! Every mutation happens under one write lock, so a consolidation commit's
//! summary write and consumed-marks can never be observed apart.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::embedding::{Embedder, TokenHashEmbedder, cosine_similarity};
use crate::error::{MemoryError, Result};
use crate::memory::types::{Category, MemoryRecord, Tier};
use crate::storage::{
    CategoryStore, CommitOutcome, ConsolidationCommit, RecordFilter, ScoredRecord,
    SimilaritySearch, commit_conflict,
};

struct StoredRecord {
    record: MemoryRecord,
    embedding: Vec<f32>,
    /// Insertion order, breaks ties between identical timestamps
    seq: u64,
}

#[derive(Default)]
struct Inner {
    records: HashMap<Uuid, StoredRecord>,
    next_seq: u64,
}

impl Inner {
    fn insert(&mut self, record: MemoryRecord, embedding: Vec<f32>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.insert(
            record.id,
            StoredRecord {
                record,
                embedding,
                seq,
            },
        );
    }

    fn active_longs(&self, category: &Category) -> Vec<Uuid> {
        self.records
            .values()
            .filter(|s| s.record.category == *category && s.record.tier == Tier::Long && s.record.active)
            .map(|s| s.record.id)
            .collect()
    }

    /// A direct write of an active long must not create a second one
    fn check_long_invariant(&self, record: &MemoryRecord) -> Result<()> {
        if record.tier == Tier::Long && record.active {
            if let Some(existing) = self.active_longs(&record.category).first() {
                return Err(MemoryError::Conflict(format!(
                    "{} already has active long summary {existing}",
                    record.category
                )));
            }
        }
        Ok(())
    }

    fn snapshot(&self, id: &Uuid) -> Option<MemoryRecord> {
        self.records.get(id).map(|s| s.record.clone())
    }
}

/// In-process store holding records and their embeddings in memory
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    embedder: Arc<dyn Embedder>,
}

impl InMemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            embedder,
        }
    }

    /// Number of stored records, active or not
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(TokenHashEmbedder::new()))
    }
}

#[async_trait]
impl CategoryStore for InMemoryStore {
    async fn write(&self, record: MemoryRecord) -> Result<()> {
        let embedding = self.embedder.embed(&record.text)?;
        let mut inner = self.inner.write().await;

        if inner.records.contains_key(&record.id) {
            debug!(id = %record.id, "Record already stored, skipping write");
            return Ok(());
        }
        inner.check_long_invariant(&record)?;
        inner.insert(record, embedding);
        Ok(())
    }

    async fn write_all(&self, records: Vec<MemoryRecord>) -> Result<()> {
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;

        let mut inner = self.inner.write().await;
        let mut seen = BTreeSet::new();
        let mut pending_longs = BTreeSet::new();
        for record in &records {
            if inner.records.contains_key(&record.id) || !seen.insert(record.id) {
                continue;
            }
            inner.check_long_invariant(record)?;
            if record.tier == Tier::Long && record.active && !pending_longs.insert(record.category.clone()) {
                return Err(MemoryError::Conflict(format!(
                    "batch holds two active long summaries for {}",
                    record.category
                )));
            }
        }

        let mut written = BTreeSet::new();
        for (record, embedding) in records.into_iter().zip(embeddings) {
            if inner.records.contains_key(&record.id) || !written.insert(record.id) {
                continue;
            }
            inner.insert(record, embedding);
        }
        Ok(())
    }

    async fn mark_consumed(&self, ids: &[Uuid], consumed_by: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;

        for id in ids {
            let stored = inner.records.get(id).ok_or(MemoryError::NotFound(*id))?;
            if let Some(by) = stored.record.consumed_by {
                return Err(MemoryError::Conflict(format!(
                    "record {id} already consumed by {by}"
                )));
            }
        }

        for id in ids {
            if let Some(stored) = inner.records.get_mut(id) {
                stored.record.consumed_by = Some(consumed_by);
            }
        }
        Ok(())
    }

    async fn set_inactive(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        let stored = inner.records.get_mut(&id).ok_or(MemoryError::NotFound(id))?;
        stored.record.active = false;
        Ok(())
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<MemoryRecord>> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&StoredRecord> = inner
            .records
            .values()
            .filter(|s| filter.matches(&s.record))
            .collect();
        matching.sort_by_key(|s| (s.record.created_at, s.seq));
        Ok(matching.into_iter().map(|s| s.record.clone()).collect())
    }

    async fn commit_consolidation(&self, commit: ConsolidationCommit) -> Result<CommitOutcome> {
        let embedding = self.embedder.embed(&commit.summary.text)?;
        let mut inner = self.inner.write().await;

        let inputs: Vec<Option<MemoryRecord>> =
            commit.inputs().iter().map(|id| inner.snapshot(id)).collect();
        let deactivated: Vec<Option<MemoryRecord>> =
            commit.deactivate.iter().map(|id| inner.snapshot(id)).collect();
        let active_longs = inner.active_longs(&commit.summary.category);
        let summary_exists = inner.records.contains_key(&commit.summary.id);

        if let Some(reason) = commit_conflict(
            &commit,
            summary_exists,
            &inputs,
            &deactivated,
            &active_longs,
        ) {
            debug!(category = %commit.summary.category, "Consolidation commit rejected: {}", reason);
            return Ok(CommitOutcome::Conflict(reason));
        }

        let summary_id = commit.summary.id;
        for id in commit.inputs() {
            if let Some(stored) = inner.records.get_mut(id) {
                stored.record.consumed_by = Some(summary_id);
            }
        }
        for id in &commit.deactivate {
            if let Some(stored) = inner.records.get_mut(id) {
                stored.record.active = false;
            }
        }
        inner.insert(commit.summary, embedding);

        Ok(CommitOutcome::Committed)
    }

    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        Ok(self.inner.read().await.snapshot(&id))
    }

    async fn categories(&self) -> Result<Vec<Category>> {
        let inner = self.inner.read().await;
        let categories: BTreeSet<Category> = inner
            .records
            .values()
            .map(|s| s.record.category.clone())
            .collect();
        Ok(categories.into_iter().collect())
    }
}

#[async_trait]
impl SimilaritySearch for InMemoryStore {
    async fn query(
        &self,
        text: &str,
        filter: &RecordFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(text)?;

        let inner = self.inner.read().await;
        let mut scored: Vec<(f32, u64, &MemoryRecord)> = inner
            .records
            .values()
            .filter(|s| filter.matches(&s.record))
            .map(|s| {
                (
                    cosine_similarity(&query_embedding, &s.embedding),
                    s.seq,
                    &s.record,
                )
            })
            .collect();

        // Highest score first, newest first on ties
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.cmp(&a.1))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, _, record)| ScoredRecord {
                record: record.clone(),
                score,
            })
            .collect())
    }
}
