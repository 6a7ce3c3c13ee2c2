//! Category store and similarity search collaborators
//!
//! The [`CategoryStore`] is the durable home of every memory record. The only
//! way a summary enters it is [`CategoryStore::commit_consolidation`], which
//! writes the summary and consumes its inputs as one unit.

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::memory::types::{Category, MemoryRecord, Tier};

pub mod filter;
pub mod in_memory;
#[cfg(feature = "lance")]
pub mod lance;

pub use filter::RecordFilter;
pub use in_memory::InMemoryStore;
#[cfg(feature = "lance")]
pub use lance::LanceStore;

/// A summary together with the records it supersedes.
///
/// Every id in `summary.consolidated_from` is marked consumed by the summary.
/// Every id in `deactivate` additionally has its `active` flag cleared.
#[derive(Debug, Clone)]
pub struct ConsolidationCommit {
    pub summary: MemoryRecord,
    pub deactivate: Vec<Uuid>,
}

impl ConsolidationCommit {
    pub fn new(summary: MemoryRecord) -> Self {
        Self {
            summary,
            deactivate: Vec::new(),
        }
    }

    pub fn deactivating(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        for id in ids {
            if !self.deactivate.contains(&id) {
                self.deactivate.push(id);
            }
        }
        self
    }

    /// Records this commit consumes
    pub fn inputs(&self) -> &[Uuid] {
        &self.summary.consolidated_from
    }
}

/// Result of a consolidation commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Summary written and inputs consumed
    Committed,
    /// Nothing was applied; the reason names the violated precondition
    Conflict(String),
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed)
    }
}

/// A record ranked by a similarity search
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    /// Cosine similarity to the query, higher is closer
    pub score: f32,
}

/// Durable, append-mostly storage for memory records
#[async_trait]
pub trait CategoryStore: Send + Sync {
    /// Append a record. Writing an id that already exists is a no-op.
    async fn write(&self, record: MemoryRecord) -> Result<()>;

    /// Append every record or none of them
    async fn write_all(&self, records: Vec<MemoryRecord>) -> Result<()>;

    /// Mark records as consumed by `consumed_by`.
    ///
    /// Fails without changing anything if a record is missing or already
    /// consumed.
    async fn mark_consumed(&self, ids: &[Uuid], consumed_by: Uuid) -> Result<()>;

    /// Clear a record's `active` flag. Already-inactive records are left alone.
    async fn set_inactive(&self, id: Uuid) -> Result<()>;

    /// Records matching `filter`, oldest first
    async fn list(&self, filter: &RecordFilter) -> Result<Vec<MemoryRecord>>;

    /// Atomically write a summary, consume its inputs and deactivate the
    /// superseded records.
    ///
    /// Returns [`CommitOutcome::Conflict`] without applying anything when an
    /// input is missing, belongs to another category, sits in a higher tier
    /// than the summary, or was already consumed, or when the commit would
    /// leave two active long summaries in the category.
    async fn commit_consolidation(&self, commit: ConsolidationCommit) -> Result<CommitOutcome>;

    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>>;

    /// Every category holding at least one record
    async fn categories(&self) -> Result<Vec<Category>>;

    /// Records of one category and tier, oldest first
    async fn read(
        &self,
        category: &Category,
        tier: Tier,
        active_only: bool,
    ) -> Result<Vec<MemoryRecord>> {
        let mut filter = RecordFilter::for_category(category.clone()).with_tier(tier);
        if active_only {
            filter = filter.active_only();
        }
        self.list(&filter).await
    }

    /// Records of one category and tier that no summary has consumed, oldest first
    async fn unconsumed(&self, category: &Category, tier: Tier) -> Result<Vec<MemoryRecord>> {
        let filter = RecordFilter::for_category(category.clone())
            .with_tier(tier)
            .unconsumed_only();
        self.list(&filter).await
    }

    /// Highest log sequence number of `session_id` already learned into a
    /// raw record, 0 when nothing was learned from the session yet
    async fn learned_through(&self, session_id: &str) -> Result<u64> {
        let filter = RecordFilter::new()
            .with_tier(Tier::Raw)
            .with_session(session_id);
        Ok(self
            .list(&filter)
            .await?
            .iter()
            .filter_map(|r| r.source_seq)
            .max()
            .unwrap_or(0))
    }

    /// Settle consolidation commits an earlier failure left half-applied.
    /// Returns how many were rolled forward.
    async fn recover(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Ranked retrieval over stored records
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    /// Up to `top_k` records matching `filter`, most similar to `text` first
    async fn query(
        &self,
        text: &str,
        filter: &RecordFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>>;
}

/// Check a consolidation commit against the current store state.
///
/// `inputs` and `deactivated` hold the stored record for each id in
/// `commit.inputs()` and `commit.deactivate` respectively (`None` when
/// missing). `active_longs` lists the active long summaries currently in the
/// summary's category. Returns the conflict reason, if any.
pub(crate) fn commit_conflict(
    commit: &ConsolidationCommit,
    summary_exists: bool,
    inputs: &[Option<MemoryRecord>],
    deactivated: &[Option<MemoryRecord>],
    active_longs: &[Uuid],
) -> Option<String> {
    let summary = &commit.summary;

    if summary.tier == Tier::Raw {
        return Some("raw records cannot be consolidation output".to_string());
    }
    if summary_exists {
        return Some(format!("summary {} already committed", summary.id));
    }
    if commit.inputs().is_empty() {
        return Some(format!("summary {} consolidates nothing", summary.id));
    }

    for (id, input) in commit.inputs().iter().zip(inputs) {
        let Some(input) = input else {
            return Some(format!("input {id} not found"));
        };
        if input.category != summary.category {
            return Some(format!(
                "input {id} belongs to {}, not {}",
                input.category, summary.category
            ));
        }
        if input.tier > summary.tier {
            return Some(format!(
                "input {id} is {} but summary is {}",
                input.tier, summary.tier
            ));
        }
        if let Some(by) = input.consumed_by {
            return Some(format!("input {id} already consumed by {by}"));
        }
    }

    for (id, record) in commit.deactivate.iter().zip(deactivated) {
        let Some(record) = record else {
            return Some(format!("superseded record {id} not found"));
        };
        if record.category != summary.category {
            return Some(format!(
                "superseded record {id} belongs to {}",
                record.category
            ));
        }
    }

    if summary.tier == Tier::Long && summary.active {
        let superseded: HashSet<&Uuid> = commit.deactivate.iter().collect();
        if let Some(existing) = active_longs.iter().find(|id| !superseded.contains(id)) {
            return Some(format!(
                "{} already has active long summary {existing}",
                summary.category
            ));
        }
    }

    None
}
