//! Summarization ladder: raw → short → mid → long, per category
//!
//! Each step selects the oldest unconsumed records of one tier, asks the LLM
//! for a summary, and commits the summary together with the consumed-marks
//! through [`CategoryStore::commit_consolidation`]. The store rejects a
//! commit whose inputs were consumed in the meantime, so re-running the
//! ladder over the same records never writes a second summary.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{CategoryConfig, PersonaConfig, ThresholdConfig};
use crate::error::{MemoryError, Result};
use crate::llm::{LanguageModel, LlmTask, OutputSchema, prompts};
use crate::memory::types::{Category, MemoryRecord, Tier};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::storage::{CategoryStore, CommitOutcome, ConsolidationCommit};

/// Output of every summarization task
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryOutput {
    pub summary: String,
}

impl OutputSchema for SummaryOutput {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.summary.trim().is_empty() {
            Err("summary is empty".to_string())
        } else {
            Ok(())
        }
    }
}

/// How far a ladder pass goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderMode {
    /// Only consolidate tiers that reached their trigger
    Threshold,
    /// Also consolidate any below-threshold backlog (session boundary, sweep)
    Force,
}

/// What one ladder pass over a category produced
#[derive(Debug, Clone, Default)]
pub struct LadderReport {
    pub shorts: Vec<Uuid>,
    pub mids: Vec<Uuid>,
    pub longs: Vec<Uuid>,
    /// Commits the store rejected because another pass got there first
    pub conflicts: usize,
    /// The category is configured to keep records verbatim
    pub skipped: bool,
}

impl LadderReport {
    pub fn summaries_created(&self) -> usize {
        self.shorts.len() + self.mids.len() + self.longs.len()
    }
}

pub struct SummarizationLadder {
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn CategoryStore>,
    persona: PersonaConfig,
    thresholds: ThresholdConfig,
    categories: CategoryConfig,
    retry: RetryPolicy,
    short_task: LlmTask<SummaryOutput>,
    mid_task: LlmTask<SummaryOutput>,
    long_task: LlmTask<SummaryOutput>,
}

impl SummarizationLadder {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn CategoryStore>,
        persona: PersonaConfig,
        thresholds: ThresholdConfig,
        categories: CategoryConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model,
            store,
            persona,
            thresholds,
            categories,
            retry,
            short_task: LlmTask::new(prompts::short_summary()),
            mid_task: LlmTask::new(prompts::mid_summary()),
            long_task: LlmTask::new(prompts::long_merge()),
        }
    }

    /// Run the ladder for one category.
    ///
    /// Callers must hold the category's lease; the store's compare-and-set
    /// commit is the backstop when they don't.
    pub async fn consolidate(&self, category: &Category, mode: LadderMode) -> Result<LadderReport> {
        let mut report = LadderReport::default();

        if !self.categories.ladder_enabled(category) {
            debug!(category = %category, "Ladder disabled, records kept verbatim");
            report.skipped = true;
            return Ok(report);
        }

        if !self.run_thresholds(category, &mut report).await? {
            return Ok(report);
        }

        if mode == LadderMode::Force {
            let raws = self.store.unconsumed(category, Tier::Raw).await?;
            if !raws.is_empty() {
                debug!(category = %category, pending = raws.len(), "Force-elevating raw backlog");
                if !self.build(category, Tier::Short, &raws, &mut report).await? {
                    return Ok(report);
                }
            }

            // The forced short may have completed a mid batch
            if !self.run_thresholds(category, &mut report).await? {
                return Ok(report);
            }

            let shorts = self.store.unconsumed(category, Tier::Short).await?;
            if !shorts.is_empty() {
                debug!(category = %category, pending = shorts.len(), "Force-elevating short backlog");
                if self.build(category, Tier::Mid, &shorts, &mut report).await? {
                    self.merge_pending_mids(category, &mut report).await?;
                }
            }
        }

        if report.summaries_created() > 0 {
            info!(
                category = %category,
                shorts = report.shorts.len(),
                mids = report.mids.len(),
                longs = report.longs.len(),
                "Consolidated category"
            );
        }
        Ok(report)
    }

    /// Consolidate every tier that reached its trigger, repeatedly.
    ///
    /// Returns `false` if a commit was rejected, which ends the pass.
    async fn run_thresholds(&self, category: &Category, report: &mut LadderReport) -> Result<bool> {
        loop {
            if !self.merge_pending_mids(category, report).await? {
                return Ok(false);
            }

            let raws = self.store.unconsumed(category, Tier::Raw).await?;
            if raws.len() >= self.thresholds.short_trigger {
                let oldest = &raws[..self.thresholds.short_trigger];
                if !self.build(category, Tier::Short, oldest, report).await? {
                    return Ok(false);
                }
                continue;
            }

            let shorts = self.store.unconsumed(category, Tier::Short).await?;
            if shorts.len() >= self.thresholds.mid_trigger {
                let oldest = &shorts[..self.thresholds.mid_trigger];
                if !self.build(category, Tier::Mid, oldest, report).await? {
                    return Ok(false);
                }
                continue;
            }

            return Ok(true);
        }
    }

    /// Fold every unconsumed mid summary into the category's long summary
    async fn merge_pending_mids(&self, category: &Category, report: &mut LadderReport) -> Result<bool> {
        let mids = self.store.unconsumed(category, Tier::Mid).await?;
        for mid in &mids {
            if !self.merge_long(category, mid, report).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Summarize `inputs` into one record of `tier` and commit it.
    ///
    /// Summary-tier inputs are deactivated along with being consumed; raw
    /// inputs stay active as readable history.
    async fn build(
        &self,
        category: &Category,
        tier: Tier,
        inputs: &[MemoryRecord],
        report: &mut LadderReport,
    ) -> Result<bool> {
        let task = match tier {
            Tier::Short => &self.short_task,
            Tier::Mid => &self.mid_task,
            other => {
                return Err(MemoryError::SummarizationFailed(format!(
                    "{other} summaries are built by merging, not batching"
                )));
            }
        };

        let records = render_records(inputs);
        let category_key = category.key();
        let vars = self.vars(&[("category", &category_key), ("records", &records)]);
        let output = self.summarize(task, &vars, category).await?;

        let summary = MemoryRecord::summary(
            category.clone(),
            tier,
            output.summary.trim(),
            inputs.iter().map(|r| r.id),
        );
        let superseded = inputs.iter().filter(|r| r.tier != Tier::Raw).map(|r| r.id);
        let commit = ConsolidationCommit::new(summary).deactivating(superseded);

        let id = commit.summary.id;
        if !self.commit(commit, report).await? {
            return Ok(false);
        }

        match tier {
            Tier::Short => report.shorts.push(id),
            _ => {
                report.mids.push(id);
                if let Some(mid) = self.store.get(id).await? {
                    return self.merge_long(category, &mid, report).await;
                }
            }
        }
        Ok(true)
    }

    /// Merge a mid summary into the active long summary, superseding it
    async fn merge_long(
        &self,
        category: &Category,
        mid: &MemoryRecord,
        report: &mut LadderReport,
    ) -> Result<bool> {
        let current = self
            .store
            .read(category, Tier::Long, true)
            .await?
            .into_iter()
            .last();

        let text = match &current {
            Some(long) => {
                let category_key = category.key();
                let vars = self.vars(&[
                    ("category", &category_key),
                    ("current_long", &long.text),
                    ("new_mid", &mid.text),
                ]);
                self.summarize(&self.long_task, &vars, category)
                    .await?
                    .summary
                    .trim()
                    .to_string()
            }
            // First long summary of the category: nothing to merge with
            None => mid.text.clone(),
        };

        let mut inputs: Vec<Uuid> = current.iter().map(|l| l.id).collect();
        inputs.push(mid.id);
        let summary = MemoryRecord::summary(category.clone(), Tier::Long, text, inputs.clone());
        let commit = ConsolidationCommit::new(summary).deactivating(inputs);

        let id = commit.summary.id;
        if !self.commit(commit, report).await? {
            return Ok(false);
        }
        report.longs.push(id);
        Ok(true)
    }

    async fn summarize(
        &self,
        task: &LlmTask<SummaryOutput>,
        vars: &[(&str, &str)],
        category: &Category,
    ) -> Result<SummaryOutput> {
        retry_with_backoff(&self.retry, task.name(), || {
            task.run(self.model.as_ref(), vars)
        })
        .await
        .map_err(|e| {
            warn!(category = %category, task = task.name(), "Summarization failed: {}", e);
            MemoryError::summarization(e)
        })
    }

    async fn commit(&self, commit: ConsolidationCommit, report: &mut LadderReport) -> Result<bool> {
        let category = commit.summary.category.clone();
        let tier = commit.summary.tier;
        match self.store.commit_consolidation(commit).await? {
            CommitOutcome::Committed => Ok(true),
            CommitOutcome::Conflict(reason) => {
                warn!(category = %category, tier = %tier, "Consolidation skipped: {}", reason);
                report.conflicts += 1;
                Ok(false)
            }
        }
    }

    fn vars<'a>(&'a self, extra: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut vars = vec![
            ("persona_name", self.persona.name.as_str()),
            ("persona_bio", self.persona.bio.as_str()),
            ("persona_voice", self.persona.voice.as_str()),
        ];
        vars.extend_from_slice(extra);
        vars
    }
}

/// Numbered list of record texts, oldest first
fn render_records(records: &[MemoryRecord]) -> String {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}", i + 1, r.text))
        .collect::<Vec<_>>()
        .join("\n")
}
