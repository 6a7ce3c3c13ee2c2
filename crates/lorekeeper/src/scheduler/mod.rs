//! Consolidation scheduling
//!
//! Two cadences drive the extractor and the ladder:
//! - session boundaries, fired every N agent actions or on request
//! - the meditation sweep, run on a fixed interval across every session and
//!   category
//!
//! Both take the same per-category leases, so no two cycles ever run the
//! ladder for one category at the same time. Cycles run on spawned tasks; the
//! agent loop only holds a [`ConsolidationHandle`].

pub mod lease;

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::activity::{ExtractionBatch, LogSource};
use crate::config::SchedulerConfig;
use crate::error::{MemoryError, Result};
use crate::memory::extractor::{ExtractionReport, LearningExtractor};
use crate::memory::ladder::{LadderMode, LadderReport, SummarizationLadder};
use crate::memory::types::Category;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::storage::CategoryStore;

pub use lease::{Lease, LeaseTable};

/// What started a consolidation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleKind {
    SessionBoundary(String),
    Meditation,
}

/// Outcome of one consolidation cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub kind: CycleKind,
    pub extractions: Vec<ExtractionReport>,
    /// Sessions whose log could not be read or learned from, with the reason
    pub extraction_failures: BTreeMap<String, String>,
    pub ladders: BTreeMap<Category, LadderReport>,
    /// Categories whose ladder aborted, with the reason
    pub failures: BTreeMap<Category, String>,
    /// Sessions whose log was cleared, with the last cleared sequence number
    pub cleared: BTreeMap<String, u64>,
}

impl CycleReport {
    fn new(kind: CycleKind) -> Self {
        Self {
            kind,
            extractions: Vec::new(),
            extraction_failures: BTreeMap::new(),
            ladders: BTreeMap::new(),
            failures: BTreeMap::new(),
            cleared: BTreeMap::new(),
        }
    }

    /// Whether every step of the cycle succeeded
    pub fn is_clean(&self) -> bool {
        self.extraction_failures.is_empty() && self.failures.is_empty()
    }

    pub fn records_written(&self) -> usize {
        self.extractions.iter().map(|e| e.written.len()).sum()
    }

    pub fn summaries_created(&self) -> usize {
        self.ladders.values().map(LadderReport::summaries_created).sum()
    }
}

/// A consolidation cycle running in the background
#[derive(Debug)]
pub struct ConsolidationHandle {
    session_id: String,
    handle: JoinHandle<Result<CycleReport>>,
}

impl ConsolidationHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the cycle to finish
    pub async fn wait(self) -> Result<CycleReport> {
        self.handle
            .await
            .map_err(|e| MemoryError::TaskFailed(e.to_string()))?
    }
}

struct SchedulerInner {
    log: Arc<dyn LogSource>,
    extractor: LearningExtractor,
    ladder: SummarizationLadder,
    store: Arc<dyn CategoryStore>,
    config: SchedulerConfig,
    source_retry: RetryPolicy,
    leases: LeaseTable,
    /// Cache of the durable cursor kept in the store, per session
    cursors: DashMap<String, u64>,
    action_counts: DashMap<String, u32>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        log: Arc<dyn LogSource>,
        extractor: LearningExtractor,
        ladder: SummarizationLadder,
        store: Arc<dyn CategoryStore>,
        config: SchedulerConfig,
        source_retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                log,
                extractor,
                ladder,
                store,
                config,
                source_retry,
                leases: LeaseTable::new(),
                cursors: DashMap::new(),
                action_counts: DashMap::new(),
            }),
        }
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.inner.leases
    }

    /// Last sequence number of `session_id` already learned from.
    ///
    /// Survives restarts: an uncached cursor is read back from the raw
    /// records learned from the session.
    pub async fn cursor(&self, session_id: &str) -> Result<u64> {
        self.inner.load_cursor(session_id).await
    }

    /// Sessions with in-process state (cached cursor or pending action count)
    pub fn tracked_sessions(&self) -> usize {
        let mut sessions: Vec<String> = self.inner.cursors.iter().map(|e| e.key().clone()).collect();
        sessions.extend(self.inner.action_counts.iter().map(|e| e.key().clone()));
        sessions.sort();
        sessions.dedup();
        sessions.len()
    }

    /// Start a session-boundary cycle in the background
    pub fn trigger_consolidation(&self, session_id: &str) -> ConsolidationHandle {
        let scheduler = self.clone();
        let session = session_id.to_string();
        let handle = tokio::spawn(async move {
            let result = scheduler.run_session_cycle(&session).await;
            if let Err(e) = &result {
                warn!(session = %session, "Consolidation cycle deferred to next cycle: {}", e);
            }
            result
        });

        ConsolidationHandle {
            session_id: session_id.to_string(),
            handle,
        }
    }

    /// Count one agent action; every `actions_per_session` actions the
    /// session boundary fires
    pub fn record_action(&self, session_id: &str) -> Option<ConsolidationHandle> {
        let boundary = {
            let mut count = self
                .inner
                .action_counts
                .entry(session_id.to_string())
                .or_insert(0);
            *count += 1;
            if *count >= self.inner.config.actions_per_session {
                *count = 0;
                true
            } else {
                false
            }
        };

        if boundary {
            debug!(session = %session_id, "Session boundary reached");
            Some(self.trigger_consolidation(session_id))
        } else {
            None
        }
    }

    /// Extract the session's new activity, force the ladder over every
    /// category, then clear the learned part of the log.
    ///
    /// Fails when the log is unreachable or extraction fails; per-category
    /// ladder failures are reported in [`CycleReport::failures`] and keep
    /// the log from being cleared.
    pub async fn run_session_cycle(&self, session_id: &str) -> Result<CycleReport> {
        let inner = &self.inner;
        let mut report = CycleReport::new(CycleKind::SessionBoundary(session_id.to_string()));
        {
            let _session = inner.leases.acquire(&LeaseTable::session_key(session_id)).await;
            inner.extract_session(session_id, &mut report).await?;
            inner.consolidate_all(&mut report).await?;
            inner.clear_log(session_id, &mut report).await;
        }
        if report.failures.is_empty() {
            inner.forget_session(session_id);
        }

        info!(
            session = %session_id,
            written = report.records_written(),
            summaries = report.summaries_created(),
            failures = report.failures.len(),
            "Session cycle finished"
        );
        Ok(report)
    }

    /// The meditation sweep: learn from every session with pending activity
    /// and force the ladder over every category.
    ///
    /// Per-session and per-category failures are reported, not raised.
    pub async fn run_meditation(&self) -> Result<CycleReport> {
        let inner = &self.inner;
        let mut report = CycleReport::new(CycleKind::Meditation);

        let sessions = match inner.fetch_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Meditation continues without new activity: {}", e);
                Vec::new()
            }
        };

        let mut learned = Vec::new();
        for session_id in sessions {
            let _session = inner.leases.acquire(&LeaseTable::session_key(&session_id)).await;
            match inner.extract_session(&session_id, &mut report).await {
                Ok(()) => learned.push(session_id),
                Err(e) => {
                    report.extraction_failures.insert(session_id, e.to_string());
                }
            }
        }

        inner.consolidate_all(&mut report).await?;

        for session_id in learned {
            {
                let _session = inner.leases.acquire(&LeaseTable::session_key(&session_id)).await;
                inner.clear_log(&session_id, &mut report).await;
            }
            if report.failures.is_empty() {
                inner.forget_session(&session_id);
            }
        }

        info!(
            written = report.records_written(),
            summaries = report.summaries_created(),
            extraction_failures = report.extraction_failures.len(),
            failures = report.failures.len(),
            "Meditation sweep finished"
        );
        Ok(report)
    }

    /// Run the meditation sweep every `sweep_interval` until `shutdown`
    /// becomes `true` or its sender is dropped.
    pub fn spawn_meditation(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let scheduler = self.clone();
        let period = self.inner.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first immediate tick
            ticker.tick().await;

            info!(interval_secs = period.as_secs(), "Meditation loop started");
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.run_meditation().await {
                            error!("Meditation sweep failed, retrying next interval: {}", e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("Meditation loop stopped");
        })
    }
}

impl SchedulerInner {
    /// Cached cursor, or the store's record of what the session taught
    async fn load_cursor(&self, session_id: &str) -> Result<u64> {
        if let Some(cursor) = self.cursors.get(session_id) {
            return Ok(*cursor);
        }
        let learned = self.store.learned_through(session_id).await?;
        let cursor = *self
            .cursors
            .entry(session_id.to_string())
            .or_insert(learned);
        if cursor > 0 {
            debug!(session = %session_id, cursor, "Cursor restored from stored learnings");
        }
        Ok(cursor)
    }

    /// Drop in-process state of a session that has nothing left in flight.
    ///
    /// Must be called without holding the session lease.
    fn forget_session(&self, session_id: &str) {
        self.cursors.remove(session_id);
        self.action_counts.remove_if(session_id, |_, count| *count == 0);
        self.leases.release_idle(&LeaseTable::session_key(session_id));
    }

    /// Fetch and learn from the session's activity past its cursor.
    ///
    /// The cursor only moves after the extractor wrote its records, and each
    /// written record carries the position it was learned at.
    async fn extract_session(&self, session_id: &str, report: &mut CycleReport) -> Result<()> {
        let cursor = self.load_cursor(session_id).await?;

        let entries = retry_with_backoff(&self.source_retry, "fetch_since", || {
            self.log.fetch_since(session_id, cursor)
        })
        .await
        .map_err(|e| match e {
            MemoryError::SourceUnavailable(_) => e,
            other => MemoryError::SourceUnavailable(other.to_string()),
        })?;

        let batch = ExtractionBatch::new(session_id, entries);
        let Some(last_seq) = batch.last_seq() else {
            debug!(session = %session_id, cursor, "No new activity");
            return Ok(());
        };

        let extraction = self.extractor.extract(&batch).await?;
        report.extractions.push(extraction);
        self.cursors.insert(session_id.to_string(), last_seq);
        Ok(())
    }

    async fn fetch_sessions(&self) -> Result<Vec<String>> {
        retry_with_backoff(&self.source_retry, "sessions", || self.log.sessions()).await
    }

    /// Force the ladder over every stored category, each under its lease,
    /// categories in parallel
    async fn consolidate_all(&self, report: &mut CycleReport) -> Result<()> {
        match self.store.recover().await {
            Ok(0) => {}
            Ok(settled) => info!(settled, "Settled interrupted consolidation commits"),
            Err(e) => warn!("Could not settle interrupted commits: {}", e),
        }
        let categories = self.store.categories().await?;

        let runs = categories.into_iter().map(|category| async move {
            let _lease = self.leases.acquire(&LeaseTable::category_key(&category)).await;
            let outcome = self.ladder.consolidate(&category, LadderMode::Force).await;
            (category, outcome)
        });

        for (category, outcome) in join_all(runs).await {
            match outcome {
                Ok(ladder) => {
                    report.ladders.insert(category, ladder);
                }
                Err(e) => {
                    warn!(category = %category, "Ladder aborted, retrying next cycle: {}", e);
                    report.failures.insert(category, e.to_string());
                }
            }
        }
        Ok(())
    }

    /// Drop learned entries from the log once every category consolidated
    async fn clear_log(&self, session_id: &str, report: &mut CycleReport) {
        let up_to = self.cursors.get(session_id).map_or(0, |c| *c);
        if up_to == 0 {
            return;
        }
        if !report.failures.is_empty() {
            debug!(session = %session_id, "Keeping raw log until every category consolidates");
            return;
        }
        match self.log.clear(session_id, up_to).await {
            Ok(()) => {
                report.cleared.insert(session_id.to_string(), up_to);
            }
            Err(e) => warn!(session = %session_id, up_to, "Failed to clear raw log: {}", e),
        }
    }
}
