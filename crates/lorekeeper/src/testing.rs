//! Test doubles for the external collaborators
//!
//! - [`ScriptedModel`]: a language model answering from a script or a closure
//! - [`FaultySearch`]: a search wrapper that stalls or fails chosen categories
//! - [`FaultyStore`]: a store wrapper whose writes can be switched off
//! - [`UnreachableLogSource`]: a log source that is always down

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::activity::{LogEntry, LogSource};
use crate::error::{MemoryError, Result};
use crate::llm::{LanguageModel, LlmError};
use crate::memory::types::{Category, MemoryRecord};
use crate::storage::{
    CategoryStore, CommitOutcome, ConsolidationCommit, RecordFilter, ScoredRecord,
    SimilaritySearch,
};

type Responder = dyn Fn(&str) -> std::result::Result<String, LlmError> + Send + Sync;

/// Language model double.
///
/// Answers from the queued script first, then from the responder closure if
/// one is set. Every prompt is recorded.
pub struct ScriptedModel {
    script: Mutex<VecDeque<std::result::Result<String, LlmError>>>,
    responder: Option<Box<Responder>>,
    prompts: Mutex<Vec<String>>,
    delay: Duration,
}

impl ScriptedModel {
    pub fn new(
        script: impl IntoIterator<Item = std::result::Result<String, LlmError>>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            responder: None,
            prompts: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// A model that answers every prompt with `respond(prompt)`
    pub fn responding(
        respond: impl Fn(&str) -> std::result::Result<String, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Some(Box::new(respond)),
            ..Self::new([])
        }
    }

    /// A model that answers every prompt with a numbered summary
    pub fn summarizing() -> Self {
        let counter = AtomicUsize::new(0);
        Self::responding(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!(r#"{{"summary": "summary {n}"}}"#))
        })
    }

    /// Answer `extraction` to the first prompt, then summarize
    pub fn extracting_then_summarizing(extraction: impl Into<String>) -> Self {
        let counter = AtomicUsize::new(0);
        Self {
            responder: Some(Box::new(move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!(r#"{{"summary": "summary {n}"}}"#))
            })),
            ..Self::new([Ok(extraction.into())])
        }
    }

    /// Sleep before every answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push(&self, response: std::result::Result<String, LlmError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
    }

    /// Every prompt received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, LlmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match (scripted, &self.responder) {
            (Some(response), _) => response,
            (None, Some(respond)) => respond(prompt),
            (None, None) => Err(LlmError::ApiError("script exhausted".to_string())),
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Debug, Clone, Copy)]
enum SearchFault {
    Stall(Duration),
    Fail,
}

/// Similarity search wrapper injecting faults per category
pub struct FaultySearch {
    inner: Arc<dyn SimilaritySearch>,
    faults: Mutex<HashMap<Category, SearchFault>>,
}

impl FaultySearch {
    pub fn new(inner: Arc<dyn SimilaritySearch>) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Queries for `category` sleep this long before answering
    pub fn stall(self, category: Category, delay: Duration) -> Self {
        self.set_fault(category, SearchFault::Stall(delay));
        self
    }

    /// Queries for `category` fail with `StoreUnavailable`
    pub fn fail(self, category: Category) -> Self {
        self.set_fault(category, SearchFault::Fail);
        self
    }

    fn set_fault(&self, category: Category, fault: SearchFault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(category, fault);
        }
    }

    fn fault_for(&self, filter: &RecordFilter) -> Option<SearchFault> {
        let faults = self.faults.lock().ok()?;
        filter
            .categories
            .as_ref()?
            .iter()
            .find_map(|category| faults.get(category).copied())
    }
}

#[async_trait]
impl SimilaritySearch for FaultySearch {
    async fn query(
        &self,
        text: &str,
        filter: &RecordFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        match self.fault_for(filter) {
            Some(SearchFault::Stall(delay)) => tokio::time::sleep(delay).await,
            Some(SearchFault::Fail) => {
                return Err(MemoryError::StoreUnavailable(
                    "injected search failure".to_string(),
                ));
            }
            None => {}
        }
        self.inner.query(text, filter, top_k).await
    }
}

/// Category store wrapper whose writes can be made to fail
pub struct FaultyStore {
    inner: Arc<dyn CategoryStore>,
    writes_down: AtomicBool,
    commits_down: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn CategoryStore>) -> Self {
        Self {
            inner,
            writes_down: AtomicBool::new(false),
            commits_down: AtomicBool::new(false),
        }
    }

    /// Fail every write, consolidation commits included
    pub fn set_writes_down(&self, down: bool) {
        self.writes_down.store(down, Ordering::SeqCst);
    }

    /// Fail consolidation commits only
    pub fn set_commits_down(&self, down: bool) {
        self.commits_down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.writes_down.load(Ordering::SeqCst) {
            Err(MemoryError::StoreUnavailable("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CategoryStore for FaultyStore {
    async fn write(&self, record: MemoryRecord) -> Result<()> {
        self.check()?;
        self.inner.write(record).await
    }

    async fn write_all(&self, records: Vec<MemoryRecord>) -> Result<()> {
        self.check()?;
        self.inner.write_all(records).await
    }

    async fn mark_consumed(&self, ids: &[Uuid], consumed_by: Uuid) -> Result<()> {
        self.check()?;
        self.inner.mark_consumed(ids, consumed_by).await
    }

    async fn set_inactive(&self, id: Uuid) -> Result<()> {
        self.check()?;
        self.inner.set_inactive(id).await
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<MemoryRecord>> {
        self.inner.list(filter).await
    }

    async fn commit_consolidation(&self, commit: ConsolidationCommit) -> Result<CommitOutcome> {
        self.check()?;
        if self.commits_down.load(Ordering::SeqCst) {
            return Err(MemoryError::StoreUnavailable(
                "injected commit failure".to_string(),
            ));
        }
        self.inner.commit_consolidation(commit).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        self.inner.get(id).await
    }

    async fn categories(&self) -> Result<Vec<Category>> {
        self.inner.categories().await
    }

    async fn recover(&self) -> Result<usize> {
        self.check()?;
        self.inner.recover().await
    }
}

/// Log source that cannot be reached
#[derive(Debug, Default)]
pub struct UnreachableLogSource {
    attempts: AtomicUsize,
}

impl UnreachableLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reads attempted so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn unavailable(&self) -> MemoryError {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        MemoryError::SourceUnavailable("connection refused".to_string())
    }
}

#[async_trait]
impl LogSource for UnreachableLogSource {
    async fn fetch_since(&self, _session_id: &str, _cursor: u64) -> Result<Vec<LogEntry>> {
        Err(self.unavailable())
    }

    async fn clear(&self, _session_id: &str, _up_to: u64) -> Result<()> {
        Err(self.unavailable())
    }

    async fn sessions(&self) -> Result<Vec<String>> {
        Err(self.unavailable())
    }
}
