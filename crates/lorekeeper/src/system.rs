//! The memory subsystem as seen by the hosting agent loop
//!
//! [`MemorySystem`] wires the configured persona, LLM, store, search and log
//! source into the extractor, ladder, retrieval engine and scheduler. The
//! agent loop only calls [`MemorySystem::retrieve_context`] and
//! [`MemorySystem::trigger_consolidation`] (or [`MemorySystem::record_action`]);
//! neither blocks on consolidation.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::activity::LogSource;
use crate::config::Config;
use crate::llm::LanguageModel;
use crate::memory::{LearningExtractor, RetrievalEngine, RetrievedContext, SummarizationLadder};
use crate::retry::RetryPolicy;
use crate::scheduler::{ConsolidationHandle, Scheduler};
use crate::storage::{CategoryStore, InMemoryStore, SimilaritySearch};

pub struct MemorySystem {
    config: Config,
    store: Arc<dyn CategoryStore>,
    retrieval: RetrievalEngine,
    scheduler: Scheduler,
}

impl MemorySystem {
    pub fn new(
        config: Config,
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn CategoryStore>,
        search: Arc<dyn SimilaritySearch>,
        log: Arc<dyn LogSource>,
    ) -> Self {
        let extractor = LearningExtractor::new(
            model.clone(),
            store.clone(),
            search.clone(),
            config.persona.clone(),
            &config.extraction,
        );
        let ladder = SummarizationLadder::new(
            model.clone(),
            store.clone(),
            config.persona.clone(),
            config.thresholds.clone(),
            config.categories.clone(),
            config.extraction.retry_policy(),
        );
        let retrieval = RetrievalEngine::new(search, &config.retrieval);

        let extraction_retry = config.extraction.retry_policy();
        let source_retry = RetryPolicy::new(
            config.scheduler.source_max_attempts,
            extraction_retry.initial_backoff,
            extraction_retry.max_backoff,
        );
        let scheduler = Scheduler::new(
            log,
            extractor,
            ladder,
            store.clone(),
            config.scheduler.clone(),
            source_retry,
        );

        info!(
            persona = %config.persona.name,
            model = model.name(),
            "Memory system ready"
        );

        Self {
            config,
            store,
            retrieval,
            scheduler,
        }
    }

    /// Build a system over a process-local store that also serves searches
    pub fn in_memory(
        config: Config,
        model: Arc<dyn LanguageModel>,
        log: Arc<dyn LogSource>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::default());
        Self::new(config, model, store.clone(), store, log)
    }

    /// Build a system over the durable LanceDB store in `storage.data_dir`
    #[cfg(feature = "lance")]
    pub async fn open_lance(
        config: Config,
        model: Arc<dyn LanguageModel>,
        log: Arc<dyn LogSource>,
    ) -> crate::error::Result<Self> {
        let embedder = Arc::new(crate::embedding::FastEmbedder::new()?);
        let path = config.storage.data_dir.join("memory.lance");
        let store = Arc::new(crate::storage::LanceStore::open(&path, embedder).await?);
        Ok(Self::new(config, model, store.clone(), store, log))
    }

    /// Memory relevant to the conversation, grouped by category.
    ///
    /// Never fails; categories that could not be searched are listed in
    /// [`RetrievedContext::degraded`].
    pub async fn retrieve_context(&self, conversation: &str, user_ids: &[String]) -> RetrievedContext {
        self.retrieval.retrieve(conversation, user_ids).await
    }

    /// Start a session-boundary consolidation in the background
    pub fn trigger_consolidation(&self, session_id: &str) -> ConsolidationHandle {
        self.scheduler.trigger_consolidation(session_id)
    }

    /// Count an agent action, firing consolidation at session boundaries
    pub fn record_action(&self, session_id: &str) -> Option<ConsolidationHandle> {
        self.scheduler.record_action(session_id)
    }

    /// Start the periodic meditation sweep
    pub fn spawn_meditation(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.scheduler.spawn_meditation(shutdown)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CategoryStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}
