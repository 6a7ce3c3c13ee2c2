//! Context retrieval with per-category fan-out
//!
//! One similarity query per category runs concurrently, each under its own
//! timeout. A branch that fails or times out is left out of the result and
//! listed as degraded; the others are returned as usual.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, warn};

use crate::activity::batch::escape_xml;
use crate::config::RetrievalConfig;
use crate::memory::types::Category;
use crate::storage::{RecordFilter, SimilaritySearch};

/// Memory excerpts grouped by category, most relevant first within each
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    /// Every category whose query succeeded, even with no hits
    pub categories: BTreeMap<Category, Vec<String>>,
    /// Categories omitted because their query failed or timed out
    pub degraded: Vec<Category>,
}

impl RetrievedContext {
    /// Whether any category was left out
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn get(&self, category: &Category) -> Option<&[String]> {
        self.categories.get(category).map(Vec::as_slice)
    }

    /// Whether no category produced any text
    pub fn is_empty(&self) -> bool {
        self.categories.values().all(Vec::is_empty)
    }

    /// Render for inclusion in a reasoning prompt.
    ///
    /// Categories without hits are skipped; returns an empty string when
    /// nothing was retrieved.
    pub fn to_prompt_block(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut out = String::from("<memory>\n");
        for (category, texts) in &self.categories {
            if texts.is_empty() {
                continue;
            }
            out.push_str(&format!("<category name=\"{}\">\n", escape_xml(&category.key())));
            for text in texts {
                out.push_str(&format!("- {}\n", escape_xml(text)));
            }
            out.push_str("</category>\n");
        }
        out.push_str("</memory>");
        out
    }
}

pub struct RetrievalEngine {
    search: Arc<dyn SimilaritySearch>,
    top_k: usize,
    timeout: Duration,
}

impl RetrievalEngine {
    pub fn new(search: Arc<dyn SimilaritySearch>, config: &RetrievalConfig) -> Self {
        Self {
            search,
            top_k: config.top_k,
            timeout: config.category_timeout(),
        }
    }

    /// Categories queried for a request: the shared ones plus one
    /// user-specific category per distinct user id
    fn targets(user_ids: &[String]) -> Vec<Category> {
        let mut targets = Category::SHARED.to_vec();
        for id in user_ids {
            let id = id.trim();
            if id.is_empty() {
                continue;
            }
            let category = Category::UserSpecific(id.to_string());
            if !targets.contains(&category) {
                targets.push(category);
            }
        }
        targets
    }

    /// Retrieve active records relevant to `context_text`.
    ///
    /// Never fails: failing categories are reported in
    /// [`RetrievedContext::degraded`].
    pub async fn retrieve(&self, context_text: &str, user_ids: &[String]) -> RetrievedContext {
        let targets = Self::targets(user_ids);

        let branches = targets.into_iter().map(|category| async move {
            let filter = RecordFilter::for_category(category.clone()).active_only();
            let outcome =
                tokio::time::timeout(self.timeout, self.search.query(context_text, &filter, self.top_k))
                    .await;
            (category, outcome)
        });

        let mut context = RetrievedContext::default();
        for (category, outcome) in join_all(branches).await {
            match outcome {
                Ok(Ok(hits)) => {
                    let texts = hits.into_iter().map(|hit| hit.record.text).collect();
                    context.categories.insert(category, texts);
                }
                Ok(Err(e)) => {
                    warn!(category = %category, "Retrieval failed, omitting category: {}", e);
                    context.degraded.push(category);
                }
                Err(_) => {
                    warn!(
                        category = %category,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Retrieval timed out, omitting category"
                    );
                    context.degraded.push(category);
                }
            }
        }

        if context.categories.is_empty() {
            error!(
                failed = context.degraded.len(),
                "Every category failed during retrieval, returning empty context"
            );
        } else {
            debug!(
                categories = context.categories.len(),
                degraded = context.degraded.len(),
                "Retrieved context"
            );
        }
        context
    }
}
