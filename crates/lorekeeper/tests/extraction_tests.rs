//! Integration tests for the learning extractor

use std::sync::Arc;

use lorekeeper::activity::{ExtractionBatch, LogEntry, Role};
use lorekeeper::config::{ExtractionConfig, PersonaConfig};
use lorekeeper::llm::LlmError;
use lorekeeper::memory::LearningExtractor;
use lorekeeper::storage::{CategoryStore, InMemoryStore};
use lorekeeper::testing::{FaultyStore, ScriptedModel};
use lorekeeper::{Category, MemoryError, MemoryRecord, Tier};

fn fast_config() -> ExtractionConfig {
    ExtractionConfig {
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        ..ExtractionConfig::default()
    }
}

fn extractor(model: Arc<ScriptedModel>, store: Arc<InMemoryStore>) -> LearningExtractor {
    LearningExtractor::new(
        model,
        store.clone(),
        store,
        PersonaConfig::default(),
        &fast_config(),
    )
}

fn batch(texts: &[&str]) -> ExtractionBatch {
    let entries = texts
        .iter()
        .enumerate()
        .map(|(i, text)| LogEntry {
            seq: i as u64 + 1,
            role: if i % 2 == 0 { Role::User } else { Role::Assistant },
            text: text.to_string(),
            timestamp: chrono::Utc::now(),
        })
        .collect();
    ExtractionBatch::new("session-1", entries)
}

const UPGRADE_LEARNINGS: &str = r#"[
  {"category": "world_knowledge", "text": "The Dencun upgrade activated on Ethereum mainnet in March 2024"},
  {"category": "world_knowledge", "text": "Proto-danksharding introduced blob carrying transactions"},
  {"category": "world_knowledge", "text": "Blob data is pruned by consensus nodes after roughly eighteen days"},
  {"category": "world_knowledge", "text": "Rollup fees dropped sharply once blobs went live"},
  {"category": "world_knowledge", "text": "EIP-4844 was the headline change of that hard fork"}
]"#;

mod write_tests {
    use super::*;

    #[tokio::test]
    async fn test_learnings_land_in_raw_tier() {
        let store = Arc::new(InMemoryStore::default());
        let model = Arc::new(ScriptedModel::new([Ok(UPGRADE_LEARNINGS.to_string())]));

        let report = extractor(model.clone(), store.clone())
            .extract(&batch(&["Dencun is live!", "Fees are way down"]))
            .await
            .unwrap();

        assert_eq!(report.candidates, 5);
        assert_eq!(report.written.len(), 5);

        let raws = store
            .unconsumed(&Category::WorldKnowledge, Tier::Raw)
            .await
            .unwrap();
        assert_eq!(raws.len(), 5);
        assert!(raws.iter().all(|r| r.session_id.as_deref() == Some("session-1")));
        assert!(raws.iter().all(|r| r.active && !r.is_consumed()));

        let prompt = &model.prompts()[0];
        assert!(prompt.contains("<entry seq=\"1\" role=\"user\">Dencun is live!</entry>"));
        assert!(prompt.contains("You are Lore."));
    }

    #[tokio::test]
    async fn test_candidates_partitioned_by_category() {
        let store = Arc::new(InMemoryStore::default());
        let model = Arc::new(ScriptedModel::new([Ok(r#"[
            {"category": "self_reflection", "text": "My replies run long when I am unsure"},
            {"category": "user_specific", "user_id": "alice", "text": "alice runs a home validator"},
            {"category": "crypto_ecosystem", "text": "Restaking yields are compressing"},
            {"category": "media_prompts", "text": "isometric pixel art of a validator rack"}
        ]"#
        .to_string())]));

        extractor(model, store.clone())
            .extract(&batch(&["..."]))
            .await
            .unwrap();

        let mut categories = store.categories().await.unwrap();
        categories.sort();
        assert_eq!(
            categories,
            vec![
                Category::CryptoEcosystem,
                Category::SelfReflection,
                Category::UserSpecific("alice".to_string()),
                Category::MediaPrompts,
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_candidates_are_discarded() {
        let store = Arc::new(InMemoryStore::default());
        let model = Arc::new(ScriptedModel::new([Ok(r#"[
            {"category": "world_knowledge", "text": "Solana had an outage in February 2024"},
            {"category": "world_knowledge", "text": "   "},
            {"text": "no category at all"},
            {"category": "gossip", "text": "unknown category"},
            {"category": "user_specific", "text": "no user id"}
        ]"#
        .to_string())]));

        let report = extractor(model, store.clone())
            .extract(&batch(&["..."]))
            .await
            .unwrap();

        assert_eq!(report.candidates, 5);
        assert_eq!(report.discarded_invalid, 4);
        assert_eq!(report.written.len(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_llm() {
        let store = Arc::new(InMemoryStore::default());
        let model = Arc::new(ScriptedModel::new([]));

        let report = extractor(model.clone(), store)
            .extract(&ExtractionBatch::new("session-1", vec![]))
            .await
            .unwrap();
        assert!(report.written.is_empty());
        assert_eq!(model.calls(), 0);
    }
}

mod dedup_tests {
    use super::*;

    #[tokio::test]
    async fn test_known_unconsumed_fact_is_not_relearned() {
        let store = Arc::new(InMemoryStore::default());
        store
            .write(MemoryRecord::raw(
                Category::CryptoEcosystem,
                "Blob data is pruned after eighteen days",
                None,
            ))
            .await
            .unwrap();

        let model = Arc::new(ScriptedModel::new([Ok(r#"[
            {"category": "crypto_ecosystem", "text": "Blob data is pruned after eighteen days"},
            {"category": "crypto_ecosystem", "text": "Validators must upgrade clients before the fork epoch"}
        ]"#
        .to_string())]));

        let report = extractor(model, store.clone())
            .extract(&batch(&["..."]))
            .await
            .unwrap();

        assert_eq!(report.discarded_duplicates, 1);
        assert_eq!(report.written.len(), 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_same_fact_in_other_category_is_kept() {
        let store = Arc::new(InMemoryStore::default());
        store
            .write(MemoryRecord::raw(Category::WorldKnowledge, "Bitcoin halved in April 2024", None))
            .await
            .unwrap();

        let model = Arc::new(ScriptedModel::new([Ok(
            r#"[{"category": "crypto_ecosystem", "text": "Bitcoin halved in April 2024"}]"#.to_string(),
        )]));

        let report = extractor(model, store)
            .extract(&batch(&["..."]))
            .await
            .unwrap();
        assert_eq!(report.written.len(), 1);
    }

    #[tokio::test]
    async fn test_repeats_within_batch_are_collapsed() {
        let store = Arc::new(InMemoryStore::default());
        let model = Arc::new(ScriptedModel::new([Ok(r#"[
            {"category": "self_reflection", "text": "I overuse exclamation marks"},
            {"category": "self_reflection", "text": "I  overuse exclamation   marks"}
        ]"#
        .to_string())]));

        let report = extractor(model, store)
            .extract(&batch(&["..."]))
            .await
            .unwrap();
        assert_eq!(report.discarded_duplicates, 1);
        assert_eq!(report.written.len(), 1);
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_malformed_output_is_retried() {
        let store = Arc::new(InMemoryStore::default());
        let model = Arc::new(ScriptedModel::new([
            Ok("Sure! Here are the learnings.".to_string()),
            Err(LlmError::RequestFailed("connection reset".to_string())),
            Ok(UPGRADE_LEARNINGS.to_string()),
        ]));

        let report = extractor(model.clone(), store)
            .extract(&batch(&["..."]))
            .await
            .unwrap();
        assert_eq!(model.calls(), 3);
        assert_eq!(report.written.len(), 5);
    }

    #[tokio::test]
    async fn test_exhausted_retries_write_nothing() {
        let store = Arc::new(InMemoryStore::default());
        let model = Arc::new(ScriptedModel::responding(|_| {
            Ok(r#"{"learnings": "not an array"}"#.to_string())
        }));

        let err = extractor(model.clone(), store.clone())
            .extract(&batch(&["..."]))
            .await
            .unwrap_err();

        assert!(matches!(err, MemoryError::ExtractionFailed(_)));
        assert_eq!(model.calls(), 3);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_outage_writes_nothing() {
        let inner = Arc::new(InMemoryStore::default());
        let store = Arc::new(FaultyStore::new(inner.clone()));
        store.set_writes_down(true);

        let model = Arc::new(ScriptedModel::new([Ok(UPGRADE_LEARNINGS.to_string())]));
        let extractor = LearningExtractor::new(
            model,
            store,
            inner.clone(),
            PersonaConfig::default(),
            &fast_config(),
        );

        let err = extractor.extract(&batch(&["..."])).await.unwrap_err();
        assert!(matches!(err, MemoryError::StoreUnavailable(_)));
        assert!(inner.is_empty().await);
    }
}
