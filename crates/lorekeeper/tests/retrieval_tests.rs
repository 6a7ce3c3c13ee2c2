//! Integration tests for context retrieval

use std::sync::Arc;
use std::time::{Duration, Instant};

use lorekeeper::config::RetrievalConfig;
use lorekeeper::memory::RetrievalEngine;
use lorekeeper::storage::{CategoryStore, InMemoryStore};
use lorekeeper::testing::FaultySearch;
use lorekeeper::{Category, MemoryRecord, Tier};

fn config(timeout_ms: u64) -> RetrievalConfig {
    RetrievalConfig {
        top_k: 3,
        category_timeout_ms: timeout_ms,
    }
}

async fn seeded_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::default());
    let records = [
        (Category::WorldKnowledge, "The Dencun upgrade lowered layer two fees"),
        (Category::WorldKnowledge, "Paris hosted the 2024 summer olympics"),
        (Category::CryptoEcosystem, "Blob fees spike when inscriptions return"),
        (Category::SelfReflection, "I explain fee markets too eagerly"),
        (Category::UserSpecific("alice".to_string()), "alice asks about layer two fees"),
        (Category::UserSpecific("bob".to_string()), "bob only cares about memecoins"),
    ];
    for (category, text) in records {
        store.write(MemoryRecord::raw(category, text, None)).await.unwrap();
    }
    store
}

mod grouping_tests {
    use super::*;

    #[tokio::test]
    async fn test_results_grouped_by_category() {
        let store = seeded_store().await;
        let engine = RetrievalEngine::new(store, &config(500));

        let context = engine
            .retrieve("what happened to layer two fees", &["alice".to_string()])
            .await;

        assert!(!context.is_degraded());
        let world = context.get(&Category::WorldKnowledge).unwrap();
        assert_eq!(world[0], "The Dencun upgrade lowered layer two fees");
        assert_eq!(
            context.get(&Category::UserSpecific("alice".to_string())).unwrap(),
            ["alice asks about layer two fees".to_string()]
        );

        // Only the requested user's memories are searched
        assert!(context.get(&Category::UserSpecific("bob".to_string())).is_none());

        // Categories without records still answered
        assert_eq!(context.get(&Category::PrimaryPost), Some(&[][..]));
    }

    #[tokio::test]
    async fn test_top_k_caps_each_category() {
        let store = Arc::new(InMemoryStore::default());
        for i in 0..10 {
            store
                .write(MemoryRecord::raw(
                    Category::CryptoEcosystem,
                    format!("validator fact {i}"),
                    None,
                ))
                .await
                .unwrap();
        }
        let engine = RetrievalEngine::new(store, &config(500));

        let context = engine.retrieve("validator", &[]).await;
        assert_eq!(context.get(&Category::CryptoEcosystem).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_superseded_summaries_are_not_served() {
        let store = Arc::new(InMemoryStore::default());
        let mut old = MemoryRecord::summary(
            Category::SelfReflection,
            Tier::Long,
            "I used to post about fees hourly",
            [uuid::Uuid::new_v4()],
        );
        old.active = false;
        store.write(old).await.unwrap();
        store
            .write(MemoryRecord::raw(Category::SelfReflection, "I now post about fees daily", None))
            .await
            .unwrap();
        let engine = RetrievalEngine::new(store, &config(500));

        let context = engine.retrieve("fees", &[]).await;
        assert_eq!(
            context.get(&Category::SelfReflection).unwrap(),
            ["I now post about fees daily".to_string()]
        );
    }
}

mod degradation_tests {
    use super::*;

    #[tokio::test]
    async fn test_self_reflection_timeout_omits_only_that_category() {
        let store = seeded_store().await;
        let search = Arc::new(
            FaultySearch::new(store).stall(Category::SelfReflection, Duration::from_secs(5)),
        );
        let engine = RetrievalEngine::new(search, &config(100));

        let started = Instant::now();
        let context = engine.retrieve("fees", &["alice".to_string()]).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(context.is_degraded());
        assert_eq!(context.degraded, vec![Category::SelfReflection]);
        assert!(context.get(&Category::SelfReflection).is_none());
        assert!(context.get(&Category::WorldKnowledge).is_some());
        assert!(context.get(&Category::CryptoEcosystem).is_some());
        assert!(context.get(&Category::UserSpecific("alice".to_string())).is_some());
        assert!(!context.to_prompt_block().contains("self_reflection"));
    }

    #[tokio::test]
    async fn test_failing_branch_is_degraded_not_raised() {
        let store = seeded_store().await;
        let search = Arc::new(FaultySearch::new(store).fail(Category::CryptoEcosystem));
        let engine = RetrievalEngine::new(search, &config(500));

        let context = engine.retrieve("fees", &[]).await;
        assert_eq!(context.degraded, vec![Category::CryptoEcosystem]);
        assert_eq!(context.categories.len(), Category::SHARED.len() - 1);
    }

    #[tokio::test]
    async fn test_every_branch_failing_returns_empty_map() {
        let store = seeded_store().await;
        let mut search = FaultySearch::new(store);
        for category in Category::SHARED {
            search = search.fail(category);
        }
        search = search.fail(Category::UserSpecific("alice".to_string()));
        let engine = RetrievalEngine::new(Arc::new(search), &config(500));

        let context = engine.retrieve("fees", &["alice".to_string()]).await;
        assert!(context.categories.is_empty());
        assert_eq!(context.degraded.len(), Category::SHARED.len() + 1);
        assert_eq!(context.to_prompt_block(), "");
    }
}
