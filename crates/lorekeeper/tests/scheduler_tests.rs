//! Integration tests for consolidation scheduling through the facade

use std::sync::Arc;
use std::time::Duration;

use lorekeeper::activity::{InMemoryLogSource, Role};
use lorekeeper::config::Config;
use lorekeeper::llm::LlmError;
use lorekeeper::scheduler::{CycleKind, LeaseTable};
use lorekeeper::storage::{CategoryStore, InMemoryStore};
use lorekeeper::testing::{FaultyStore, ScriptedModel, UnreachableLogSource};
use lorekeeper::{Category, MemoryError, MemoryRecord, MemorySystem, Tier};
use tokio::sync::watch;

fn test_config() -> Config {
    let mut config = Config::default();
    config.extraction.initial_backoff_ms = 1;
    config.extraction.max_backoff_ms = 2;
    config
}

const THREE_LEARNINGS: &str = r#"[
  {"category": "world_knowledge", "text": "The Pectra upgrade raised the validator balance cap"},
  {"category": "world_knowledge", "text": "Account abstraction arrived with EIP-7702"},
  {"category": "self_reflection", "text": "I hedge too much when asked about price"}
]"#;

async fn log_with_activity(session_id: &str) -> Arc<InMemoryLogSource> {
    let log = Arc::new(InMemoryLogSource::new());
    log.append(session_id, Role::User, "What changed in Pectra?").await;
    log.append(session_id, Role::Assistant, "The balance cap went up, and EOAs can delegate.").await;
    log
}

mod session_cycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_session_boundary_learns_consolidates_and_clears() {
        let log = log_with_activity("s1").await;
        let model = Arc::new(ScriptedModel::extracting_then_summarizing(THREE_LEARNINGS));
        let system = MemorySystem::in_memory(test_config(), model.clone(), log.clone());

        let report = system.trigger_consolidation("s1").wait().await.unwrap();

        assert_eq!(report.kind, CycleKind::SessionBoundary("s1".to_string()));
        assert!(report.is_clean());
        assert_eq!(report.records_written(), 3);

        // Force-elevation leaves each touched category with a long summary
        for category in [Category::WorldKnowledge, Category::SelfReflection] {
            let ladder = &report.ladders[&category];
            assert_eq!(ladder.shorts.len(), 1, "{category}");
            assert_eq!(ladder.mids.len(), 1, "{category}");
            assert_eq!(ladder.longs.len(), 1, "{category}");
            let pending = system
                .store()
                .unconsumed(&category, Tier::Raw)
                .await
                .unwrap();
            assert!(pending.is_empty(), "{category}");
        }

        assert_eq!(report.cleared.get("s1"), Some(&2));
        assert_eq!(log.pending("s1").await, 0);
        assert_eq!(system.scheduler().cursor("s1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cycle_without_new_activity_still_consolidates() {
        let log = Arc::new(InMemoryLogSource::new());
        let model = Arc::new(ScriptedModel::summarizing());
        let system = MemorySystem::in_memory(test_config(), model.clone(), log);
        for i in 0..2 {
            system
                .store()
                .write(MemoryRecord::raw(Category::CryptoEcosystem, format!("fact {i}"), None))
                .await
                .unwrap();
        }

        let report = system.trigger_consolidation("idle").wait().await.unwrap();
        assert!(report.extractions.is_empty());
        assert_eq!(report.ladders[&Category::CryptoEcosystem].shorts.len(), 1);
        assert!(report.cleared.is_empty());
    }

    #[tokio::test]
    async fn test_record_action_fires_every_n_actions() {
        let mut config = test_config();
        config.scheduler.actions_per_session = 3;
        let log = log_with_activity("s1").await;
        let model = Arc::new(ScriptedModel::extracting_then_summarizing(THREE_LEARNINGS));
        let system = MemorySystem::in_memory(config, model, log);

        assert!(system.record_action("s1").is_none());
        assert!(system.record_action("s1").is_none());
        let handle = system.record_action("s1").expect("third action is a boundary");
        assert_eq!(handle.session_id(), "s1");
        assert!(handle.wait().await.unwrap().is_clean());

        // Counting restarts after the boundary
        assert!(system.record_action("s1").is_none());
    }

    #[tokio::test]
    async fn test_clean_cycle_forgets_session_state() {
        let mut config = test_config();
        config.scheduler.actions_per_session = 2;
        let log = log_with_activity("s1").await;
        let model = Arc::new(ScriptedModel::extracting_then_summarizing(THREE_LEARNINGS));
        let system = MemorySystem::in_memory(config, model, log);

        assert!(system.record_action("s1").is_none());
        let handle = system.record_action("s1").expect("second action is a boundary");
        assert!(handle.wait().await.unwrap().is_clean());

        let scheduler = system.scheduler();
        assert_eq!(scheduler.tracked_sessions(), 0);
        assert!(!scheduler.leases().contains(&LeaseTable::session_key("s1")));
        // The cursor is read back from the learned records
        assert_eq!(scheduler.cursor("s1").await.unwrap(), 2);
    }
}

mod exclusivity_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_triggers_write_one_short() {
        let log = Arc::new(InMemoryLogSource::new());
        let model = Arc::new(ScriptedModel::summarizing().with_delay(Duration::from_millis(20)));
        let system = MemorySystem::in_memory(test_config(), model, log);

        let mut ids = Vec::new();
        for i in 0..5 {
            let record = MemoryRecord::raw(Category::WorldKnowledge, format!("upgrade fact {i}"), None);
            ids.push(record.id);
            system.store().write(record).await.unwrap();
        }

        let first = system.trigger_consolidation("s1");
        let second = system.trigger_consolidation("s2");
        let (first, second) = (first.wait().await.unwrap(), second.wait().await.unwrap());
        assert!(first.is_clean() && second.is_clean());

        let shorts = system
            .store()
            .read(&Category::WorldKnowledge, Tier::Short, false)
            .await
            .unwrap();
        assert_eq!(shorts.len(), 1);
        assert_eq!(shorts[0].consolidated_from, ids);
        for id in ids {
            let raw = system.store().get(id).await.unwrap().unwrap();
            assert_eq!(raw.consumed_by, Some(shorts[0].id));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_session_is_not_extracted_twice() {
        let log = log_with_activity("s1").await;
        let model = Arc::new(
            ScriptedModel::extracting_then_summarizing(THREE_LEARNINGS)
                .with_delay(Duration::from_millis(10)),
        );
        let system = MemorySystem::in_memory(test_config(), model, log);

        let first = system.trigger_consolidation("s1");
        let second = system.trigger_consolidation("s1");
        let first = first.wait().await.unwrap();
        let second = second.wait().await.unwrap();

        assert_eq!(first.records_written() + second.records_written(), 3);
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_log_source() {
        let log = Arc::new(UnreachableLogSource::new());
        let model = Arc::new(ScriptedModel::summarizing());
        let store = Arc::new(InMemoryStore::default());
        let system = MemorySystem::new(test_config(), model.clone(), store.clone(), store.clone(), log.clone());

        let err = system.trigger_consolidation("s1").wait().await.unwrap_err();
        assert!(matches!(err, MemoryError::SourceUnavailable(_)));
        assert_eq!(log.attempts(), 3);
        assert_eq!(model.calls(), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_extraction_keeps_batch_for_next_cycle() {
        let log = log_with_activity("s1").await;
        let model = Arc::new(ScriptedModel::responding(|_| {
            Err(LlmError::RequestFailed("timeout".to_string()))
        }));
        let system = MemorySystem::in_memory(test_config(), model, log.clone());

        let err = system.trigger_consolidation("s1").wait().await.unwrap_err();
        assert!(matches!(err, MemoryError::ExtractionFailed(_)));
        assert_eq!(log.pending("s1").await, 2);
        assert_eq!(system.scheduler().cursor("s1").await.unwrap(), 0);

        // Next cycle learns from the same entries
        let model = Arc::new(ScriptedModel::extracting_then_summarizing(THREE_LEARNINGS));
        let system = MemorySystem::in_memory(test_config(), model, log.clone());
        let report = system.trigger_consolidation("s1").wait().await.unwrap();
        assert_eq!(report.records_written(), 3);
        assert_eq!(log.pending("s1").await, 0);
    }

    #[tokio::test]
    async fn test_store_outage_defers_consolidation() {
        let log = log_with_activity("s1").await;
        let model = Arc::new(ScriptedModel::extracting_then_summarizing(THREE_LEARNINGS));
        let inner = Arc::new(InMemoryStore::default());
        let store = Arc::new(FaultyStore::new(inner.clone()));
        let system = MemorySystem::new(test_config(), model, store.clone(), inner.clone(), log.clone());

        store.set_commits_down(true);
        let report = system.trigger_consolidation("s1").wait().await.unwrap();

        assert!(!report.is_clean());
        assert!(report.failures.contains_key(&Category::WorldKnowledge));
        assert!(report.cleared.is_empty());
        assert_eq!(log.pending("s1").await, 2);
        let shorts = inner
            .read(&Category::WorldKnowledge, Tier::Short, false)
            .await
            .unwrap();
        assert!(shorts.is_empty());
        let pending = inner
            .unconsumed(&Category::WorldKnowledge, Tier::Raw)
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);

        // The store recovers; the next cycle consolidates without re-learning
        store.set_commits_down(false);
        let report = system.trigger_consolidation("s1").wait().await.unwrap();
        assert!(report.is_clean());
        assert!(report.extractions.is_empty());
        assert_eq!(report.ladders[&Category::WorldKnowledge].shorts.len(), 1);
        assert_eq!(report.cleared.get("s1"), Some(&2));
        assert_eq!(log.pending("s1").await, 0);
    }
}

mod restart_tests {
    use super::*;

    /// Extraction succeeds, self_reflection summaries fail, others succeed
    fn self_reflection_down() -> Arc<ScriptedModel> {
        Arc::new(ScriptedModel::responding(|prompt| {
            if prompt.contains("<conversation session=") {
                Ok(THREE_LEARNINGS.to_string())
            } else if prompt.contains("\"self_reflection\"") {
                Err(LlmError::RequestFailed("overloaded".to_string()))
            } else {
                Ok(r#"{"summary": "pectra summary"}"#.to_string())
            }
        }))
    }

    #[tokio::test]
    async fn test_restart_after_partial_cycle_does_not_relearn() {
        let log = log_with_activity("s1").await;
        let store = Arc::new(InMemoryStore::default());

        let system = MemorySystem::new(
            test_config(),
            self_reflection_down(),
            store.clone(),
            store.clone(),
            log.clone(),
        );
        let report = system.trigger_consolidation("s1").wait().await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures.contains_key(&Category::SelfReflection));
        assert_eq!(report.ladders[&Category::WorldKnowledge].shorts.len(), 1);
        assert_eq!(log.pending("s1").await, 2);
        assert_eq!(system.scheduler().tracked_sessions(), 1);
        drop(system);

        // A new process over the same store and log
        let model = Arc::new(ScriptedModel::summarizing());
        let restarted = MemorySystem::new(
            test_config(),
            model.clone(),
            store.clone(),
            store.clone(),
            log.clone(),
        );
        assert_eq!(restarted.scheduler().cursor("s1").await.unwrap(), 2);

        let report = restarted.trigger_consolidation("s1").wait().await.unwrap();
        assert!(report.is_clean());
        assert!(report.extractions.is_empty());
        assert!(
            model
                .prompts()
                .iter()
                .all(|p| !p.contains("<conversation session="))
        );
        assert_eq!(report.cleared.get("s1"), Some(&2));
        assert_eq!(log.pending("s1").await, 0);

        let raws = store
            .read(&Category::WorldKnowledge, Tier::Raw, false)
            .await
            .unwrap();
        assert_eq!(raws.len(), 2);
        let shorts = store
            .read(&Category::WorldKnowledge, Tier::Short, false)
            .await
            .unwrap();
        assert_eq!(shorts.len(), 1);
        let reflections = store
            .read(&Category::SelfReflection, Tier::Short, false)
            .await
            .unwrap();
        assert_eq!(reflections.len(), 1);
    }
}

mod meditation_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sweep_runs_on_interval_and_stops_on_shutdown() {
        let mut config = test_config();
        config.scheduler.sweep_interval_secs = 3600;
        let log = log_with_activity("s1").await;
        let model = Arc::new(ScriptedModel::extracting_then_summarizing(THREE_LEARNINGS));
        let system = MemorySystem::in_memory(config, model.clone(), log.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = system.spawn_meditation(shutdown_rx);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(model.calls(), 0);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(log.pending("s1").await, 0);
        let longs = system
            .store()
            .read(&Category::WorldKnowledge, Tier::Long, true)
            .await
            .unwrap();
        assert_eq!(longs.len(), 1);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("meditation loop stops")
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_covers_every_session() {
        let log = Arc::new(InMemoryLogSource::new());
        log.append("a", Role::User, "hello").await;
        log.append("b", Role::User, "gm").await;
        let model = Arc::new(ScriptedModel::new([
            Ok(r#"[{"category": "user_specific", "user_id": "ann", "text": "ann says hello first"}]"#.to_string()),
            Ok(r#"[{"category": "user_specific", "user_id": "ben", "text": "ben greets with gm"}]"#.to_string()),
        ]));
        let system = MemorySystem::in_memory(test_config(), model.clone(), log.clone());

        let report = system.scheduler().run_meditation().await.unwrap();

        assert_eq!(report.kind, CycleKind::Meditation);
        assert_eq!(report.extractions.len(), 2);
        // Ladder prompts hit the exhausted script
        assert_eq!(report.failures.len(), 2);
        assert!(report.cleared.is_empty());
        assert_eq!(log.pending("a").await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_sweep() {
        let log = log_with_activity("s1").await;
        let model = Arc::new(ScriptedModel::summarizing());
        let system = MemorySystem::in_memory(test_config(), model.clone(), log);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = system.spawn_meditation(shutdown_rx);
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("meditation loop stops")
            .unwrap();
        assert_eq!(model.calls(), 0);
    }
}
