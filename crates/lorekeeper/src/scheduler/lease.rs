//! Keyed mutual-exclusion leases
//!
//! A lease is an async mutex looked up by key. Holding the guard keeps every
//! other holder of the same key waiting; different keys never contend.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::memory::types::Category;

/// Guard for a held lease, released on drop
pub type Lease = OwnedMutexGuard<()>;

#[derive(Debug, Default)]
pub struct LeaseTable {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(key) {
            return lock.clone();
        }
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait until the lease for `key` is free and take it
    pub async fn acquire(&self, key: &str) -> Lease {
        self.lock_for(key).lock_owned().await
    }

    /// Take the lease for `key` only if nobody holds it
    pub fn try_acquire(&self, key: &str) -> Option<Lease> {
        self.lock_for(key).try_lock_owned().ok()
    }

    /// Drop the lease for `key` when nobody holds it or waits for it.
    /// Returns whether it was dropped.
    pub fn release_idle(&self, key: &str) -> bool {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.locks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    pub fn category_key(category: &Category) -> String {
        format!("category:{}", category.key())
    }

    pub fn session_key(session_id: &str) -> String {
        format!("session:{session_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let table = LeaseTable::new();
        let key = LeaseTable::category_key(&Category::WorldKnowledge);

        let guard = table.acquire(&key).await;
        assert!(table.is_held(&key));
        assert!(table.try_acquire(&key).is_none());

        let waiting = tokio::time::timeout(Duration::from_millis(20), table.acquire(&key)).await;
        assert!(waiting.is_err());

        drop(guard);
        assert!(!table.is_held(&key));
        assert!(table.try_acquire(&key).is_some());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let table = LeaseTable::new();
        let _a = table.acquire(&LeaseTable::category_key(&Category::WorldKnowledge)).await;
        let b = table.try_acquire(&LeaseTable::category_key(&Category::SelfReflection));
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn test_release_idle_keeps_held_leases() {
        let table = LeaseTable::new();
        let key = LeaseTable::session_key("s1");

        let guard = table.acquire(&key).await;
        assert!(!table.release_idle(&key));
        assert!(table.contains(&key));

        drop(guard);
        assert!(table.release_idle(&key));
        assert!(!table.contains(&key));
        assert!(table.is_empty());

        // A released key is recreated on demand
        let _again = table.acquire(&key).await;
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_keys() {
        assert_eq!(
            LeaseTable::category_key(&Category::UserSpecific("alice".to_string())),
            "category:user:alice"
        );
        assert_eq!(LeaseTable::session_key("s1"), "session:s1");
    }
}
