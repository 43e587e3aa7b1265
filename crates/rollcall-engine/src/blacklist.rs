//! Blocked-actor index derived from the blacklist table

use crate::cache::ReadCache;
use parking_lot::RwLock;
use rollcall_ledger::{parse_blacklist, ActorId, LedgerError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// In-memory set of blocked actors
///
/// Readers clone the inner `Arc`, so a reload never blocks a lookup for
/// longer than a pointer swap.
#[derive(Debug, Default)]
pub struct BlacklistIndex {
    ids: RwLock<Arc<HashSet<ActorId>>>,
    loaded: AtomicBool,
}

impl BlacklistIndex {
    /// Create an empty, not yet loaded index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set
    pub fn replace(&self, ids: HashSet<ActorId>) {
        *self.ids.write() = Arc::new(ids);
        self.loaded.store(true, Ordering::Release);
    }

    /// Reload from the blacklist table, bypassing the TTL
    ///
    /// # Errors
    /// The reload error; the previous set stays in place
    pub async fn reload(&self, cache: &ReadCache, table: &str) -> Result<usize, LedgerError> {
        let snapshot = cache.refresh(table).await?;
        let ids = parse_blacklist(&snapshot.rows);
        let count = ids.len();
        self.replace(ids);
        tracing::debug!(table, count, "blacklist reloaded");
        Ok(count)
    }

    /// Whether an actor is blocked
    #[must_use]
    pub fn contains(&self, actor: ActorId) -> bool {
        self.ids.read().contains(&actor)
    }

    /// Whether at least one load succeeded
    #[inline]
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Current set, sorted
    #[must_use]
    pub fn sorted(&self) -> Vec<ActorId> {
        let snapshot = Arc::clone(&self.ids.read());
        let mut ids: Vec<_> = snapshot.iter().copied().collect();
        ids.sort_unstable_by_key(|a| a.0);
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_ledger::{FailureKind, InMemoryLedger, LedgerClient, Operation, RetryPolicy};
    use std::time::Duration;

    #[tokio::test]
    async fn reload_replaces_set() {
        let ledger = Arc::new(InMemoryLedger::new().with_table(
            "bl",
            vec![vec!["id".into()], vec!["9".into()], vec!["3".into()]],
        ));
        let cache = ReadCache::new(
            LedgerClient::new(ledger.clone()),
            RetryPolicy::no_retry(),
            4,
            Duration::from_secs(60),
        );
        let index = BlacklistIndex::new();
        assert!(!index.is_loaded());

        assert_eq!(index.reload(&cache, "bl").await.unwrap(), 2);
        assert!(index.is_loaded());
        assert!(index.contains(ActorId(9)));
        assert_eq!(index.sorted(), vec![ActorId(3), ActorId(9)]);

        ledger.fail_always(Operation::ReadAll, FailureKind::Permanent);
        assert!(index.reload(&cache, "bl").await.is_err());
        assert!(index.contains(ActorId(3)));
    }
}
