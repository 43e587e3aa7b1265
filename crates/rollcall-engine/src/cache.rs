//! TTL read cache over ledger tables using moka
//!
//! Holds one snapshot per table. Unlike a plain TTL cache, expired snapshots
//! are kept around: staleness triggers a reload, and only a *transiently*
//! failed reload makes the cache serve an old snapshot (degraded mode). A
//! permanent failure always propagates. Capacity-based
//! eviction is delegated to moka; expiry is decided here.

use dashmap::DashMap;
use moka::future::Cache;
use rollcall_ledger::{LedgerClient, LedgerError, RetryPolicy, Row};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How a snapshot was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Served from a cache entry within its TTL
    Cached,
    /// Fetched from the ledger by this call
    Reloaded,
    /// Reload failed; an expired snapshot was served instead
    Stale,
}

/// Rows of one table at a point in time
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Table name
    pub table: String,
    /// Rows, header first
    pub rows: Arc<Vec<Row>>,
    /// When the rows were fetched
    pub fetched_at: Instant,
    /// How this snapshot was obtained
    pub freshness: Freshness,
}

impl Snapshot {
    /// Whether this snapshot came from degraded mode
    #[inline]
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

#[derive(Debug)]
struct CacheEntry {
    rows: Arc<Vec<Row>>,
    fetched_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(self.fetched_at) > self.ttl
    }

    fn snapshot(&self, table: &str, freshness: Freshness) -> Snapshot {
        Snapshot {
            table: table.to_string(),
            rows: Arc::clone(&self.rows),
            fetched_at: self.fetched_at,
            freshness,
        }
    }
}

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of cached tables
    pub entry_count: u64,
    /// Snapshots served within TTL
    pub hits: u64,
    /// Successful reloads
    pub reloads: u64,
    /// Stale snapshots served after a failed reload
    pub stale_served: u64,
}

/// Read cache of table snapshots
pub struct ReadCache {
    entries: Cache<String, Arc<CacheEntry>>,
    /// Bumped on every invalidation; a reload that straddles one is discarded
    generations: DashMap<String, u64>,
    access: DashMap<String, u64>,
    client: LedgerClient,
    retry: RetryPolicy,
    default_ttl: Duration,
    ttl_overrides: HashMap<String, Duration>,
    hits: AtomicU64,
    reloads: AtomicU64,
    stale_served: AtomicU64,
}

impl std::fmt::Debug for ReadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadCache")
            .field("default_ttl", &self.default_ttl)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ReadCache {
    /// Create a cache holding at most `max_tables` snapshots
    #[must_use]
    pub fn new(client: LedgerClient, retry: RetryPolicy, max_tables: u64, default_ttl: Duration) -> Self {
        Self {
            entries: Cache::new(max_tables),
            generations: DashMap::new(),
            access: DashMap::new(),
            client,
            retry,
            default_ttl,
            ttl_overrides: HashMap::new(),
            hits: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
        }
    }

    /// With per-table TTLs
    #[must_use]
    pub fn with_ttl_overrides(mut self, overrides: HashMap<String, Duration>) -> Self {
        self.ttl_overrides = overrides;
        self
    }

    /// TTL applied to a table
    #[must_use]
    pub fn ttl_for(&self, table: &str) -> Duration {
        self.ttl_overrides
            .get(table)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// Snapshot of a table
    ///
    /// Fresh entries are served directly. Missing or expired entries are
    /// reloaded; if the reload fails transiently, an existing entry is served
    /// however old it is.
    ///
    /// # Errors
    /// The reload error when no previous snapshot exists, or when the table
    /// is permanently unreadable
    pub async fn get(&self, table: &str) -> Result<Snapshot, LedgerError> {
        *self.access.entry(table.to_string()).or_default() += 1;

        let previous = self.entries.get(table).await;
        if let Some(entry) = &previous {
            if !entry.is_stale(Instant::now()) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("rollcall_cache_hits_total").increment(1);
                tracing::trace!(table, "cache hit");
                return Ok(entry.snapshot(table, Freshness::Cached));
            }
        }

        match self.reload(table).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => match previous {
                Some(entry) if !matches!(e, LedgerError::Permanent { .. }) => {
                    self.stale_served.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("rollcall_cache_stale_served_total").increment(1);
                    tracing::warn!(
                        table,
                        age_secs = entry.fetched_at.elapsed().as_secs(),
                        error = %e,
                        "reload failed, serving stale snapshot"
                    );
                    Ok(entry.snapshot(table, Freshness::Stale))
                }
                _ => Err(e),
            },
        }
    }

    /// Force a reload regardless of TTL
    ///
    /// A failure leaves any existing entry in place.
    ///
    /// # Errors
    /// The reload error
    pub async fn refresh(&self, table: &str) -> Result<Snapshot, LedgerError> {
        self.reload(table).await
    }

    /// Drop a table's entry so the next `get` reloads it
    pub async fn invalidate(&self, table: &str) {
        *self.generations.entry(table.to_string()).or_default() += 1;
        self.entries.invalidate(table).await;
        tracing::debug!(table, "cache invalidated");
    }

    /// Drop every entry
    pub fn invalidate_all(&self) {
        for mut generation in self.generations.iter_mut() {
            *generation += 1;
        }
        self.entries.invalidate_all();
    }

    /// When the current entry of a table was fetched
    pub async fn fetched_at(&self, table: &str) -> Option<Instant> {
        self.entries.get(table).await.map(|e| e.fetched_at)
    }

    /// The `n` most requested tables, most requested first
    #[must_use]
    pub fn hottest(&self, n: usize) -> Vec<String> {
        let mut counts: Vec<(String, u64)> = self
            .access
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.into_iter().take(n).map(|(t, _)| t).collect()
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
        }
    }

    fn generation(&self, table: &str) -> u64 {
        self.generations.get(table).map_or(0, |g| *g)
    }

    async fn reload(&self, table: &str) -> Result<Snapshot, LedgerError> {
        // One extra round if an invalidation lands mid-fetch
        let mut rounds = 0;
        loop {
            rounds += 1;
            let generation = self.generation(table);
            let rows = self.retry.run(|| self.client.read_all(table)).await?;
            let entry = Arc::new(CacheEntry {
                rows: Arc::new(rows),
                fetched_at: Instant::now(),
                ttl: self.ttl_for(table),
            });

            if self.generation(table) == generation {
                self.entries.insert(table.to_string(), Arc::clone(&entry)).await;
                self.reloads.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(table, rows = entry.rows.len(), "table reloaded");
                return Ok(entry.snapshot(table, Freshness::Reloaded));
            }
            if rounds >= 2 {
                tracing::debug!(table, "table invalidated during reload, not caching");
                return Ok(entry.snapshot(table, Freshness::Reloaded));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_ledger::{FailureKind, InMemoryLedger, Operation};

    fn rows(value: &str) -> Vec<Row> {
        vec![vec!["h".to_string()], vec![value.to_string()]]
    }

    fn setup(ttl: Duration) -> (Arc<InMemoryLedger>, ReadCache) {
        let ledger = Arc::new(InMemoryLedger::new().with_table("t", rows("v1")));
        let client = LedgerClient::new(ledger.clone());
        let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(10));
        (ledger, ReadCache::new(client, policy, 16, ttl))
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entries_are_served_without_remote_calls() {
        let (ledger, cache) = setup(Duration::from_secs(300));
        assert_eq!(cache.get("t").await.unwrap().freshness, Freshness::Reloaded);
        let again = cache.get("t").await.unwrap();
        assert_eq!(again.freshness, Freshness::Cached);
        assert_eq!(again.rows[1][0], "v1");
        assert_eq!(ledger.calls(Operation::ReadAll), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_reload() {
        let (ledger, cache) = setup(Duration::from_secs(300));
        cache.get("t").await.unwrap();
        ledger.set_table("t", rows("v2"));

        tokio::time::advance(Duration::from_secs(301)).await;
        let snap = cache.get("t").await.unwrap();
        assert_eq!(snap.freshness, Freshness::Reloaded);
        assert_eq!(snap.rows[1][0], "v2");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reload_serves_stale_snapshot() {
        let (ledger, cache) = setup(Duration::from_secs(300));
        cache.get("t").await.unwrap();

        tokio::time::advance(Duration::from_secs(360)).await;
        ledger.fail_always(Operation::ReadAll, FailureKind::Transient);
        let snap = cache.get("t").await.unwrap();
        assert!(snap.is_degraded());
        assert_eq!(snap.rows[1][0], "v1");
        assert_eq!(cache.stats().stale_served, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_masked_by_stale_snapshot() {
        let (ledger, cache) = setup(Duration::from_secs(300));
        cache.get("t").await.unwrap();

        tokio::time::advance(Duration::from_secs(360)).await;
        ledger.fail_always(Operation::ReadAll, FailureKind::Permanent);
        let err = cache.get("t").await.unwrap_err();
        assert!(matches!(err, LedgerError::Permanent { .. }));
        assert_eq!(cache.stats().stale_served, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_without_snapshot_propagates() {
        let (ledger, cache) = setup(Duration::from_secs(300));
        ledger.fail_always(Operation::ReadAll, FailureKind::Permanent);
        let err = cache.get("t").await.unwrap_err();
        assert!(matches!(err, LedgerError::Permanent { .. }));
        assert_eq!(ledger.calls(Operation::ReadAll), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_reload() {
        let (ledger, cache) = setup(Duration::from_secs(300));
        cache.get("t").await.unwrap();
        let first = cache.fetched_at("t").await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        ledger.set_table("t", rows("v2"));
        cache.invalidate("t").await;
        assert!(cache.fetched_at("t").await.is_none());

        let snap = cache.get("t").await.unwrap();
        assert_eq!(snap.rows[1][0], "v2");
        assert!(snap.fetched_at > first);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_entry() {
        let (ledger, cache) = setup(Duration::from_secs(300));
        cache.get("t").await.unwrap();
        ledger.fail_always(Operation::ReadAll, FailureKind::Transient);

        assert!(cache.refresh("t").await.is_err());
        assert!(cache.fetched_at("t").await.is_some());
        assert_eq!(cache.get("t").await.unwrap().freshness, Freshness::Cached);
    }

    #[tokio::test(start_paused = true)]
    async fn hottest_orders_by_access() {
        let ledger = Arc::new(
            InMemoryLedger::new()
                .with_table("a", rows("1"))
                .with_table("b", rows("2")),
        );
        let cache = ReadCache::new(
            LedgerClient::new(ledger),
            RetryPolicy::no_retry(),
            16,
            Duration::from_secs(60),
        );
        cache.get("a").await.unwrap();
        cache.get("b").await.unwrap();
        cache.get("b").await.unwrap();
        assert_eq!(cache.hottest(1), vec!["b".to_string()]);
        assert_eq!(cache.hottest(5).len(), 2);
    }

    #[test]
    fn ttl_overrides_apply_per_table() {
        let ledger = Arc::new(InMemoryLedger::new());
        let cache = ReadCache::new(
            LedgerClient::new(ledger),
            RetryPolicy::no_retry(),
            16,
            Duration::from_secs(300),
        )
        .with_ttl_overrides(HashMap::from([("roster".to_string(), Duration::from_secs(900))]));
        assert_eq!(cache.ttl_for("roster"), Duration::from_secs(900));
        assert_eq!(cache.ttl_for("other"), Duration::from_secs(300));
    }
}
