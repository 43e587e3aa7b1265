//! Background refresher
//!
//! Each tick, independent of foreground traffic:
//! - reloads the roster, the blacklist index and (concurrently) the hottest
//!   schedule tables
//! - sweeps idle rate-limit buckets
//! - expires idle staging scopes
//!
//! Reloads go through [`ReadCache::refresh`], so a failure never evicts a
//! usable entry. Shutdown is only observed between ticks; a tick in progress
//! runs to completion.

use crate::blacklist::BlacklistIndex;
use crate::cache::ReadCache;
use crate::config::{RefresherConfig, TableNames};
use crate::rate_limit::RateLimiter;
use crate::staging::StagingBuffer;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tables reloaded successfully
    pub refreshed: Vec<String>,
    /// Tables whose reload failed
    pub failed: Vec<String>,
    /// Rate buckets removed
    pub swept_buckets: usize,
    /// Staging scopes expired
    pub expired_scopes: usize,
}

/// Periodic cache and housekeeping task
#[derive(Debug, Clone)]
pub struct BackgroundRefresher {
    cache: Arc<ReadCache>,
    blacklist: Arc<BlacklistIndex>,
    limiter: Arc<RateLimiter>,
    staging: Arc<StagingBuffer>,
    tables: TableNames,
    config: RefresherConfig,
}

impl BackgroundRefresher {
    /// Create over shared stores
    #[must_use]
    pub fn new(
        cache: Arc<ReadCache>,
        blacklist: Arc<BlacklistIndex>,
        limiter: Arc<RateLimiter>,
        staging: Arc<StagingBuffer>,
        tables: TableNames,
        config: RefresherConfig,
    ) -> Self {
        Self {
            cache,
            blacklist,
            limiter,
            staging,
            tables,
            config,
        }
    }

    /// Run one refresh cycle
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        match self.cache.refresh(&self.tables.roster).await {
            Ok(_) => report.refreshed.push(self.tables.roster.clone()),
            Err(e) => {
                tracing::warn!(table = %self.tables.roster, error = %e, "roster refresh failed");
                report.failed.push(self.tables.roster.clone());
            }
        }

        match self.blacklist.reload(&self.cache, &self.tables.blacklist).await {
            Ok(_) => report.refreshed.push(self.tables.blacklist.clone()),
            Err(e) => {
                tracing::warn!(table = %self.tables.blacklist, error = %e, "blacklist refresh failed");
                report.failed.push(self.tables.blacklist.clone());
            }
        }

        let hot: Vec<String> = self
            .cache
            .hottest(self.config.hot_tables + 2)
            .into_iter()
            .filter(|t| *t != self.tables.roster && *t != self.tables.blacklist)
            .take(self.config.hot_tables)
            .collect();
        let reloads = hot.iter().map(|table| self.cache.refresh(table));
        for (table, result) in hot.iter().zip(join_all(reloads).await) {
            match result {
                Ok(_) => report.refreshed.push(table.clone()),
                Err(e) => {
                    tracing::warn!(table = %table, error = %e, "schedule refresh failed");
                    report.failed.push(table.clone());
                }
            }
        }

        report.swept_buckets = self.limiter.sweep();
        report.expired_scopes = self.staging.expire_idle(self.config.session_idle());

        tracing::debug!(
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            swept = report.swept_buckets,
            expired = report.expired_scopes,
            "refresher tick"
        );
        report
    }

    /// Spawn the loop; it stops once `shutdown` turns `true` or its sender drops
    ///
    /// The first tick runs immediately.
    #[must_use]
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_secs = self.config.interval().as_secs(), "refresher started");

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }
                self.tick().await;
            }
            tracing::info!("refresher stopped");
        })
    }
}
