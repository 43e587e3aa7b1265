//! Student roster and registration
//!
//! Registration links a chat identity to a roster record by full name. A record
//! holds at most one identity and an identity at most one record.

use crate::cache::ReadCache;
use crate::commit::TableLocks;
use crate::error::{RegistrationError, Result};
use rollcall_ledger::{
    ActorId, CellWrite, LedgerClient, RetryPolicy, Roster, StudentRecord, ROSTER_LINK_COLUMN,
};
use std::sync::Arc;

/// Registration progress across the roster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RosterStats {
    /// Records in the roster
    pub total: usize,
    /// Records with a linked identity
    pub registered: usize,
    /// Records without one
    pub unregistered: usize,
    /// `registered / total` in percent, zero for an empty roster
    pub percent: f64,
}

impl RosterStats {
    fn from_roster(roster: &Roster) -> Self {
        let total = roster.records().len();
        let registered = roster.records().iter().filter(|r| r.is_registered()).count();
        #[allow(clippy::cast_precision_loss)]
        let percent = if total == 0 {
            0.0
        } else {
            registered as f64 * 100.0 / total as f64
        };
        Self {
            total,
            registered,
            unregistered: total - registered,
            percent,
        }
    }
}

/// Roster reads and registration writes
#[derive(Debug, Clone)]
pub struct RosterService {
    client: LedgerClient,
    cache: Arc<ReadCache>,
    locks: Arc<TableLocks>,
    retry: RetryPolicy,
    table: String,
}

impl RosterService {
    /// Create over shared stores
    #[must_use]
    pub fn new(
        client: LedgerClient,
        cache: Arc<ReadCache>,
        locks: Arc<TableLocks>,
        retry: RetryPolicy,
        table: impl Into<String>,
    ) -> Self {
        Self {
            client,
            cache,
            locks,
            retry,
            table: table.into(),
        }
    }

    /// Roster table name
    #[inline]
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Parsed roster from the cache
    ///
    /// # Errors
    /// Remote or layout errors
    pub async fn roster(&self) -> Result<Roster> {
        let snapshot = self.cache.get(&self.table).await?;
        Ok(Roster::parse(&self.table, &snapshot.rows)?)
    }

    /// Record linked to an actor
    ///
    /// # Errors
    /// Remote or layout errors
    pub async fn student_for(&self, actor: ActorId) -> Result<Option<StudentRecord>> {
        Ok(self.roster().await?.find_by_identity(actor).cloned())
    }

    /// Every record in table order
    ///
    /// # Errors
    /// Remote or layout errors
    pub async fn list(&self) -> Result<Vec<StudentRecord>> {
        Ok(self.roster().await?.records().to_vec())
    }

    /// Registration statistics
    ///
    /// # Errors
    /// Remote or layout errors
    pub async fn stats(&self) -> Result<RosterStats> {
        Ok(RosterStats::from_roster(&self.roster().await?))
    }

    /// Link `actor` to the record named `full_name`
    ///
    /// Idempotent for an actor already linked to that record.
    ///
    /// # Errors
    /// - `RegistrationError::NameNotFound` when no record matches
    /// - `RegistrationError::AlreadyLinkedToOther` when the record holds another identity
    /// - `RegistrationError::IdentityInUse` when the actor holds another record
    /// - remote or layout errors
    pub async fn register(&self, actor: ActorId, full_name: &str) -> Result<StudentRecord> {
        let _guard = self.locks.lock(&self.table).await;
        let snapshot = self.cache.refresh(&self.table).await?;
        let roster = Roster::parse(&self.table, &snapshot.rows)?;

        let record = roster
            .find_by_name(full_name)
            .ok_or_else(|| RegistrationError::NameNotFound(full_name.trim().to_string()))?;
        if let Some(held) = roster.find_by_identity(actor) {
            if held.row == record.row {
                return Ok(held.clone());
            }
            return Err(RegistrationError::IdentityInUse {
                actor,
                name: held.full_name.clone(),
            }
            .into());
        }
        if record.linked.is_some() {
            return Err(RegistrationError::AlreadyLinkedToOther {
                name: record.full_name.clone(),
            }
            .into());
        }

        let row = self
            .retry
            .run(|| self.client.find_row_by_key(&self.table, &record.sequence))
            .await?
            .ok_or_else(|| RegistrationError::NameNotFound(record.full_name.clone()))?;
        let write = CellWrite::new(row, ROSTER_LINK_COLUMN, actor.to_string());
        self.retry
            .run(|| self.client.write_cell(&self.table, &write))
            .await?;
        self.cache.invalidate(&self.table).await;

        tracing::info!(%actor, sequence = %record.sequence, "student registered");
        Ok(StudentRecord {
            linked: Some(actor),
            ..record.clone()
        })
    }

    /// Clear every linked identity in one batch write
    ///
    /// # Errors
    /// Remote or layout errors
    pub async fn reset_registrations(&self) -> Result<usize> {
        let _guard = self.locks.lock(&self.table).await;
        let snapshot = self.cache.refresh(&self.table).await?;
        let roster = Roster::parse(&self.table, &snapshot.rows)?;

        let writes: Vec<_> = roster
            .records()
            .iter()
            .filter(|r| r.is_registered())
            .map(|r| CellWrite::new(r.row.0, ROSTER_LINK_COLUMN, ""))
            .collect();
        if writes.is_empty() {
            return Ok(0);
        }
        self.retry
            .run(|| self.client.write_batch(&self.table, &writes))
            .await?;
        self.cache.invalidate(&self.table).await;

        tracing::info!(cleared = writes.len(), "registrations reset");
        Ok(writes.len())
    }
}
