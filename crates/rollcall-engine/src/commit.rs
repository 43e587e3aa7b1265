//! Commit coordinator
//!
//! Turns a scope's staged edits into exactly one batched ledger write:
//! 1. take the pending map; nothing pending means no remote calls
//! 2. reload the target table and re-check every row (scope, cancellation)
//! 3. resolve surviving edits to absolute cell coordinates
//! 4. one `write_batch` under the table's write lock
//! 5. on success invalidate the cached table and drop the written edits
//!
//! A failed write leaves the staging buffer untouched so the user can retry.

use crate::cache::ReadCache;
use crate::error::{EngineError, Result};
use crate::staging::{SessionKey, StageScope, StagingBuffer};
use dashmap::DashMap;
use rollcall_ledger::{CellWrite, LedgerClient, RetryPolicy, RowId, ScheduleSheet, CANCEL_SENTINEL};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async write lock per table
#[derive(Debug, Default)]
pub struct TableLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TableLocks {
    /// Create an empty lock set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to a table
    pub async fn lock(&self, table: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(
            self.locks
                .entry(table.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        lock.lock_owned().await
    }
}

/// Result of one commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Edits that were pending
    pub attempted: usize,
    /// Edits written to the ledger
    pub committed: usize,
    /// Edits dropped because their row was cancelled or left the scope
    pub rejected: Vec<RowId>,
    /// Edits skipped because the ledger already held the value
    pub unchanged: Vec<RowId>,
}

impl CommitReport {
    /// Whether there was anything to commit
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempted == 0
    }

    /// Whether every pending edit was applied or already in place
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    /// "N of M edits applied"
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            "Nothing to commit.".to_string()
        } else {
            format!("{} of {} edits applied", self.committed, self.attempted)
        }
    }
}

/// Validates and writes staged edits
#[derive(Debug, Clone)]
pub struct CommitCoordinator {
    client: LedgerClient,
    cache: Arc<ReadCache>,
    staging: Arc<StagingBuffer>,
    locks: Arc<TableLocks>,
    retry: RetryPolicy,
}

impl CommitCoordinator {
    /// Create a coordinator over shared stores
    #[must_use]
    pub fn new(
        client: LedgerClient,
        cache: Arc<ReadCache>,
        staging: Arc<StagingBuffer>,
        locks: Arc<TableLocks>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            cache,
            staging,
            locks,
            retry,
        }
    }

    /// Commit a student's staged marks for one scope
    ///
    /// # Errors
    /// - `EngineError::Remote` when the reload or the batch write fails
    /// - `EngineError::StudentColumnMissing` when the table lacks the student's column
    pub async fn commit_marks(
        &self,
        key: SessionKey,
        scope: &StageScope,
        table: &str,
        student: &str,
    ) -> Result<CommitReport> {
        let pending = self.staging.marks.pending(key, scope);
        if pending.is_empty() {
            tracing::debug!(%key, table, "nothing to commit");
            return Ok(CommitReport::default());
        }

        let _guard = self.locks.lock(table).await;
        let sheet = self.current_sheet(table).await?;
        let column = sheet
            .student_column(student)
            .ok_or_else(|| EngineError::StudentColumnMissing {
                student: student.to_string(),
                table: table.to_string(),
            })?;

        let mut report = CommitReport {
            attempted: pending.len(),
            ..CommitReport::default()
        };
        let mut writes = Vec::new();
        let mut written = BTreeMap::new();
        for (row_id, mark) in &pending {
            match sheet.row(*row_id).filter(|r| scope.contains(r)) {
                Some(row) if !row.is_cancelled() => {
                    writes.push(CellWrite::new(row_id.0, column, mark.glyph()));
                    written.insert(*row_id, *mark);
                }
                _ => report.rejected.push(*row_id),
            }
        }

        self.write(table, &writes).await?;

        report.committed = written.len();
        self.staging.marks.remove_if_unchanged(key, scope, &written);
        let rejected: BTreeMap<_, _> = pending
            .into_iter()
            .filter(|(row, _)| report.rejected.contains(row))
            .collect();
        self.staging.marks.remove_if_unchanged(key, scope, &rejected);

        tracing::info!(
            %key,
            table,
            committed = report.committed,
            rejected = report.rejected.len(),
            "marks committed"
        );
        Ok(report)
    }

    /// Commit an administrator's staged cancellation toggles for one scope
    ///
    /// Cancelling writes the sentinel into every student column of the row;
    /// reopening clears them. All rows go out in one batch.
    ///
    /// # Errors
    /// `EngineError::Remote` when the reload or the batch write fails
    pub async fn commit_cancellations(
        &self,
        key: SessionKey,
        scope: &StageScope,
        table: &str,
    ) -> Result<CommitReport> {
        let pending = self.staging.cancellations.pending(key, scope);
        if pending.is_empty() {
            return Ok(CommitReport::default());
        }

        let _guard = self.locks.lock(table).await;
        let sheet = self.current_sheet(table).await?;
        let columns: Vec<u32> = sheet.student_columns().map(|(_, col)| col).collect();

        let mut report = CommitReport {
            attempted: pending.len(),
            ..CommitReport::default()
        };
        let mut writes = Vec::new();
        let mut settled = BTreeMap::new();
        for (row_id, cancel) in &pending {
            match sheet.row(*row_id).filter(|r| scope.contains(r)) {
                None => report.rejected.push(*row_id),
                Some(row) if row.is_cancelled() == *cancel => {
                    report.unchanged.push(*row_id);
                    settled.insert(*row_id, *cancel);
                }
                Some(_) => {
                    let value = if *cancel { CANCEL_SENTINEL } else { "" };
                    writes.extend(columns.iter().map(|col| CellWrite::new(row_id.0, *col, value)));
                    settled.insert(*row_id, *cancel);
                    report.committed += 1;
                }
            }
        }

        self.write(table, &writes).await?;

        let rejected: BTreeMap<_, _> = pending
            .into_iter()
            .filter(|(row, _)| report.rejected.contains(row))
            .collect();
        self.staging.cancellations.remove_if_unchanged(key, scope, &settled);
        self.staging.cancellations.remove_if_unchanged(key, scope, &rejected);

        tracing::info!(
            %key,
            table,
            rows = report.committed,
            unchanged = report.unchanged.len(),
            "cancellations committed"
        );
        Ok(report)
    }

    async fn current_sheet(&self, table: &str) -> Result<ScheduleSheet> {
        let snapshot = self.cache.refresh(table).await?;
        Ok(ScheduleSheet::parse(table, &snapshot.rows)?)
    }

    async fn write(&self, table: &str, writes: &[CellWrite]) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        if let Err(e) = self
            .retry
            .run(|| self.client.write_batch(table, writes))
            .await
        {
            tracing::warn!(table, cells = writes.len(), error = %e, "batch write failed, edits kept");
            return Err(e.into());
        }
        metrics::counter!("rollcall_commit_cells_total").increment(writes.len() as u64);
        self.cache.invalidate(table).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::{Parity, WeekIdentifier};
    use rollcall_ledger::{
        ActorId, FailureKind, InMemoryLedger, MarkValue, Operation, Row, Weekday,
    };
    use std::time::Duration;

    const WEEK: &str = "Знаменатель - 8 неделя";
    const TABLE: &str = "1 подгруппа";
    const KEY: SessionKey = SessionKey(ActorId(10));

    fn row(cells: &[&str]) -> Row {
        cells.iter().map(|s| (*s).to_string()).collect()
    }

    fn scope() -> StageScope {
        let week = WeekIdentifier {
            ordinal: 8,
            parity: Parity::Even,
            label: WEEK.to_string(),
        };
        StageScope::new(week, Weekday::Monday, "1")
    }

    struct Fixture {
        ledger: Arc<InMemoryLedger>,
        cache: Arc<ReadCache>,
        staging: Arc<StagingBuffer>,
        coordinator: CommitCoordinator,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryLedger::new().with_table(
            TABLE,
            vec![
                row(&["Неделя", "День", "Предмет", "1", "2"]),
                row(&[WEEK, "Понедельник", "Физика", "", ""]),
                row(&[WEEK, "Понедельник", "Химия", "", ""]),
                row(&[WEEK, "Вторник", "История", "", ""]),
            ],
        ));
        let client = LedgerClient::new(ledger.clone());
        let retry = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(10));
        let cache = Arc::new(ReadCache::new(client.clone(), retry, 16, Duration::from_secs(300)));
        let staging = Arc::new(StagingBuffer::new());
        let coordinator = CommitCoordinator::new(
            client,
            cache.clone(),
            staging.clone(),
            Arc::new(TableLocks::new()),
            retry,
        );
        Fixture {
            ledger,
            cache,
            staging,
            coordinator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_scope_makes_no_remote_calls() {
        let f = fixture();
        let report = f.coordinator.commit_marks(KEY, &scope(), TABLE, "1").await.unwrap();
        assert!(report.is_empty());
        assert_eq!(report.summary(), "Nothing to commit.");
        assert_eq!(f.ledger.calls(Operation::ReadAll), 0);
        assert_eq!(f.ledger.calls(Operation::WriteBatch), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn marks_go_out_in_one_batch() {
        let f = fixture();
        f.staging.marks.stage(KEY, &scope(), RowId(2), MarkValue::Present);
        f.staging.marks.stage(KEY, &scope(), RowId(3), MarkValue::Excused);

        let report = f.coordinator.commit_marks(KEY, &scope(), TABLE, "1").await.unwrap();
        assert_eq!(report.committed, 2);
        assert_eq!(report.summary(), "2 of 2 edits applied");
        assert_eq!(f.ledger.calls(Operation::WriteBatch), 1);
        assert_eq!(f.ledger.calls(Operation::WriteCell), 0);
        assert_eq!(f.ledger.cell(TABLE, 2, 4).as_deref(), Some("✅"));
        assert_eq!(f.ledger.cell(TABLE, 3, 4).as_deref(), Some(MarkValue::Excused.glyph()));
        assert!(f.staging.marks.pending(KEY, &scope()).is_empty());
        assert!(f.cache.fetched_at(TABLE).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rows_cancelled_after_staging_are_rejected() {
        let f = fixture();
        f.staging.marks.stage(KEY, &scope(), RowId(2), MarkValue::Present);
        f.staging.marks.stage(KEY, &scope(), RowId(3), MarkValue::Present);
        f.staging.marks.stage(KEY, &scope(), RowId(4), MarkValue::Present);

        let mut rows = f.ledger.table(TABLE).unwrap();
        rows[2][3] = CANCEL_SENTINEL.to_string();
        f.ledger.set_table(TABLE, rows);

        let report = f.coordinator.commit_marks(KEY, &scope(), TABLE, "1").await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.committed, 1);
        assert_eq!(report.rejected, vec![RowId(3), RowId(4)]);
        assert!(!report.is_complete());
        assert_eq!(f.ledger.cell(TABLE, 3, 4).as_deref(), Some(CANCEL_SENTINEL));
        assert!(f.staging.marks.pending(KEY, &scope()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_keeps_staging() {
        let f = fixture();
        f.staging.marks.stage(KEY, &scope(), RowId(2), MarkValue::Absent);
        f.ledger.fail_always(Operation::WriteBatch, FailureKind::Transient);

        let err = f.coordinator.commit_marks(KEY, &scope(), TABLE, "1").await.unwrap_err();
        assert!(matches!(err, EngineError::Remote(_)));
        assert_eq!(f.ledger.calls(Operation::WriteBatch), 2);
        assert_eq!(f.staging.marks.pending(KEY, &scope()).len(), 1);
        assert_eq!(f.ledger.cell(TABLE, 2, 4).as_deref(), Some(""));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_student_column_is_reported() {
        let f = fixture();
        f.staging.marks.stage(KEY, &scope(), RowId(2), MarkValue::Absent);
        let err = f.coordinator.commit_marks(KEY, &scope(), TABLE, "9").await.unwrap_err();
        assert!(matches!(err, EngineError::StudentColumnMissing { .. }));
        assert_eq!(f.ledger.calls(Operation::WriteBatch), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellations_fill_and_clear_every_student_column() {
        let f = fixture();
        f.staging.cancellations.stage(KEY, &scope(), RowId(2), true);
        let report = f.coordinator.commit_cancellations(KEY, &scope(), TABLE).await.unwrap();
        assert_eq!(report.committed, 1);
        assert_eq!(f.ledger.cell(TABLE, 2, 4).as_deref(), Some(CANCEL_SENTINEL));
        assert_eq!(f.ledger.cell(TABLE, 2, 5).as_deref(), Some(CANCEL_SENTINEL));

        f.staging.cancellations.stage(KEY, &scope(), RowId(2), false);
        f.staging.cancellations.stage(KEY, &scope(), RowId(3), false);
        let report = f.coordinator.commit_cancellations(KEY, &scope(), TABLE).await.unwrap();
        assert_eq!(report.committed, 1);
        assert_eq!(report.unchanged, vec![RowId(3)]);
        assert_eq!(f.ledger.cell(TABLE, 2, 4).as_deref(), Some(""));
        assert_eq!(f.ledger.calls(Operation::WriteBatch), 2);
        assert_eq!(f.staging.cancellations.scope_count(), 0);
    }
}
