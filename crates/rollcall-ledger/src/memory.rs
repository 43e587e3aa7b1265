//! In-process ledger driver
//!
//! Holds tables in memory and supports fault injection and artificial
//! latency, so the engine can be exercised without a remote store.

use crate::driver::{CellWrite, LedgerDriver, Row};
use crate::error::{FailureKind, LedgerError, Operation};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// In-memory ledger driver
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    faults: Mutex<FaultPlan>,
    calls: Mutex<HashMap<Operation, usize>>,
    latency: RwLock<Duration>,
}

#[derive(Debug, Default)]
struct FaultPlan {
    /// One-shot faults consumed in order
    queued: VecDeque<(Operation, FailureKind)>,
    /// Faults that fire on every call until healed
    persistent: HashMap<Operation, FailureKind>,
}

impl InMemoryLedger {
    /// Create an empty ledger
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a table
    #[must_use]
    pub fn with_table(self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        self.set_table(name, rows);
        self
    }

    /// Replace or create a table
    pub fn set_table(&self, name: impl Into<String>, rows: Vec<Row>) {
        self.tables.write().insert(name.into(), rows);
    }

    /// Copy of a table's rows
    #[must_use]
    pub fn table(&self, name: &str) -> Option<Vec<Row>> {
        self.tables.read().get(name).cloned()
    }

    /// Content of one cell, 1-based; missing cells read as empty
    #[must_use]
    pub fn cell(&self, table: &str, row: u32, col: u32) -> Option<String> {
        let tables = self.tables.read();
        let rows = tables.get(table)?;
        let row = rows.get(row.checked_sub(1)? as usize)?;
        Some(row.get(col.checked_sub(1)? as usize).cloned().unwrap_or_default())
    }

    /// Fail the next `times` calls of `op`
    pub fn fail_next(&self, op: Operation, kind: FailureKind, times: usize) {
        let mut faults = self.faults.lock();
        for _ in 0..times {
            faults.queued.push_back((op, kind));
        }
    }

    /// Fail every call of `op` until [`Self::heal`]
    pub fn fail_always(&self, op: Operation, kind: FailureKind) {
        self.faults.lock().persistent.insert(op, kind);
    }

    /// Drop every injected fault
    pub fn heal(&self) {
        let mut faults = self.faults.lock();
        faults.queued.clear();
        faults.persistent.clear();
    }

    /// Simulated round-trip latency for every call
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Number of calls made for an operation, failed ones included
    #[must_use]
    pub fn calls(&self, op: Operation) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    async fn enter(&self, op: Operation, table: &str) -> Result<(), LedgerError> {
        *self.calls.lock().entry(op).or_default() += 1;

        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let fault = {
            let mut faults = self.faults.lock();
            match faults.persistent.get(&op) {
                Some(kind) => Some(*kind),
                None => faults
                    .queued
                    .iter()
                    .position(|(o, _)| *o == op)
                    .and_then(|idx| faults.queued.remove(idx))
                    .map(|(_, kind)| kind),
            }
        };
        match fault {
            Some(kind) => Err(LedgerError::of_kind(kind, op, table, "injected fault")),
            None => Ok(()),
        }
    }

    fn missing(op: Operation, table: &str) -> LedgerError {
        LedgerError::permanent(op, table, "table not found")
    }

    fn position(op: Operation, table: &str, write: &CellWrite) -> Result<(usize, usize), LedgerError> {
        let r = (write.row as usize).checked_sub(1);
        let c = (write.col as usize).checked_sub(1);
        r.zip(c).ok_or_else(|| {
            LedgerError::permanent(
                op,
                table,
                format!("invalid cell coordinate ({}, {})", write.row, write.col),
            )
        })
    }

    fn apply(rows: &mut Vec<Row>, (r, c): (usize, usize), value: &str) {
        if rows.len() <= r {
            rows.resize_with(r + 1, Vec::new);
        }
        let row = &mut rows[r];
        if row.len() <= c {
            row.resize(c + 1, String::new());
        }
        value.clone_into(&mut row[c]);
    }
}

#[async_trait]
impl LedgerDriver for InMemoryLedger {
    async fn read_all(&self, table: &str) -> Result<Vec<Row>, LedgerError> {
        self.enter(Operation::ReadAll, table).await?;
        self.table(table)
            .ok_or_else(|| Self::missing(Operation::ReadAll, table))
    }

    async fn read_header(&self, table: &str) -> Result<Row, LedgerError> {
        self.enter(Operation::ReadHeader, table).await?;
        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| Self::missing(Operation::ReadHeader, table))?;
        Ok(rows.first().cloned().unwrap_or_default())
    }

    async fn write_cell(&self, table: &str, write: &CellWrite) -> Result<(), LedgerError> {
        self.enter(Operation::WriteCell, table).await?;
        let mut tables = self.tables.write();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| Self::missing(Operation::WriteCell, table))?;
        let at = Self::position(Operation::WriteCell, table, write)?;
        Self::apply(rows, at, &write.value);
        Ok(())
    }

    async fn write_batch(&self, table: &str, writes: &[CellWrite]) -> Result<(), LedgerError> {
        self.enter(Operation::WriteBatch, table).await?;
        let mut tables = self.tables.write();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| Self::missing(Operation::WriteBatch, table))?;
        // Reject the whole batch before touching any cell
        let targets = writes
            .iter()
            .map(|w| Self::position(Operation::WriteBatch, table, w))
            .collect::<Result<Vec<_>, _>>()?;
        for (at, write) in targets.into_iter().zip(writes) {
            Self::apply(rows, at, &write.value);
        }
        Ok(())
    }

    async fn find_row_by_key(&self, table: &str, key: &str) -> Result<Option<u32>, LedgerError> {
        self.enter(Operation::FindRow, table).await?;
        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| Self::missing(Operation::FindRow, table))?;
        Ok(rows
            .iter()
            .position(|row| row.first().is_some_and(|c| c.trim() == key))
            .and_then(|idx| u32::try_from(idx + 1).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InMemoryLedger {
        InMemoryLedger::new().with_table(
            "t",
            vec![
                vec!["key".into(), "value".into()],
                vec!["a".into(), "1".into()],
            ],
        )
    }

    #[tokio::test]
    async fn writes_grow_the_table() {
        let ledger = sample();
        ledger
            .write_batch("t", &[CellWrite::new(4, 3, "x"), CellWrite::new(2, 2, "2")])
            .await
            .unwrap();
        assert_eq!(ledger.cell("t", 4, 3).as_deref(), Some("x"));
        assert_eq!(ledger.cell("t", 2, 2).as_deref(), Some("2"));
        assert_eq!(ledger.cell("t", 3, 1).as_deref(), Some(""));
        assert_eq!(ledger.calls(Operation::WriteBatch), 1);
    }

    #[tokio::test]
    async fn zero_coordinates_are_rejected_without_writing() {
        let ledger = sample();
        let err = ledger
            .write_cell("t", &CellWrite::new(0, 1, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Permanent { .. }));

        let err = ledger
            .write_batch("t", &[CellWrite::new(2, 2, "changed"), CellWrite::new(3, 0, "x")])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Permanent { .. }));
        assert_eq!(ledger.cell("t", 2, 2).as_deref(), Some("1"));
        assert_eq!(ledger.table("t").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn injected_faults_fire_in_order() {
        let ledger = sample();
        ledger.fail_next(Operation::ReadAll, FailureKind::Transient, 1);

        assert!(ledger.read_all("t").await.unwrap_err().is_retryable());
        assert!(ledger.read_all("t").await.is_ok());
        assert_eq!(ledger.calls(Operation::ReadAll), 2);
    }

    #[tokio::test]
    async fn persistent_faults_until_healed() {
        let ledger = sample();
        ledger.fail_always(Operation::FindRow, FailureKind::Permanent);
        assert!(ledger.find_row_by_key("t", "a").await.is_err());
        ledger.heal();
        assert_eq!(ledger.find_row_by_key("t", "a").await.unwrap(), Some(2));
        assert_eq!(ledger.find_row_by_key("t", "zzz").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_table_is_permanent() {
        let err = sample().read_all("nope").await.unwrap_err();
        assert!(matches!(err, LedgerError::Permanent { .. }));
    }
}
