//! Remote ledger client
//!
//! Thin boundary adapter over a [`LedgerDriver`]. It adds instrumentation and
//! argument hygiene but performs no caching and no retries; those belong to
//! the callers (read cache, commit coordinator) via [`crate::RetryPolicy`].

use crate::driver::{CellWrite, LedgerDriver, Row};
use crate::error::{LedgerError, Operation};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Remote ledger client
#[derive(Clone)]
pub struct LedgerClient {
    driver: Arc<dyn LedgerDriver>,
}

impl fmt::Debug for LedgerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerClient").finish_non_exhaustive()
    }
}

impl LedgerClient {
    /// Wrap a driver
    #[inline]
    #[must_use]
    pub fn new(driver: Arc<dyn LedgerDriver>) -> Self {
        Self { driver }
    }

    /// Read every row, header first
    pub async fn read_all(&self, table: &str) -> Result<Vec<Row>, LedgerError> {
        let started = Instant::now();
        let result = self.driver.read_all(table).await;
        trace_call(Operation::ReadAll, table, started, &result);
        result
    }

    /// Read the header row
    pub async fn read_header(&self, table: &str) -> Result<Row, LedgerError> {
        let started = Instant::now();
        let result = self.driver.read_header(table).await;
        trace_call(Operation::ReadHeader, table, started, &result);
        result
    }

    /// Write one cell
    ///
    /// # Errors
    /// Rejects zero coordinates as a permanent failure without a remote call
    pub async fn write_cell(&self, table: &str, write: &CellWrite) -> Result<(), LedgerError> {
        validate(Operation::WriteCell, table, std::slice::from_ref(write))?;
        let started = Instant::now();
        let result = self.driver.write_cell(table, write).await;
        trace_call(Operation::WriteCell, table, started, &result);
        result
    }

    /// Write many cells in one round-trip; an empty batch is a no-op
    ///
    /// # Errors
    /// Rejects zero coordinates as a permanent failure without a remote call
    pub async fn write_batch(&self, table: &str, writes: &[CellWrite]) -> Result<(), LedgerError> {
        if writes.is_empty() {
            return Ok(());
        }
        validate(Operation::WriteBatch, table, writes)?;
        let started = Instant::now();
        let result = self.driver.write_batch(table, writes).await;
        trace_call(Operation::WriteBatch, table, started, &result);
        if result.is_ok() {
            tracing::debug!(table, cells = writes.len(), "batch written");
        }
        result
    }

    /// Locate a row by the value of its first column
    pub async fn find_row_by_key(&self, table: &str, key: &str) -> Result<Option<u32>, LedgerError> {
        let started = Instant::now();
        let result = self.driver.find_row_by_key(table, key.trim()).await;
        trace_call(Operation::FindRow, table, started, &result);
        result
    }
}

fn validate(op: Operation, table: &str, writes: &[CellWrite]) -> Result<(), LedgerError> {
    match writes.iter().find(|w| w.row == 0 || w.col == 0) {
        Some(bad) => Err(LedgerError::permanent(
            op,
            table,
            format!("invalid cell coordinate ({}, {})", bad.row, bad.col),
        )),
        None => Ok(()),
    }
}

fn trace_call<T>(op: Operation, table: &str, started: Instant, result: &Result<T, LedgerError>) {
    let elapsed_ms = started.elapsed().as_millis();
    match result {
        Ok(_) => tracing::trace!(%op, table, elapsed_ms, "ledger call ok"),
        Err(e) if e.is_retryable() => {
            tracing::debug!(%op, table, elapsed_ms, error = %e, "ledger call failed transiently");
        }
        Err(e) => tracing::warn!(%op, table, elapsed_ms, error = %e, "ledger call failed"),
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockDriver;
    use super::*;

    #[tokio::test]
    async fn empty_batch_makes_no_remote_call() {
        let mut driver = MockDriver::new();
        driver.expect_write_batch().never();
        let client = LedgerClient::new(Arc::new(driver));

        assert!(client.write_batch("t", &[]).await.is_ok());
    }

    #[tokio::test]
    async fn zero_coordinates_are_rejected_locally() {
        let mut driver = MockDriver::new();
        driver.expect_write_cell().never();
        let client = LedgerClient::new(Arc::new(driver));

        let err = client
            .write_cell("t", &CellWrite::new(0, 4, "✅"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn errors_pass_through_unchanged() {
        let mut driver = MockDriver::new();
        driver
            .expect_read_all()
            .times(1)
            .returning(|t| Err(LedgerError::transient(Operation::ReadAll, t, "quota")));
        let client = LedgerClient::new(Arc::new(driver));

        let err = client.read_all("sheet").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.table(), "sheet");
    }

    #[tokio::test]
    async fn find_row_trims_key() {
        let mut driver = MockDriver::new();
        driver
            .expect_find_row_by_key()
            .withf(|table, key| table == "roster" && key == "12")
            .returning(|_, _| Ok(Some(13)));
        let client = LedgerClient::new(Arc::new(driver));

        assert_eq!(client.find_row_by_key("roster", " 12 ").await.unwrap(), Some(13));
    }
}
