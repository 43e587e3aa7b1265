//! Remote store driver contract
//!
//! The raw driver is an external collaborator; this trait is the seam at
//! which a spreadsheet API client (or the in-memory driver) plugs in.

use crate::error::LedgerError;
use async_trait::async_trait;

/// One table row as raw cell strings
pub type Row = Vec<String>;

/// Single cell assignment, 1-based coordinates
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellWrite {
    /// Row position (1 is the header)
    pub row: u32,
    /// Column position (1 is the first column)
    pub col: u32,
    /// New cell content
    pub value: String,
}

impl CellWrite {
    /// Create a cell assignment
    #[inline]
    pub fn new(row: u32, col: u32, value: impl Into<String>) -> Self {
        Self {
            row,
            col,
            value: value.into(),
        }
    }
}

/// Raw remote store operations on a named table
///
/// Every call may fail transiently (quota) or permanently (schema).
/// Implementations perform no caching and no retries.
#[async_trait]
pub trait LedgerDriver: Send + Sync {
    /// Read every row, header first
    async fn read_all(&self, table: &str) -> Result<Vec<Row>, LedgerError>;

    /// Read row 1
    async fn read_header(&self, table: &str) -> Result<Row, LedgerError>;

    /// Write one cell
    async fn write_cell(&self, table: &str, write: &CellWrite) -> Result<(), LedgerError>;

    /// Write many cells in one round-trip
    async fn write_batch(&self, table: &str, writes: &[CellWrite]) -> Result<(), LedgerError>;

    /// Position of the first row whose first column equals `key`
    async fn find_row_by_key(&self, table: &str, key: &str) -> Result<Option<u32>, LedgerError>;
}
