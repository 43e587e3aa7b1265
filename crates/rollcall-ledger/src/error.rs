//! Error types for the ledger boundary
//!
//! Every remote call is classified as either:
//! - **Transient**: quota exhaustion, timeouts, backoff-worthy conditions
//! - **Permanent**: table/column/row not found, schema mismatch
//!
//! Transient failures that outlive their retry budget are re-classified as
//! [`LedgerError::Exhausted`], which callers treat like a permanent failure.

use std::fmt;

/// Remote operation that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Read every row of a table
    ReadAll,
    /// Read the header row of a table
    ReadHeader,
    /// Write one cell
    WriteCell,
    /// Write a batch of cells
    WriteBatch,
    /// Locate a row by its key column
    FindRow,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadAll => "read_all",
            Self::ReadHeader => "read_header",
            Self::WriteCell => "write_cell",
            Self::WriteBatch => "write_batch",
            Self::FindRow => "find_row",
        };
        f.write_str(name)
    }
}

/// Failure classes a driver can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Worth retrying after a backoff
    Transient,
    /// Never retried
    Permanent,
}

/// Ledger error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Quota or backoff-worthy failure
    #[error("transient failure in {op} on '{table}': {message}")]
    Transient {
        /// Failed operation
        op: Operation,
        /// Target table
        table: String,
        /// Driver message
        message: String,
    },

    /// Schema, table, column or row mismatch
    #[error("permanent failure in {op} on '{table}': {message}")]
    Permanent {
        /// Failed operation
        op: Operation,
        /// Target table
        table: String,
        /// Driver message
        message: String,
    },

    /// Transient failure that survived every retry attempt
    #[error("gave up on {op} on '{table}' after {attempts} attempts: {message}")]
    Exhausted {
        /// Failed operation
        op: Operation,
        /// Target table
        table: String,
        /// Attempts made
        attempts: u32,
        /// Last driver message
        message: String,
    },
}

impl LedgerError {
    /// Create a transient error
    #[inline]
    pub fn transient(op: Operation, table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            op,
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a permanent error
    #[inline]
    pub fn permanent(op: Operation, table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            op,
            table: table.into(),
            message: message.into(),
        }
    }

    /// Build an error of the given failure kind
    #[inline]
    pub fn of_kind(
        kind: FailureKind,
        op: Operation,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        match kind {
            FailureKind::Transient => Self::transient(op, table, message),
            FailureKind::Permanent => Self::permanent(op, table, message),
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Operation that failed
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::Transient { op, .. } | Self::Permanent { op, .. } | Self::Exhausted { op, .. } => {
                *op
            }
        }
    }

    /// Table the failed operation targeted
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Transient { table, .. }
            | Self::Permanent { table, .. }
            | Self::Exhausted { table, .. } => table,
        }
    }

    /// Re-classify a transient error after the retry budget ran out
    #[must_use]
    pub fn into_exhausted(self, attempts: u32) -> Self {
        match self {
            Self::Transient { op, table, message } => Self::Exhausted {
                op,
                table,
                attempts,
                message,
            },
            other => other,
        }
    }
}

/// Errors raised while interpreting table contents
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SheetError {
    /// Table has no header row
    #[error("table '{0}' has no header row")]
    MissingHeader(String),

    /// Header row is shorter than the fixed leading columns
    #[error("table '{table}' header has {found} columns, expected at least {expected}")]
    MalformedHeader {
        /// Table name
        table: String,
        /// Columns found
        found: usize,
        /// Minimum columns expected
        expected: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(LedgerError::transient(Operation::ReadAll, "t", "quota").is_retryable());
        assert!(!LedgerError::permanent(Operation::ReadAll, "t", "gone").is_retryable());
        let exhausted =
            LedgerError::transient(Operation::WriteBatch, "t", "quota").into_exhausted(4);
        assert!(!exhausted.is_retryable());
        assert!(exhausted.to_string().contains("after 4 attempts"));
    }

    #[test]
    fn permanent_stays_permanent_when_exhausted() {
        let err = LedgerError::permanent(Operation::FindRow, "roster", "missing");
        assert_eq!(err.clone().into_exhausted(3), err);
        assert_eq!(err.table(), "roster");
        assert_eq!(err.operation(), Operation::FindRow);
    }
}
