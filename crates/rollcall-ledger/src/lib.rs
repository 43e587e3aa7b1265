//! Rollcall Ledger
//!
//! The boundary between the attendance engine and the remote tabular store
//! that is the single source of truth.
//!
//! # Core Pieces
//!
//! - **Driver**: [`LedgerDriver`], the raw remote operations on a named table
//! - **Client**: [`LedgerClient`], an instrumented adapter with no caching or retries
//! - **Retry**: [`RetryPolicy`], bounded exponential backoff for transient failures
//! - **Model**: marks, cell states, days, and typed views over table snapshots
//!
//! # Example
//!
//! ```rust,ignore
//! use rollcall_ledger::{InMemoryLedger, LedgerClient, RetryPolicy};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), rollcall_ledger::LedgerError> {
//! let client = LedgerClient::new(Arc::new(InMemoryLedger::new()));
//! let rows = RetryPolicy::default().run(|| client.read_all("Студенты")).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

// Core modules
pub mod client;
pub mod driver;
pub mod error;
pub mod memory;
pub mod model;
pub mod retry;
pub mod sheet;

// Re-exports for convenience
pub use client::LedgerClient;
pub use driver::{CellWrite, LedgerDriver, Row};
pub use error::{FailureKind, LedgerError, Operation, SheetError};
pub use memory::InMemoryLedger;
pub use model::{
    ActorId, CellState, MarkValue, ParseVocabularyError, RowId, SubjectKind, Weekday,
    CANCEL_SENTINEL,
};
pub use retry::RetryPolicy;
pub use sheet::{
    parse_blacklist, Roster, ScheduleRow, ScheduleSheet, StudentRecord, ROSTER_LINK_COLUMN,
    SCHEDULE_FIXED_COLUMNS,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the ledger
    pub use crate::{
        ActorId, CellState, CellWrite, LedgerClient, LedgerDriver, LedgerError, MarkValue,
        RetryPolicy, RowId, ScheduleSheet, Weekday,
    };
}
