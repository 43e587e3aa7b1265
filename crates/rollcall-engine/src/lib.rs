//! Rollcall Engine - attendance staging & synchronization
//!
//! Makes a slow, rate-limited remote ledger feel instantaneous to many
//! concurrent sessions:
//! - Addresses semester weeks and encodes them into compact tokens
//! - Serves table snapshots from a TTL cache, falling back to stale data
//! - Stages per-session edits in memory until an explicit commit
//! - Commits each scope in one batched write, honoring administrator cancellations
//! - Rate limits every actor per action class
//! - Keeps hot tables and the blacklist warm in the background
//!
//! # Example
//!
//! ```rust,ignore
//! use rollcall_engine::{Action, AttendanceEngine, EngineConfig, SystemClock};
//! use rollcall_ledger::{ActorId, InMemoryLedger};
//! use std::sync::Arc;
//!
//! # async fn example() -> rollcall_engine::Result<()> {
//! let config = EngineConfig::new();
//! let clock = Arc::new(SystemClock::with_offset_minutes(config.semester.utc_offset_minutes));
//! let engine = AttendanceEngine::new(config, Arc::new(InMemoryLedger::new()), clock)?;
//!
//! let outcome = engine.handle(ActorId(42), Action::SelectWeek { offset: 0 }).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

// Core modules
pub mod blacklist;
pub mod cache;
pub mod commit;
pub mod config;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod rate_limit;
pub mod refresher;
pub mod roster;
pub mod staging;
pub mod temporal;
pub mod view;

// Re-exports for convenience
pub use blacklist::BlacklistIndex;
pub use cache::{CacheStats, Freshness, ReadCache, Snapshot};
pub use commit::{CommitCoordinator, CommitReport, TableLocks};
pub use config::{
    BucketConfig, CacheConfig, ConfigError, EngineConfig, RateLimitConfig, RefresherConfig,
    RetryConfig, SemesterConfig, TableNames,
};
pub use engine::{Action, AttendanceEngine, Outcome};
pub use error::{EngineError, RegistrationError, Result};
pub use middleware::{BlacklistGate, Denial, Interceptor, Pipeline, RateGate, Request, Verdict};
pub use rate_limit::{ActionClass, Admission, BucketLimits, RateLimiter};
pub use refresher::{BackgroundRefresher, TickReport};
pub use roster::{RosterService, RosterStats};
pub use staging::{SessionKey, StageAllReport, StageScope, StagingArea, StagingBuffer};
pub use temporal::{Clock, FixedClock, Parity, SystemClock, TemporalAddressor, WeekIdentifier};
pub use view::{
    CancellationRow, CancellationView, DayStatus, DayView, RowView, WeekView,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the engine
    pub use crate::{
        Action, ActionClass, AttendanceEngine, CommitReport, DayView, EngineConfig, EngineError,
        FixedClock, Outcome, SystemClock, WeekView,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
