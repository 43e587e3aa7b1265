//! Engine error types
//!
//! Every failure a UI-facing action can produce, with a user-facing rendering
//! via [`EngineError::user_message`].

use crate::config::ConfigError;
use rollcall_ledger::{ActorId, LedgerError, RowId, SheetError};
use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Registration failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// No roster record matches the name
    #[error("no student named '{0}' in the roster")]
    NameNotFound(String),

    /// The record is bound to someone else
    #[error("student '{name}' is already linked to another account")]
    AlreadyLinkedToOther {
        /// Full name of the record
        name: String,
    },

    /// The caller is bound to a different record
    #[error("account {actor} is already linked to '{name}'")]
    IdentityInUse {
        /// Caller
        actor: ActorId,
        /// Full name of the record the caller holds
        name: String,
    },
}

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Remote ledger failure (retries already applied)
    #[error(transparent)]
    Remote(#[from] LedgerError),

    /// Table content did not match the expected layout
    #[error(transparent)]
    Sheet(#[from] SheetError),

    /// Admission denied by the rate limiter
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Time until a request would be admitted
        retry_after: Duration,
    },

    /// Caller is on the blacklist
    #[error("actor {0} is blacklisted")]
    Blacklisted(ActorId),

    /// Administrative action by a non-admin
    #[error("actor {0} is not an administrator")]
    Forbidden(ActorId),

    /// Caller has no linked roster record
    #[error("actor {0} is not registered")]
    NotRegistered(ActorId),

    /// Week offset or ordinal outside the semester
    #[error("week is outside the semester")]
    WeekOutOfRange,

    /// Week token resolved to nothing, not even the current week
    #[error("unresolvable week token '{0}'")]
    UnknownWeekToken(String),

    /// Row does not exist or does not belong to the selected week/day
    #[error("row {row} is not part of the selected day")]
    RowNotInScope {
        /// Offending row
        row: RowId,
    },

    /// Row was cancelled by an administrator
    #[error("row {row} is cancelled")]
    RowCancelled {
        /// Cancelled row
        row: RowId,
    },

    /// Schedule table has no column for the student
    #[error("no column for student {student} in table '{table}'")]
    StudentColumnMissing {
        /// Student sequence number
        student: String,
        /// Schedule table
        table: String,
    },

    /// Registration rejected
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// Configuration problem
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Check if error is recoverable by trying again later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(e) => e.is_retryable(),
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// Message suitable for showing to the end user
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Remote(LedgerError::Transient { .. } | LedgerError::Exhausted { .. }) => {
                "The attendance sheet is busy right now. Please try again in a minute.".into()
            }
            Self::Remote(LedgerError::Permanent { table, .. }) => {
                format!("The attendance sheet '{table}' could not be read. Please contact an administrator.")
            }
            Self::Sheet(_) => {
                "The attendance sheet has an unexpected layout. Please contact an administrator.".into()
            }
            Self::RateLimited { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                format!("Too many requests. Please wait {secs} s.")
            }
            Self::Blacklisted(_) => "Access denied.".into(),
            Self::Forbidden(_) => "This action is available to administrators only.".into(),
            Self::NotRegistered(_) => "Please register first by sending your full name.".into(),
            Self::WeekOutOfRange | Self::UnknownWeekToken(_) => {
                "That week is outside the semester.".into()
            }
            Self::RowNotInScope { .. } => {
                "That class is no longer available. Please reopen the day.".into()
            }
            Self::RowCancelled { .. } => "This class has been cancelled.".into(),
            Self::StudentColumnMissing { .. } => {
                "Your column is missing from the schedule. Please contact an administrator.".into()
            }
            Self::Registration(RegistrationError::NameNotFound(_)) => {
                "No student with that name was found. Check the spelling and try again.".into()
            }
            Self::Registration(RegistrationError::AlreadyLinkedToOther { .. }) => {
                "This student is already registered with another account.".into()
            }
            Self::Registration(RegistrationError::IdentityInUse { name, .. }) => {
                format!("Your account is already registered as {name}.")
            }
            Self::Config(_) => "The service is misconfigured.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_ledger::Operation;

    #[test]
    fn remote_errors_convert_and_classify() {
        let err: EngineError = LedgerError::transient(Operation::ReadAll, "t", "quota").into();
        assert!(err.is_retryable());
        assert!(err.user_message().contains("busy"));

        let err: EngineError = LedgerError::permanent(Operation::ReadAll, "t", "gone").into();
        assert!(!err.is_retryable());
        assert!(err.user_message().contains("'t'"));
    }

    #[test]
    fn rate_limit_message_rounds_up_to_a_second() {
        let err = EngineError::RateLimited {
            retry_after: Duration::from_millis(300),
        };
        assert_eq!(err.user_message(), "Too many requests. Please wait 1 s.");
    }

    #[test]
    fn registration_errors_are_transparent() {
        let err: EngineError = RegistrationError::NameNotFound("Nobody".into()).into();
        assert_eq!(err.to_string(), "no student named 'Nobody' in the roster");
    }
}
