//! Temporal addressing of semester weeks
//!
//! Week ordinals are derived from a fixed semester start date and an injected
//! [`Clock`]. Weeks are encoded into compact tokens for size-constrained UI
//! payloads. Tokens are a reversible base36 encoding of `ordinal * 2 + parity`,
//! so two different weeks can never share a token.

use crate::config::SemesterConfig;
use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Source of "today" in the reference zone
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current date
    fn today(&self) -> NaiveDate;
}

/// Wall clock pinned to a fixed UTC offset
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    /// Clock for the given offset in minutes east of UTC; invalid offsets fall back to UTC
    #[must_use]
    pub fn with_offset_minutes(minutes: i32) -> Self {
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }
}

/// Manually driven clock
#[derive(Debug)]
pub struct FixedClock {
    date: RwLock<NaiveDate>,
}

impl FixedClock {
    /// Clock stuck at `date`
    #[must_use]
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: RwLock::new(date),
        }
    }

    /// Move the clock
    pub fn set(&self, date: NaiveDate) {
        *self.date.write() = date;
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.date.read()
    }
}

/// Week parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parity {
    /// Odd ordinal
    Odd,
    /// Even ordinal
    Even,
}

impl Parity {
    /// Parity of an ordinal
    #[inline]
    #[must_use]
    pub fn of(ordinal: u32) -> Self {
        if ordinal % 2 == 0 {
            Self::Even
        } else {
            Self::Odd
        }
    }

    fn bit(self) -> u32 {
        match self {
            Self::Odd => 1,
            Self::Even => 0,
        }
    }
}

/// A semester week
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WeekIdentifier {
    /// 1-based week number
    pub ordinal: u32,
    /// Odd/even
    pub parity: Parity,
    /// Label as written in the ledger's week column
    pub label: String,
}

impl fmt::Display for WeekIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Week computation and token mapping
#[derive(Debug)]
pub struct TemporalAddressor {
    start: NaiveDate,
    weeks: u32,
    odd_label: String,
    even_label: String,
    clock: Arc<dyn Clock>,
    tokens: RwLock<HashMap<String, WeekIdentifier>>,
}

impl TemporalAddressor {
    /// Create from semester settings
    #[must_use]
    pub fn new(semester: &SemesterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            start: semester.start,
            weeks: semester.weeks,
            odd_label: semester.odd_label.clone(),
            even_label: semester.even_label.clone(),
            clock,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Number of weeks in the semester
    #[inline]
    #[must_use]
    pub fn weeks(&self) -> u32 {
        self.weeks
    }

    /// Week ordinal of today, unbounded
    #[must_use]
    pub fn current_ordinal(&self) -> i64 {
        (self.clock.today() - self.start).num_days().div_euclid(7) + 1
    }

    /// Week `offset` weeks away from the current one, if inside the semester
    #[must_use]
    pub fn week_info(&self, offset: i64) -> Option<WeekIdentifier> {
        let ordinal = self.current_ordinal().checked_add(offset)?;
        u32::try_from(ordinal).ok().and_then(|o| self.week(o))
    }

    /// The current week, if inside the semester
    #[inline]
    #[must_use]
    pub fn current_week(&self) -> Option<WeekIdentifier> {
        self.week_info(0)
    }

    /// Week by ordinal, if inside `1..=weeks`
    #[must_use]
    pub fn week(&self, ordinal: u32) -> Option<WeekIdentifier> {
        if ordinal == 0 || ordinal > self.weeks {
            return None;
        }
        let parity = Parity::of(ordinal);
        let name = match parity {
            Parity::Odd => &self.odd_label,
            Parity::Even => &self.even_label,
        };
        Some(WeekIdentifier {
            ordinal,
            parity,
            label: format!("{name} - {ordinal} неделя"),
        })
    }

    /// Compact token for a week, recorded for later decoding
    #[must_use]
    pub fn encode(&self, week: &WeekIdentifier) -> String {
        let token = format!("w{}", to_base36(week.ordinal * 2 + week.parity.bit()));
        self.tokens
            .write()
            .entry(token.clone())
            .or_insert_with(|| week.clone());
        token
    }

    /// Resolve a token
    ///
    /// Recorded tokens resolve to the week that produced them. Unrecorded
    /// tokens are decoded structurally; anything undecodable falls back to
    /// the current week. `None` only if that fallback is outside the semester.
    #[must_use]
    pub fn decode(&self, token: &str) -> Option<WeekIdentifier> {
        if let Some(week) = self.tokens.read().get(token) {
            return Some(week.clone());
        }
        if let Some(week) = self.parse_token(token) {
            return Some(week);
        }
        tracing::debug!(token, "unknown week token, falling back to current week");
        self.current_week()
    }

    /// Number of tokens recorded so far
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.tokens.read().len()
    }

    fn parse_token(&self, token: &str) -> Option<WeekIdentifier> {
        let digits = token.strip_prefix('w')?;
        let value = u32::from_str_radix(digits, 36).ok()?;
        let ordinal = value / 2;
        if value % 2 != Parity::of(ordinal).bit() {
            return None;
        }
        self.week(ordinal)
    }
}

fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
        if value == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
