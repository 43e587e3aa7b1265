//! Rendering of snapshot + staged state
//!
//! Pure functions: the caller supplies the parsed sheet and the pending map.
//! Cancellation always comes from the sheet, so a row cancelled after a
//! student staged a mark renders as cancelled and its pending mark is masked.

use crate::staging::StageScope;
use crate::temporal::WeekIdentifier;
use rollcall_ledger::{MarkValue, RowId, ScheduleSheet, SubjectKind, Weekday, CANCEL_SENTINEL};
use std::collections::{BTreeMap, HashMap};

/// One class as seen by a student
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowView {
    /// Row position
    pub row: RowId,
    /// Subject name
    pub subject: String,
    /// Subject class
    pub kind: SubjectKind,
    /// Mark currently stored in the ledger
    pub committed: Option<MarkValue>,
    /// Staged mark, never set on cancelled rows
    pub pending: Option<MarkValue>,
    /// Cancelled by an administrator
    pub cancelled: bool,
}

impl RowView {
    /// Mark the student sees: pending over committed
    #[must_use]
    pub fn effective(&self) -> Option<MarkValue> {
        if self.cancelled {
            None
        } else {
            self.pending.or(self.committed)
        }
    }

    /// Glyph shown next to the subject
    #[must_use]
    pub fn glyph(&self) -> &'static str {
        if self.cancelled {
            CANCEL_SENTINEL
        } else {
            self.effective().map_or("", MarkValue::glyph)
        }
    }

    /// Whether the row accepts marks
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.cancelled
    }
}

/// One day of one student
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayView {
    /// Week
    pub week: WeekIdentifier,
    /// Day
    pub day: Weekday,
    /// Classes in table order
    pub rows: Vec<RowView>,
    /// Rows whose staged mark is hidden because the row is cancelled
    pub masked: Vec<RowId>,
    /// Rendered from a stale snapshot
    pub degraded: bool,
}

impl DayView {
    /// Number of staged marks visible in this view
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.rows.iter().filter(|r| r.pending.is_some()).count()
    }

    /// Row by position
    #[must_use]
    pub fn row(&self, id: RowId) -> Option<&RowView> {
        self.rows.iter().find(|r| r.row == id)
    }
}

/// Merge a student's pending marks over the sheet
#[must_use]
pub fn render_day(
    sheet: &ScheduleSheet,
    scope: &StageScope,
    student: &str,
    pending: &BTreeMap<RowId, MarkValue>,
    degraded: bool,
) -> DayView {
    let mut masked = Vec::new();
    let rows = sheet
        .day_rows(&scope.week.label, scope.day)
        .map(|row| {
            let cancelled = row.is_cancelled();
            let staged = pending.get(&row.id).copied();
            if cancelled && staged.is_some() {
                masked.push(row.id);
            }
            RowView {
                row: row.id,
                subject: row.subject.clone(),
                kind: SubjectKind::classify(&row.subject),
                committed: row.cell(student).mark(),
                pending: staged.filter(|_| !cancelled),
                cancelled,
            }
        })
        .collect();

    DayView {
        week: scope.week.clone(),
        day: scope.day,
        rows,
        masked,
        degraded,
    }
}

/// Marking progress of one day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayStatus {
    /// Every open class has a mark
    AllMarked,
    /// Some open classes have a mark
    Partial,
    /// Open classes exist, none marked
    NoneMarked,
    /// No open classes
    NoClasses,
}

impl DayStatus {
    /// Short glyph for week overviews
    #[must_use]
    pub fn glyph(self) -> &'static str {
        match self {
            Self::AllMarked => "✅",
            Self::Partial => "◐",
            Self::NoneMarked => "○",
            Self::NoClasses => "—",
        }
    }

    fn from_counts(open: usize, marked: usize) -> Self {
        match (open, marked) {
            (0, _) => Self::NoClasses,
            (_, 0) => Self::NoneMarked,
            (o, m) if m >= o => Self::AllMarked,
            _ => Self::Partial,
        }
    }
}

/// Week overview of one student
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekView {
    /// Week
    pub week: WeekIdentifier,
    /// Compact token to address the week in later actions
    pub token: String,
    /// Status per teaching day
    pub days: Vec<(Weekday, DayStatus)>,
    /// Rendered from a stale snapshot
    pub degraded: bool,
}

/// Summarize every teaching day of a week
#[must_use]
pub fn summarize_week(
    sheet: &ScheduleSheet,
    week: &WeekIdentifier,
    token: String,
    student: &str,
    pending: &HashMap<Weekday, BTreeMap<RowId, MarkValue>>,
    degraded: bool,
) -> WeekView {
    let empty = BTreeMap::new();
    let days = Weekday::ALL
        .into_iter()
        .map(|day| {
            let staged = pending.get(&day).unwrap_or(&empty);
            let (open, marked) = sheet
                .day_rows(&week.label, day)
                .filter(|r| !r.is_cancelled())
                .fold((0, 0), |(open, marked), row| {
                    let has_mark = staged.contains_key(&row.id) || row.cell(student).mark().is_some();
                    (open + 1, marked + usize::from(has_mark))
                });
            (day, DayStatus::from_counts(open, marked))
        })
        .collect();

    WeekView {
        week: week.clone(),
        token,
        days,
        degraded,
    }
}

/// One class as seen by an administrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationRow {
    /// Row position
    pub row: RowId,
    /// Subject name
    pub subject: String,
    /// State stored in the ledger
    pub in_ledger: bool,
    /// Staged state, if different from the ledger
    pub pending: Option<bool>,
}

impl CancellationRow {
    /// State the administrator sees
    #[inline]
    #[must_use]
    pub fn effective(&self) -> bool {
        self.pending.unwrap_or(self.in_ledger)
    }
}

/// Cancellation editor for one day of one subgroup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationView {
    /// Week
    pub week: WeekIdentifier,
    /// Day
    pub day: Weekday,
    /// Subgroup
    pub subgroup: String,
    /// Classes in table order
    pub rows: Vec<CancellationRow>,
}

/// Merge staged cancellation toggles over the sheet
#[must_use]
pub fn render_cancellations(
    sheet: &ScheduleSheet,
    scope: &StageScope,
    pending: &BTreeMap<RowId, bool>,
) -> CancellationView {
    let rows = sheet
        .day_rows(&scope.week.label, scope.day)
        .map(|row| CancellationRow {
            row: row.id,
            subject: row.subject.clone(),
            in_ledger: row.is_cancelled(),
            pending: pending.get(&row.id).copied(),
        })
        .collect();
    CancellationView {
        week: scope.week.clone(),
        day: scope.day,
        subgroup: scope.subgroup.clone(),
        rows,
    }
}
