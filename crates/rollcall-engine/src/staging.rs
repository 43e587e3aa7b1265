//! Per-session staging of uncommitted edits
//!
//! Edits are keyed by `(session, scope)` where a scope is one week/day of one
//! subgroup table. Within a scope the latest value per row wins; no history is
//! kept. Sessions never see each other's edits.
//!
//! Two areas share the same mechanics:
//! - student marks (`RowId -> MarkValue`)
//! - administrator cancellation toggles (`RowId -> cancelled?`)

use crate::error::{EngineError, Result};
use crate::temporal::WeekIdentifier;
use dashmap::DashMap;
use rollcall_ledger::{ActorId, MarkValue, RowId, ScheduleRow, ScheduleSheet, Weekday};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Handle of one user session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey(pub ActorId);

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// One week/day of one subgroup table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageScope {
    /// Week
    pub week: WeekIdentifier,
    /// Day
    pub day: Weekday,
    /// Subgroup owning the schedule table
    pub subgroup: String,
}

impl StageScope {
    /// Create a scope
    #[must_use]
    pub fn new(week: WeekIdentifier, day: Weekday, subgroup: impl Into<String>) -> Self {
        Self {
            week,
            day,
            subgroup: subgroup.into(),
        }
    }

    /// Whether a schedule row belongs to this scope
    #[inline]
    #[must_use]
    pub fn contains(&self, row: &ScheduleRow) -> bool {
        row.in_scope(&self.week.label, self.day)
    }

    /// Row of this scope, or `RowNotInScope`
    ///
    /// # Errors
    /// `EngineError::RowNotInScope` when the row is absent or belongs elsewhere
    pub fn resolve<'a>(&self, sheet: &'a ScheduleSheet, row: RowId) -> Result<&'a ScheduleRow> {
        sheet
            .row(row)
            .filter(|r| self.contains(r))
            .ok_or(EngineError::RowNotInScope { row })
    }
}

#[derive(Debug)]
struct ScopeEdits<V> {
    edits: BTreeMap<RowId, V>,
    touched: Instant,
}

/// Pending edits of every session, one value type
#[derive(Debug)]
pub struct StagingArea<V> {
    scopes: DashMap<(SessionKey, StageScope), ScopeEdits<V>>,
}

impl<V> Default for StagingArea<V> {
    fn default() -> Self {
        Self {
            scopes: DashMap::new(),
        }
    }
}

impl<V: Clone + PartialEq> StagingArea<V> {
    /// Create an empty area
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending value, replacing any earlier one for the row
    pub fn stage(&self, key: SessionKey, scope: &StageScope, row: RowId, value: V) {
        let mut entry = self
            .scopes
            .entry((key, scope.clone()))
            .or_insert_with(|| ScopeEdits {
                edits: BTreeMap::new(),
                touched: Instant::now(),
            });
        entry.edits.insert(row, value);
        entry.touched = Instant::now();
    }

    /// Pending value of one row
    #[must_use]
    pub fn get(&self, key: SessionKey, scope: &StageScope, row: RowId) -> Option<V> {
        self.scopes
            .get(&(key, scope.clone()))
            .and_then(|s| s.edits.get(&row).cloned())
    }

    /// Drop the pending value of one row
    pub fn unstage(&self, key: SessionKey, scope: &StageScope, row: RowId) -> Option<V> {
        let map_key = (key, scope.clone());
        let removed = self
            .scopes
            .get_mut(&map_key)
            .and_then(|mut s| s.edits.remove(&row));
        self.scopes.remove_if(&map_key, |_, s| s.edits.is_empty());
        removed
    }

    /// Copy of the pending edits of a scope
    #[must_use]
    pub fn pending(&self, key: SessionKey, scope: &StageScope) -> BTreeMap<RowId, V> {
        self.scopes
            .get(&(key, scope.clone()))
            .map(|s| s.edits.clone())
            .unwrap_or_default()
    }

    /// Clear a scope, returning how many edits were dropped
    pub fn discard(&self, key: SessionKey, scope: &StageScope) -> usize {
        self.scopes
            .remove(&(key, scope.clone()))
            .map_or(0, |(_, s)| s.edits.len())
    }

    /// Remove the given edits, but only where the pending value is still the
    /// one that was written; edits restaged meanwhile survive
    pub fn remove_if_unchanged(
        &self,
        key: SessionKey,
        scope: &StageScope,
        written: &BTreeMap<RowId, V>,
    ) -> usize {
        let map_key = (key, scope.clone());
        let mut removed = 0;
        if let Some(mut s) = self.scopes.get_mut(&map_key) {
            for (row, value) in written {
                if s.edits.get(row) == Some(value) {
                    s.edits.remove(row);
                    removed += 1;
                }
            }
        }
        self.scopes.remove_if(&map_key, |_, s| s.edits.is_empty());
        removed
    }

    /// Drop scopes untouched for longer than `idle`
    pub fn expire_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.scopes.len();
        self.scopes
            .retain(|_, s| now.duration_since(s.touched) <= idle);
        before.saturating_sub(self.scopes.len())
    }

    /// Drop everything
    pub fn clear_all(&self) -> usize {
        let count = self.scopes.len();
        self.scopes.clear();
        count
    }

    /// Number of scopes holding edits
    #[inline]
    #[must_use]
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }
}

/// Outcome of staging a whole day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageAllReport {
    /// Open rows that received the mark
    pub staged: usize,
    /// Cancelled rows left alone
    pub skipped: usize,
}

/// Staged student marks and administrator cancellations
#[derive(Debug, Default)]
pub struct StagingBuffer {
    /// Student marks
    pub marks: StagingArea<MarkValue>,
    /// Desired cancellation state per row
    pub cancellations: StagingArea<bool>,
}

impl StagingBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage one mark after checking the row against the snapshot
    ///
    /// # Errors
    /// - `EngineError::RowNotInScope` for rows outside the scope
    /// - `EngineError::RowCancelled` for cancelled rows
    pub fn stage_mark(
        &self,
        key: SessionKey,
        scope: &StageScope,
        sheet: &ScheduleSheet,
        row: RowId,
        mark: MarkValue,
    ) -> Result<()> {
        if scope.resolve(sheet, row)?.is_cancelled() {
            return Err(EngineError::RowCancelled { row });
        }
        self.marks.stage(key, scope, row, mark);
        tracing::trace!(%key, %row, %mark, "mark staged");
        Ok(())
    }

    /// Stage one mark on every open row of the scope
    pub fn stage_all(
        &self,
        key: SessionKey,
        scope: &StageScope,
        sheet: &ScheduleSheet,
        mark: MarkValue,
    ) -> StageAllReport {
        let mut report = StageAllReport::default();
        for row in sheet.day_rows(&scope.week.label, scope.day) {
            if row.is_cancelled() {
                report.skipped += 1;
            } else {
                self.marks.stage(key, scope, row.id, mark);
                report.staged += 1;
            }
        }
        tracing::debug!(%key, staged = report.staged, skipped = report.skipped, "day staged");
        report
    }

    /// Flip the effective cancellation state of a row
    ///
    /// The pending entry disappears once it matches the ledger again.
    /// Returns the new effective state.
    ///
    /// # Errors
    /// `EngineError::RowNotInScope` for rows outside the scope
    pub fn toggle_cancellation(
        &self,
        key: SessionKey,
        scope: &StageScope,
        sheet: &ScheduleSheet,
        row: RowId,
    ) -> Result<bool> {
        let current = scope.resolve(sheet, row)?.is_cancelled();
        let effective = self.cancellations.get(key, scope, row).unwrap_or(current);
        let next = !effective;
        if next == current {
            self.cancellations.unstage(key, scope, row);
        } else {
            self.cancellations.stage(key, scope, row, next);
        }
        Ok(next)
    }

    /// Expire idle scopes in both areas
    pub fn expire_idle(&self, idle: Duration) -> usize {
        self.marks.expire_idle(idle) + self.cancellations.expire_idle(idle)
    }

    /// Drop every staged edit in both areas
    pub fn clear_all(&self) -> usize {
        self.marks.clear_all() + self.cancellations.clear_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::Parity;
    use rollcall_ledger::{Row, CANCEL_SENTINEL};

    const WEEK: &str = "Знаменатель - 8 неделя";

    fn week() -> WeekIdentifier {
        WeekIdentifier {
            ordinal: 8,
            parity: Parity::Even,
            label: WEEK.to_string(),
        }
    }

    fn scope() -> StageScope {
        StageScope::new(week(), Weekday::Monday, "1")
    }

    fn row(cells: &[&str]) -> Row {
        cells.iter().map(|s| (*s).to_string()).collect()
    }

    fn sheet() -> ScheduleSheet {
        let rows = vec![
            row(&["Неделя", "День", "Предмет", "1", "2"]),
            row(&[WEEK, "Понедельник", "Физика", "", ""]),
            row(&[WEEK, "Понедельник", "Химия", CANCEL_SENTINEL, CANCEL_SENTINEL]),
            row(&[WEEK, "Понедельник", "История", "", ""]),
            row(&[WEEK, "Вторник", "Алгебра", "", ""]),
        ];
        ScheduleSheet::parse("1 подгруппа", &rows).unwrap()
    }

    const KEY: SessionKey = SessionKey(ActorId(10));

    #[test]
    fn restaging_overwrites() {
        let buffer = StagingBuffer::new();
        let sheet = sheet();
        buffer.stage_mark(KEY, &scope(), &sheet, RowId(2), MarkValue::Present).unwrap();
        buffer.stage_mark(KEY, &scope(), &sheet, RowId(2), MarkValue::Absent).unwrap();

        let pending = buffer.marks.pending(KEY, &scope());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[&RowId(2)], MarkValue::Absent);
    }

    #[test]
    fn cancelled_and_foreign_rows_are_rejected() {
        let buffer = StagingBuffer::new();
        let sheet = sheet();
        assert!(matches!(
            buffer.stage_mark(KEY, &scope(), &sheet, RowId(3), MarkValue::Present),
            Err(EngineError::RowCancelled { .. })
        ));
        assert!(matches!(
            buffer.stage_mark(KEY, &scope(), &sheet, RowId(5), MarkValue::Present),
            Err(EngineError::RowNotInScope { .. })
        ));
        assert!(matches!(
            buffer.stage_mark(KEY, &scope(), &sheet, RowId(99), MarkValue::Present),
            Err(EngineError::RowNotInScope { .. })
        ));
        assert_eq!(buffer.marks.scope_count(), 0);
    }

    #[test]
    fn stage_all_skips_cancelled_rows() {
        let buffer = StagingBuffer::new();
        let report = buffer.stage_all(KEY, &scope(), &sheet(), MarkValue::Excused);
        assert_eq!(report, StageAllReport { staged: 2, skipped: 1 });
        assert_eq!(
            buffer.marks.pending(KEY, &scope()).keys().copied().collect::<Vec<_>>(),
            vec![RowId(2), RowId(4)]
        );
    }

    #[test]
    fn sessions_are_isolated() {
        let buffer = StagingBuffer::new();
        let other = SessionKey(ActorId(11));
        buffer.stage_mark(KEY, &scope(), &sheet(), RowId(2), MarkValue::Present).unwrap();
        assert!(buffer.marks.pending(other, &scope()).is_empty());
        assert_eq!(buffer.marks.discard(other, &scope()), 0);
        assert_eq!(buffer.marks.discard(KEY, &scope()), 1);
        assert!(buffer.marks.pending(KEY, &scope()).is_empty());
    }

    #[test]
    fn remove_if_unchanged_keeps_restaged_edits() {
        let area = StagingArea::new();
        area.stage(KEY, &scope(), RowId(2), MarkValue::Present);
        area.stage(KEY, &scope(), RowId(4), MarkValue::Present);
        let written = area.pending(KEY, &scope());

        area.stage(KEY, &scope(), RowId(4), MarkValue::Absent);
        assert_eq!(area.remove_if_unchanged(KEY, &scope(), &written), 1);
        assert_eq!(area.get(KEY, &scope(), RowId(4)), Some(MarkValue::Absent));

        area.stage(KEY, &scope(), RowId(4), MarkValue::Present);
        assert_eq!(area.remove_if_unchanged(KEY, &scope(), &written), 1);
        assert_eq!(area.scope_count(), 0);
    }

    #[test]
    fn toggle_returns_to_ledger_state() {
        let buffer = StagingBuffer::new();
        let sheet = sheet();

        assert!(buffer.toggle_cancellation(KEY, &scope(), &sheet, RowId(2)).unwrap());
        assert_eq!(buffer.cancellations.get(KEY, &scope(), RowId(2)), Some(true));
        assert!(!buffer.toggle_cancellation(KEY, &scope(), &sheet, RowId(2)).unwrap());
        assert_eq!(buffer.cancellations.scope_count(), 0);

        assert!(!buffer.toggle_cancellation(KEY, &scope(), &sheet, RowId(3)).unwrap());
        assert_eq!(buffer.cancellations.get(KEY, &scope(), RowId(3)), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_scopes_expire() {
        let buffer = StagingBuffer::new();
        let tuesday = StageScope::new(week(), Weekday::Tuesday, "1");
        buffer.marks.stage(KEY, &scope(), RowId(2), MarkValue::Present);

        tokio::time::advance(Duration::from_secs(1000)).await;
        buffer.marks.stage(KEY, &tuesday, RowId(5), MarkValue::Present);
        tokio::time::advance(Duration::from_secs(900)).await;

        assert_eq!(buffer.expire_idle(Duration::from_secs(1800)), 1);
        assert!(buffer.marks.pending(KEY, &scope()).is_empty());
        assert_eq!(buffer.marks.pending(KEY, &tuesday).len(), 1);
    }
}
