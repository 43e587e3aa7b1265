//! Typed views over raw table snapshots
//!
//! Schedule tables (one per subgroup):
//!
//! ```text
//! | week-label | day-name | subject | 1 | 2 | 3 | ...
//! ```
//!
//! where every student column header is that student's sequence number.
//! The roster table has the fixed columns `[sequence, full name, subgroup,
//! linked identity]`; the blacklist table lists actor ids in its first column.

use crate::driver::Row;
use crate::error::SheetError;
use crate::model::{ActorId, CellState, RowId, Weekday};
use indexmap::IndexMap;
use std::collections::HashSet;

/// Number of fixed leading columns in a schedule table
pub const SCHEDULE_FIXED_COLUMNS: usize = 3;

/// 1-based column holding the linked identity in the roster table
pub const ROSTER_LINK_COLUMN: u32 = 4;

/// One scheduled class occurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRow {
    /// Row position in the table
    pub id: RowId,
    /// Week label as written in the ledger
    pub week: String,
    /// Raw day name
    pub day: String,
    /// Subject name
    pub subject: String,
    /// Per-student cell, keyed by student sequence number
    pub marks: IndexMap<String, CellState>,
}

impl ScheduleRow {
    /// A row is cancelled iff any student column holds the sentinel
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.marks.values().any(|c| matches!(c, CellState::Cancelled))
    }

    /// Cell for one student
    #[must_use]
    pub fn cell(&self, student: &str) -> &CellState {
        self.marks.get(student).unwrap_or(&CellState::Empty)
    }

    /// Whether this row belongs to the given week and day
    #[must_use]
    pub fn in_scope(&self, week_label: &str, day: Weekday) -> bool {
        self.week.trim() == week_label && day.matches(&self.day)
    }
}

/// Parsed subgroup schedule table
#[derive(Debug, Clone)]
pub struct ScheduleSheet {
    table: String,
    /// Student sequence number -> 1-based column
    columns: IndexMap<String, u32>,
    rows: Vec<ScheduleRow>,
}

impl ScheduleSheet {
    /// Parse a full snapshot (header first)
    ///
    /// # Errors
    /// - `SheetError::MissingHeader` for an empty snapshot
    /// - `SheetError::MalformedHeader` when the fixed columns are absent
    pub fn parse(table: &str, snapshot: &[Row]) -> Result<Self, SheetError> {
        let header = snapshot
            .first()
            .ok_or_else(|| SheetError::MissingHeader(table.to_string()))?;
        if header.len() < SCHEDULE_FIXED_COLUMNS {
            return Err(SheetError::MalformedHeader {
                table: table.to_string(),
                found: header.len(),
                expected: SCHEDULE_FIXED_COLUMNS,
            });
        }

        let mut columns = IndexMap::new();
        for (idx, cell) in header.iter().enumerate().skip(SCHEDULE_FIXED_COLUMNS) {
            let key = cell.trim();
            if !key.is_empty() {
                columns.entry(key.to_string()).or_insert(column_number(idx));
            }
        }

        let rows = snapshot
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, row)| row.len() >= SCHEDULE_FIXED_COLUMNS)
            .map(|(idx, row)| ScheduleRow {
                id: RowId(column_number(idx)),
                week: row[0].trim().to_string(),
                day: row[1].trim().to_string(),
                subject: row[2].trim().to_string(),
                marks: columns
                    .iter()
                    .map(|(key, col)| {
                        let raw = row.get(*col as usize - 1).map_or("", String::as_str);
                        (key.clone(), CellState::parse(raw))
                    })
                    .collect(),
            })
            .collect();

        Ok(Self {
            table: table.to_string(),
            columns,
            rows,
        })
    }

    /// Table this sheet was parsed from
    #[inline]
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// 1-based column of a student, by sequence number
    #[must_use]
    pub fn student_column(&self, student: &str) -> Option<u32> {
        self.columns.get(student.trim()).copied()
    }

    /// All student columns in header order
    pub fn student_columns(&self) -> impl Iterator<Item = (&str, u32)> {
        self.columns.iter().map(|(k, c)| (k.as_str(), *c))
    }

    /// Row by position
    #[must_use]
    pub fn row(&self, id: RowId) -> Option<&ScheduleRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    /// Rows of one week/day, in table order
    pub fn day_rows<'a>(
        &'a self,
        week_label: &'a str,
        day: Weekday,
    ) -> impl Iterator<Item = &'a ScheduleRow> + 'a {
        self.rows.iter().filter(move |r| r.in_scope(week_label, day))
    }

    /// Every data row
    #[inline]
    #[must_use]
    pub fn rows(&self) -> &[ScheduleRow] {
        &self.rows
    }
}

/// One entry of the student roster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentRecord {
    /// Row position in the roster table
    pub row: RowId,
    /// Sequence number, doubles as the schedule column header
    pub sequence: String,
    /// Full name
    pub full_name: String,
    /// Subgroup the student belongs to
    pub subgroup: String,
    /// Session identity bound to this record
    pub linked: Option<ActorId>,
}

impl StudentRecord {
    /// Whether a session identity has been linked
    #[inline]
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.linked.is_some()
    }
}

/// Parsed roster table
#[derive(Debug, Clone, Default)]
pub struct Roster {
    records: Vec<StudentRecord>,
}

impl Roster {
    /// Parse a roster snapshot, skipping the header and blank rows
    ///
    /// # Errors
    /// `SheetError::MissingHeader` for an empty snapshot
    pub fn parse(table: &str, snapshot: &[Row]) -> Result<Self, SheetError> {
        if snapshot.is_empty() {
            return Err(SheetError::MissingHeader(table.to_string()));
        }
        let cell = |row: &Row, idx: usize| row.get(idx).map_or("", |s| s.trim()).to_string();

        let records = snapshot
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, row)| row.first().is_some_and(|s| !s.trim().is_empty()))
            .map(|(idx, row)| StudentRecord {
                row: RowId(column_number(idx)),
                sequence: cell(row, 0),
                full_name: cell(row, 1),
                subgroup: cell(row, 2),
                linked: cell(row, 3).parse().ok(),
            })
            .collect();

        Ok(Self { records })
    }

    /// All records in table order
    #[inline]
    #[must_use]
    pub fn records(&self) -> &[StudentRecord] {
        &self.records
    }

    /// Case-insensitive full name lookup
    #[must_use]
    pub fn find_by_name(&self, full_name: &str) -> Option<&StudentRecord> {
        let needle = normalize_name(full_name);
        self.records
            .iter()
            .find(|r| normalize_name(&r.full_name) == needle)
    }

    /// Record linked to a session identity
    #[must_use]
    pub fn find_by_identity(&self, actor: ActorId) -> Option<&StudentRecord> {
        self.records.iter().find(|r| r.linked == Some(actor))
    }
}

/// Parse the blacklist table into an id set
#[must_use]
pub fn parse_blacklist(snapshot: &[Row]) -> HashSet<ActorId> {
    snapshot
        .iter()
        .skip(1)
        .filter_map(|row| row.first())
        .filter_map(|cell| cell.parse().ok())
        .collect()
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// 0-based index -> 1-based position
fn column_number(idx: usize) -> u32 {
    u32::try_from(idx + 1).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MarkValue, CANCEL_SENTINEL};

    fn row(cells: &[&str]) -> Row {
        cells.iter().map(|s| (*s).to_string()).collect()
    }

    fn schedule() -> Vec<Row> {
        vec![
            row(&["Неделя", "День", "Предмет", "1", "2"]),
            row(&["Знаменатель - 8 неделя", "Понедельник", "Физика (лекционное)", "✅", ""]),
            row(&["Знаменатель - 8 неделя", "Понедельник", "Химия", CANCEL_SENTINEL, CANCEL_SENTINEL]),
            row(&["Знаменатель - 8 неделя", "Вторник", "История", "", "❌"]),
            row(&["Числитель - 9 неделя", "Понедельник", "Физика"]),
            row(&["short"]),
        ]
    }

    #[test]
    fn schedule_parses_columns_and_rows() {
        let sheet = ScheduleSheet::parse("1 подгруппа", &schedule()).unwrap();
        assert_eq!(sheet.student_column("1"), Some(4));
        assert_eq!(sheet.student_column("2"), Some(5));
        assert_eq!(sheet.student_column("3"), None);
        assert_eq!(sheet.rows().len(), 4);

        let monday: Vec<_> = sheet
            .day_rows("Знаменатель - 8 неделя", Weekday::Monday)
            .collect();
        assert_eq!(monday.len(), 2);
        assert_eq!(monday[0].id, RowId(2));
        assert_eq!(monday[0].cell("1").mark(), Some(MarkValue::Present));
        assert!(!monday[0].is_cancelled());
        assert!(monday[1].is_cancelled());
    }

    #[test]
    fn short_rows_read_as_empty_cells() {
        let sheet = ScheduleSheet::parse("t", &schedule()).unwrap();
        let r = sheet.row(RowId(5)).unwrap();
        assert_eq!(r.cell("1"), &CellState::Empty);
        assert_eq!(r.cell("2"), &CellState::Empty);
    }

    #[test]
    fn schedule_rejects_bad_header() {
        assert!(matches!(
            ScheduleSheet::parse("t", &[]),
            Err(SheetError::MissingHeader(_))
        ));
        assert!(matches!(
            ScheduleSheet::parse("t", &[row(&["a", "b"])]),
            Err(SheetError::MalformedHeader { found: 2, .. })
        ));
    }

    #[test]
    fn roster_lookup() {
        let snapshot = vec![
            row(&["№", "ФИО", "Подгруппа", "Telegram ID"]),
            row(&["1", "Иванов Иван Иванович", "1", "42"]),
            row(&["2", "Петров  Пётр", "2", ""]),
            row(&["", "", "", ""]),
        ];
        let roster = Roster::parse("Студенты", &snapshot).unwrap();
        assert_eq!(roster.records().len(), 2);

        let ivanov = roster.find_by_name("  иванов иван   иванович ").unwrap();
        assert_eq!(ivanov.linked, Some(ActorId(42)));
        assert_eq!(ivanov.row, RowId(2));
        assert_eq!(roster.find_by_identity(ActorId(42)).unwrap().sequence, "1");
        assert!(!roster.find_by_name("петров пётр").unwrap().is_registered());
    }

    #[test]
    fn blacklist_skips_header_and_garbage() {
        let snapshot = vec![row(&["id"]), row(&["7"]), row(&["oops"]), row(&[" 9 "])];
        let ids = parse_blacklist(&snapshot);
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&ActorId(7)));
        assert!(ids.contains(&ActorId(9)));
    }
}
