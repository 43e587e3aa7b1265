//! Ledger data model
//!
//! Cell vocabulary and identifiers shared by every table:
//! - [`MarkValue`] glyphs and the cancellation sentinel
//! - [`CellState`] classification of raw cell text
//! - [`Weekday`] names as stored in the ledger
//! - [`SubjectKind`] classification of subject names

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Glyph written to every student column of an administratively cancelled row
pub const CANCEL_SENTINEL: &str = "🚫";

/// Identity of an end-user session owner (chat user id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub i64);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActorId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// 1-based row position inside a table (row 1 is the header)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub u32);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attendance mark a student can record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkValue {
    /// Attended
    Present,
    /// Missed
    Absent,
    /// Missed with a valid excuse
    Excused,
}

impl MarkValue {
    /// All marks in display order
    pub const ALL: [MarkValue; 3] = [Self::Present, Self::Absent, Self::Excused];

    /// Display glyph stored in the ledger
    #[inline]
    #[must_use]
    pub fn glyph(self) -> &'static str {
        match self {
            Self::Present => "✅",
            Self::Absent => "❌",
            Self::Excused => "⚠️",
        }
    }

    /// Parse a glyph read back from the ledger
    #[must_use]
    pub fn from_glyph(glyph: &str) -> Option<Self> {
        match glyph.trim() {
            "✅" => Some(Self::Present),
            "❌" => Some(Self::Absent),
            // The variation selector is sometimes stripped by the store
            "⚠️" | "⚠" => Some(Self::Excused),
            _ => None,
        }
    }

    /// Action name used in the UI vocabulary
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Excused => "excused",
        }
    }
}

impl fmt::Display for MarkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unrecognised vocabulary words
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised {kind}: '{value}'")]
pub struct ParseVocabularyError {
    kind: &'static str,
    value: String,
}

impl FromStr for MarkValue {
    type Err = ParseVocabularyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "excused" => Ok(Self::Excused),
            other => Self::from_glyph(other).ok_or_else(|| ParseVocabularyError {
                kind: "mark",
                value: s.to_string(),
            }),
        }
    }
}

/// Classified content of a single student cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellState {
    /// Nothing recorded yet
    Empty,
    /// One of the three mark glyphs
    Marked(MarkValue),
    /// Cancellation sentinel
    Cancelled,
    /// Anything else a human typed into the cell
    Other(String),
}

impl CellState {
    /// Classify raw cell text
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Self::Empty
        } else if trimmed == CANCEL_SENTINEL {
            Self::Cancelled
        } else if let Some(mark) = MarkValue::from_glyph(trimmed) {
            Self::Marked(mark)
        } else {
            Self::Other(trimmed.to_string())
        }
    }

    /// Mark recorded in the cell, if any
    #[inline]
    #[must_use]
    pub fn mark(&self) -> Option<MarkValue> {
        match self {
            Self::Marked(mark) => Some(*mark),
            _ => None,
        }
    }
}

/// Teaching day of the week
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Weekday {
    /// Monday
    Monday,
    /// Tuesday
    Tuesday,
    /// Wednesday
    Wednesday,
    /// Thursday
    Thursday,
    /// Friday
    Friday,
}

impl Weekday {
    /// Teaching days in order
    pub const ALL: [Weekday; 5] = [
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
    ];

    /// Day name as stored in the ledger's day column
    #[must_use]
    pub fn ledger_name(self) -> &'static str {
        match self {
            Self::Monday => "Понедельник",
            Self::Tuesday => "Вторник",
            Self::Wednesday => "Среда",
            Self::Thursday => "Четверг",
            Self::Friday => "Пятница",
        }
    }

    fn english_name(self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
        }
    }

    /// Match a ledger cell against this day
    #[inline]
    #[must_use]
    pub fn matches(self, cell: &str) -> bool {
        cell.trim() == self.ledger_name()
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ledger_name())
    }
}

impl FromStr for Weekday {
    type Err = ParseVocabularyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|day| {
                day.ledger_name().to_lowercase() == needle
                    || day.english_name() == needle
                    || day.english_name()[..3] == needle
            })
            .ok_or_else(|| ParseVocabularyError {
                kind: "day",
                value: s.to_string(),
            })
    }
}

/// Coarse class of a scheduled subject, used for compact labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    /// Lecture
    Lecture,
    /// Practical session
    Practice,
    /// Laboratory work
    Lab,
    /// Anything else
    Other,
}

impl SubjectKind {
    /// Classify a subject name by its wording
    #[must_use]
    pub fn classify(subject: &str) -> Self {
        let lower = subject.to_lowercase();
        if lower.contains("лекци") || lower.contains("lecture") {
            Self::Lecture
        } else if lower.contains("практическ") || lower.contains("practice") {
            Self::Practice
        } else if lower.contains("лабораторн") || lower.contains("lab") {
            Self::Lab
        } else {
            Self::Other
        }
    }

    /// Short label for buttons
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Lecture => "Лекция",
            Self::Practice => "Практика",
            Self::Lab => "Лабораторная",
            Self::Other => "Занятие",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn glyphs_are_bijective() {
        for mark in MarkValue::ALL {
            assert_eq!(MarkValue::from_glyph(mark.glyph()), Some(mark));
            assert_eq!(mark.as_str().parse::<MarkValue>().unwrap(), mark);
        }
        assert_eq!(MarkValue::from_glyph("⚠"), Some(MarkValue::Excused));
        assert!(MarkValue::from_glyph(CANCEL_SENTINEL).is_none());
    }

    #[test]
    fn cell_state_classification() {
        assert_eq!(CellState::parse("  "), CellState::Empty);
        assert_eq!(CellState::parse(" 🚫 "), CellState::Cancelled);
        assert_eq!(CellState::parse("❌"), CellState::Marked(MarkValue::Absent));
        assert_eq!(CellState::parse("late"), CellState::Other("late".into()));
    }

    #[test]
    fn weekday_parsing_accepts_ledger_and_english_names() {
        assert_eq!("Среда".parse::<Weekday>().unwrap(), Weekday::Wednesday);
        assert_eq!("monday".parse::<Weekday>().unwrap(), Weekday::Monday);
        assert_eq!("Fri".parse::<Weekday>().unwrap(), Weekday::Friday);
        assert!("Суббота".parse::<Weekday>().is_err());
    }

    #[test]
    fn subject_kind_classification() {
        assert_eq!(
            SubjectKind::classify("Математика (лекционное занятие)"),
            SubjectKind::Lecture
        );
        assert_eq!(
            SubjectKind::classify("Физика (практическое занятие)"),
            SubjectKind::Practice
        );
        assert_eq!(
            SubjectKind::classify("Химия (лабораторная работа)"),
            SubjectKind::Lab
        );
        assert_eq!(SubjectKind::classify("Классный час"), SubjectKind::Other);
    }

    proptest! {
        #[test]
        fn prop_cell_state_ignores_padding(raw in "\\PC{0,12}", pad in "[ \t]{0,3}") {
            let padded = format!("{pad}{raw}{pad}");
            prop_assert_eq!(CellState::parse(&padded), CellState::parse(&raw));
        }

        #[test]
        fn prop_cell_state_agrees_with_glyphs(raw in "\\PC{0,12}") {
            match CellState::parse(&raw) {
                CellState::Empty => prop_assert!(raw.trim().is_empty()),
                CellState::Cancelled => prop_assert_eq!(raw.trim(), CANCEL_SENTINEL),
                CellState::Marked(mark) => prop_assert_eq!(MarkValue::from_glyph(&raw), Some(mark)),
                CellState::Other(text) => {
                    prop_assert_eq!(text.as_str(), raw.trim());
                    prop_assert!(MarkValue::from_glyph(&raw).is_none());
                }
            }
        }

        #[test]
        fn prop_marks_survive_a_ledger_cell(idx in 0usize..3, pad in "[ \t]{0,3}") {
            let mark = MarkValue::ALL[idx];
            let cell = format!("{pad}{}{pad}", mark.glyph());
            prop_assert_eq!(CellState::parse(&cell), CellState::Marked(mark));
        }
    }
}
