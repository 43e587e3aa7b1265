//! Testing utilities for the rollcall workspace
//!
//! A seeded in-memory ledger, a clock pinned inside week 8 and an engine
//! builder wired to both.

#![allow(missing_docs)]

use chrono::NaiveDate;
use rollcall_engine::{AttendanceEngine, EngineConfig, FixedClock, RetryConfig, TickReport};
use rollcall_ledger::{ActorId, InMemoryLedger, Row, RowId, CANCEL_SENTINEL};
use std::sync::Arc;

pub const ROSTER: &str = "Студенты";
pub const BLACKLIST: &str = "Черный список";
pub const GROUP_1: &str = "1 подгруппа";
pub const GROUP_2: &str = "2 подгруппа";

pub const WEEK_8: &str = "Знаменатель - 8 неделя";

/// Registered, subgroup 1, column "1"
pub const STUDENT: ActorId = ActorId(1001);
/// Registered, subgroup 2, column "3"
pub const OTHER_STUDENT: ActorId = ActorId(1003);
/// Not in the roster
pub const STRANGER: ActorId = ActorId(5555);
pub const ADMIN: ActorId = ActorId(9000);
pub const BLOCKED: ActorId = ActorId(666);

pub const UNREGISTERED_NAME: &str = "Петрова Анна Сергеевна";

/// Monday of week 8 in subgroup 1: six classes, all open
pub const MONDAY_ROWS: [RowId; 6] = [RowId(37), RowId(38), RowId(39), RowId(40), RowId(41), RowId(42)];
/// Tuesday of week 8 in subgroup 1: five classes, 44 and 46 cancelled
pub const TUESDAY_ROWS: [RowId; 5] = [RowId(43), RowId(44), RowId(45), RowId(46), RowId(47)];

const SUBJECTS: [&str; 5] = [
    "Математический анализ (лекционное)",
    "Физика (практическое)",
    "Программирование (лабораторное)",
    "История",
    "Английский язык (практическое)",
];

pub fn row(cells: &[&str]) -> Row {
    cells.iter().map(|s| (*s).to_string()).collect()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn semester_start() -> NaiveDate {
    date(2026, 9, 1)
}

/// Tuesday of week 8
pub fn today() -> NaiveDate {
    date(2026, 10, 20)
}

pub fn week_label(ordinal: u32) -> String {
    let name = if ordinal % 2 == 0 { "Знаменатель" } else { "Числитель" };
    format!("{name} - {ordinal} неделя")
}

pub fn roster_rows() -> Vec<Row> {
    vec![
        row(&["№", "ФИО", "Подгруппа", "Telegram ID"]),
        row(&["1", "Иванов Иван Иванович", "1", "1001"]),
        row(&["2", UNREGISTERED_NAME, "1", ""]),
        row(&["3", "Сидоров Олег Петрович", "2", "1003"]),
        row(&["4", "Кузнецова Мария Андреевна", "1", ""]),
    ]
}

/// Subgroup 1: weeks 1-7 have one class a day, week 8 is laid out as
/// [`MONDAY_ROWS`] and [`TUESDAY_ROWS`] followed by one class Wednesday to Friday
pub fn group_1_rows() -> Vec<Row> {
    let mut rows = vec![row(&["Неделя", "День", "Предмет", "1", "2", "4"])];

    for ordinal in 1..=7 {
        let label = week_label(ordinal);
        for (i, day) in ["Понедельник", "Вторник", "Среда", "Четверг", "Пятница"].iter().enumerate() {
            rows.push(row(&[label.as_str(), *day, SUBJECTS[i], "✅", "❌", ""]));
        }
    }
    for subject in SUBJECTS.iter().chain(&SUBJECTS[..1]) {
        rows.push(row(&[WEEK_8, "Понедельник", *subject, "", "", ""]));
    }
    for (i, subject) in SUBJECTS.iter().enumerate() {
        let cell = if i % 2 == 1 { CANCEL_SENTINEL } else { "" };
        rows.push(row(&[WEEK_8, "Вторник", *subject, cell, cell, cell]));
    }
    for day in ["Среда", "Четверг", "Пятница"] {
        rows.push(row(&[WEEK_8, day, SUBJECTS[3], "", "", ""]));
    }
    rows
}

pub fn group_2_rows() -> Vec<Row> {
    vec![
        row(&["Неделя", "День", "Предмет", "3"]),
        row(&[WEEK_8, "Понедельник", SUBJECTS[0], ""]),
        row(&[WEEK_8, "Понедельник", SUBJECTS[1], ""]),
    ]
}

pub fn blacklist_rows() -> Vec<Row> {
    vec![row(&["Telegram ID"]), row(&["666"])]
}

pub fn seeded_ledger() -> InMemoryLedger {
    InMemoryLedger::new()
        .with_table(ROSTER, roster_rows())
        .with_table(GROUP_1, group_1_rows())
        .with_table(GROUP_2, group_2_rows())
        .with_table(BLACKLIST, blacklist_rows())
}

/// Defaults with a fixed semester, one administrator and fast retries
pub fn test_config() -> EngineConfig {
    EngineConfig::new()
        .with_semester_start(semester_start())
        .with_admins([ADMIN.0])
        .with_retry(RetryConfig {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
        })
}

pub struct TestEngine {
    pub engine: AttendanceEngine,
    pub ledger: Arc<InMemoryLedger>,
    pub clock: Arc<FixedClock>,
}

impl TestEngine {
    /// Run one refresher cycle so the blacklist is loaded
    pub async fn warm(&self) -> TickReport {
        self.engine.refresher().tick().await
    }

    /// Token of the week `offset` weeks from today
    pub fn week_token(&self, offset: i64) -> String {
        let addressor = self.engine.addressor();
        addressor.encode(&addressor.week_info(offset).unwrap())
    }
}

pub fn test_engine() -> TestEngine {
    test_engine_with(test_config())
}

pub fn test_engine_with(config: EngineConfig) -> TestEngine {
    let ledger = Arc::new(seeded_ledger());
    let clock = Arc::new(FixedClock::new(today()));
    let engine = AttendanceEngine::new(config, ledger.clone(), clock.clone()).unwrap();
    TestEngine {
        engine,
        ledger,
        clock,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_ledger::{ScheduleSheet, Weekday};

    #[test]
    fn fixture_layout_matches_constants() {
        let sheet = ScheduleSheet::parse(GROUP_1, &group_1_rows()).unwrap();
        let monday: Vec<_> = sheet.day_rows(WEEK_8, Weekday::Monday).map(|r| r.id).collect();
        assert_eq!(monday, MONDAY_ROWS);

        let tuesday: Vec<_> = sheet.day_rows(WEEK_8, Weekday::Tuesday).collect();
        assert_eq!(tuesday.iter().map(|r| r.id).collect::<Vec<_>>(), TUESDAY_ROWS);
        assert_eq!(tuesday.iter().filter(|r| r.is_cancelled()).count(), 2);
    }
}
