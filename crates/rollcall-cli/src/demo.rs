//! Scripted session over a seeded in-memory ledger

use anyhow::{Context, Result};
use chrono::Days;
use rollcall_engine::{Action, AttendanceEngine, EngineConfig, FixedClock, Outcome};
use rollcall_ledger::{
    ActorId, FailureKind, InMemoryLedger, MarkValue, Operation, Row, RowId, Weekday,
};
use std::sync::Arc;
use std::time::Duration;

const STUDENT: ActorId = ActorId(1001);
const ADMIN: ActorId = ActorId(9000);
const STUDENT_NAME: &str = "Иванов Иван Иванович";

const SUBJECTS: [&str; 3] = [
    "Математический анализ (лекционное)",
    "Физика (практическое)",
    "Программирование (лабораторное)",
];

#[derive(Debug, Clone, Copy)]
pub(crate) struct Options {
    pub(crate) latency_ms: u64,
    pub(crate) flaky_writes: usize,
}

fn row(cells: &[&str]) -> Row {
    cells.iter().map(|s| (*s).to_string()).collect()
}

fn seed(ledger: &InMemoryLedger, engine: &AttendanceEngine, week_label: &str) {
    let tables = &engine.config().tables;
    ledger.set_table(
        tables.roster.clone(),
        vec![
            row(&["№", "ФИО", "Подгруппа", "Telegram ID"]),
            row(&["1", STUDENT_NAME, "1", ""]),
            row(&["2", "Петрова Анна Сергеевна", "1", ""]),
        ],
    );
    ledger.set_table(tables.blacklist.clone(), vec![row(&["Telegram ID"])]);

    let mut schedule = vec![row(&["Неделя", "День", "Предмет", "1", "2"])];
    for day in [Weekday::Monday, Weekday::Tuesday] {
        for subject in SUBJECTS {
            schedule.push(row(&[week_label, day.ledger_name(), subject, "", ""]));
        }
    }
    ledger.set_table(tables.schedule("1"), schedule);
}

fn show(step: &str, outcome: &Outcome) {
    println!("== {step}");
    match outcome {
        Outcome::Registered(record) | Outcome::Status(record) => {
            println!("   {} (subgroup {}, column {})", record.full_name, record.subgroup, record.sequence);
        }
        Outcome::Week(view) => {
            for (day, status) in &view.days {
                println!("   {day:<12} {}", status.glyph());
            }
        }
        Outcome::Day(view) | Outcome::StagedAll { view, .. } => {
            for r in &view.rows {
                let pending = if r.pending.is_some() { "*" } else { " " };
                println!("   {:>3} {} {pending} {}", r.row.0, r.glyph(), r.subject);
            }
        }
        Outcome::Cancellations(view) => {
            for r in &view.rows {
                let state = if r.effective() { "cancelled" } else { "open" };
                println!("   {:>3} {state:<9} {}", r.row.0, r.subject);
            }
        }
        Outcome::Committed(report) | Outcome::CancellationsSaved(report) => {
            println!("   {}", report.summary());
        }
        Outcome::Stats(stats) => {
            println!(
                "   {}/{} registered ({:.0}%)",
                stats.registered, stats.total, stats.percent
            );
        }
        other => println!("   {other:?}"),
    }
}

async fn step(engine: &AttendanceEngine, label: &str, actor: ActorId, action: Action) -> Result<Outcome> {
    let outcome = engine
        .handle(actor, action)
        .await
        .with_context(|| format!("step '{label}' failed"))?;
    show(label, &outcome);
    Ok(outcome)
}

/// Drive one student and one administrator through a day of attendance
pub(crate) async fn run(config: EngineConfig, options: Options) -> Result<()> {
    let config = config.with_admins([ADMIN.0]);
    // Pinned to the Monday of week 3
    let today = config
        .semester
        .start
        .checked_add_days(Days::new(14))
        .context("semester start is too late")?;

    let ledger = Arc::new(InMemoryLedger::new());
    let clock = Arc::new(FixedClock::new(today));
    let engine = AttendanceEngine::new(config, ledger.clone(), clock)?;

    let week = engine
        .addressor()
        .current_week()
        .context("demo date falls outside the semester")?;
    let token = engine.addressor().encode(&week);
    seed(&ledger, &engine, &week.label);
    ledger.set_latency(Duration::from_millis(options.latency_ms));
    engine.refresher().tick().await;

    println!("Week {} ({week}), token {token}", week.ordinal);
    step(&engine, "register", STUDENT, Action::Register { full_name: STUDENT_NAME.to_lowercase() }).await?;
    step(&engine, "week overview", STUDENT, Action::SelectWeek { offset: 0 }).await?;

    let monday = |row: u32| Action::ToggleCancellation {
        week: token.clone(),
        day: Weekday::Monday,
        subgroup: "1".into(),
        row: RowId(row),
    };
    step(
        &engine,
        "stage all present",
        STUDENT,
        Action::StageMarkAll { week: token.clone(), day: Weekday::Monday, mark: MarkValue::Present },
    )
    .await?;
    step(
        &engine,
        "stage absence",
        STUDENT,
        Action::StageMark { week: token.clone(), day: Weekday::Monday, row: RowId(3), mark: MarkValue::Absent },
    )
    .await?;

    step(&engine, "admin cancels a class", ADMIN, monday(4)).await?;
    step(
        &engine,
        "admin saves cancellations",
        ADMIN,
        Action::SaveCancellations { week: token.clone(), day: Weekday::Monday, subgroup: "1".into() },
    )
    .await?;

    if options.flaky_writes > 0 {
        ledger.fail_next(Operation::WriteBatch, FailureKind::Transient, options.flaky_writes);
    }
    let commit = Action::Commit { week: token.clone(), day: Weekday::Monday };
    match engine.handle(STUDENT, commit.clone()).await {
        Ok(outcome) => show("commit", &outcome),
        Err(e) => {
            println!("== commit failed: {}", e.user_message());
            ledger.heal();
            step(&engine, "commit again", STUDENT, commit).await?;
        }
    }

    step(&engine, "day after commit", STUDENT, Action::SelectDay { week: token.clone(), day: Weekday::Monday }).await?;
    step(&engine, "roster stats", ADMIN, Action::RosterStats).await?;

    let stats = engine.cache().stats();
    println!(
        "cache: {} hits, {} reloads, {} stale; remote reads {}, batch writes {}",
        stats.hits,
        stats.reloads,
        stats.stale_served,
        ledger.calls(Operation::ReadAll),
        ledger.calls(Operation::WriteBatch)
    );
    Ok(())
}
