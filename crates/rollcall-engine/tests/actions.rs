//! Roster, administrative and admission-control actions

use pretty_assertions::assert_eq;
use rollcall_engine::{Action, BucketConfig, EngineError, Outcome, RegistrationError};
use rollcall_ledger::{ActorId, Operation};
use rollcall_test_utils::{
    test_config, test_engine, test_engine_with, ADMIN, BLOCKED, OTHER_STUDENT, ROSTER, STRANGER,
    STUDENT, UNREGISTERED_NAME,
};
use std::time::Duration;
use tokio::sync::watch;

fn register(name: &str) -> Action {
    Action::Register {
        full_name: name.to_string(),
    }
}

#[tokio::test]
async fn registration_links_and_unlocks_student_actions() {
    let t = test_engine();

    let err = t.engine.handle(STRANGER, Action::Status).await.unwrap_err();
    assert!(matches!(err, EngineError::NotRegistered(_)));

    let outcome = t
        .engine
        .handle(STRANGER, register("петрова анна  сергеевна"))
        .await
        .unwrap();
    let Outcome::Registered(record) = outcome else {
        panic!("expected a registration");
    };
    assert_eq!(record.full_name, UNREGISTERED_NAME);
    assert_eq!(record.linked, Some(STRANGER));
    assert_eq!(t.ledger.cell(ROSTER, 3, 4).as_deref(), Some("5555"));

    let Outcome::Status(me) = t.engine.handle(STRANGER, Action::Status).await.unwrap() else {
        panic!("expected a status");
    };
    assert_eq!(me.sequence, "2");
    assert_eq!(me.subgroup, "1");
}

#[tokio::test]
async fn registration_conflicts_are_reported() {
    let t = test_engine();

    let err = t
        .engine
        .handle(STRANGER, register("Иванов Иван Иванович"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Registration(RegistrationError::AlreadyLinkedToOther { .. })
    ));
    assert_eq!(err.user_message(), "This student is already registered with another account.");

    let err = t
        .engine
        .handle(STUDENT, register(UNREGISTERED_NAME))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Registration(RegistrationError::IdentityInUse { .. })
    ));

    let again = t
        .engine
        .handle(STUDENT, register("Иванов Иван Иванович"))
        .await
        .unwrap();
    assert!(matches!(again, Outcome::Registered(_)));
    assert_eq!(t.ledger.calls(Operation::WriteCell), 0);
}

#[tokio::test]
async fn administrative_actions_require_admin() {
    let t = test_engine();
    for action in [Action::RefreshCache, Action::ListStudents, Action::ResetRegistrations] {
        let err = t.engine.handle(STUDENT, action).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(ActorId(1001))));
    }
    assert_eq!(t.ledger.calls(Operation::WriteBatch), 0);
}

#[tokio::test]
async fn blacklisted_actors_are_denied_once_loaded() {
    let t = test_engine();
    let report = t.warm().await;
    assert!(report.failed.is_empty());

    let err = t.engine.handle(BLOCKED, Action::Status).await.unwrap_err();
    assert!(matches!(err, EngineError::Blacklisted(_)));
    assert_eq!(err.user_message(), "Access denied.");

    let outcome = t.engine.handle(ADMIN, Action::QueryBlacklist).await.unwrap();
    assert_eq!(outcome, Outcome::Blacklist(vec![BLOCKED]));
}

#[tokio::test]
async fn roster_listing_and_stats() {
    let t = test_engine();

    let Outcome::Students(students) = t.engine.handle(ADMIN, Action::ListStudents).await.unwrap() else {
        panic!("expected the roster");
    };
    assert_eq!(students.len(), 4);
    assert_eq!(students.iter().filter(|s| s.is_registered()).count(), 2);

    let Outcome::Stats(stats) = t.engine.handle(ADMIN, Action::RosterStats).await.unwrap() else {
        panic!("expected stats");
    };
    assert_eq!((stats.total, stats.registered, stats.unregistered), (4, 2, 2));
    assert!((stats.percent - 50.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn reset_registrations_unlinks_everyone() {
    let t = test_engine();
    let week = t.week_token(0);
    t.engine
        .handle(
            STUDENT,
            Action::StageMarkAll {
                week,
                day: rollcall_ledger::Weekday::Monday,
                mark: rollcall_ledger::MarkValue::Present,
            },
        )
        .await
        .unwrap();

    let outcome = t.engine.handle(ADMIN, Action::ResetRegistrations).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::RegistrationsReset {
            cleared: 2,
            scopes_dropped: 1
        }
    );
    assert_eq!(t.ledger.calls(Operation::WriteBatch), 1);

    for actor in [STUDENT, OTHER_STUDENT] {
        let err = t.engine.handle(actor, Action::Status).await.unwrap_err();
        assert!(matches!(err, EngineError::NotRegistered(_)));
    }
}

#[tokio::test(start_paused = true)]
async fn button_actions_are_rate_limited_per_actor() {
    let mut config = test_config();
    config.rate_limit.buttons = BucketConfig {
        max_requests: 3,
        period_secs: 60,
        burst_allowance: 0,
        min_burst_spacing_ms: 500,
    };
    let t = test_engine_with(config);

    for _ in 0..3 {
        t.engine.handle(STUDENT, Action::Status).await.unwrap();
    }
    let err = t.engine.handle(STUDENT, Action::Status).await.unwrap_err();
    let retry_after = match &err {
        EngineError::RateLimited { retry_after } => *retry_after,
        other => panic!("expected a rate limit denial, got {other:?}"),
    };
    assert!(retry_after <= Duration::from_secs(60));
    assert!(err_is_quiet(&err));

    // Messages have their own bucket
    assert!(t
        .engine
        .handle(STUDENT, register("Иванов Иван Иванович"))
        .await
        .is_ok());
    assert!(t.engine.handle(OTHER_STUDENT, Action::Status).await.is_ok());

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(t.engine.handle(STUDENT, Action::Status).await.is_ok());
}

fn err_is_quiet(err: &EngineError) -> bool {
    err.is_retryable() && err.user_message().starts_with("Too many requests")
}

#[tokio::test(start_paused = true)]
async fn refresher_keeps_running_until_shutdown() {
    let t = test_engine();
    let (tx, rx) = watch::channel(false);
    let handle = t.engine.spawn_refresher(rx);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(t.engine.blacklist().is_loaded());
    let after_first = t.ledger.calls(Operation::ReadAll);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(t.ledger.calls(Operation::ReadAll) > after_first);

    tx.send(true).unwrap();
    handle.await.unwrap();
}
