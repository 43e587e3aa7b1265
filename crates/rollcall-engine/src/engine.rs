//! Attendance engine facade
//!
//! Owns every shared store and routes UI actions to them. Each call to
//! [`AttendanceEngine::handle`] goes through the interceptor pipeline
//! (blacklist, then rate limit) before the action runs.

use crate::blacklist::BlacklistIndex;
use crate::cache::ReadCache;
use crate::commit::{CommitCoordinator, CommitReport, TableLocks};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::middleware::{BlacklistGate, Pipeline, RateGate, Request};
use crate::rate_limit::{ActionClass, RateLimiter};
use crate::refresher::{BackgroundRefresher, TickReport};
use crate::roster::{RosterService, RosterStats};
use crate::staging::{SessionKey, StageAllReport, StageScope, StagingBuffer};
use crate::temporal::{Clock, TemporalAddressor, WeekIdentifier};
use crate::view::{
    render_cancellations, render_day, summarize_week, CancellationView, DayView, WeekView,
};
use rollcall_ledger::{
    ActorId, LedgerClient, LedgerDriver, MarkValue, RowId, ScheduleSheet, StudentRecord, Weekday,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Inbound action from the UI layer
///
/// `week` fields carry the compact token produced by [`Action::SelectWeek`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Link the caller to a roster record by full name
    Register {
        /// Full name as typed
        full_name: String,
    },
    /// Show the caller's roster record
    Status,
    /// Week overview relative to the current week
    SelectWeek {
        /// Weeks away from the current one
        offset: i64,
    },
    /// Open one day
    SelectDay {
        /// Week token
        week: String,
        /// Day
        day: Weekday,
    },
    /// Stage a mark on one class
    StageMark {
        /// Week token
        week: String,
        /// Day
        day: Weekday,
        /// Class row
        row: RowId,
        /// Mark
        mark: MarkValue,
    },
    /// Stage a mark on every open class of the day
    StageMarkAll {
        /// Week token
        week: String,
        /// Day
        day: Weekday,
        /// Mark
        mark: MarkValue,
    },
    /// Write staged marks of the day
    Commit {
        /// Week token
        week: String,
        /// Day
        day: Weekday,
    },
    /// Drop staged marks of the day
    Discard {
        /// Week token
        week: String,
        /// Day
        day: Weekday,
    },
    /// Open the cancellation editor for one day of a subgroup
    ViewCancellations {
        /// Week token
        week: String,
        /// Day
        day: Weekday,
        /// Subgroup
        subgroup: String,
    },
    /// Flip the staged cancellation state of one class
    ToggleCancellation {
        /// Week token
        week: String,
        /// Day
        day: Weekday,
        /// Subgroup
        subgroup: String,
        /// Class row
        row: RowId,
    },
    /// Write staged cancellations of the day
    SaveCancellations {
        /// Week token
        week: String,
        /// Day
        day: Weekday,
        /// Subgroup
        subgroup: String,
    },
    /// Drop staged cancellations of the day
    DiscardCancellations {
        /// Week token
        week: String,
        /// Day
        day: Weekday,
        /// Subgroup
        subgroup: String,
    },
    /// Force a refresh cycle
    RefreshCache,
    /// Reload and list blocked actors
    QueryBlacklist,
    /// List roster records
    ListStudents,
    /// Registration statistics
    RosterStats,
    /// Clear every registration
    ResetRegistrations,
}

impl Action {
    /// Action name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Status => "status",
            Self::SelectWeek { .. } => "select_week",
            Self::SelectDay { .. } => "select_day",
            Self::StageMark { .. } => "stage_mark",
            Self::StageMarkAll { .. } => "stage_mark_all",
            Self::Commit { .. } => "commit",
            Self::Discard { .. } => "discard",
            Self::ViewCancellations { .. } => "view_cancellations",
            Self::ToggleCancellation { .. } => "toggle_cancellation",
            Self::SaveCancellations { .. } => "save_cancellations",
            Self::DiscardCancellations { .. } => "discard_cancellations",
            Self::RefreshCache => "refresh_cache",
            Self::QueryBlacklist => "query_blacklist",
            Self::ListStudents => "list_students",
            Self::RosterStats => "roster_stats",
            Self::ResetRegistrations => "reset_registrations",
        }
    }

    /// Rate-limit class: typed names are messages, everything else is a button
    #[must_use]
    pub fn class(&self) -> ActionClass {
        match self {
            Self::Register { .. } => ActionClass::Message,
            _ => ActionClass::Button,
        }
    }

    /// Whether only administrators may run the action
    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            Self::ViewCancellations { .. }
                | Self::ToggleCancellation { .. }
                | Self::SaveCancellations { .. }
                | Self::DiscardCancellations { .. }
                | Self::RefreshCache
                | Self::QueryBlacklist
                | Self::ListStudents
                | Self::RosterStats
                | Self::ResetRegistrations
        )
    }
}

/// Result of a handled action
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Caller is now registered
    Registered(StudentRecord),
    /// Caller's record
    Status(StudentRecord),
    /// Week overview
    Week(WeekView),
    /// Day view, after any staging change
    Day(DayView),
    /// Whole-day staging result and the refreshed view
    StagedAll {
        /// Staged vs skipped rows
        report: StageAllReport,
        /// Day view
        view: DayView,
    },
    /// Marks commit result
    Committed(CommitReport),
    /// Staged edits dropped
    Discarded {
        /// Number of dropped edits
        count: usize,
    },
    /// Cancellation editor
    Cancellations(CancellationView),
    /// Cancellation commit result
    CancellationsSaved(CommitReport),
    /// Refresh cycle result
    Refreshed(TickReport),
    /// Blocked actors
    Blacklist(Vec<ActorId>),
    /// Roster records
    Students(Vec<StudentRecord>),
    /// Registration statistics
    Stats(RosterStats),
    /// Registrations cleared
    RegistrationsReset {
        /// Identities unlinked
        cleared: usize,
        /// Staging scopes dropped
        scopes_dropped: usize,
    },
}

/// Staging & synchronization engine
#[derive(Debug)]
pub struct AttendanceEngine {
    config: Arc<EngineConfig>,
    addressor: Arc<TemporalAddressor>,
    cache: Arc<ReadCache>,
    limiter: Arc<RateLimiter>,
    staging: Arc<StagingBuffer>,
    blacklist: Arc<BlacklistIndex>,
    coordinator: CommitCoordinator,
    roster: RosterService,
    pipeline: Pipeline,
}

impl AttendanceEngine {
    /// Build every store from configuration
    ///
    /// # Errors
    /// `EngineError::Config` when the configuration is inconsistent
    pub fn new(config: EngineConfig, driver: Arc<dyn LedgerDriver>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let client = LedgerClient::new(driver);
        let retry = config.retry.policy();
        let cache = Arc::new(
            ReadCache::new(
                client.clone(),
                retry,
                config.cache.max_tables,
                config.cache.default_ttl(),
            )
            .with_ttl_overrides(config.cache.overrides()),
        );
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.limits(ActionClass::Button),
            config.rate_limit.limits(ActionClass::Message),
            config.rate_limit.retention(),
        ));
        let staging = Arc::new(StagingBuffer::new());
        let blacklist = Arc::new(BlacklistIndex::new());
        let locks = Arc::new(TableLocks::new());

        let coordinator = CommitCoordinator::new(
            client.clone(),
            Arc::clone(&cache),
            Arc::clone(&staging),
            Arc::clone(&locks),
            retry,
        );
        let roster = RosterService::new(
            client,
            Arc::clone(&cache),
            locks,
            retry,
            config.tables.roster.clone(),
        );
        let pipeline = Pipeline::new()
            .with_stage(BlacklistGate::new(Arc::clone(&blacklist)))
            .with_stage(RateGate::new(Arc::clone(&limiter)));

        Ok(Self {
            addressor: Arc::new(TemporalAddressor::new(&config.semester, clock)),
            config: Arc::new(config),
            cache,
            limiter,
            staging,
            blacklist,
            coordinator,
            roster,
            pipeline,
        })
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Week computations
    #[inline]
    #[must_use]
    pub fn addressor(&self) -> &TemporalAddressor {
        &self.addressor
    }

    /// Read cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    /// Staged edits of every session
    #[inline]
    #[must_use]
    pub fn staging(&self) -> &StagingBuffer {
        &self.staging
    }

    /// Rate limiter
    #[inline]
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Blocked-actor index
    #[inline]
    #[must_use]
    pub fn blacklist(&self) -> &BlacklistIndex {
        &self.blacklist
    }

    /// Refresher bound to this engine's stores
    #[must_use]
    pub fn refresher(&self) -> BackgroundRefresher {
        BackgroundRefresher::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.blacklist),
            Arc::clone(&self.limiter),
            Arc::clone(&self.staging),
            self.config.tables.clone(),
            self.config.refresher.clone(),
        )
    }

    /// Start the background refresher
    #[must_use]
    pub fn spawn_refresher(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.refresher().spawn(shutdown)
    }

    /// Handle one action from `actor`
    ///
    /// # Errors
    /// Denials from the pipeline, or the action's own failure
    pub async fn handle(&self, actor: ActorId, action: Action) -> Result<Outcome> {
        let admin = self.config.is_admin(actor);
        let request = Request {
            actor,
            class: action.class(),
            admin,
            action: action.name(),
        };
        let span = tracing::debug_span!("action", %actor, name = action.name());
        self.pipeline
            .run(&request, || self.dispatch(actor, admin, action))
            .instrument(span)
            .await
    }

    async fn dispatch(&self, actor: ActorId, admin: bool, action: Action) -> Result<Outcome> {
        if action.is_admin() && !admin {
            return Err(EngineError::Forbidden(actor));
        }
        let key = SessionKey(actor);

        match action {
            Action::Register { full_name } => {
                Ok(Outcome::Registered(self.roster.register(actor, &full_name).await?))
            }
            Action::Status => Ok(Outcome::Status(self.student(actor).await?)),
            Action::SelectWeek { offset } => self.select_week(actor, offset).await.map(Outcome::Week),
            Action::SelectDay { week, day } => {
                let (student, scope) = self.student_scope(actor, &week, day).await?;
                self.day_view(key, &student, &scope).await.map(Outcome::Day)
            }
            Action::StageMark {
                week,
                day,
                row,
                mark,
            } => {
                let (student, scope) = self.student_scope(actor, &week, day).await?;
                let (sheet, _) = self.sheet(&scope).await?;
                self.staging.stage_mark(key, &scope, &sheet, row, mark)?;
                self.day_view(key, &student, &scope).await.map(Outcome::Day)
            }
            Action::StageMarkAll { week, day, mark } => {
                let (student, scope) = self.student_scope(actor, &week, day).await?;
                let (sheet, _) = self.sheet(&scope).await?;
                let report = self.staging.stage_all(key, &scope, &sheet, mark);
                let view = self.day_view(key, &student, &scope).await?;
                Ok(Outcome::StagedAll { report, view })
            }
            Action::Commit { week, day } => {
                let (student, scope) = self.student_scope(actor, &week, day).await?;
                let table = self.table(&scope);
                self.coordinator
                    .commit_marks(key, &scope, &table, &student.sequence)
                    .await
                    .map(Outcome::Committed)
            }
            Action::Discard { week, day } => {
                let (_, scope) = self.student_scope(actor, &week, day).await?;
                let count = self.staging.marks.discard(key, &scope);
                Ok(Outcome::Discarded { count })
            }
            Action::ViewCancellations { week, day, subgroup } => {
                let scope = self.admin_scope(&week, day, subgroup)?;
                self.cancellation_view(key, &scope).await.map(Outcome::Cancellations)
            }
            Action::ToggleCancellation {
                week,
                day,
                subgroup,
                row,
            } => {
                let scope = self.admin_scope(&week, day, subgroup)?;
                let (sheet, _) = self.sheet(&scope).await?;
                let cancelled = self.staging.toggle_cancellation(key, &scope, &sheet, row)?;
                tracing::debug!(%actor, %row, cancelled, "cancellation toggled");
                self.cancellation_view(key, &scope).await.map(Outcome::Cancellations)
            }
            Action::SaveCancellations { week, day, subgroup } => {
                let scope = self.admin_scope(&week, day, subgroup)?;
                let table = self.table(&scope);
                self.coordinator
                    .commit_cancellations(key, &scope, &table)
                    .await
                    .map(Outcome::CancellationsSaved)
            }
            Action::DiscardCancellations { week, day, subgroup } => {
                let scope = self.admin_scope(&week, day, subgroup)?;
                let count = self.staging.cancellations.discard(key, &scope);
                Ok(Outcome::Discarded { count })
            }
            Action::RefreshCache => Ok(Outcome::Refreshed(self.refresher().tick().await)),
            Action::QueryBlacklist => {
                self.blacklist
                    .reload(&self.cache, &self.config.tables.blacklist)
                    .await?;
                Ok(Outcome::Blacklist(self.blacklist.sorted()))
            }
            Action::ListStudents => Ok(Outcome::Students(self.roster.list().await?)),
            Action::RosterStats => Ok(Outcome::Stats(self.roster.stats().await?)),
            Action::ResetRegistrations => {
                let cleared = self.roster.reset_registrations().await?;
                let scopes_dropped = self.staging.clear_all();
                Ok(Outcome::RegistrationsReset {
                    cleared,
                    scopes_dropped,
                })
            }
        }
    }

    async fn student(&self, actor: ActorId) -> Result<StudentRecord> {
        self.roster
            .student_for(actor)
            .await?
            .ok_or(EngineError::NotRegistered(actor))
    }

    fn resolve_week(&self, token: &str) -> Result<WeekIdentifier> {
        self.addressor
            .decode(token)
            .ok_or_else(|| EngineError::UnknownWeekToken(token.to_string()))
    }

    async fn student_scope(
        &self,
        actor: ActorId,
        token: &str,
        day: Weekday,
    ) -> Result<(StudentRecord, StageScope)> {
        let student = self.student(actor).await?;
        let week = self.resolve_week(token)?;
        let scope = StageScope::new(week, day, student.subgroup.clone());
        Ok((student, scope))
    }

    fn admin_scope(&self, token: &str, day: Weekday, subgroup: String) -> Result<StageScope> {
        Ok(StageScope::new(self.resolve_week(token)?, day, subgroup))
    }

    fn table(&self, scope: &StageScope) -> String {
        self.config.tables.schedule(&scope.subgroup)
    }

    async fn sheet(&self, scope: &StageScope) -> Result<(ScheduleSheet, bool)> {
        let table = self.table(scope);
        let snapshot = self.cache.get(&table).await?;
        let sheet = ScheduleSheet::parse(&table, &snapshot.rows)?;
        Ok((sheet, snapshot.is_degraded()))
    }

    async fn day_view(
        &self,
        key: SessionKey,
        student: &StudentRecord,
        scope: &StageScope,
    ) -> Result<DayView> {
        let (sheet, degraded) = self.sheet(scope).await?;
        let pending = self.staging.marks.pending(key, scope);
        Ok(render_day(&sheet, scope, &student.sequence, &pending, degraded))
    }

    async fn cancellation_view(&self, key: SessionKey, scope: &StageScope) -> Result<CancellationView> {
        let (sheet, _) = self.sheet(scope).await?;
        let pending = self.staging.cancellations.pending(key, scope);
        Ok(render_cancellations(&sheet, scope, &pending))
    }

    async fn select_week(&self, actor: ActorId, offset: i64) -> Result<WeekView> {
        let student = self.student(actor).await?;
        let week = self
            .addressor
            .week_info(offset)
            .ok_or(EngineError::WeekOutOfRange)?;
        let token = self.addressor.encode(&week);

        let key = SessionKey(actor);
        let pending: HashMap<_, _> = Weekday::ALL
            .into_iter()
            .map(|day| {
                let scope = StageScope::new(week.clone(), day, student.subgroup.clone());
                (day, self.staging.marks.pending(key, &scope))
            })
            .collect();

        let scope = StageScope::new(week.clone(), Weekday::Monday, student.subgroup.clone());
        let (sheet, degraded) = self.sheet(&scope).await?;
        Ok(summarize_week(
            &sheet,
            &week,
            token,
            &student.sequence,
            &pending,
            degraded,
        ))
    }
}
