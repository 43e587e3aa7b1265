//! Interceptor pipeline applied before every action
//!
//! Stages run in order and may short-circuit:
//! - [`Verdict::Admit`]: continue
//! - [`Verdict::Degrade`]: continue, but note why the stage could not decide
//! - [`Verdict::Deny`]: stop with a typed [`Denial`]
//!
//! [`Pipeline::run`] wraps the handler in execution-time instrumentation.

use crate::blacklist::BlacklistIndex;
use crate::error::{EngineError, Result};
use crate::rate_limit::{ActionClass, Admission, RateLimiter};
use rollcall_ledger::ActorId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What an interceptor sees of an inbound action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Caller
    pub actor: ActorId,
    /// Action class for rate limiting
    pub class: ActionClass,
    /// Caller is an administrator
    pub admin: bool,
    /// Action name for logs
    pub action: &'static str,
}

/// Why a request was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Caller is blacklisted
    Blacklisted,
    /// Caller exceeded the rate limit
    RateLimited {
        /// Time until a request would be admitted
        retry_after: Duration,
    },
}

impl Denial {
    /// Engine error for this denial
    #[must_use]
    pub fn into_error(self, actor: ActorId) -> EngineError {
        match self {
            Self::Blacklisted => EngineError::Blacklisted(actor),
            Self::RateLimited { retry_after } => EngineError::RateLimited { retry_after },
        }
    }
}

/// Decision of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the request through
    Admit,
    /// Stop the request
    Deny(Denial),
    /// Let the request through without a decision
    Degrade(&'static str),
}

/// One stage of the pipeline
pub trait Interceptor: Send + Sync + std::fmt::Debug {
    /// Stage name (for logs)
    fn name(&self) -> &'static str;

    /// Decide on a request
    fn intercept(&self, request: &Request) -> Verdict;
}

/// Rejects blacklisted callers; administrators are exempt
#[derive(Debug, Clone)]
pub struct BlacklistGate {
    index: Arc<BlacklistIndex>,
}

impl BlacklistGate {
    /// Create over a shared index
    #[must_use]
    pub fn new(index: Arc<BlacklistIndex>) -> Self {
        Self { index }
    }
}

impl Interceptor for BlacklistGate {
    fn name(&self) -> &'static str {
        "blacklist"
    }

    fn intercept(&self, request: &Request) -> Verdict {
        if request.admin {
            Verdict::Admit
        } else if !self.index.is_loaded() {
            Verdict::Degrade("blacklist not loaded yet")
        } else if self.index.contains(request.actor) {
            Verdict::Deny(Denial::Blacklisted)
        } else {
            Verdict::Admit
        }
    }
}

/// Applies the per-class rate limits
#[derive(Debug, Clone)]
pub struct RateGate {
    limiter: Arc<RateLimiter>,
}

impl RateGate {
    /// Create over a shared limiter
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl Interceptor for RateGate {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn intercept(&self, request: &Request) -> Verdict {
        match self.limiter.check(request.actor, request.class) {
            Admission::Admitted | Admission::Burst => Verdict::Admit,
            Admission::Denied { retry_after } => Verdict::Deny(Denial::RateLimited { retry_after }),
        }
    }
}

/// Ordered interceptor chain
#[derive(Debug, Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Interceptor>>,
}

impl Pipeline {
    /// Create an empty pipeline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    #[must_use]
    pub fn with_stage(mut self, stage: impl Interceptor + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Stage names in order
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage; the first denial wins
    ///
    /// # Errors
    /// The first [`Denial`]
    pub fn admit(&self, request: &Request) -> std::result::Result<Vec<&'static str>, Denial> {
        let mut degraded = Vec::new();
        for stage in &self.stages {
            match stage.intercept(request) {
                Verdict::Admit => {}
                Verdict::Degrade(reason) => {
                    tracing::warn!(stage = stage.name(), actor = %request.actor, reason, "stage degraded");
                    degraded.push(reason);
                }
                Verdict::Deny(denial) => {
                    tracing::debug!(stage = stage.name(), actor = %request.actor, ?denial, "request denied");
                    return Err(denial);
                }
            }
        }
        Ok(degraded)
    }

    /// Admit the request, then run and time the handler
    ///
    /// # Errors
    /// The denial as an [`EngineError`], or the handler's error
    pub async fn run<T, F, Fut>(&self, request: &Request, handler: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit(request)
            .map_err(|denial| denial.into_error(request.actor))?;

        let started = Instant::now();
        let result = handler().await;
        let elapsed_ms = started.elapsed().as_millis();
        match &result {
            Ok(_) => tracing::debug!(action = request.action, actor = %request.actor, elapsed_ms, "handled"),
            Err(e) => tracing::debug!(action = request.action, actor = %request.actor, elapsed_ms, error = %e, "handler failed"),
        }
        result
    }
}
