//! Sliding-window rate limiter with burst allowance
//!
//! One bucket per `(actor, action class)`. A bucket remembers the admission
//! timestamps of the last `period`:
//! - fewer than `max_requests` recorded: admit
//! - fewer than `max_requests + burst_allowance` recorded and the previous
//!   admission is at least `min_spacing` old: admit as burst
//! - otherwise deny with the time until the oldest timestamp leaves the window
//!
//! Distinct action classes never share a bucket, so a burst of button
//! presses cannot starve free-text messages and vice versa.

use dashmap::DashMap;
use rollcall_ledger::ActorId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Class of inbound action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionClass {
    /// UI button press
    Button,
    /// Free-text message
    Message,
}

/// Limits of one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLimits {
    /// Steady-state requests per period
    pub max_requests: usize,
    /// Window length
    pub period: Duration,
    /// Extra requests admitted when spaced apart
    pub burst_allowance: usize,
    /// Minimum spacing between burst admissions
    pub min_spacing: Duration,
}

impl BucketLimits {
    fn capacity(&self) -> usize {
        self.max_requests + self.burst_allowance
    }
}

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Within the steady-state rate
    Admitted,
    /// Admitted from the burst allowance
    Burst,
    /// Rejected
    Denied {
        /// Time until the window frees a slot
        retry_after: Duration,
    },
}

impl Admission {
    /// Whether the request may proceed
    #[inline]
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Denied { .. })
    }
}

#[derive(Debug)]
struct Bucket {
    stamps: VecDeque<Instant>,
    last_seen: Instant,
}

impl Bucket {
    fn new(now: Instant, capacity: usize) -> Self {
        Self {
            stamps: VecDeque::with_capacity(capacity),
            last_seen: now,
        }
    }

    fn evict(&mut self, now: Instant, period: Duration) {
        while self
            .stamps
            .front()
            .is_some_and(|t| now.duration_since(*t) >= period)
        {
            self.stamps.pop_front();
        }
    }

    fn wait(&self, now: Instant, limits: &BucketLimits) -> Duration {
        let count = self.stamps.len();
        if count < limits.max_requests {
            return Duration::ZERO;
        }
        if count < limits.capacity() {
            // Burst range: only the spacing since the last admission matters
            return self.stamps.back().map_or(Duration::ZERO, |last| {
                (*last + limits.min_spacing).saturating_duration_since(now)
            });
        }
        self.stamps
            .front()
            .map_or(Duration::ZERO, |oldest| {
                (*oldest + limits.period).saturating_duration_since(now)
            })
    }
}

/// Process-wide rate limiter store
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<(ActorId, ActionClass), Bucket>,
    button: BucketLimits,
    message: BucketLimits,
    retention: Duration,
}

impl RateLimiter {
    /// Create with per-class limits
    #[must_use]
    pub fn new(button: BucketLimits, message: BucketLimits, retention: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            button,
            message,
            retention,
        }
    }

    /// Limits of a class
    #[inline]
    #[must_use]
    pub fn limits(&self, class: ActionClass) -> BucketLimits {
        match class {
            ActionClass::Button => self.button,
            ActionClass::Message => self.message,
        }
    }

    /// Check and, if admitted, record a request
    pub fn check(&self, actor: ActorId, class: ActionClass) -> Admission {
        let limits = self.limits(class);
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry((actor, class))
            .or_insert_with(|| Bucket::new(now, limits.capacity()));

        bucket.evict(now, limits.period);
        let previous = bucket.stamps.back().copied();
        bucket.last_seen = now;

        let count = bucket.stamps.len();
        let admission = if count < limits.max_requests {
            Admission::Admitted
        } else if count < limits.capacity()
            && previous.map_or(true, |t| now.duration_since(t) >= limits.min_spacing)
        {
            Admission::Burst
        } else {
            Admission::Denied {
                retry_after: bucket.wait(now, &limits),
            }
        };

        match admission {
            Admission::Admitted => bucket.stamps.push_back(now),
            Admission::Burst => {
                tracing::debug!(%actor, ?class, "burst admission");
                bucket.stamps.push_back(now);
            }
            Admission::Denied { retry_after } => {
                tracing::debug!(%actor, ?class, retry_after_ms = retry_after.as_millis(), "rate limited");
                metrics::counter!("rollcall_rate_limited_total").increment(1);
            }
        }
        admission
    }

    /// Check and record; `true` if admitted
    #[inline]
    pub fn allow(&self, actor: ActorId, class: ActionClass) -> bool {
        self.check(actor, class).is_admitted()
    }

    /// Time until a request would be admitted; zero if it would be admitted now
    ///
    /// In the burst range this is the remaining burst spacing, otherwise the
    /// time until the oldest recorded request leaves the window.
    #[must_use]
    pub fn wait_time(&self, actor: ActorId, class: ActionClass) -> Duration {
        let limits = self.limits(class);
        let now = Instant::now();
        self.buckets.get_mut(&(actor, class)).map_or(Duration::ZERO, |mut bucket| {
            bucket.evict(now, limits.period);
            bucket.wait(now, &limits)
        })
    }

    /// Remove buckets untouched for longer than the retention horizon
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_seen) <= self.retention);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(removed, "swept idle rate buckets");
        }
        removed
    }

    /// Number of live buckets
    #[inline]
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
