//! Engine configuration
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! admins = [1001]
//!
//! [semester]
//! start = "2026-09-01"
//! weeks = 17
//!
//! [cache]
//! default_ttl_secs = 300
//! ttl_overrides = { "Студенты" = 900 }
//! ```

use crate::rate_limit::{ActionClass, BucketLimits};
use chrono::NaiveDate;
use rollcall_ledger::{ActorId, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config file {path}: {source}")]
    Io {
        /// Offending path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML did not match the schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parsed but are inconsistent
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Semester calendar
    pub semester: SemesterConfig,
    /// Ledger table names
    pub tables: TableNames,
    /// Read cache
    pub cache: CacheConfig,
    /// Rate limiting
    pub rate_limit: RateLimitConfig,
    /// Remote retry policy
    pub retry: RetryConfig,
    /// Background refresher
    pub refresher: RefresherConfig,
    /// Actors allowed to use administrative actions
    pub admins: Vec<i64>,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML document
    ///
    /// # Errors
    /// `ConfigError::Parse` or `ConfigError::Invalid`
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, otherwise as [`Self::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    /// `ConfigError::Invalid` describing the first violation
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.semester.weeks == 0 {
            return Err(ConfigError::Invalid("semester.weeks must be at least 1".into()));
        }
        if !self.tables.subgroup_template.contains("{subgroup}") {
            return Err(ConfigError::Invalid(
                "tables.subgroup_template must contain '{subgroup}'".into(),
            ));
        }
        for (name, bucket) in [
            ("buttons", &self.rate_limit.buttons),
            ("messages", &self.rate_limit.messages),
        ] {
            if bucket.max_requests == 0 || bucket.period_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "rate_limit.{name} needs max_requests and period_secs above zero"
                )));
            }
        }
        Ok(())
    }

    /// With semester start
    #[inline]
    #[must_use]
    pub fn with_semester_start(mut self, start: NaiveDate) -> Self {
        self.semester.start = start;
        self
    }

    /// With administrators
    #[inline]
    #[must_use]
    pub fn with_admins(mut self, admins: impl IntoIterator<Item = i64>) -> Self {
        self.admins = admins.into_iter().collect();
        self
    }

    /// With retry policy values
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Whether an actor may use administrative actions
    #[inline]
    #[must_use]
    pub fn is_admin(&self, actor: ActorId) -> bool {
        self.admins.contains(&actor.0)
    }
}

/// Semester calendar
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SemesterConfig {
    /// First day of week 1
    pub start: NaiveDate,
    /// Number of weeks in the semester
    pub weeks: u32,
    /// Fixed reference zone, minutes east of UTC
    pub utc_offset_minutes: i32,
    /// Label prefix for odd weeks
    pub odd_label: String,
    /// Label prefix for even weeks
    pub even_label: String,
}

impl Default for SemesterConfig {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap_or_default(),
            weeks: 17,
            utc_offset_minutes: 180,
            odd_label: "Числитель".to_string(),
            even_label: "Знаменатель".to_string(),
        }
    }
}

/// Ledger table names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    /// Student roster
    pub roster: String,
    /// Per-subgroup schedule table, `{subgroup}` is substituted
    pub subgroup_template: String,
    /// Blocked actors
    pub blacklist: String,
}

impl TableNames {
    /// Schedule table of a subgroup
    #[must_use]
    pub fn schedule(&self, subgroup: &str) -> String {
        self.subgroup_template.replace("{subgroup}", subgroup.trim())
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            roster: "Студенты".to_string(),
            subgroup_template: "{subgroup} подгруппа".to_string(),
            blacklist: "Черный список".to_string(),
        }
    }
}

/// Read cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied to tables without an override
    pub default_ttl_secs: u64,
    /// Per-table TTL in seconds
    pub ttl_overrides: HashMap<String, u64>,
    /// Maximum number of cached tables
    pub max_tables: u64,
}

impl CacheConfig {
    /// Default TTL
    #[inline]
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Per-table TTL overrides
    #[must_use]
    pub fn overrides(&self) -> HashMap<String, Duration> {
        self.ttl_overrides
            .iter()
            .map(|(table, secs)| (table.clone(), Duration::from_secs(*secs)))
            .collect()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            ttl_overrides: HashMap::new(),
            max_tables: 64,
        }
    }
}

/// Rate limiter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Bucket for UI button actions
    pub buttons: BucketConfig,
    /// Bucket for free-text messages
    pub messages: BucketConfig,
    /// Buckets untouched for longer are swept
    pub retention_secs: u64,
}

impl RateLimitConfig {
    /// Limits for one action class
    #[must_use]
    pub fn limits(&self, class: ActionClass) -> BucketLimits {
        match class {
            ActionClass::Button => self.buttons.limits(),
            ActionClass::Message => self.messages.limits(),
        }
    }

    /// Sweep horizon
    #[inline]
    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            buttons: BucketConfig::default(),
            messages: BucketConfig::default(),
            retention_secs: 3600,
        }
    }
}

/// One sliding-window bucket
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Steady-state requests per period
    pub max_requests: usize,
    /// Window length in seconds
    pub period_secs: u64,
    /// Extra requests admitted when spaced apart
    pub burst_allowance: usize,
    /// Minimum spacing for burst admission, milliseconds
    pub min_burst_spacing_ms: u64,
}

impl BucketConfig {
    /// Runtime limits
    #[must_use]
    pub fn limits(&self) -> BucketLimits {
        BucketLimits {
            max_requests: self.max_requests,
            period: Duration::from_secs(self.period_secs),
            burst_allowance: self.burst_allowance,
            min_spacing: Duration::from_millis(self.min_burst_spacing_ms),
        }
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            period_secs: 60,
            burst_allowance: 15,
            min_burst_spacing_ms: 500,
        }
    }
}

/// Retry policy settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per remote call
    pub max_attempts: u32,
    /// First backoff delay, milliseconds
    pub base_delay_ms: u64,
    /// Backoff cap, milliseconds
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// Runtime policy
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 200,
            max_delay_ms: 5000,
        }
    }
}

/// Background refresher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefresherConfig {
    /// Tick interval in seconds
    pub interval_secs: u64,
    /// How many of the most-accessed schedule tables to reload per tick
    pub hot_tables: usize,
    /// Staged scopes idle for longer are dropped
    pub session_idle_secs: u64,
}

impl RefresherConfig {
    /// Tick interval
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Session idle horizon
    #[inline]
    #[must_use]
    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            interval_secs: 120,
            hot_tables: 3,
            session_idle_secs: 1800,
        }
    }
}
