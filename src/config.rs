//! Electorate Configuration
//!
//! Configuration structures for elections: candidacy options, the
//! retry/backoff policy used against the coordination service, and
//! TOML loading for processes that configure elections from a file.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Top-level electorate configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ElectionConfig {
    /// Election behavior options
    #[serde(default)]
    pub election: ElectionOptions,

    /// Backoff policy for transient coordination-service failures
    #[serde(default)]
    pub backoff: BackoffConfig,
}

/// Watch strategy used while waiting as a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatchStrategy {
    /// Watch only the next-lower live ordinal. One notification per
    /// relevant churn event; avoids the herd effect.
    Predecessor,
    /// Watch the entire child set. O(N) notifications per churn event,
    /// kept for auditability; correctness is identical.
    FullChildren,
}

/// Election behavior options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionOptions {
    /// Re-enter the candidate pool after losing or relinquishing leadership
    #[serde(default = "default_auto_requeue")]
    pub auto_requeue: bool,

    /// How long a canceled workload may take to return before the tenure
    /// is forcibly ended and marked LOST
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Candidate watch strategy
    #[serde(default = "default_watch_strategy")]
    pub watch_strategy: WatchStrategy,
}

/// Backoff policy for transient coordination-service failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Multiplier applied per attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Retries before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Cap on any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

// Default value functions
fn default_auto_requeue() -> bool {
    true
}

fn default_grace_period_ms() -> u64 {
    5000
}

fn default_watch_strategy() -> WatchStrategy {
    WatchStrategy::Predecessor
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ElectionOptions {
    fn default() -> Self {
        Self {
            auto_requeue: default_auto_requeue(),
            grace_period_ms: default_grace_period_ms(),
            watch_strategy: default_watch_strategy(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_retries: default_max_retries(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ElectionOptions {
    /// Get the workload shutdown grace period as Duration
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl BackoffConfig {
    /// Delay before retry `attempt` (zero-based), with jitter.
    ///
    /// Returns `None` once `max_retries` is exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }

        let base = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay_ms as f64);

        // +/- 12.5% jitter so retrying candidates do not stampede in lockstep
        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(0.875..=1.125);
        let ms = (capped * jitter).max(1.0) as u64;

        Some(Duration::from_millis(ms))
    }
}

impl ElectionConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: ElectionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.election.grace_period_ms == 0 {
            return Err(crate::Error::Config(
                "election.grace_period_ms must be non-zero".into(),
            ));
        }

        if self.backoff.multiplier < 1.0 {
            return Err(crate::Error::Config(
                "backoff.multiplier must be >= 1.0".into(),
            ));
        }

        if self.backoff.initial_delay_ms == 0 {
            return Err(crate::Error::Config(
                "backoff.initial_delay_ms must be non-zero".into(),
            ));
        }

        Ok(())
    }
}
