//! Worker configuration
//!
//! Defines all configurable parameters for the worker daemon:
//! colbuilder invocation, lane sizing, time limits, retry policy,
//! and the expiry sweep. Numeric policy ranges for job parameters
//! live here too, in [`PolicyLimits`], rather than being hard-coded
//! at validation sites.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

/// Numeric policy table for geometry and density parameters.
#[derive(Debug, Clone)]
pub struct PolicyLimits {
    /// Accepted contact distance between molecules, nm
    pub contact_distance_nm: RangeInclusive<f64>,
    /// Accepted fibril length, nm
    pub fibril_length_nm: RangeInclusive<f64>,
    /// Accepted crosslink density, percent
    pub density_percent: RangeInclusive<f64>,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            contact_distance_nm: 0.1..=10.0,
            fibril_length_nm: 1.0..=1000.0,
            density_percent: 0.0..=100.0,
        }
    }
}

/// Retry policy knobs for the task queue.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of re-dispatches after the first attempt
    pub max_retries: u32,
    /// First backoff delay; doubles per retry
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
        }
    }
}

/// Worker daemon configuration
///
/// All timeouts and counts are configurable to allow tuning for
/// different deployment scenarios (dev vs prod, short vs long runs).
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the colbuilder executable
    pub colbuilder_path: PathBuf,

    /// Base directory under which per-job workdirs are created
    pub workdir_base: PathBuf,

    /// Workers pulling from the default (maintenance) lane
    pub default_lane_workers: usize,

    /// Workers pulling from the molecular (heavy computation) lane
    pub molecular_lane_workers: usize,

    /// Bound on each lane's in-flight channel
    pub lane_capacity: usize,

    /// Soft per-job time limit: graceful stop, retryable
    pub soft_time_limit: Duration,

    /// Hard per-job time limit: forced kill, fatal
    pub hard_time_limit: Duration,

    /// Grace between SIGTERM and SIGKILL on cancellation/soft stop
    pub termination_grace: Duration,

    pub retry: RetryConfig,

    /// Jobs older than this are eligible for the expiry sweep
    pub retention: Duration,

    /// Cadence of the expiry sweep
    pub sweep_interval: Duration,

    pub limits: PolicyLimits,
}

impl Config {
    /// Creates configuration from environment variables, falling back
    /// to defaults for anything unset.
    ///
    /// Recognized variables: COLBUILDER_PATH, WORKDIR_BASE,
    /// DEFAULT_LANE_WORKERS, MOLECULAR_LANE_WORKERS, LANE_CAPACITY,
    /// SOFT_TIME_LIMIT, HARD_TIME_LIMIT, TERMINATION_GRACE,
    /// MAX_RETRIES, RETRY_BASE_DELAY, RETRY_MAX_DELAY,
    /// RETENTION_DAYS, SWEEP_INTERVAL (seconds unless noted).
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let path = |key: &str, fallback: PathBuf| {
            std::env::var(key).map(PathBuf::from).unwrap_or(fallback)
        };
        let secs = |key: &str, fallback: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };
        let count = |key: &str, fallback: usize| {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(fallback)
        };

        Self {
            colbuilder_path: path("COLBUILDER_PATH", defaults.colbuilder_path),
            workdir_base: path("WORKDIR_BASE", defaults.workdir_base),
            default_lane_workers: count("DEFAULT_LANE_WORKERS", defaults.default_lane_workers),
            molecular_lane_workers: count(
                "MOLECULAR_LANE_WORKERS",
                defaults.molecular_lane_workers,
            ),
            lane_capacity: count("LANE_CAPACITY", defaults.lane_capacity),
            soft_time_limit: secs("SOFT_TIME_LIMIT", defaults.soft_time_limit),
            hard_time_limit: secs("HARD_TIME_LIMIT", defaults.hard_time_limit),
            termination_grace: secs("TERMINATION_GRACE", defaults.termination_grace),
            retry: RetryConfig {
                max_retries: count("MAX_RETRIES", defaults.retry.max_retries as usize) as u32,
                base_delay: secs("RETRY_BASE_DELAY", defaults.retry.base_delay),
                max_delay: secs("RETRY_MAX_DELAY", defaults.retry.max_delay),
            },
            retention: std::env::var("RETENTION_DAYS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(|days| Duration::from_secs(days * 24 * 60 * 60))
                .unwrap_or(defaults.retention),
            sweep_interval: secs("SWEEP_INTERVAL", defaults.sweep_interval),
            limits: defaults.limits,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_lane_workers == 0 || self.molecular_lane_workers == 0 {
            anyhow::bail!("each lane needs at least one worker");
        }
        if self.lane_capacity == 0 {
            anyhow::bail!("lane_capacity must be greater than 0");
        }
        if self.soft_time_limit >= self.hard_time_limit {
            anyhow::bail!("soft_time_limit must be below hard_time_limit");
        }
        if self.soft_time_limit.is_zero() {
            anyhow::bail!("soft_time_limit must be greater than 0");
        }
        if self.retry.base_delay > self.retry.max_delay {
            anyhow::bail!("retry base_delay must not exceed max_delay");
        }
        if self.sweep_interval.is_zero() {
            anyhow::bail!("sweep_interval must be greater than 0");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            colbuilder_path: PathBuf::from("/opt/venv/bin/colbuilder"),
            workdir_base: PathBuf::from("/var/lib/colforge/jobs"),
            default_lane_workers: 1,
            molecular_lane_workers: 2,
            lane_capacity: 64,
            // 55 min soft / 1 h hard, matching the deployed tool budget
            soft_time_limit: Duration::from_secs(3300),
            hard_time_limit: Duration::from_secs(3600),
            termination_grace: Duration::from_secs(10),
            retry: RetryConfig::default(),
            retention: Duration::from_secs(30 * 24 * 60 * 60),
            sweep_interval: Duration::from_secs(24 * 60 * 60),
            limits: PolicyLimits::default(),
        }
    }
}
