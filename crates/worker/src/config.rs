//! Worker configuration loaded from environment variables.

use std::time::Duration;

use agrisetu_core::retry::RetryPolicy;
use agrisetu_notify::ScheduleConfig;

/// Pipeline configuration.
///
/// All cadence and retry values have production defaults; override via
/// environment variables (shortened intervals are common in staging).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// MSP digest cadence in seconds (default: daily).
    pub msp_digest_interval_secs: u64,
    /// Weather check cadence in seconds (default: every 6 hours).
    pub weather_check_interval_secs: u64,
    /// Width of the weather period key window, in hours.
    pub weather_window_hours: u32,
    /// Retry sweep cadence in seconds.
    pub sweep_interval_secs: u64,
    /// Analytics rollup cadence in seconds (default: daily).
    pub rollup_interval_secs: u64,
    /// Maximum delivery attempts before dead-lettering.
    pub max_retries: u32,
    /// Backoff floor in seconds.
    pub backoff_floor_secs: u64,
    /// Backoff cap in seconds.
    pub backoff_cap_secs: u64,
    /// Concurrent in-flight attempts per campaign run.
    pub submit_concurrency: usize,
    /// Channels paused at startup, comma-separated.
    pub paused_channels: Vec<String>,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default    |
    /// |-------------------------------|------------|
    /// | `DATABASE_URL`                | (required) |
    /// | `MSP_DIGEST_INTERVAL_SECS`    | `86400`    |
    /// | `WEATHER_CHECK_INTERVAL_SECS` | `21600`    |
    /// | `WEATHER_WINDOW_HOURS`        | `6`        |
    /// | `SWEEP_INTERVAL_SECS`         | `60`       |
    /// | `ROLLUP_INTERVAL_SECS`        | `86400`    |
    /// | `MAX_RETRIES`                 | `3`        |
    /// | `BACKOFF_FLOOR_SECS`          | `60`       |
    /// | `BACKOFF_CAP_SECS`            | `3600`     |
    /// | `SUBMIT_CONCURRENCY`          | `16`       |
    /// | `PAUSED_CHANNELS`             | (empty)    |
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let paused_channels: Vec<String> = std::env::var("PAUSED_CHANNELS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            database_url,
            msp_digest_interval_secs: env_parse("MSP_DIGEST_INTERVAL_SECS", 86_400),
            weather_check_interval_secs: env_parse("WEATHER_CHECK_INTERVAL_SECS", 21_600),
            weather_window_hours: env_parse("WEATHER_WINDOW_HOURS", 6),
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 60),
            rollup_interval_secs: env_parse("ROLLUP_INTERVAL_SECS", 86_400),
            max_retries: env_parse("MAX_RETRIES", 3),
            backoff_floor_secs: env_parse("BACKOFF_FLOOR_SECS", 60),
            backoff_cap_secs: env_parse("BACKOFF_CAP_SECS", 3_600),
            submit_concurrency: env_parse("SUBMIT_CONCURRENCY", 16),
            paused_channels,
        }
    }

    /// Trigger cadences for the scheduler.
    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            msp_digest_interval: Duration::from_secs(self.msp_digest_interval_secs),
            weather_check_interval: Duration::from_secs(self.weather_check_interval_secs),
            weather_window_hours: self.weather_window_hours,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            rollup_interval: Duration::from_secs(self.rollup_interval_secs),
        }
    }

    /// Retry policy for the orchestrator.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_floor_secs: self.backoff_floor_secs,
            backoff_cap_secs: self.backoff_cap_secs,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be a valid value: {e}")),
        Err(_) => default,
    }
}
