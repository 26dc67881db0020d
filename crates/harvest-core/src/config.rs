use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Shortest poller period. `tokio::time::interval` rejects zero.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Tuning knobs for an [`Orchestrator`](crate::orchestrator::Orchestrator).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Minimum spacing between two fetches on one hostname.
    pub rate_limit_interval: Duration,
    /// How long `submit_job` waits for a queue slot.
    pub submit_timeout: Duration,
    pub retry_poll_interval: Duration,
    /// Retry delay for attempt `n` is `backoff_base * 2^n`.
    pub backoff_base: Duration,
    pub due_poll_interval: Duration,
    /// Queued jobs untouched for this long are assumed lost and re-enqueued.
    pub orphan_after: Duration,
    /// Maximum rows a poller promotes per tick.
    pub poll_batch: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 100,
            rate_limit_interval: Duration::from_secs(1),
            submit_timeout: Duration::from_secs(5),
            retry_poll_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(30),
            due_poll_interval: Duration::from_secs(60),
            orphan_after: Duration::from_secs(10 * 60),
            poll_batch: 100,
        }
    }
}

impl OrchestratorConfig {
    /// Read overrides from the environment, falling back to defaults.
    ///
    /// - `HARVEST_WORKERS`
    /// - `HARVEST_QUEUE_CAPACITY`
    /// - `HARVEST_RATE_LIMIT_MS`
    /// - `HARVEST_SUBMIT_TIMEOUT_SECS`
    /// - `HARVEST_RETRY_POLL_SECS`
    /// - `HARVEST_BACKOFF_BASE_SECS`
    /// - `HARVEST_DUE_POLL_SECS`
    /// - `HARVEST_ORPHAN_AFTER_SECS`
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let workers = env_or("HARVEST_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(AppError::ConfigError(
                "HARVEST_WORKERS must be at least 1".into(),
            ));
        }
        let queue_capacity = env_or("HARVEST_QUEUE_CAPACITY", defaults.queue_capacity)?;
        if queue_capacity == 0 {
            return Err(AppError::ConfigError(
                "HARVEST_QUEUE_CAPACITY must be at least 1".into(),
            ));
        }

        Ok(Self {
            workers,
            queue_capacity,
            rate_limit_interval: Duration::from_millis(env_or(
                "HARVEST_RATE_LIMIT_MS",
                defaults.rate_limit_interval.as_millis() as u64,
            )?),
            submit_timeout: secs_or("HARVEST_SUBMIT_TIMEOUT_SECS", defaults.submit_timeout)?,
            retry_poll_interval: poll_secs_or(
                "HARVEST_RETRY_POLL_SECS",
                defaults.retry_poll_interval,
            )?,
            backoff_base: secs_or("HARVEST_BACKOFF_BASE_SECS", defaults.backoff_base)?,
            due_poll_interval: poll_secs_or("HARVEST_DUE_POLL_SECS", defaults.due_poll_interval)?,
            orphan_after: secs_or("HARVEST_ORPHAN_AFTER_SECS", defaults.orphan_after)?,
            poll_batch: defaults.poll_batch,
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_rate_limit(mut self, interval: Duration) -> Self {
        self.rate_limit_interval = interval;
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn with_retry_poll_interval(mut self, interval: Duration) -> Self {
        self.retry_poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_due_poll_interval(mut self, interval: Duration) -> Self {
        self.due_poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_orphan_after(mut self, after: Duration) -> Self {
        self.orphan_after = after;
        self
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}': must be a non-negative integer"))
        }),
    }
}

fn secs_or(key: &str, default: Duration) -> Result<Duration, AppError> {
    env_or(key, default.as_secs()).map(Duration::from_secs)
}

fn poll_secs_or(key: &str, default: Duration) -> Result<Duration, AppError> {
    let interval = secs_or(key, default)?;
    if interval.is_zero() {
        return Err(AppError::ConfigError(format!("{key} must be at least 1")));
    }
    Ok(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_contract() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.workers, 5);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.rate_limit_interval, Duration::from_secs(1));
        assert_eq!(config.submit_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_poll_interval, Duration::from_secs(30));
        assert_eq!(config.due_poll_interval, Duration::from_secs(60));
    }

    #[test]
    fn builders_clamp_to_one() {
        let config = OrchestratorConfig::default()
            .with_workers(0)
            .with_queue_capacity(0);
        assert_eq!(config.workers, 1);
        assert_eq!(config.queue_capacity, 1);
    }

    #[test]
    fn builders_clamp_zero_poll_intervals() {
        let config = OrchestratorConfig::default()
            .with_retry_poll_interval(Duration::ZERO)
            .with_due_poll_interval(Duration::ZERO);
        assert_eq!(config.retry_poll_interval, MIN_POLL_INTERVAL);
        assert_eq!(config.due_poll_interval, MIN_POLL_INTERVAL);
    }

    #[test]
    fn zero_poll_interval_from_env_is_rejected() {
        let key = "HARVEST_TEST_ZERO_POLL_SECS";
        unsafe { std::env::set_var(key, "0") };
        let err = poll_secs_or(key, Duration::from_secs(30)).unwrap_err();
        unsafe { std::env::remove_var(key) };
        assert!(matches!(err, AppError::ConfigError(_)));
        assert_eq!(
            poll_secs_or(key, Duration::from_secs(30)).unwrap(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn env_or_rejects_garbage() {
        // Unique key so parallel tests never observe it.
        let key = "HARVEST_TEST_ENV_OR_GARBAGE";
        unsafe { std::env::set_var(key, "many") };
        let err = env_or::<usize>(key, 1).unwrap_err();
        unsafe { std::env::remove_var(key) };
        assert!(matches!(err, AppError::ConfigError(_)));
        assert_eq!(env_or::<usize>(key, 7).unwrap(), 7);
    }
}
