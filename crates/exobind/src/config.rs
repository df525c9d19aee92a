//! Runtime configuration.

use std::time::Duration;

/// Environment variable overriding [`Config::bind_timeout`], in milliseconds.
pub const BIND_TIMEOUT_ENV: &str = "EXOBIND_BIND_TIMEOUT_MS";
/// Environment variable overriding [`Config::retry_interval`], in milliseconds.
pub const RETRY_INTERVAL_ENV: &str = "EXOBIND_RETRY_INTERVAL_MS";

/// Floor for [`Config::retry_interval`]. Binds never re-check more often.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Tunables for binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Upper bound on how long a bind waits for the remote registration.
    pub bind_timeout: Duration,
    /// How often a waiting bind re-checks the registration cache. Values
    /// below [`MIN_RETRY_INTERVAL`] are treated as the minimum.
    pub retry_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_timeout: Duration::from_millis(3000),
            retry_interval: Duration::from_millis(25),
        }
    }
}

impl Config {
    pub fn with_bind_timeout(mut self, timeout: Duration) -> Self {
        self.bind_timeout = timeout;
        self
    }

    /// Sets the retry interval, clamped to at least [`MIN_RETRY_INTERVAL`].
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_RETRY_INTERVAL {
            tracing::warn!(?interval, "retry interval below minimum, clamping");
        }
        self.retry_interval = interval.max(MIN_RETRY_INTERVAL);
        self
    }

    /// Defaults overridden by the `EXOBIND_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(ms) = read_millis(&lookup, BIND_TIMEOUT_ENV) {
            config.bind_timeout = ms;
        }
        if let Some(ms) = read_millis(&lookup, RETRY_INTERVAL_ENV) {
            config.retry_interval = ms;
        }
        config
    }
}

fn read_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(0) if key == RETRY_INTERVAL_ENV => {
            tracing::warn!(%key, "retry interval must be positive, using default");
            None
        }
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(e) => {
            tracing::warn!(%key, value = %raw, error = %e, "ignoring unparsable setting");
            None
        }
    }
}
