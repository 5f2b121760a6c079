use crate::runtime::telemetry;
use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_MAX_ACTIVE_REQUESTS: usize = 50;
const DEFAULT_MAX_ACTIVE_PER_ENDPOINT: usize = 18;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 250;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;

/// Runtime configuration for the content loader.
///
/// All instances must be constructed via [`LoaderConfig::builder`] (or taken
/// from [`LoaderConfig::default`]) so invariants are validated before any
/// consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    max_active_requests: usize,
    max_active_per_endpoint: usize,
    request_timeout: Duration,
    max_attempts: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
    metrics_interval: Duration,
}

impl LoaderConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }

    /// Maximum concurrent requests the transport accepts across all endpoints.
    pub fn max_active_requests(&self) -> usize {
        self.max_active_requests
    }

    /// Maximum concurrent requests the transport accepts per endpoint.
    pub fn max_active_per_endpoint(&self) -> usize {
        self.max_active_per_endpoint
    }

    /// Per-request timeout applied by the HTTP client.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Attempts per fetch before the failure is reported.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Backoff applied after the first failed attempt.
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Upper bound on the exponential backoff.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.max_active_requests == 0 {
            bail!("max_active_requests must be greater than 0");
        }

        if self.max_active_per_endpoint == 0 {
            bail!("max_active_per_endpoint must be greater than 0");
        }

        if self.max_active_per_endpoint > self.max_active_requests {
            bail!(
                "max_active_per_endpoint ({}) must not exceed max_active_requests ({})",
                self.max_active_per_endpoint,
                self.max_active_requests,
            );
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }

        if self.initial_backoff.is_zero() {
            bail!("initial_backoff must be greater than 0");
        }

        if self.max_backoff < self.initial_backoff {
            bail!("max_backoff must not be smaller than initial_backoff");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_active_requests: DEFAULT_MAX_ACTIVE_REQUESTS,
            max_active_per_endpoint: DEFAULT_MAX_ACTIVE_PER_ENDPOINT,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct LoaderConfigBuilder {
    max_active_requests: Option<usize>,
    max_active_per_endpoint: Option<usize>,
    request_timeout: Option<Duration>,
    max_attempts: Option<usize>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    metrics_interval: Option<Duration>,
}

impl LoaderConfigBuilder {
    pub fn max_active_requests(mut self, count: usize) -> Self {
        self.max_active_requests = Some(count);
        self
    }

    pub fn max_active_per_endpoint(mut self, count: usize) -> Self {
        self.max_active_per_endpoint = Some(count);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<LoaderConfig> {
        let defaults = LoaderConfig::default();
        let config = LoaderConfig {
            max_active_requests: self
                .max_active_requests
                .unwrap_or(defaults.max_active_requests),
            max_active_per_endpoint: self
                .max_active_per_endpoint
                .unwrap_or(defaults.max_active_per_endpoint),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff: self.initial_backoff.unwrap_or(defaults.initial_backoff),
            max_backoff: self.max_backoff.unwrap_or(defaults.max_backoff),
            metrics_interval: self.metrics_interval.unwrap_or(defaults.metrics_interval),
        };

        config.validate()?;
        Ok(config)
    }
}
