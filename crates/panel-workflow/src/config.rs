//! Configuration for the workflow engine

use panel_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Configuration for the workflow engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ceiling on executions that are RUNNING or PAUSED at once
    pub max_concurrent_executions: usize,

    /// Number of node invocations that may run at once across all executions
    pub worker_pool_size: usize,

    /// Wall-clock budget for an execution when the submission sets none
    pub default_timeout: Duration,

    /// Initial backoff before an execution-level retry
    pub retry_backoff_base: Duration,

    /// Execution-level retries when the submission sets none
    pub default_max_retries: u32,

    /// Node invocations after which a run is aborted (loop guard)
    pub max_node_executions: usize,

    /// Total time the `sleep` helper may block within one scripted expression
    pub max_script_sleep: Duration,

    /// Request timeout for the webhook notification transport
    pub webhook_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 10,
            worker_pool_size: 8,
            default_timeout: Duration::from_secs(30 * 60), // 30 minutes
            retry_backoff_base: Duration::from_secs(1),
            default_max_retries: 0,
            max_node_executions: 10_000,
            max_script_sleep: Duration::from_secs(1),
            webhook_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Override limits from `PANEL_MAX_CONCURRENT`, `PANEL_WORKER_POOL` and
    /// `PANEL_TIMEOUT_SECS`
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(value) = env_number("PANEL_MAX_CONCURRENT")? {
            self.max_concurrent_executions = value as usize;
        }
        if let Some(value) = env_number("PANEL_WORKER_POOL")? {
            self.worker_pool_size = value as usize;
        }
        if let Some(value) = env_number("PANEL_TIMEOUT_SECS")? {
            self.default_timeout = Duration::from_secs(value);
        }
        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("max_concurrent_executions", self.max_concurrent_executions),
            ("worker_pool_size", self.worker_pool_size),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than 0")));
            }
            // Both sizes become semaphore permit counts
            if value > Semaphore::MAX_PERMITS {
                return Err(Error::Config(format!(
                    "{name} must be at most {}, got {value}",
                    Semaphore::MAX_PERMITS
                )));
            }
        }

        if self.default_timeout.is_zero() {
            return Err(Error::Config(
                "default_timeout must be greater than 0".to_string(),
            ));
        }

        if self.webhook_timeout.is_zero() {
            return Err(Error::Config(
                "webhook_timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_node_executions == 0 {
            return Err(Error::Config(
                "max_node_executions must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get retry backoff duration for attempt number
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff_base * 2_u32.saturating_pow(attempt.min(16))
    }
}

fn env_number(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name} must be a non-negative integer, got '{raw}'"))),
        Err(_) => Ok(None),
    }
}

/// Builder for EngineConfig
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    max_concurrent_executions: Option<usize>,
    worker_pool_size: Option<usize>,
    default_timeout: Option<Duration>,
    retry_backoff_base: Option<Duration>,
    default_max_retries: Option<u32>,
    max_node_executions: Option<usize>,
    max_script_sleep: Option<Duration>,
    webhook_timeout: Option<Duration>,
}

impl EngineConfigBuilder {
    /// Set the concurrency ceiling
    pub fn max_concurrent_executions(mut self, max: usize) -> Self {
        self.max_concurrent_executions = Some(max);
        self
    }

    /// Set the worker pool size
    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = Some(size);
        self
    }

    /// Set the default execution timeout
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set retry backoff base duration
    pub fn retry_backoff_base(mut self, duration: Duration) -> Self {
        self.retry_backoff_base = Some(duration);
        self
    }

    /// Set the default number of execution-level retries
    pub fn default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = Some(retries);
        self
    }

    /// Set the loop guard
    pub fn max_node_executions(mut self, max: usize) -> Self {
        self.max_node_executions = Some(max);
        self
    }

    pub fn max_script_sleep(mut self, duration: Duration) -> Self {
        self.max_script_sleep = Some(duration);
        self
    }

    pub fn webhook_timeout(mut self, timeout: Duration) -> Self {
        self.webhook_timeout = Some(timeout);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<EngineConfig> {
        let defaults = EngineConfig::default();

        let config = EngineConfig {
            max_concurrent_executions: self
                .max_concurrent_executions
                .unwrap_or(defaults.max_concurrent_executions),
            worker_pool_size: self.worker_pool_size.unwrap_or(defaults.worker_pool_size),
            default_timeout: self.default_timeout.unwrap_or(defaults.default_timeout),
            retry_backoff_base: self.retry_backoff_base.unwrap_or(defaults.retry_backoff_base),
            default_max_retries: self.default_max_retries.unwrap_or(defaults.default_max_retries),
            max_node_executions: self.max_node_executions.unwrap_or(defaults.max_node_executions),
            max_script_sleep: self.max_script_sleep.unwrap_or(defaults.max_script_sleep),
            webhook_timeout: self.webhook_timeout.unwrap_or(defaults.webhook_timeout),
        };

        config.validate()?;
        Ok(config)
    }
}
