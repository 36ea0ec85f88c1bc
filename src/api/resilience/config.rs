//! Resilience configuration with builder pattern
//!
//! Provides a unified configuration for retry policies, connect-lock waits
//! and monitoring with sane defaults.

use super::retry::RetryConfig;
use crate::config::ResilienceSettings;
use std::time::Duration;

/// Resilience configuration shared by every connection and invocation
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub lock: LockConfig,
    pub monitoring: MonitoringConfig,
    /// How many terminal errors each service status keeps
    pub error_history_limit: usize,
}

/// Two-tier wait for the per-service connect lock
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Expected wait while another caller finishes connecting
    pub initial_wait: Duration,
    /// Additional wait before the lock is considered stuck
    pub escalated_wait: Duration,
}

/// Monitoring and logging configuration
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            lock: LockConfig::default(),
            monitoring: MonitoringConfig::default(),
            error_history_limit: 10,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(5),
            escalated_wait: Duration::from_secs(30),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
        }
    }
}

impl ResilienceConfig {
    /// Create a new builder for ResilienceConfig
    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::new()
    }

    /// Conservative config for unattended scheduled runs
    pub fn conservative() -> Self {
        Self {
            retry: RetryConfig::conservative(),
            lock: LockConfig {
                initial_wait: Duration::from_secs(10),
                escalated_wait: Duration::from_secs(60),
            },
            monitoring: MonitoringConfig {
                log_level: LogLevel::Warn,
            },
            error_history_limit: 20,
        }
    }

    /// Aggressive config for development/testing
    pub fn development() -> Self {
        Self {
            retry: RetryConfig::aggressive(),
            lock: LockConfig::default(),
            monitoring: MonitoringConfig {
                log_level: LogLevel::Debug,
            },
            error_history_limit: 10,
        }
    }

    /// Single attempt, short waits (for testing)
    pub fn disabled() -> Self {
        Self {
            retry: RetryConfig {
                max_attempts: 1,
                base_delay: Duration::from_millis(0),
                max_delay: Duration::from_millis(0),
                jitter: false,
            },
            lock: LockConfig {
                initial_wait: Duration::from_millis(100),
                escalated_wait: Duration::from_millis(500),
            },
            monitoring: MonitoringConfig {
                log_level: LogLevel::Error,
            },
            error_history_limit: 5,
        }
    }

    /// Build from the `[resilience]` section of the config file
    pub fn from_settings(settings: &ResilienceSettings) -> Self {
        let defaults = Self::default();

        Self {
            retry: RetryConfig {
                max_attempts: if settings.retry_enabled {
                    settings.max_attempts.unwrap_or(defaults.retry.max_attempts).max(1)
                } else {
                    1
                },
                base_delay: settings
                    .base_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.base_delay),
                max_delay: settings
                    .max_delay_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.retry.max_delay),
                jitter: settings.jitter.unwrap_or(defaults.retry.jitter),
            },
            lock: LockConfig {
                initial_wait: settings
                    .lock_wait_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.lock.initial_wait),
                escalated_wait: settings
                    .lock_escalated_wait_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.lock.escalated_wait),
            },
            monitoring: MonitoringConfig {
                log_level: settings
                    .log_level
                    .as_deref()
                    .map(LogLevel::parse)
                    .unwrap_or(defaults.monitoring.log_level),
            },
            error_history_limit: settings
                .error_history_limit
                .unwrap_or(defaults.error_history_limit),
        }
    }
}

/// Builder for ResilienceConfig
#[derive(Debug)]
pub struct ResilienceConfigBuilder {
    config: ResilienceConfig,
}

impl ResilienceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
        }
    }

    /// Configure retry behavior
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set max retry attempts
    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    /// Set the base backoff delay
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.retry.base_delay = delay;
        self
    }

    /// Enable/disable rate-limit jitter
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.retry.jitter = enabled;
        self
    }

    /// Set both tiers of the connect-lock wait
    pub fn lock_waits(mut self, initial: Duration, escalated: Duration) -> Self {
        self.config.lock = LockConfig {
            initial_wait: initial,
            escalated_wait: escalated,
        };
        self
    }

    /// Set logging level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.monitoring.log_level = level;
        self
    }

    /// Cap the per-service error history
    pub fn error_history_limit(mut self, limit: usize) -> Self {
        self.config.error_history_limit = limit;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> ResilienceConfig {
        self.config
    }
}

impl Default for ResilienceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
