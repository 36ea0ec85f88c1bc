//! Resilience features: failure classification, retry with backoff,
//! TTL caching and structured invocation logging.

pub mod cache;
pub mod classify;
pub mod config;
pub mod logging;
pub mod retry;

pub use cache::{CacheStats, TtlCache};
pub use classify::{ErrorCategory, ErrorClassifier};
pub use config::{LockConfig, LogLevel, MonitoringConfig, ResilienceConfig, ResilienceConfigBuilder};
pub use logging::{InvocationContext, InvocationLogger};
pub use retry::{
    RefreshFn, RetryConfig, RetryControls, RetryInvoker, RetryPolicy, DEFAULT_BASE_DELAY,
    DEFAULT_MAX_ATTEMPTS, MAX_BACKOFF,
};
