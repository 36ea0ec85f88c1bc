//! Retry policies with category-aware backoff
//!
//! Every failure is classified first; the category decides whether to wait
//! and retry, refresh credentials once, or give up straight away.

use std::future::{pending, Future};
use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::classify::{ErrorCategory, ErrorClassifier};
use super::logging::{InvocationContext, InvocationLogger};
use crate::error::{AuthError, AuthResult};

/// Attempts used when a policy does not say otherwise
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Base delay used when a policy does not say otherwise
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
/// Ceiling for any single backoff, including server-provided hints
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: MAX_BACKOFF,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Patient config for unattended runs
    pub fn conservative() -> Self {
        Self {
            max_attempts: 5,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: MAX_BACKOFF,
            jitter: true,
        }
    }

    /// Quick config for development/testing
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }

    /// Derive a named policy from this config
    pub fn policy(&self, operation_name: impl Into<String>) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            jitter: self.jitter,
            operation_name: operation_name.into(),
        }
    }
}

/// Immutable parameters for one retry sequence
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
    operation_name: String,
}

impl RetryPolicy {
    pub fn new(operation_name: impl Into<String>) -> Self {
        RetryConfig::default().policy(operation_name)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }
}

/// Callback run once when a call fails with an expired authentication
pub type RefreshFn<'a> = Box<dyn FnMut() -> BoxFuture<'a, anyhow::Result<()>> + Send + 'a>;

/// Optional per-call hooks: credential refresh, cancellation and deadline
#[derive(Default)]
pub struct RetryControls<'a> {
    refresh: Option<RefreshFn<'a>>,
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
    service: Option<String>,
}

impl<'a> RetryControls<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `refresh` on the first authentication-expired failure
    pub fn on_auth_expired<F>(mut self, refresh: F) -> Self
    where
        F: FnMut() -> BoxFuture<'a, anyhow::Result<()>> + Send + 'a,
    {
        self.refresh = Some(Box::new(refresh));
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }

    /// Tag log events with the service being called
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }
}

struct Guard {
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Guard {
    /// Drive `fut` unless cancellation or the deadline wins first
    async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => None,
            _ = expired => None,
            output = fut => Some(output),
        }
    }
}

/// Executes units of work under a `RetryPolicy`
#[derive(Debug, Clone, Default)]
pub struct RetryInvoker {
    logger: InvocationLogger,
}

impl RetryInvoker {
    pub fn new(logger: InvocationLogger) -> Self {
        Self { logger }
    }

    pub fn logger(&self) -> &InvocationLogger {
        &self.logger
    }

    /// Execute an operation with retry logic
    pub async fn execute<F, Fut, T>(&self, policy: &RetryPolicy, operation: F) -> AuthResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.execute_with(policy, RetryControls::default(), operation).await
    }

    /// Execute an operation with retry logic plus refresh/cancellation hooks
    pub async fn execute_with<'a, F, Fut, T>(
        &self,
        policy: &RetryPolicy,
        controls: RetryControls<'a>,
        mut operation: F,
    ) -> AuthResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let RetryControls { mut refresh, cancel, deadline, service } = controls;
        let guard = Guard { cancel, deadline };
        let context = self.logger.start(policy.operation_name(), service.as_deref());

        let mut attempt = 0u32;
        let mut calls = 0u32;
        let mut refreshed = false;
        let mut last_error: Option<anyhow::Error> = None;

        while attempt < policy.max_attempts {
            attempt += 1;
            calls += 1;

            let Some(result) = guard.run(operation()).await else {
                return Err(self.cancelled(&context, calls));
            };

            let error = match result {
                Ok(value) => {
                    self.logger.succeeded(&context, calls);
                    return Ok(value);
                }
                Err(error) => error,
            };

            let message = format!("{:#}", error);
            let category = ErrorClassifier::classify_message(&message);
            self.logger.attempt_failed(&context, calls, category, &message);

            match category {
                ErrorCategory::AuthenticationExpired => {
                    if refreshed {
                        return Err(self.non_retryable(&context, calls, category, error));
                    }
                    refreshed = true;

                    if let Some(refresh) = refresh.as_mut() {
                        let Some(outcome) = guard.run(refresh()).await else {
                            return Err(self.cancelled(&context, calls));
                        };
                        self.logger.credential_refresh(&context, calls, outcome.is_ok());
                        if let Err(refresh_error) = outcome {
                            let cause = error.context(format!("credential refresh failed: {:#}", refresh_error));
                            return Err(self.non_retryable(&context, calls, category, cause));
                        }
                    }

                    // The refreshed retry does not count against the budget
                    attempt -= 1;
                    last_error = Some(error);
                }
                ErrorCategory::AuthorizationDenied | ErrorCategory::NotFound => {
                    return Err(self.non_retryable(&context, calls, category, error));
                }
                _ => {
                    last_error = Some(error);
                    if attempt >= policy.max_attempts {
                        break;
                    }

                    let delay = Self::delay_for(category, attempt, policy, &message);
                    self.logger.retry_scheduled(&context, calls, category, delay);
                    if guard.run(tokio::time::sleep(delay)).await.is_none() {
                        return Err(self.cancelled(&context, calls));
                    }
                }
            }
        }

        let last_error = last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts were made"));
        let message = format!("{:#}", last_error);
        self.logger.failed(
            &context,
            calls,
            Some(ErrorClassifier::classify_message(&message)),
            "retry_exhausted",
            &message,
        );

        Err(AuthError::RetryExhausted {
            operation: policy.operation_name().to_string(),
            attempts: calls,
            last_error,
        })
    }

    /// Delay before the next attempt for a retryable category
    pub fn delay_for(category: ErrorCategory, attempt: u32, policy: &RetryPolicy, message: &str) -> Duration {
        let base = policy.base_delay;

        match category {
            ErrorCategory::RateLimit => {
                if let Some(hint) = ErrorClassifier::retry_after_hint(message) {
                    return hint.min(policy.max_delay);
                }

                let backoff = base.saturating_mul(2u32.saturating_pow(attempt));
                let jitter = if policy.jitter {
                    let max_jitter_ms = (base.as_millis() / 2) as u64;
                    Duration::from_millis(rand::rng().random_range(0..=max_jitter_ms))
                } else {
                    Duration::ZERO
                };

                backoff.saturating_add(jitter).min(policy.max_delay)
            }
            ErrorCategory::NetworkFailure => base.saturating_mul(3).min(policy.max_delay),
            ErrorCategory::Transient => base.saturating_mul(2).min(policy.max_delay),
            _ => base,
        }
    }

    fn non_retryable(&self, context: &InvocationContext, calls: u32, category: ErrorCategory, cause: anyhow::Error) -> AuthError {
        self.logger.failed(context, calls, Some(category), "non_retryable", &format!("{:#}", cause));
        AuthError::NonRetryable {
            operation: context.operation.clone(),
            category,
            cause,
        }
    }

    fn cancelled(&self, context: &InvocationContext, calls: u32) -> AuthError {
        self.logger.failed(context, calls, None, "cancelled", "cancelled by caller");
        AuthError::Cancelled {
            operation: context.operation.clone(),
        }
    }
}
