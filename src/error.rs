//! Error taxonomy for credential resolution, connection and retry failures.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::api::models::ServiceId;
use crate::api::resilience::ErrorCategory;

/// Result type alias using `AuthError`.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors surfaced to callers of the connection and invocation layer.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No structurally valid credential variant is configured for the service.
    #[error("No usable credentials configured for {service}: {reason}")]
    MissingCredential { service: ServiceId, reason: String },

    /// A certificate path was configured but nothing exists at the resolved location.
    #[error("Certificate not found: {}", path.display())]
    CertificateNotFound { path: PathBuf },

    /// Every password candidate failed to open the certificate.
    #[error("Failed to load certificate {}: {cause:#}", path.display())]
    CertificateLoadFailed {
        path: PathBuf,
        #[source]
        cause: anyhow::Error,
    },

    /// The per-service connect lock could not be taken within the escalated wait.
    #[error("Timed out after {waited:?} waiting for the {service} connection lock")]
    LockTimeout { service: ServiceId, waited: Duration },

    /// Retryable failures continued until the attempt budget ran out.
    #[error("{operation} failed after {attempts} attempts: {last_error:#}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last_error: anyhow::Error,
    },

    /// A failure that retrying cannot fix.
    #[error("{operation} failed ({category}): {cause:#}")]
    NonRetryable {
        operation: String,
        category: ErrorCategory,
        #[source]
        cause: anyhow::Error,
    },

    /// The caller's cancellation token fired or its deadline passed.
    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    /// No provider was registered for the service.
    #[error("No provider registered for {0}")]
    UnknownService(ServiceId),

    /// Configuration could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// True when the failure was transient and a later call may succeed
    /// without any configuration change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::RetryExhausted { .. } | AuthError::LockTimeout { .. })
    }

    /// Classification of the underlying failure, when one applies.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            AuthError::NonRetryable { category, .. } => Some(*category),
            AuthError::RetryExhausted { last_error, .. } => {
                Some(crate::api::resilience::ErrorClassifier::classify(last_error))
            }
            _ => None,
        }
    }
}
