//! Failure classification
//!
//! The only place in the crate that inspects error text. Everything downstream
//! (retry delays, abort decisions, diagnostics hints) works on `ErrorCategory`.

use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Types of failures and their retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// HTTP 429 / throttling
    RateLimit,
    /// Token rejected or expired; a credential refresh may fix it
    AuthenticationExpired,
    /// Caller lacks permission; never fixed by retrying
    AuthorizationDenied,
    /// Connection-level failures (timeouts, resets, DNS)
    NetworkFailure,
    /// HTTP 5xx and service-unavailable responses
    Transient,
    /// Resource does not exist
    NotFound,
    /// Anything else
    Unclassified,
}

impl ErrorCategory {
    /// Whether the retry loop keeps going after this category
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorCategory::RateLimit => true,
            ErrorCategory::NetworkFailure => true,
            ErrorCategory::Transient => true,
            ErrorCategory::Unclassified => true,
            // Handled by a one-shot refresh, not by the regular retry budget
            ErrorCategory::AuthenticationExpired => false,
            ErrorCategory::AuthorizationDenied => false,
            ErrorCategory::NotFound => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::AuthenticationExpired => "authentication_expired",
            ErrorCategory::AuthorizationDenied => "authorization_denied",
            ErrorCategory::NetworkFailure => "network_failure",
            ErrorCategory::Transient => "transient",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const RATE_LIMIT_PATTERNS: &[&str] = &["429", "throttl", "rate limit", "too many requests"];

const AUTH_EXPIRED_PATTERNS: &[&str] = &[
    "401",
    "unauthorized",
    "authentication failed",
    "invalid token",
    "token expired",
];

const AUTH_DENIED_PATTERNS: &[&str] = &[
    "403",
    "forbidden",
    "access denied",
    "insufficient privileges",
];

const NETWORK_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "dns",
    "name resolution",
    "network is unreachable",
    "host unreachable",
    "no route to host",
    "error sending request",
];

const TRANSIENT_PATTERNS: &[&str] = &[
    "500",
    "502",
    "503",
    "504",
    "internal server",
    "service unavailable",
    "bad gateway",
];

const NOT_FOUND_PATTERNS: &[&str] = &["404", "not found"];

static RETRY_AFTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)retry[-_ ]?after\D{0,3}(\d+)").expect("retry-after pattern is valid")
});

/// Maps raw failures onto `ErrorCategory`
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error using its full context chain
    pub fn classify(error: &anyhow::Error) -> ErrorCategory {
        Self::classify_message(&format!("{:#}", error))
    }

    /// Classify raw error text. First matching rule wins.
    pub fn classify_message(message: &str) -> ErrorCategory {
        let text = message.to_lowercase();
        let matches = |patterns: &[&str]| patterns.iter().any(|p| text.contains(p));

        if matches(RATE_LIMIT_PATTERNS) {
            ErrorCategory::RateLimit
        } else if matches(AUTH_EXPIRED_PATTERNS) {
            ErrorCategory::AuthenticationExpired
        } else if matches(AUTH_DENIED_PATTERNS) {
            ErrorCategory::AuthorizationDenied
        } else if matches(NETWORK_PATTERNS) {
            ErrorCategory::NetworkFailure
        } else if matches(TRANSIENT_PATTERNS) {
            ErrorCategory::Transient
        } else if matches(NOT_FOUND_PATTERNS) {
            ErrorCategory::NotFound
        } else {
            ErrorCategory::Unclassified
        }
    }

    /// Extract an explicit "retry after N seconds" hint from error text
    pub fn retry_after_hint(message: &str) -> Option<Duration> {
        RETRY_AFTER
            .captures(message)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}
