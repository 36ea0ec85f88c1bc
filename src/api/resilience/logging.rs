//! Structured logging for connect and retry events
//!
//! Every event is a JSON object routed through the `log` facade, so the
//! binary (or an embedding application) decides where it ends up.

use super::classify::ErrorCategory;
use super::config::{LogLevel, MonitoringConfig};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use log::{debug, error, info, trace, warn};

/// Structured logger for invocations with correlation tracking
#[derive(Debug, Clone)]
pub struct InvocationLogger {
    config: MonitoringConfig,
}

/// Context for a single retried operation
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Unique correlation ID shared by all events of this invocation
    pub correlation_id: String,
    /// Human-readable operation name from the retry policy
    pub operation: String,
    /// Service the operation targets, when there is one
    pub service: Option<String>,
    pub start_time: Instant,
}

impl InvocationLogger {
    pub fn new(config: MonitoringConfig) -> Self {
        Self { config }
    }

    /// Start tracking a new invocation
    pub fn start(&self, operation: &str, service: Option<&str>) -> InvocationContext {
        let context = InvocationContext {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            service: service.map(str::to_string),
            start_time: Instant::now(),
        };

        self.emit(LogLevel::Trace, &context, "operation_started", json!({}));
        context
    }

    /// An attempt failed and was classified
    pub fn attempt_failed(&self, context: &InvocationContext, attempt: u32, category: ErrorCategory, error: &str) {
        self.emit(
            LogLevel::Debug,
            context,
            "attempt_failed",
            json!({ "attempt": attempt, "category": category, "error": error }),
        );
    }

    /// A retry is scheduled after the chosen delay
    pub fn retry_scheduled(&self, context: &InvocationContext, attempt: u32, category: ErrorCategory, delay: Duration) {
        self.emit(
            LogLevel::Warn,
            context,
            "retry_scheduled",
            json!({ "attempt": attempt, "category": category, "delay_ms": delay.as_millis() }),
        );
    }

    /// Authentication expired and the one-shot refresh is running
    pub fn credential_refresh(&self, context: &InvocationContext, attempt: u32, succeeded: bool) {
        self.emit(
            if succeeded { LogLevel::Info } else { LogLevel::Warn },
            context,
            "credential_refresh",
            json!({ "attempt": attempt, "succeeded": succeeded }),
        );
    }

    pub fn succeeded(&self, context: &InvocationContext, attempts: u32) {
        let level = if attempts > 1 { LogLevel::Info } else { LogLevel::Debug };
        self.emit(
            level,
            context,
            "operation_succeeded",
            json!({ "attempts": attempts, "outcome": "success" }),
        );
    }

    pub fn failed(&self, context: &InvocationContext, attempts: u32, category: Option<ErrorCategory>, outcome: &str, error: &str) {
        self.emit(
            LogLevel::Error,
            context,
            "operation_failed",
            json!({ "attempts": attempts, "category": category, "outcome": outcome, "error": error }),
        );
    }

    /// Connection lifecycle events (connect_started, connect_succeeded, ...)
    pub fn connection_event(&self, service: &str, event: &str, fields: Value) {
        let level = match event {
            "connect_failed" | "disconnect_failed" => LogLevel::Warn,
            "connect_started" => LogLevel::Debug,
            _ => LogLevel::Info,
        };

        if !self.should_log(&level) {
            return;
        }

        let mut log_data = json!({
            "event": event,
            "service": service,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        merge(&mut log_data, fields);
        write(level, &log_data);
    }

    fn emit(&self, level: LogLevel, context: &InvocationContext, event: &str, fields: Value) {
        if !self.should_log(&level) {
            return;
        }

        let mut log_data = json!({
            "event": event,
            "correlation_id": context.correlation_id,
            "operation": context.operation,
            "service": context.service,
            "elapsed_ms": context.elapsed().as_millis(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        merge(&mut log_data, fields);
        write(level, &log_data);
    }

    /// Check if we should log at the given level
    fn should_log(&self, level: &LogLevel) -> bool {
        match (&self.config.log_level, level) {
            (LogLevel::Error, LogLevel::Error) => true,
            (LogLevel::Warn, LogLevel::Error | LogLevel::Warn) => true,
            (LogLevel::Info, LogLevel::Error | LogLevel::Warn | LogLevel::Info) => true,
            (LogLevel::Debug, LogLevel::Error | LogLevel::Warn | LogLevel::Info | LogLevel::Debug) => true,
            (LogLevel::Trace, _) => true,
            _ => false,
        }
    }
}

impl Default for InvocationLogger {
    fn default() -> Self {
        Self::new(MonitoringConfig::default())
    }
}

impl InvocationContext {
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

fn merge(target: &mut Value, fields: Value) {
    if let (Value::Object(target), Value::Object(fields)) = (target, fields) {
        target.extend(fields);
    }
}

fn write(level: LogLevel, data: &Value) {
    match level {
        LogLevel::Error => error!("{}", data),
        LogLevel::Warn => warn!("{}", data),
        LogLevel::Info => info!("{}", data),
        LogLevel::Debug => debug!("{}", data),
        LogLevel::Trace => trace!("{}", data),
    }
}
