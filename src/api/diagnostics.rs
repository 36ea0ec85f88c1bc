//! Health snapshot of every managed connection.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::manager::ConnectionManager;
use super::models::{ConnectionState, ConnectionStatus, ServiceId};
use super::resilience::CacheStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    /// Every required service is connected
    Healthy,
    /// Some required services are connected
    Degraded,
    /// No required service is connected
    Critical,
}

impl fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            OverallHealth::Healthy => "healthy",
            OverallHealth::Degraded => "degraded",
            OverallHealth::Critical => "critical",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub required: bool,
    /// Seconds left on the token marker, if connected
    pub token_remaining_secs: Option<u64>,
    #[serde(flatten)]
    pub status: ConnectionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub services: Vec<ServiceHealth>,
    pub overall: OverallHealth,
    pub recommendations: Vec<String>,
    pub token_cache: CacheStats,
    pub result_cache: CacheStats,
    pub generated_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn service(&self, service: ServiceId) -> Option<&ServiceHealth> {
        self.services.iter().find(|health| health.status.service == service)
    }

    /// One-line text form, e.g. `degraded: 1/2 required services connected`
    pub fn summary(&self) -> String {
        let required: Vec<&ServiceHealth> = self.services.iter().filter(|s| s.required).collect();
        let connected = required.iter().filter(|s| s.status.connected).count();
        format!(
            "{}: {}/{} required services connected",
            self.overall,
            connected,
            required.len()
        )
    }
}

/// Builds a `HealthReport` from a connection manager. Read-only.
pub struct DiagnosticsReporter<'a> {
    manager: &'a ConnectionManager,
}

impl<'a> DiagnosticsReporter<'a> {
    pub fn new(manager: &'a ConnectionManager) -> Self {
        Self { manager }
    }

    pub async fn report(&self) -> HealthReport {
        let required = self.manager.required_services();
        let mut services = Vec::new();

        for status in self.manager.statuses().await {
            let token_remaining_secs = self
                .manager
                .token_remaining(status.service)
                .await
                .map(|remaining| remaining.as_secs());
            services.push(ServiceHealth {
                required: required.contains(&status.service),
                token_remaining_secs,
                status,
            });
        }

        let overall = overall_health(&services);
        let recommendations = recommendations(&services);

        log::debug!("Diagnostics: {} with {} recommendations", overall, recommendations.len());

        HealthReport {
            services,
            overall,
            recommendations,
            token_cache: self.manager.token_cache_stats().await,
            result_cache: self.manager.result_cache_stats().await,
            generated_at: Utc::now(),
        }
    }
}

fn overall_health(services: &[ServiceHealth]) -> OverallHealth {
    let required: Vec<&ServiceHealth> = services.iter().filter(|s| s.required).collect();
    let connected = required.iter().filter(|s| s.status.connected).count();

    if !required.is_empty() && connected == required.len() {
        OverallHealth::Healthy
    } else if connected > 0 {
        OverallHealth::Degraded
    } else {
        OverallHealth::Critical
    }
}

fn recommendations(services: &[ServiceHealth]) -> Vec<String> {
    let mut out = Vec::new();

    for health in services {
        let status = &health.status;
        let name = status.service.display_name();

        if !status.connected && health.required {
            let hint = match status.error_history.back().and_then(|e| e.category.as_deref()) {
                Some("authorization_denied") => "grant the application the missing permissions and admin consent",
                Some("authentication_expired") => "check that the client secret or certificate has not expired",
                Some("rate_limit") => "the service is throttling requests; retry later or lower request volume",
                Some("network_failure") => "check network connectivity and proxy settings",
                Some("transient") => "the service reported an outage; retry later",
                _ => match status.state {
                    ConnectionState::Expired => "the token expired; reconnect",
                    _ if status.last_error.is_some() => "review the credential configuration",
                    _ => "connect it before running reports",
                },
            };
            out.push(format!("{} is not connected: {}", name, hint));
        }

        if !status.missing_scopes.is_empty() {
            let scopes: Vec<&str> = status.missing_scopes.iter().map(String::as_str).collect();
            out.push(format!("Grant {} the missing scopes: {}", name, scopes.join(", ")));
        }
    }

    out
}
