use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::AuthError;

/// External service requiring its own authenticated session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ServiceId {
    /// Identity-backed graph API
    Graph,
    /// Mail administration API
    MailAdmin,
    /// Directory service
    Directory,
}

impl ServiceId {
    pub const ALL: [ServiceId; 3] = [ServiceId::Graph, ServiceId::MailAdmin, ServiceId::Directory];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceId::Graph => "graph",
            ServiceId::MailAdmin => "mail_admin",
            ServiceId::Directory => "directory",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceId::Graph => "Graph API",
            ServiceId::MailAdmin => "Mail administration",
            ServiceId::Directory => "Directory service",
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceId {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "graph" => Ok(ServiceId::Graph),
            "mail_admin" | "mail" | "exchange" => Ok(ServiceId::MailAdmin),
            "directory" | "dir" => Ok(ServiceId::Directory),
            other => Err(AuthError::Config(format!("Unknown service '{}'", other))),
        }
    }
}

/// Connection lifecycle state of one service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Was connected, but the token marker has lapsed
    Expired,
}

/// A terminal failure kept in a status' bounded history
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub message: String,
    pub category: Option<String>,
}

/// Per-service connection status, mutated only by the connection manager
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub service: ServiceId,
    pub state: ConnectionState,
    pub connected: bool,
    pub last_auth_time: Option<DateTime<Utc>>,
    /// `client_secret`, `certificate` or `certificate_thumbprint`; empty until first success
    pub auth_method: String,
    pub granted_scopes: BTreeSet<String>,
    /// Required scopes the last session was not granted
    pub missing_scopes: BTreeSet<String>,
    pub last_error: Option<String>,
    pub error_history: VecDeque<ErrorRecord>,
    pub connect_count: u64,
}

impl ConnectionStatus {
    pub fn new(service: ServiceId) -> Self {
        Self {
            service,
            state: ConnectionState::Disconnected,
            connected: false,
            last_auth_time: None,
            auth_method: String::new(),
            granted_scopes: BTreeSet::new(),
            missing_scopes: BTreeSet::new(),
            last_error: None,
            error_history: VecDeque::new(),
            connect_count: 0,
        }
    }

    /// Record a terminal failure, keeping at most `limit` entries
    pub fn push_error(&mut self, error: &AuthError, limit: usize) {
        let message = error.to_string();
        self.last_error = Some(message.clone());
        self.error_history.push_back(ErrorRecord {
            at: Utc::now(),
            message,
            category: error.category().map(|c| c.to_string()),
        });
        while self.error_history.len() > limit {
            self.error_history.pop_front();
        }
    }
}

/// Options for `ConnectionManager::ensure_connected`
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Skip the valid-token short-circuit and always run the full connect
    pub force_reconnect: bool,
    /// Scopes required on top of the service's configured ones
    pub required_scopes: Vec<String>,
    /// Abandons the connect retry sequence with `Cancelled` once triggered
    pub cancel: Option<CancellationToken>,
    /// Connects still retrying at this instant fail with `Cancelled`
    pub deadline: Option<Instant>,
}

impl ConnectOptions {
    pub fn force() -> Self {
        Self {
            force_reconnect: true,
            ..Self::default()
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }
}

/// Outcome of connecting one or more services
#[derive(Debug, Default)]
pub struct ConnectionResult {
    pub success: bool,
    pub connected_services: Vec<ServiceId>,
    pub failed_services: Vec<ServiceId>,
    pub errors: BTreeMap<ServiceId, AuthError>,
}

impl ConnectionResult {
    pub(crate) fn record(&mut self, service: ServiceId, outcome: Result<(), AuthError>) {
        match outcome {
            Ok(()) => self.connected_services.push(service),
            Err(error) => {
                self.failed_services.push(service);
                self.errors.insert(service, error);
            }
        }
        self.success = self.failed_services.is_empty();
    }
}

/// What a provider reports back from a successful connect
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub granted_scopes: BTreeSet<String>,
    /// Token lifetime as reported by the provider
    pub expires_in: Option<Duration>,
}

/// Token-validity marker cached per service
#[derive(Debug, Clone)]
pub struct TokenMarker {
    pub acquired_at: DateTime<Utc>,
    pub auth_method: String,
}
