//! Authentication and connection resilience for tenant administration services.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;

pub use api::{ConnectOptions, ConnectionManager, DiagnosticsReporter, HealthReport, ServiceId};
pub use config::AuthConfig;
pub use error::{AuthError, AuthResult};
