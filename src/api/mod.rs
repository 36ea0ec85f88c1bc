//! Connection management for the external tenant services: providers,
//! connection state, resilience and diagnostics.

pub mod diagnostics;
pub mod manager;
pub mod models;
pub mod provider;
pub mod resilience;

pub use diagnostics::{DiagnosticsReporter, HealthReport, OverallHealth, ServiceHealth};
pub use manager::{ConnectionManager, ConnectionManagerBuilder};
pub use models::{
    ConnectOptions, ConnectionResult, ConnectionState, ConnectionStatus, ErrorRecord, ServiceId, Session,
    TokenMarker,
};
pub use provider::{HttpServiceProvider, ServiceProvider};
pub use resilience::{
    CacheStats, ErrorCategory, ErrorClassifier, ResilienceConfig, RetryControls, RetryInvoker, RetryPolicy,
    TtlCache,
};
