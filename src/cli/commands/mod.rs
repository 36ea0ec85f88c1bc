pub mod connect;
pub mod diagnose;

pub use connect::ConnectCommand;
pub use diagnose::DiagnoseCommand;

use anyhow::Result;
use tenant_auth::ServiceId;

/// Parse service names, defaulting to every registered service
fn parse_services(names: &[String], registered: Vec<ServiceId>) -> Result<Vec<ServiceId>> {
    if names.is_empty() {
        return Ok(registered);
    }
    names
        .iter()
        .map(|name| name.parse::<ServiceId>().map_err(anyhow::Error::from))
        .collect()
}
