use anyhow::Result;
use clap::Args;
use colored::*;
use tokio_util::sync::CancellationToken;

use tenant_auth::{ConnectOptions, ConnectionManager};

#[derive(Args)]
pub struct ConnectCommand {
    /// Services to connect (graph, mail_admin, directory); all configured ones if omitted
    pub services: Vec<String>,
    /// Reconnect even if a valid token is cached
    #[arg(long)]
    pub force: bool,
    /// Extra scopes every listed service must grant
    #[arg(long = "scope")]
    pub scopes: Vec<String>,
}

pub async fn run(manager: &ConnectionManager, args: ConnectCommand) -> Result<()> {
    let services = super::parse_services(&args.services, manager.services())?;
    if services.is_empty() {
        println!("No services configured.");
        return Ok(());
    }

    // Ctrl-C abandons any connect still backing off
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let options = ConnectOptions {
        force_reconnect: args.force,
        ..ConnectOptions::default()
    }
    .with_scopes(args.scopes)
    .cancel_on(cancel);

    let result = manager.ensure_connected(&services, options).await;
    interrupt.abort();

    for service in &result.connected_services {
        let method = manager
            .status(*service)
            .await
            .map(|status| status.auth_method)
            .unwrap_or_default();
        println!(
            "{} Connected to {} using {}",
            "✓".bright_green().bold(),
            service.display_name().bright_yellow().bold(),
            method.cyan()
        );
    }

    for (service, error) in &result.errors {
        println!(
            "{} Failed to connect {}: {}",
            "✗".bright_red().bold(),
            service.display_name().bright_yellow().bold(),
            error.to_string().red()
        );
    }

    if result.success {
        Ok(())
    } else {
        anyhow::bail!("{} of {} services failed to connect", result.failed_services.len(), services.len())
    }
}
