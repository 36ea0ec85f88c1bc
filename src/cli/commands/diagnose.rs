use anyhow::Result;
use clap::Args;
use colored::*;

use tenant_auth::api::OverallHealth;
use tenant_auth::{ConnectOptions, ConnectionManager};

#[derive(Args)]
pub struct DiagnoseCommand {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
    /// Report current state without connecting first
    #[arg(long)]
    pub no_connect: bool,
}

pub async fn run(manager: &ConnectionManager, args: DiagnoseCommand) -> Result<()> {
    if !args.no_connect {
        manager
            .ensure_connected(&manager.services(), ConnectOptions::default())
            .await;
    }

    let report = manager.diagnostics().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let headline = match report.overall {
        OverallHealth::Healthy => report.summary().bright_green().bold(),
        OverallHealth::Degraded => report.summary().bright_yellow().bold(),
        OverallHealth::Critical => report.summary().bright_red().bold(),
    };
    println!("{}", headline);
    println!();

    for health in &report.services {
        let status = &health.status;
        let marker = if status.connected {
            "✓".bright_green().bold()
        } else {
            "✗".bright_red().bold()
        };
        let required = if health.required { "" } else { " (optional)" };

        println!("{} {}{}", marker, status.service.display_name().bold(), required.dimmed());
        if !status.auth_method.is_empty() {
            println!("    auth method: {}", status.auth_method.cyan());
        }
        if let Some(at) = status.last_auth_time {
            println!("    last auth:   {}", at.to_rfc3339());
        }
        if let Some(secs) = health.token_remaining_secs {
            println!("    token valid: {}s", secs);
        }
        if let Some(error) = &status.last_error {
            println!("    last error:  {}", error.red());
        }
    }

    if !report.recommendations.is_empty() {
        println!();
        println!("{}", "Recommendations".bold());
        for recommendation in &report.recommendations {
            println!("  - {}", recommendation);
        }
    }

    println!();
    println!(
        "Token cache: {} hits, {} misses; result cache: {} entries",
        report.token_cache.hits, report.token_cache.misses, report.result_cache.entries
    );

    Ok(())
}
