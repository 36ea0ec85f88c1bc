use std::path::Path;

use anyhow::Result;
use clap::Parser;
use log::{debug, info};

mod cli;

use cli::{Cli, Commands};
use tenant_auth::{AuthConfig, ConnectionManager};

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let mut builder = env_logger::Builder::from_default_env();

    if let Some(path) = log_file {
        // Truncate on each run
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;
    info!("Starting tenant-auth");

    let mut config = match &cli.config {
        Some(path) => AuthConfig::load(path)?,
        None => AuthConfig::load_default()?,
    };
    let applied = config.apply_env_overrides();
    debug!("Applied {} environment overrides", applied);

    let manager = ConnectionManager::builder(config).build();

    let outcome = match cli.command {
        Commands::Connect(args) => cli::commands::connect::run(&manager, args).await,
        Commands::Diagnose(args) => cli::commands::diagnose::run(&manager, args).await,
    };

    manager.disconnect_all().await;
    outcome
}
