use std::path::PathBuf;

use super::commands::{ConnectCommand, DiagnoseCommand};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tenant-auth")]
#[command(about = "Connect to tenant administration services and report connection health")]
pub struct Cli {
    /// Config file (defaults to the per-user config location)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Write logs to this file instead of stderr (truncated on each run)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect one or more services
    Connect(ConnectCommand),
    /// Connect every service and print a health report
    Diagnose(DiagnoseCommand),
}
