//! Outpost CLI
//!
//! Command-line tools for Outpost device databases.
//!
//! # Commands
//!
//! - `inspect` - Record counts and pending work per table
//! - `pending` - List records the server has not confirmed
//! - `compact` - Rewrite table logs to reclaim space
//! - `dependencies` - Dump the dependency ledger

mod commands;
mod error;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::error::{CliError, CliResult};

/// Outpost device database tools.
#[derive(Parser)]
#[command(name = "outpost")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the device database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record counts and pending work per table
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List records with work owed to the server
    Pending {
        /// Only this table
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Rewrite table logs to reclaim space
    Compact,

    /// Dump the dependency ledger
    Dependencies,

    /// Show version information
    Version,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or(CliError::PathRequired("inspect"))?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Pending { table } => {
            let path = cli.path.ok_or(CliError::PathRequired("pending"))?;
            commands::pending::run(&path, table.as_deref())?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or(CliError::PathRequired("compact"))?;
            commands::compact::run(&path)?;
        }
        Commands::Dependencies => {
            let path = cli.path.ok_or(CliError::PathRequired("dependencies"))?;
            commands::dependencies::run(&path)?;
        }
        Commands::Version => {
            println!("Outpost CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
