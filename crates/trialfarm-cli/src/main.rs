//! trialfarm CLI
//!
//! Command-line interface for running trials on a pool of GPU workers.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// trialfarm - run trials on whichever GPU workers are idle
#[derive(Parser, Debug)]
#[command(name = "trialfarm")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Farm configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Pool file of [host, device, executable] triples; replaces the configured workers
    #[arg(long, global = true)]
    pool: Option<PathBuf>,

    /// Log level (overrides the configured level)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every task in a task file and print the results as JSON
    Run {
        /// JSON array of payloads, or `-` to read it from stdin
        #[arg(long)]
        tasks: PathBuf,

        /// Write the results here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show telemetry and availability of every worker
    Probe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = commands::load_config(cli.config.as_deref(), cli.pool.as_deref())?;

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        cli.log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();

    match cli.command {
        Commands::Run { tasks, output } => {
            commands::run(&config, &tasks, output.as_deref()).await?;
        }
        Commands::Probe => {
            commands::probe(&config).await?;
        }
    }

    Ok(())
}
