//! jsbridge CLI - run scripts through the handle bridge and inspect its
//! handle table.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;
mod host;

#[derive(Parser)]
#[command(
    name = "jsbridge",
    version,
    about = "Run JavaScript through the jsbridge handle bridge",
    long_about = "Runs scripts in an engine session and reports what the handle table did.\n\n\
                  Run a script:   jsbridge run script.js\n\
                  Table churn:    jsbridge stats --count 10000"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (defaults to the nearest jsbridge.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `jsbridge_core=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a script file and print its result
    Run(commands::run::RunCommand),

    /// Run a synthetic allocate/dispose cycle and print table statistics
    Stats(commands::stats::StatsCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.log_level.as_deref() {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(cmd) => cmd.run(&config),
        Commands::Stats(cmd) => cmd.run(&config),
    }
}
