//! Relay CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;

mod commands;
mod config;
mod executor;
mod handlers;
mod loader;

#[cfg(test)]
mod demos_tests;

use commands::{Commands, ConfigCommands};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "relay")]
#[command(author, version, about = "Relay pipeline engine", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. debug or relay_scheduler=trace
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => CliConfig::load_from(path)?,
        None => CliConfig::load().unwrap_or_default(),
    };
    if let Some(level) = cli.log_level {
        config.tracing = config.tracing.with_level(level);
    }
    if cli.json_logs {
        config.tracing.json = true;
    }
    relay_trace::init_tracing(&config.tracing)?;

    match cli.command {
        Commands::Validate { path } => handlers::validate(&config, &path).await?,
        Commands::Plan { path, trigger } => handlers::plan(&config, &path, &trigger).await?,
        Commands::Run {
            path,
            trigger,
            jobs,
            report,
            verbose,
        } => {
            handlers::run(&config, &path, &trigger, jobs, report.as_deref(), verbose).await?
        }
        Commands::Schema => handlers::schema()?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Path => handlers::config_path()?,
        },
    }

    Ok(())
}
