//! dropq - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use dropq_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use dropq_ingest::config::AppConfig;
use dropq_ingest::transform::TransformRegistry;
use dropq_ingest::{commands, Cli, Commands};
use std::process;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = log_config(cli.verbose);

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialise logging: {e}");
            process::exit(1);
        },
    };

    if let Err(e) = execute(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

/// CLI logging defaults, overridden by `LOG_*` variables when they are valid
fn log_config(verbose: bool) -> LogConfig {
    let base = LogConfig::builder()
        .level(if verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("dropq")
        .filter_directives("notify=warn,redis=warn")
        .build();

    base.clone().merge_env().unwrap_or_else(|e| {
        eprintln!("Ignoring invalid LOG_* settings: {e}");
        base
    })
}

async fn execute(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Run => {
            let config = AppConfig::load_from(cli.config.as_deref())?;
            info!(root = %config.root_dir.display(), "Starting dropq");
            commands::run::run(config).await
        },

        Commands::Process { file } => {
            let config = AppConfig::load_from(cli.config.as_deref())?;
            let outcome = commands::process::run(config, file).await?;
            println!("{} {}", outcome.label(), outcome.details());
            Ok(())
        },

        Commands::CheckConfig { dir } => {
            let (path, config) = commands::check_config::run(dir, &TransformRegistry::with_builtins())
                .with_context(|| format!("Invalid folder configuration in {}", dir.display()))?;
            println!("{}: OK", path.display());
            println!("{config:#?}");
            Ok(())
        },
    }
}
