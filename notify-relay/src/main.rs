mod cli;
mod commands;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use notify_relay::config::AppConfig;
use notify_relay::logging::{self, LoggingConfig};
use notify_relay::panic_hook;
use notify_relay::services::ServiceContainer;
use tracing::info;

use crate::cli::{Args, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = AppConfig::from_env().context("Invalid environment configuration")?;
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if let Some(rules) = args.rules {
        config.rules_path = Some(rules);
    }
    if let Some(dir) = args.log_dir {
        config.log_dir = dir;
    }

    // Only the long-running intake writes log files.
    let log_dir = matches!(args.command, Commands::Run).then_some(config.log_dir.as_path());
    let (logging_config, _guard) = logging::init_logging(log_dir, args.log_filter.as_deref())
        .context("Failed to initialize logging")?;
    panic_hook::install(log_dir);

    if let Commands::CheckRules = args.command {
        let rules = config.load_rules().context("Invalid rules")?;
        commands::check_rules(&rules, &mut std::io::stdout())?;
        return Ok(ExitCode::SUCCESS);
    }

    let container = ServiceContainer::initialize(&config)
        .await
        .context("Failed to initialize services")?;

    let result = execute(&container, args.command, &logging_config).await;
    container.shutdown().await?;
    result
}

async fn execute(
    container: &ServiceContainer,
    command: Commands,
    logging_config: &Arc<LoggingConfig>,
) -> anyhow::Result<ExitCode> {
    let mut out = std::io::stdout();

    let ok = match command {
        Commands::Run => {
            info!(filter = %logging_config.get_filter(), "Starting intake");
            logging_config.start_retention_cleanup(container.cancellation_token());
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            let summary = commands::run(container, input, ctrl_c()).await?;
            info!(
                accepted = summary.accepted,
                rejected = summary.rejected,
                interrupted = summary.interrupted,
                "Intake finished"
            );
            true
        }
        Commands::Status => {
            commands::status(container, &mut out).await?;
            true
        }
        Commands::List { kind, reason } => {
            commands::list(container, kind, reason, &mut out).await?;
            true
        }
        Commands::Retry { id } => commands::retry(container, id, &mut out).await?,
        Commands::Upload { id, url } => commands::upload(container, id, &url, &mut out).await?,
        Commands::Delete { kind, target } => {
            commands::delete(container, kind, &target, &mut out).await?;
            true
        }
        Commands::Watch => {
            commands::watch(container, &mut out, ctrl_c()).await?;
            true
        }
        Commands::CheckRules => {
            commands::check_rules(container.engine.config(), &mut out)?;
            true
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
