mod cli;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, DevCommand, DriftCommand, FactsCommand, OnboardCommand};
use config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::resolve(cli.config, cli.verbose, cli.json);

    match cli.command {
        Command::Init { solo } => commands::init(&config, solo).await,
        Command::Validate { path } => commands::validate(&config, path).await,
        Command::Plan { resources, out, targets, refresh, no_refresh } => {
            commands::plan(&config, resources, out, targets, refresh && !no_refresh).await
        }
        Command::Apply { plan, auto_approve, parallelism } => {
            commands::apply(&config, plan, auto_approve, parallelism).await
        }
        Command::Run { action, params, extra_vars, targets } => {
            commands::run_action(&config, action, params, extra_vars, targets).await
        }
        Command::Drift { command } => match command {
            DriftCommand::Detect { targets, auto_reconcile, report } => {
                commands::drift_detect(&config, targets, auto_reconcile, report).await
            }
            DriftCommand::Reconcile { targets, dry_run } => {
                commands::drift_reconcile(&config, targets, dry_run).await
            }
        },
        Command::Onboard { command } => match command {
            OnboardCommand::Ssh(args) => commands::onboard_ssh(&config, *args).await,
            OnboardCommand::Rollback { host } => commands::onboard_rollback(&config, host).await,
        },
        Command::Facts { command } => match command {
            FactsCommand::Collect { selector, targets, fact_type, refresh } => {
                commands::facts_collect(&config, selector, targets, fact_type, refresh).await
            }
            FactsCommand::List => commands::facts_list(&config).await,
            FactsCommand::Show { target, fact_type } => {
                commands::facts_show(&config, target, fact_type).await
            }
        },
        Command::Backup { out, compress, include_blobs } => {
            commands::backup(&config, out, compress, include_blobs).await
        }
        Command::Restore { from, force } => commands::restore(&config, from, force).await,
        Command::Dev { command } => match command {
            DevCommand::Up { controller_only, worker_only, workers } => {
                commands::dev_up(&config, controller_only, worker_only, workers).await
            }
            DevCommand::Down => commands::dev_down(&config).await,
        },
    }
}
