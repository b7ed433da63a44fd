use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "strata",
    about = "Infrastructure orchestration: plan, schedule, and execute fleet-wide changes",
    version
)]
pub struct Cli {
    /// Data directory holding the store, config, and signing key.
    #[arg(long, env = "STRATA_HOME", global = true)]
    pub config: Option<PathBuf>,

    /// Emit verbose (debug-level) logging.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Emit machine-readable JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Initialize the data directory: store, default config, signing key.
    Init {
        /// Single-node mode: no peer coordination, no remote store.
        #[arg(long)]
        solo: bool,
    },

    /// Parse and validate a desired-resource-list file.
    Validate {
        /// Path to the desired-resource-list JSON file.
        #[arg(default_value = "resources.json")]
        path: PathBuf,
    },

    /// Diff desired resources against recorded state and emit a plan.
    Plan {
        /// Path to the desired-resource-list JSON file.
        #[arg(long, default_value = "resources.json")]
        resources: PathBuf,

        /// Where to write the serialized plan.
        #[arg(long)]
        out: PathBuf,

        /// Restrict planning to these resource ids or names.
        #[arg(long = "target")]
        targets: Vec<String>,

        /// Re-read actual state through the provider before diffing.
        #[arg(long, conflicts_with = "no_refresh")]
        refresh: bool,

        /// Diff against the last-recorded state without re-reading it.
        #[arg(long)]
        no_refresh: bool,
    },

    /// Execute a previously emitted plan.
    Apply {
        /// Path to a plan file written by `plan`.
        #[arg(long)]
        plan: PathBuf,

        /// Skip the confirmation prompt.
        #[arg(long)]
        auto_approve: bool,

        /// Bound on concurrently executing plan units per level.
        #[arg(long)]
        parallelism: Option<i32>,
    },

    /// Invoke a named action against the current resource set.
    Run {
        /// Action identifier.
        action: String,

        /// Action parameter, repeatable: `--param k=v`.
        #[arg(long = "param")]
        params: Vec<String>,

        /// Extra variable, repeatable: `--extra-vars k=v`.
        #[arg(long = "extra-vars")]
        extra_vars: Vec<String>,

        /// Restrict the action to these resource ids or names.
        #[arg(long = "target")]
        targets: Vec<String>,
    },

    /// Detect and optionally reconcile configuration drift.
    Drift {
        #[command(subcommand)]
        command: DriftCommand,
    },

    /// Bring a host under management, or roll back a failed attempt.
    Onboard {
        #[command(subcommand)]
        command: OnboardCommand,
    },

    /// Collect, list, or inspect facts gathered from managed hosts.
    Facts {
        #[command(subcommand)]
        command: FactsCommand,
    },

    /// Write a point-in-time backup of the data directory's store.
    Backup {
        /// Destination file.
        #[arg(long)]
        out: PathBuf,

        /// Compress the backup.
        #[arg(long)]
        compress: bool,

        /// Include large binary artifacts (e.g. provider caches).
        #[arg(long)]
        include_blobs: bool,
    },

    /// Restore the store from a backup written by `backup`.
    Restore {
        /// Source backup file.
        #[arg(long)]
        from: PathBuf,

        /// Overwrite an existing store without prompting.
        #[arg(long)]
        force: bool,
    },

    /// Local development environment.
    Dev {
        #[command(subcommand)]
        command: DevCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum DriftCommand {
    /// Compare recorded state against actual state and report divergence.
    Detect {
        #[arg(long = "target")]
        targets: Vec<String>,

        /// Apply a plan to correct any drift found.
        #[arg(long)]
        auto_reconcile: bool,

        /// Write the drift report to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Apply a plan correcting previously detected drift.
    Reconcile {
        #[arg(long = "target")]
        targets: Vec<String>,

        /// Compute the reconciliation plan without executing it.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum OnboardCommand {
    /// Register a host reachable over SSH.
    Ssh(Box<SshOnboardArgs>),

    /// Undo a failed or unwanted onboarding attempt.
    Rollback {
        #[arg(long)]
        host: String,
    },
}

#[derive(Debug, Args)]
pub struct SshOnboardArgs {
    #[arg(long)]
    pub host: String,

    #[arg(long)]
    pub user: String,

    #[arg(long)]
    pub password: Option<String>,

    #[arg(long)]
    pub key: Option<PathBuf>,

    #[arg(long)]
    pub create_user: Option<String>,

    #[arg(long)]
    pub sudo: bool,

    #[arg(long)]
    pub lock_down: bool,

    /// Comma-separated `k=v` labels applied to the registered host.
    #[arg(long)]
    pub labels: Option<String>,

    #[arg(long, default_value_t = 22)]
    pub port: u16,
}

#[derive(Debug, Subcommand)]
pub enum FactsCommand {
    /// Collect facts from the hosts matched by a selector.
    Collect {
        #[arg(long, default_value = "all")]
        selector: String,

        #[arg(long = "target")]
        targets: Vec<String>,

        #[arg(long = "type")]
        fact_type: Option<String>,

        /// Re-collect even if a cached fact hasn't expired.
        #[arg(long)]
        refresh: bool,
    },

    /// List every recorded fact.
    List,

    /// Show facts recorded for one target.
    Show {
        #[arg(long)]
        target: String,

        #[arg(long = "type")]
        fact_type: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum DevCommand {
    /// Start the local HTTP surface in the foreground.
    Up {
        #[arg(long, conflicts_with = "worker_only")]
        controller_only: bool,

        #[arg(long)]
        worker_only: bool,

        #[arg(long)]
        workers: Option<u32>,
    },

    /// Stop the local development environment.
    Down,
}
