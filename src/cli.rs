//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI parser for `otto`.
#[derive(Debug, Parser)]
#[command(
    name = "otto",
    version,
    about = "Watch pull requests, fix failing CI and triage review comments"
)]
pub struct Cli {
    /// Config file (default: $OTTO_CONFIG, then the per-user config dir).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage tracked pull requests.
    #[command(subcommand)]
    Pr(PrCommand),
    /// Control the background daemon.
    #[command(subcommand)]
    Daemon(DaemonCommand),
    /// Manage provider tokens in the OS keychain.
    #[command(subcommand)]
    Auth(AuthCommand),
}

#[derive(Debug, Subcommand)]
pub enum PrCommand {
    /// Start tracking a PR by URL or bare ID.
    Add {
        target: String,
        /// Backend name; required for a bare ID when several are configured.
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        max_fix_attempts: Option<u32>,
    },
    /// Stop tracking a PR.
    Remove { provider: String, id: i64 },
    /// List tracked PRs.
    List,
    /// Print a PR document.
    Show { provider: String, id: i64 },
    /// Reset a failed PR to watching with a fresh fix budget.
    Retry { provider: String, id: i64 },
}

#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Spawn the daemon in the background.
    Start,
    /// Stop the background daemon.
    Stop,
    /// Show whether the daemon is running.
    Status,
    /// Run the monitor loop in the foreground.
    Run,
    /// Ask the running daemon to poll now.
    Poll,
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Store a token for a configured provider.
    Set {
        provider: String,
        /// Token value; read from stdin when omitted.
        #[arg(long)]
        token: Option<String>,
    },
    /// Remove a provider's stored token.
    Clear { provider: String },
}
