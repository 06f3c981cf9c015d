//! Command dispatch and handlers.
//!
//! Each handler loads what it needs from the config, does one thing, and
//! prints either plain text or JSON (`--json`).

pub mod auth;
pub mod daemon;
pub mod pr;

use std::path::PathBuf;

use serde::Serialize;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::error::AppError;

/// Resolved invocation context shared by handlers.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub config: Config,
    pub config_path: PathBuf,
    pub json: bool,
}

impl Invocation {
    pub fn load(cli: &Cli) -> Result<Self, AppError> {
        let config_path = Config::resolve_path(cli.config.as_deref());
        let config = Config::load(&config_path)?;
        Ok(Self {
            config,
            config_path,
            json: cli.json,
        })
    }

    /// Print `value` as JSON, or `text` otherwise.
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<(), AppError> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }
}

/// Dispatch a parsed command to its handler.
pub async fn dispatch(cli: Cli) -> Result<(), AppError> {
    let invocation = Invocation::load(&cli)?;
    match cli.command {
        Command::Pr(command) => pr::run(&invocation, command).await,
        Command::Daemon(command) => daemon::run(&invocation, command).await,
        Command::Auth(command) => auth::run(&invocation, command),
    }
}
