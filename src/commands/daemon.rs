//! `otto daemon ...` handlers.

use crate::cli::DaemonCommand;
use crate::commands::Invocation;
use crate::error::AppError;
use crate::services::daemon::{self, DaemonContext};

pub async fn run(inv: &Invocation, command: DaemonCommand) -> Result<(), AppError> {
    let config = &inv.config;
    match command {
        DaemonCommand::Start => {
            let pid = daemon::start(config, Some(&inv.config_path))?;
            inv.emit(&serde_json::json!({ "pid": pid }), || {
                format!(
                    "Daemon started (pid {}), log: {}",
                    pid,
                    config.log_file().display()
                )
            })
        }
        DaemonCommand::Stop => {
            let stopped = daemon::stop(config)?;
            inv.emit(&serde_json::json!({ "stopped": stopped }), || {
                if stopped {
                    "Daemon stopped".to_string()
                } else {
                    "Daemon is not running".to_string()
                }
            })
        }
        DaemonCommand::Status => {
            let status = daemon::status(config)?;
            inv.emit(&status, || match (status.pid, status.started_at) {
                (Some(pid), Some(started)) => format!(
                    "Running (pid {}) since {}",
                    pid,
                    started.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                (Some(pid), None) => format!("Running (pid {})", pid),
                _ => "Not running".to_string(),
            })
        }
        DaemonCommand::Run => DaemonContext::from_config(config.clone())?.run().await,
        DaemonCommand::Poll => {
            daemon::poll(config)?;
            inv.emit(&serde_json::json!({ "triggered": true }), || {
                "Poll triggered".to_string()
            })
        }
    }
}
