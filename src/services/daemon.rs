//! Daemon lifecycle.
//!
//! `start` spawns a detached `otto daemon run` and records its PID; `run` is
//! the foreground loop; `stop` and `poll` signal the recorded PID. Liveness
//! checks go through `sysinfo`, and a PID file naming a dead process is
//! removed rather than reported as an error.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::AppError;
use crate::providers::Registry;
use crate::services::comment_evaluator::CommentEvaluator;
use crate::services::fixer::Fixer;
use crate::services::git::{GitCli, GitOps, GitWorktrees, Workspace};
use crate::services::llm::{LlmClient, OpenCodeClient};
use crate::services::monitor::MonitorLoop;
use crate::services::pr_store::PrStore;

/// How long in-flight work gets to finish after SIGTERM/SIGINT.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Everything the running daemon needs, built once at startup.
pub struct DaemonContext {
    pub config: Config,
    pub registry: Registry,
    pub store: PrStore,
    pub llm: Arc<dyn LlmClient>,
    pub git: Arc<dyn GitOps>,
    pub workspace: Arc<dyn Workspace>,
    pub started_at: DateTime<Utc>,
    pub cancel: CancellationToken,
    poll_tx: mpsc::Sender<()>,
    poll_rx: mpsc::Receiver<()>,
}

impl DaemonContext {
    /// Build with live collaborators.
    pub fn from_config(config: Config) -> Result<Self, AppError> {
        let registry = Registry::from_config(&config)?;
        if registry.is_empty() {
            log::warn!("[daemon] No providers configured; nothing will be polled");
        }
        let store = PrStore::open(&config.store_dir)?;
        let llm: Arc<dyn LlmClient> = Arc::new(OpenCodeClient::new(&config.llm)?);
        let workspace: Arc<dyn Workspace> = Arc::new(GitWorktrees::new(
            config.repos.clone(),
            config.worktree_root.clone(),
        ));
        Ok(Self::with_collaborators(
            config,
            registry,
            store,
            llm,
            Arc::new(GitCli),
            workspace,
        ))
    }

    pub fn with_collaborators(
        config: Config,
        registry: Registry,
        store: PrStore,
        llm: Arc<dyn LlmClient>,
        git: Arc<dyn GitOps>,
        workspace: Arc<dyn Workspace>,
    ) -> Self {
        let (poll_tx, poll_rx) = mpsc::channel(1);
        Self {
            config,
            registry,
            store,
            llm,
            git,
            workspace,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            poll_tx,
            poll_rx,
        }
    }

    /// Sender side of the poll trigger.
    pub fn poll_sender(&self) -> mpsc::Sender<()> {
        self.poll_tx.clone()
    }

    /// Build the monitor, handing it the trigger receiver.
    pub fn into_monitor(self) -> (MonitorLoop, mpsc::Receiver<()>, Config) {
        let fixer = Fixer::new(
            self.llm.clone(),
            self.git.clone(),
            self.workspace.clone(),
            self.cancel.clone(),
        );
        let evaluator = CommentEvaluator::new(
            self.llm.clone(),
            self.git.clone(),
            self.workspace.clone(),
            self.cancel.clone(),
        )
        .with_context_lines(self.config.context_lines)
        .with_json_retry_budget(self.config.llm.json_retry_budget);
        let monitor = MonitorLoop::new(
            self.registry,
            self.store,
            fixer,
            evaluator,
            self.cancel,
        );
        (monitor, self.poll_rx, self.config)
    }

    /// Run in the foreground until SIGTERM/SIGINT, then drain for up to
    /// [`SHUTDOWN_GRACE`].
    pub async fn run(self) -> Result<(), AppError> {
        let pid_file = self.config.pid_file();
        write_pid_file(&pid_file, std::process::id())?;

        let cancel = self.cancel.clone();
        let started_at = self.started_at;
        let signals = tokio::spawn(watch_signals(cancel.clone(), self.poll_sender()));
        let (monitor, trigger, config) = self.into_monitor();
        log::info!(
            "[daemon] Running (pid {}), polling every {}s",
            std::process::id(),
            config.poll_interval_secs
        );

        let monitor_run = monitor.run(Duration::from_secs(config.poll_interval_secs), trigger);
        tokio::pin!(monitor_run);
        tokio::select! {
            _ = &mut monitor_run => {}
            _ = cancel.cancelled() => {
                log::info!("[daemon] Shutting down, waiting up to {:?}", SHUTDOWN_GRACE);
                if tokio::time::timeout(SHUTDOWN_GRACE, &mut monitor_run).await.is_err() {
                    log::warn!("[daemon] Grace period elapsed, exiting with work in flight");
                }
            }
        }
        signals.abort();

        if read_pid_file(&pid_file)? == Some(std::process::id()) {
            remove_pid_file(&pid_file);
        }
        log::info!(
            "[daemon] Stopped after {}s",
            (Utc::now() - started_at).num_seconds()
        );
        Ok(())
    }
}

/// Request an immediate tick. A request already pending absorbs this one.
#[cfg_attr(not(unix), allow(dead_code))]
fn request_poll(poll: &mpsc::Sender<()>) {
    if poll.try_send(()).is_err() {
        log::debug!("[daemon] Poll already pending");
    }
}

#[cfg(unix)]
async fn watch_signals(cancel: CancellationToken, poll: mpsc::Sender<()>) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut int, mut hup) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::hangup()),
    ) {
        (Ok(term), Ok(int), Ok(hup)) => (term, int, hup),
        _ => {
            log::error!("[daemon] Failed to install signal handlers");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = term.recv() => {
                log::info!("[daemon] SIGTERM received");
                break;
            }
            _ = int.recv() => {
                log::info!("[daemon] SIGINT received");
                break;
            }
            _ = hup.recv() => {
                log::info!("[daemon] SIGHUP received, polling now");
                request_poll(&poll);
            }
        }
    }
    cancel.cancel();
}

#[cfg(not(unix))]
async fn watch_signals(cancel: CancellationToken, _poll: mpsc::Sender<()>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        log::info!("[daemon] Ctrl-C received");
    }
    cancel.cancel();
}

/// What `otto daemon status` reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
}

/// Inspect the PID file, removing it if the process is gone.
pub fn status(config: &Config) -> Result<DaemonStatus, AppError> {
    let pid_file = config.pid_file();
    let mut status = DaemonStatus {
        running: false,
        pid: None,
        started_at: None,
        pid_file: pid_file.clone(),
        log_file: config.log_file(),
    };

    let Some(pid) = read_pid_file(&pid_file)? else {
        return Ok(status);
    };
    match process_start_time(pid) {
        Some(started_at) => {
            status.running = true;
            status.pid = Some(pid);
            status.started_at = Some(started_at);
        }
        None => {
            log::info!("[daemon] Removing stale PID file for {}", pid);
            remove_pid_file(&pid_file);
        }
    }
    Ok(status)
}

/// Spawn a detached `otto daemon run`. Returns the child PID.
pub fn start(config: &Config, config_path: Option<&Path>) -> Result<u32, AppError> {
    let current = status(config)?;
    if let Some(pid) = current.pid {
        return Err(AppError::invalid_input(format!(
            "Daemon already running (pid {})",
            pid
        )));
    }

    fs::create_dir_all(&config.state_dir)?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_file())?;
    let exe = std::env::current_exe()?;

    let mut command = std::process::Command::new(exe);
    if let Some(path) = config_path {
        command.arg("--config").arg(path);
    }
    command
        .args(["daemon", "run"])
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command
        .spawn()
        .map_err(|e| AppError::internal(format!("Failed to spawn daemon: {}", e)))?;
    let pid = child.id();
    write_pid_file(&config.pid_file(), pid)?;
    log::info!("[daemon] Started (pid {}), logging to {}", pid, config.log_file().display());
    Ok(pid)
}

/// SIGTERM the daemon and remove its PID file. Returns `false` if it was not running.
pub fn stop(config: &Config) -> Result<bool, AppError> {
    let current = status(config)?;
    let Some(pid) = current.pid else {
        return Ok(false);
    };
    send_signal(pid, Signal::Term)?;
    remove_pid_file(&current.pid_file);
    log::info!("[daemon] Sent SIGTERM to {}", pid);
    Ok(true)
}

/// Ask the running daemon to tick now.
pub fn poll(config: &Config) -> Result<(), AppError> {
    let current = status(config)?;
    let pid = current
        .pid
        .ok_or_else(|| AppError::not_found("running daemon"))?;
    send_signal(pid, Signal::Hangup)
}

/// Write `pid` via temp file + rename.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<(), AppError> {
    let dir = path
        .parent()
        .ok_or_else(|| AppError::internal(format!("PID file {} has no parent", path.display())))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    writeln!(tmp, "{}", pid)?;
    tmp.persist(path).map_err(|e| {
        AppError::store_at(
            format!("Failed to write PID file: {}", e.error),
            path.display().to_string(),
        )
    })?;
    Ok(())
}

/// PID recorded in the file; `None` when missing. Garbage counts as missing.
pub fn read_pid_file(path: &Path) -> Result<Option<u32>, AppError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text.trim().parse().ok()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("[daemon] Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Start time of a live (non-zombie) process.
fn process_start_time(pid: u32) -> Option<DateTime<Utc>> {
    let mut sys = System::new();
    let pid = Pid::from_u32(pid);
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    let process = sys.process(pid)?;
    if process.status() == ProcessStatus::Zombie {
        return None;
    }
    Utc.timestamp_opt(process.start_time() as i64, 0).single()
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), AppError> {
    let mut sys = System::new();
    let sys_pid = Pid::from_u32(pid);
    sys.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
    let process = sys
        .process(sys_pid)
        .ok_or_else(|| AppError::not_found_with_id("process", pid.to_string()))?;
    match process.kill_with(signal) {
        Some(true) => Ok(()),
        Some(false) => Err(AppError::internal(format!(
            "Failed to send {:?} to {}",
            signal, pid
        ))),
        None => Err(AppError::internal(format!(
            "{:?} is not supported on this platform",
            signal
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> Config {
        Config {
            state_dir: dir.join("state"),
            store_dir: dir.join("prs"),
            ..Config::default()
        }
    }

    #[test]
    fn test_pid_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/otto.pid");
        assert_eq!(read_pid_file(&path).unwrap(), None);
        write_pid_file(&path, 4242).unwrap();
        assert_eq!(read_pid_file(&path).unwrap(), Some(4242));
        write_pid_file(&path, 4343).unwrap();
        assert_eq!(read_pid_file(&path).unwrap(), Some(4343));

        fs::write(&path, "garbage").unwrap();
        assert_eq!(read_pid_file(&path).unwrap(), None);
    }

    #[test]
    fn test_status_reports_live_process() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        write_pid_file(&config.pid_file(), std::process::id()).unwrap();

        let status = status(&config).unwrap();
        assert!(status.running);
        assert_eq!(status.pid, Some(std::process::id()));
        assert!(status.started_at.is_some());
    }

    #[test]
    fn test_stale_pid_file_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        // Above any real pid_max.
        write_pid_file(&config.pid_file(), 0x7fff_fff0).unwrap();

        let status = status(&config).unwrap();
        assert!(!status.running);
        assert_eq!(status.pid, None);
        assert!(!config.pid_file().exists());

        assert!(!stop(&config).unwrap());
        assert!(poll(&config).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_poll_trigger_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let ctx = DaemonContext::with_collaborators(
            config.clone(),
            Registry::new(),
            PrStore::open(&config.store_dir).unwrap(),
            Arc::new(OpenCodeClient::new(&config.llm).unwrap()),
            Arc::new(GitCli),
            Arc::new(GitWorktrees::new(Default::default(), None)),
        );
        let poll = ctx.poll_sender();
        request_poll(&poll);
        request_poll(&poll);

        let (_monitor, mut trigger, _config) = ctx.into_monitor();
        assert_eq!(trigger.try_recv(), Ok(()));
        assert!(trigger.try_recv().is_err());
    }
}
