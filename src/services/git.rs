//! Git collaborators: commit/push and working-directory lookup.
//!
//! Both shell out to the `git` CLI through `tokio::process` with
//! `kill_on_drop`, so dropping the owning future (shutdown) kills the child.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::AppError;

/// Remote that fixes are pushed to.
const REMOTE: &str = "origin";

/// Stage, commit and push changes in a working directory.
#[async_trait]
pub trait GitOps: Send + Sync {
    /// Whether the working tree has uncommitted changes.
    async fn has_changes(&self, workdir: &Path) -> Result<bool, AppError>;

    /// Commit every change and push. Returns the full commit hash.
    ///
    /// A clean tree is an error (`no changes to commit`).
    async fn commit_and_push(&self, workdir: &Path, message: &str) -> Result<String, AppError>;
}

/// Map a PR's repository and branch to a local checkout.
#[async_trait]
pub trait Workspace: Send + Sync {
    async fn workdir(&self, repo: &str, branch: &str) -> Result<PathBuf, AppError>;
}

/// Run `git` in `dir`, returning stdout.
async fn run_git(dir: &Path, args: &[&str]) -> Result<String, AppError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| AppError::git(format!("Failed to run git {}: {}", args.join(" "), e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `git` CLI implementation of [`GitOps`].
#[derive(Debug, Default, Clone)]
pub struct GitCli;

#[async_trait]
impl GitOps for GitCli {
    async fn has_changes(&self, workdir: &Path) -> Result<bool, AppError> {
        let status = run_git(workdir, &["status", "--porcelain"]).await?;
        Ok(!status.trim().is_empty())
    }

    async fn commit_and_push(&self, workdir: &Path, message: &str) -> Result<String, AppError> {
        if !self.has_changes(workdir).await? {
            return Err(AppError::git("no changes to commit"));
        }

        run_git(workdir, &["add", "-A"]).await?;
        run_git(workdir, &["commit", "--no-gpg-sign", "-m", message]).await?;
        let hash = run_git(workdir, &["rev-parse", "HEAD"]).await?.trim().to_string();
        run_git(workdir, &["push", REMOTE, "HEAD"]).await?;

        log::info!("[git] Pushed {} from {}", short_hash(&hash), workdir.display());
        Ok(hash)
    }
}

/// First eight characters of a commit hash.
pub fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}

/// Worktree-backed implementation of [`Workspace`].
///
/// Reuses a worktree already checked out on the branch, otherwise creates one.
/// A reused worktree is moved to the remote branch tip first, keeping local
/// uncommitted changes.
#[derive(Debug, Clone)]
pub struct GitWorktrees {
    repos: BTreeMap<String, PathBuf>,
    worktree_root: Option<PathBuf>,
}

impl GitWorktrees {
    pub fn new(repos: BTreeMap<String, PathBuf>, worktree_root: Option<PathBuf>) -> Self {
        Self {
            repos,
            worktree_root,
        }
    }

    fn new_worktree_path(&self, repo: &str, checkout: &Path, branch: &str) -> PathBuf {
        let dir_name = branch.replace('/', "-");
        match &self.worktree_root {
            Some(root) => root.join(repo).join(dir_name),
            None => checkout
                .parent()
                .unwrap_or(checkout)
                .join(format!("{}-worktrees", repo))
                .join(dir_name),
        }
    }
}

#[async_trait]
impl Workspace for GitWorktrees {
    async fn workdir(&self, repo: &str, branch: &str) -> Result<PathBuf, AppError> {
        let checkout = self.repos.get(repo).ok_or_else(|| {
            AppError::config(format!(
                "No local checkout configured for repository '{}' (add it under [repos])",
                repo
            ))
        })?;

        let listing = run_git(checkout, &["worktree", "list", "--porcelain"]).await?;
        if let Some(existing) = find_worktree(&listing, branch) {
            let remote_branch = format!("{}/{}", REMOTE, branch);
            run_git(&existing, &["fetch", REMOTE, branch]).await?;
            run_git(&existing, &["reset", "--keep", &remote_branch]).await?;
            log::debug!("[git] Reusing worktree {} for {}", existing.display(), branch);
            return Ok(existing);
        }

        let path = self.new_worktree_path(repo, checkout, branch);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let remote_branch = format!("{}/{}", REMOTE, branch);
        let path_arg = path.to_string_lossy().into_owned();

        run_git(checkout, &["fetch", REMOTE, branch]).await?;
        run_git(
            checkout,
            &["worktree", "add", "-B", branch, &path_arg, &remote_branch],
        )
        .await?;

        log::info!("[git] Created worktree {} for {}", path.display(), branch);
        Ok(path)
    }
}

/// Find the worktree checked out on `branch` in `git worktree list --porcelain` output.
fn find_worktree(porcelain: &str, branch: &str) -> Option<PathBuf> {
    let wanted = format!("refs/heads/{}", branch);
    let mut current: Option<&str> = None;
    for line in porcelain.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            current = Some(path);
        } else if let Some(reference) = line.strip_prefix("branch ") {
            if reference == wanted {
                return current.map(PathBuf::from);
            }
        } else if line.is_empty() {
            current = None;
        }
    }
    None
}
