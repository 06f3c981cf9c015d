//! Bounded CI recovery.
//!
//! One invocation is one fix attempt:
//! 1. Diagnose: distilled logs of every failed build go to the LLM, which
//!    answers with a plain-text diagnosis.
//! 2. Patch: the diagnosis goes to an LLM session scoped to the PR's working
//!    directory, which edits the implicated files.
//!
//! The changes are then committed and pushed. The attempt budget is guarded
//! by the caller; the fixer only counts.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::{signed, DocStatus, PipelineStatus, PrDocument, PrInfo};
use crate::providers::ProviderBackend;
use crate::services::git::{short_hash, GitOps, Workspace};
use crate::services::llm::{run_in_session, LlmClient};
use crate::services::pr_store::PrStore;

/// Result of one fix attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct FixOutcome {
    /// Attempts used after this one.
    pub fix_attempts: u32,
    /// The budget is used up and the document is `failed`.
    pub exhausted: bool,
    /// Pushed commit, when the attempt got that far.
    pub commit: Option<String>,
    /// Why the attempt failed, when it did.
    pub failure: Option<String>,
}

pub struct Fixer {
    llm: Arc<dyn LlmClient>,
    git: Arc<dyn GitOps>,
    workspace: Arc<dyn Workspace>,
    cancel: CancellationToken,
}

impl Fixer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        git: Arc<dyn GitOps>,
        workspace: Arc<dyn Workspace>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            llm,
            git,
            workspace,
            cancel,
        }
    }

    /// Run one fix attempt for a PR whose pipeline failed.
    ///
    /// Errors before any LLM work (no failed build logs, cancellation) leave
    /// the attempt count untouched and return `Err`. Once diagnosis starts,
    /// the attempt is counted whatever the outcome.
    pub async fn fix(
        &self,
        backend: &dyn ProviderBackend,
        store: &PrStore,
        pr: &PrInfo,
        pipeline: &PipelineStatus,
    ) -> Result<FixOutcome, AppError> {
        let provider = backend.name();
        let doc = store.update(provider, pr.id, |doc| {
            doc.status = DocStatus::Fixing;
            Ok(())
        }).await?;
        log::info!(
            "[fixer] PR {}/{}: starting fix attempt {}/{}",
            provider,
            pr.id,
            doc.fix_attempts + 1,
            doc.max_fix_attempts
        );

        let logs = match self.collect_failed_logs(backend, pr, pipeline).await {
            Ok(logs) => logs,
            Err(e) => {
                self.abort_attempt(store, provider, pr.id, &e).await?;
                return Err(e);
            }
        };

        let result = match self.attempt(pr, &doc, &logs).await {
            Err(e) if e.is_cancelled() => {
                self.abort_attempt(store, provider, pr.id, &e).await?;
                return Err(e);
            }
            other => other,
        };

        let now = Utc::now();
        let updated = store.update(provider, pr.id, |doc| {
            doc.record_fix_attempt();
            let entry = match &result {
                Ok(hash) => format!(
                    "Fix attempt {}/{} pushed commit {}",
                    doc.fix_attempts,
                    doc.max_fix_attempts,
                    short_hash(hash)
                ),
                Err(e) => format!(
                    "Fix attempt {}/{} failed: {}",
                    doc.fix_attempts, doc.max_fix_attempts, e
                ),
            };
            doc.append_log(now, &entry);
            Ok(())
        }).await?;

        let exhausted = updated.status == DocStatus::Failed;
        if exhausted {
            log::warn!(
                "[fixer] PR {}/{}: fix attempts exhausted ({}/{})",
                provider,
                pr.id,
                updated.fix_attempts,
                updated.max_fix_attempts
            );
            if let Err(e) = backend.post_comment(pr, &signed(&exhausted_comment(&updated))).await {
                log::warn!("[fixer] Failed to post exhaustion notice on PR {}: {}", pr.id, e);
            }
        }

        match &result {
            Ok(hash) => log::info!("[fixer] PR {}/{}: pushed {}", provider, pr.id, short_hash(hash)),
            Err(e) => log::warn!("[fixer] PR {}/{}: attempt failed: {}", provider, pr.id, e),
        }

        Ok(FixOutcome {
            fix_attempts: updated.fix_attempts,
            exhausted,
            failure: result.as_ref().err().map(|e| e.to_string()),
            commit: result.ok(),
        })
    }

    /// Diagnose, patch, commit. Returns the pushed commit hash.
    async fn attempt(&self, pr: &PrInfo, doc: &PrDocument, logs: &str) -> Result<String, AppError> {
        let llm = self.llm.as_ref();

        let prompt = diagnosis_prompt(pr, logs);
        let diagnosis = run_in_session(
            llm,
            &format!("Diagnose PR {}", pr.id),
            None,
            &self.cancel,
            |session| async move { llm.send_prompt(&session, &prompt).await },
        )
        .await?;
        if diagnosis.trim().is_empty() {
            return Err(AppError::llm("Empty diagnosis"));
        }

        let workdir = self.workspace.workdir(&doc.repo, &doc.branch).await?;
        let prompt = patch_prompt(pr, &diagnosis);
        run_in_session(
            llm,
            &format!("Fix PR {}", pr.id),
            Some(workdir.as_path()),
            &self.cancel,
            |session| async move { llm.send_prompt(&session, &prompt).await },
        )
        .await?;

        self.commit(&workdir, doc).await
    }

    async fn commit(&self, workdir: &Path, doc: &PrDocument) -> Result<String, AppError> {
        let message = format!(
            "Fix CI failure (otto attempt {}/{})",
            doc.fix_attempts + 1,
            doc.max_fix_attempts
        );
        tokio::select! {
            result = self.git.commit_and_push(workdir, &message) => result,
            _ = self.cancel.cancelled() => Err(AppError::cancelled("commit interrupted by shutdown")),
        }
    }

    /// Distilled logs of every failed build, each under a header.
    async fn collect_failed_logs(
        &self,
        backend: &dyn ProviderBackend,
        pr: &PrInfo,
        pipeline: &PipelineStatus,
    ) -> Result<String, AppError> {
        let mut sections = Vec::new();
        for build in pipeline.failed_builds() {
            match backend.get_build_logs(pr, &build.id).await {
                Ok(text) if !text.trim().is_empty() => {
                    sections.push(format!("## {} (build {})\n{}", build.name, build.id, text));
                }
                Ok(_) => log::debug!("[fixer] Build {} has empty logs", build.id),
                Err(e) if e.is_authentication_expired() || e.is_cancelled() => return Err(e),
                Err(e) => log::warn!("[fixer] Failed to fetch logs for build {}: {}", build.id, e),
            }
        }
        if sections.is_empty() {
            return Err(AppError::not_found("no failed build logs found"));
        }
        Ok(sections.join("\n\n"))
    }

    /// Put the document back to `watching` without counting an attempt.
    async fn abort_attempt(
        &self,
        store: &PrStore,
        provider: &str,
        id: i64,
        reason: &AppError,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        store.update(provider, id, |doc| {
            doc.status = DocStatus::Watching;
            doc.append_log(now, &format!("Fix skipped: {}", reason));
            Ok(())
        }).await?;
        Ok(())
    }
}

fn diagnosis_prompt(pr: &PrInfo, logs: &str) -> String {
    format!(
        "The CI pipeline for pull request #{id} \"{title}\" (branch {branch} into {target}) failed.\n\
         Below are the relevant excerpts of the failed build logs.\n\n\
         {logs}\n\n\
         Write a diagnosis in plain text with these sections:\n\
         1. Failing checks\n\
         2. Exact errors, quoted from the logs\n\
         3. File and line locations involved\n\
         4. Root cause\n\
         Do not propose unrelated changes.",
        id = pr.id,
        title = pr.title,
        branch = pr.source_branch,
        target = pr.target_branch,
        logs = logs,
    )
}

fn patch_prompt(pr: &PrInfo, diagnosis: &str) -> String {
    format!(
        "You are working in the checkout of branch {branch} for pull request #{id} \"{title}\".\n\
         A CI failure was diagnosed as follows:\n\n\
         {diagnosis}\n\n\
         Fix the failure. Read and edit only the files implicated above. \
         Do not commit, push or change branches; that is handled for you.",
        branch = pr.source_branch,
        id = pr.id,
        title = pr.title,
        diagnosis = diagnosis,
    )
}

fn exhausted_comment(doc: &PrDocument) -> String {
    format!(
        "Otto used all {} automatic fix attempts for this PR and has stopped trying. \
         The pipeline still needs a manual fix; afterwards run `otto pr retry {} {}` \
         to resume monitoring.",
        doc.max_fix_attempts, doc.provider, doc.id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PrState;

    fn pr() -> PrInfo {
        PrInfo {
            id: 42,
            title: "Add cache".to_string(),
            description: String::new(),
            status: PrState::Active,
            merge_status: String::new(),
            source_branch: "feature/cache".to_string(),
            target_branch: "main".to_string(),
            author: "dev".to_string(),
            url: String::new(),
            repo_id: "app".to_string(),
            project: "acme".to_string(),
            organization: "acme".to_string(),
            head_sha: None,
        }
    }

    #[test]
    fn test_prompts_carry_context() {
        let diagnosis = diagnosis_prompt(&pr(), "##[error]boom");
        assert!(diagnosis.contains("##[error]boom"));
        assert!(diagnosis.contains("feature/cache"));
        assert!(diagnosis.contains("Root cause"));

        let patch = patch_prompt(&pr(), "missing import in src/lib.rs");
        assert!(patch.contains("missing import in src/lib.rs"));
        assert!(patch.contains("Do not commit"));
    }

    #[test]
    fn test_exhausted_comment_names_retry_command() {
        let doc = PrDocument::new("ado", &pr(), 5, Utc::now());
        assert!(exhausted_comment(&doc).contains("otto pr retry ado 42"));
    }
}
