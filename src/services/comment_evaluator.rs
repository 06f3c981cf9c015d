//! LLM-assisted triage of a single review comment.
//!
//! The LLM sees the comment, the code around the commented line and the PR
//! metadata, and answers `AGREE`, `BY_DESIGN` or `WONT_FIX` with a reply.
//! Agreed comments are fixed in the PR's working directory and pushed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::{signed, Comment, CommentResolution, PrDocument, PrInfo};
use crate::providers::ProviderBackend;
use crate::services::git::{short_hash, GitOps, Workspace};
use crate::services::llm::{decode_or_repair, run_in_session, LlmClient};
use crate::services::pr_store::PrStore;

/// Triage verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Agree,
    ByDesign,
    WontFix,
}

impl Verdict {
    pub fn resolution(self) -> CommentResolution {
        match self {
            Self::Agree => CommentResolution::Fixed,
            Self::ByDesign => CommentResolution::ByDesign,
            Self::WontFix => CommentResolution::WontFix,
        }
    }
}

/// Structured LLM answer.
#[derive(Debug, Clone, Deserialize)]
pub struct Decision {
    pub decision: Verdict,
    #[serde(default)]
    pub reply: String,
    #[serde(default)]
    pub fix_description: Option<String>,
}

/// What happened to one comment.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// `None` when the LLM reply could not be parsed.
    pub verdict: Option<Verdict>,
    pub reply: String,
    pub resolution: Option<CommentResolution>,
    pub commit: Option<String>,
}

pub struct CommentEvaluator {
    llm: Arc<dyn LlmClient>,
    git: Arc<dyn GitOps>,
    workspace: Arc<dyn Workspace>,
    cancel: CancellationToken,
    context_lines: usize,
    json_retry_budget: usize,
}

impl CommentEvaluator {
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
            context_lines: 10,
            json_retry_budget: 2,
        }
    }

    pub fn with_context_lines(mut self, lines: usize) -> Self {
        self.context_lines = lines;
        self
    }

    pub fn with_json_retry_budget(mut self, budget: usize) -> Self {
        self.json_retry_budget = budget;
        self
    }

    /// Triage one comment, reply, resolve, and record it as seen.
    ///
    /// The comment is marked seen and logged even when a provider call fails;
    /// that failure is then returned.
    pub async fn evaluate(
        &self,
        backend: &dyn ProviderBackend,
        store: &PrStore,
        pr: &PrInfo,
        comment: &Comment,
    ) -> Result<Evaluation, AppError> {
        let provider = backend.name();
        let doc = store.load(provider, pr.id).await?;

        let workdir = match self.workspace.workdir(&doc.repo, &doc.branch).await {
            Ok(dir) => Some(dir),
            Err(e) => {
                log::warn!(
                    "[comments] No working directory for {} ({}): {}",
                    doc.repo,
                    doc.branch,
                    e
                );
                None
            }
        };

        let context = match (&workdir, &comment.file_path, comment.line) {
            (Some(dir), Some(path), Some(line)) => {
                read_context(dir, path, line, self.context_lines).await
            }
            _ => String::new(),
        };

        let llm = self.llm.as_ref();
        let budget = self.json_retry_budget;
        let prompt = evaluation_prompt(pr, comment, &context);
        let (raw, decision) = run_in_session(
            llm,
            &format!("Review comment {} on PR {}", comment.id, pr.id),
            workdir.as_deref(),
            &self.cancel,
            |session| async move {
                let raw = llm.send_prompt(&session, &prompt).await?;
                let decision = decode_or_repair::<Decision>(llm, Some(&session), &raw, budget).await;
                Ok((raw, decision))
            },
        )
        .await?;

        let mut evaluation = match decision {
            Ok(decision) => self.apply(decision, workdir.as_deref(), comment).await,
            Err(e) => {
                log::warn!(
                    "[comments] Unparseable decision for comment {}: {}",
                    comment.id,
                    e
                );
                Evaluation {
                    verdict: None,
                    reply: raw,
                    resolution: None,
                    commit: None,
                }
            }
        };
        if evaluation.reply.trim().is_empty() {
            evaluation.reply = default_reply(evaluation.verdict);
        }

        let mut outcome = backend
            .reply_to_comment(pr, &comment.thread_id, &signed(&evaluation.reply))
            .await;
        if let (Ok(()), Some(resolution)) = (&outcome, evaluation.resolution) {
            outcome = backend
                .resolve_comment(pr, &comment.thread_id, resolution)
                .await;
        }

        let now = Utc::now();
        let entry = activity_entry(comment, &evaluation, outcome.as_ref().err());
        store.update(provider, pr.id, |doc: &mut PrDocument| {
            doc.mark_seen(&comment.id);
            doc.append_log(now, &entry);
            Ok(())
        }).await?;
        log::info!("[comments] PR {}/{}: {}", provider, pr.id, entry);

        outcome.map(|()| evaluation)
    }

    async fn apply(&self, decision: Decision, workdir: Option<&Path>, comment: &Comment) -> Evaluation {
        let mut reply = decision.reply;
        let mut commit = None;

        if decision.decision == Verdict::Agree {
            match workdir {
                Some(dir) => {
                    let message = commit_message(comment, decision.fix_description.as_deref());
                    let pushed = tokio::select! {
                        result = self.git.commit_and_push(dir, &message) => result,
                        _ = self.cancel.cancelled() => Err(AppError::cancelled("commit interrupted by shutdown")),
                    };
                    match pushed {
                        Ok(hash) => {
                            reply = format!("{}\n\nFixed in commit {}.", reply.trim_end(), short_hash(&hash));
                            commit = Some(hash);
                        }
                        Err(e) => log::warn!(
                            "[comments] Commit for comment {} failed, resolving without hash: {}",
                            comment.id,
                            e
                        ),
                    }
                }
                None => log::warn!(
                    "[comments] Comment {} agreed but no working directory to commit from",
                    comment.id
                ),
            }
        }

        Evaluation {
            verdict: Some(decision.decision),
            reply,
            resolution: Some(decision.decision.resolution()),
            commit,
        }
    }
}

async fn read_context(workdir: &Path, file_path: &str, line: i64, radius: usize) -> String {
    let path: PathBuf = workdir.join(file_path.trim_start_matches('/'));
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => excerpt(&content, line, radius),
        Err(e) => {
            log::debug!("[comments] No context from {}: {}", path.display(), e);
            String::new()
        }
    }
}

/// Lines `line ± radius` (1-based, clamped), numbered, with the target marked.
pub fn excerpt(content: &str, line: i64, radius: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() || line < 1 {
        return String::new();
    }
    let target = line as usize;
    let start = target.saturating_sub(radius).max(1);
    let end = target.saturating_add(radius).min(lines.len());
    if start > end {
        return String::new();
    }

    (start..=end)
        .map(|n| {
            let marker = if n == target { ">" } else { " " };
            format!("{}{:>5} | {}", marker, n, lines[n - 1])
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn evaluation_prompt(pr: &PrInfo, comment: &Comment, context: &str) -> String {
    let location = match (&comment.file_path, comment.line) {
        (Some(path), Some(line)) => format!("{}:{}", path, line),
        (Some(path), None) => path.clone(),
        _ => "(general comment)".to_string(),
    };
    let context = if context.is_empty() {
        "(no code context available)".to_string()
    } else {
        context.to_string()
    };

    format!(
        "You are the author of pull request #{id} \"{title}\" ({branch} into {target}).\n\
         PR description:\n{description}\n\n\
         A reviewer ({author}) left this comment at {location}:\n\
         \"\"\"\n{body}\n\"\"\"\n\n\
         Code around that line:\n{context}\n\n\
         Decide how to handle it:\n\
         - AGREE: the comment is right. Edit the files in the working directory to address it.\n\
         - BY_DESIGN: the code is intentionally this way. Explain why.\n\
         - WONT_FIX: the suggestion will not be applied. Explain why.\n\n\
         Do not commit or push. Answer with only this JSON object:\n\
         {{\"decision\": \"AGREE\" | \"BY_DESIGN\" | \"WONT_FIX\", \
         \"reply\": \"<reply to the reviewer>\", \
         \"fix_description\": \"<one line summary of the change, or null>\"}}",
        id = pr.id,
        title = pr.title,
        branch = pr.source_branch,
        target = pr.target_branch,
        description = pr.description,
        author = comment.author,
        location = location,
        body = comment.body,
        context = context,
    )
}

fn commit_message(comment: &Comment, fix_description: Option<&str>) -> String {
    match fix_description.map(str::trim).filter(|d| !d.is_empty()) {
        Some(description) => format!("{} (review comment {})", description, comment.id),
        None => format!("Address review comment {}", comment.id),
    }
}

fn default_reply(verdict: Option<Verdict>) -> String {
    match verdict {
        Some(Verdict::Agree) => "Good catch, addressed.",
        Some(Verdict::ByDesign) => "This is intentional.",
        Some(Verdict::WontFix) => "We will not change this.",
        None => "Otto could not evaluate this comment.",
    }
    .to_string()
}

fn activity_entry(comment: &Comment, evaluation: &Evaluation, error: Option<&AppError>) -> String {
    let verdict = match evaluation.verdict {
        Some(Verdict::Agree) => "AGREE",
        Some(Verdict::ByDesign) => "BY_DESIGN",
        Some(Verdict::WontFix) => "WONT_FIX",
        None => "unparsed reply posted",
    };
    let mut entry = format!("Comment {} by {}: {}", comment.id, comment.author, verdict);
    if let Some(hash) = &evaluation.commit {
        entry.push_str(&format!(", commit {}", short_hash(hash)));
    }
    if let Some(e) = error {
        entry.push_str(&format!(" (provider error: {})", e));
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "l1\nl2\nl3\nl4\nl5\nl6\nl7";

    #[test]
    fn test_excerpt_window() {
        let out = excerpt(FILE, 4, 1);
        assert_eq!(out, "     3 | l3\n>    4 | l4\n     5 | l5");
    }

    #[test]
    fn test_excerpt_clamps_to_file_bounds() {
        let out = excerpt(FILE, 1, 2);
        assert!(out.starts_with(">    1 | l1"));
        assert!(out.ends_with("     3 | l3"));

        let out = excerpt(FILE, 7, 10);
        assert_eq!(out.lines().count(), 7);

        assert_eq!(excerpt(FILE, 0, 2), "");
        assert_eq!(excerpt("", 3, 2), "");
        // Past the end: only the tail that overlaps the window.
        assert_eq!(excerpt(FILE, 9, 2), "     7 | l7");
    }

    #[tokio::test]
    async fn test_missing_file_gives_empty_context() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_context(dir.path(), "/src/missing.rs", 3, 5).await, "");

        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), FILE).unwrap();
        assert!(read_context(dir.path(), "/src/lib.rs", 3, 0)
            .await
            .contains(">    3 | l3"));
    }

    #[test]
    fn test_decision_parsing() {
        let d: Decision = serde_json::from_str(
            r#"{"decision":"WONT_FIX","reply":"Out of scope","fix_description":null}"#,
        )
        .unwrap();
        assert_eq!(d.decision, Verdict::WontFix);
        assert_eq!(d.decision.resolution(), CommentResolution::WontFix);
        assert!(serde_json::from_str::<Decision>(r#"{"decision":"MAYBE"}"#).is_err());
    }

    #[test]
    fn test_commit_message() {
        let comment = Comment {
            id: "12/1".to_string(),
            thread_id: "12".to_string(),
            author: "rev".to_string(),
            body: String::new(),
            file_path: None,
            line: None,
            is_resolved: false,
            comment_type: "text".to_string(),
            created_at: String::new(),
        };
        assert_eq!(
            commit_message(&comment, Some("Rename helper")),
            "Rename helper (review comment 12/1)"
        );
        assert_eq!(commit_message(&comment, Some("  ")), "Address review comment 12/1");
    }
}
