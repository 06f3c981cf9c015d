//! GitHub backend.
//!
//! GitHub splits review feedback across issue comments (unthreaded) and
//! review comments (threaded by `in_reply_to`). Both are flattened into one
//! comment list. Issue comments get `issue:`-prefixed IDs so a thread ID says
//! which API a reply goes to. Resolution is GraphQL-only. CI state merges
//! check runs with legacy commit statuses.

pub mod graphql;
pub mod types;

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::GitHubConfig;
use crate::error::AppError;
use crate::models::{
    BuildInfo, Comment, CommentResolution, CommentSide, InlineComment, PipelineState,
    PipelineStatus, PrInfo, PrState, WorkflowAction,
};
use crate::services::credentials::{CredentialService, GITHUB_TOKEN_ENV};
use crate::services::log_distiller;

use self::graphql::{
    GraphQlResponse, ReviewThread, ReviewThreadsData, RESOLVE_THREAD_MUTATION,
    REVIEW_THREADS_QUERY,
};
use self::types::*;
use super::http::{self, endpoint_of, RetryPolicy};
use super::{ensure_known_resolution, ProviderBackend, DEFAULT_TIMEOUT_SECS, USER_AGENT};

/// Prefix marking issue-comment IDs and thread IDs.
pub const ISSUE_PREFIX: &str = "issue:";

/// Prefix marking commit-status pseudo build IDs (no logs behind them).
pub const STATUS_PREFIX: &str = "status-";

const PER_PAGE: u32 = 100;

/// Check-run conclusions that force the overall state to failed.
const FAILING_CONCLUSIONS: [&str; 4] = ["failure", "timed_out", "cancelled", "action_required"];

/// A parsed GitHub PR reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhPrRef {
    pub number: i64,
    pub owner: Option<String>,
    pub repo: Option<String>,
}

fn pr_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^https?://(?:www\.)?github\.com/([^/]+)/([^/?#]+)/pull/(\d+)")
            .expect("static github PR pattern")
    })
}

/// Parse `42` or `https://github.com/{owner}/{repo}/pull/42[/...]`.
pub fn parse_pr_identifier(input: &str) -> Result<GhPrRef, AppError> {
    let input = input.trim().trim_start_matches('#');

    if let Ok(number) = input.parse::<i64>() {
        return Ok(GhPrRef {
            number,
            owner: None,
            repo: None,
        });
    }

    let caps = pr_url_regex().captures(input).ok_or_else(|| {
        AppError::invalid_input_field(
            format!("Not a GitHub pull request number or URL: {}", input),
            "pr",
        )
    })?;
    let number = caps[3]
        .parse::<i64>()
        .map_err(|_| AppError::invalid_input_field("PR number out of range", "pr"))?;

    Ok(GhPrRef {
        number,
        owner: Some(caps[1].to_string()),
        repo: Some(caps[2].to_string()),
    })
}

/// GitHub provider backend.
pub struct GitHubBackend {
    client: Client,
    config: GitHubConfig,
    token: Option<String>,
    retry: RetryPolicy,
}

impl GitHubBackend {
    /// Create a backend, resolving the token from config, `GITHUB_TOKEN` or the keychain.
    pub fn new(config: GitHubConfig) -> Result<Self, AppError> {
        let token =
            CredentialService::resolve(config.token.as_deref(), GITHUB_TOKEN_ENV, &config.api_base);
        Self::with_credentials(config, token)
    }

    /// Create a backend with an explicit token and no keychain lookup.
    pub fn with_credentials(config: GitHubConfig, token: Option<String>) -> Result<Self, AppError> {
        if token.is_none() {
            log::warn!(
                "[github] No token for '{}'; requests are unauthenticated",
                config.name
            );
        }
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            token,
            retry: RetryPolicy::default(),
        })
    }

    /// Override the rate-limit retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn repo_path(&self, pr: &PrInfo, path: &str) -> String {
        format!("/repos/{}/{}{}", pr.organization, pr.repo_id, path)
    }

    fn graphql_url(&self) -> String {
        self.config
            .graphql_url
            .clone()
            .unwrap_or_else(|| self.api_url("/graphql"))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, AppError> {
        let endpoint = endpoint_of(url);
        http::send_with_retry(&self.retry, &endpoint, || {
            let request = self.request(method.clone(), url);
            match body {
                Some(body) => request.json(body),
                None => request,
            }
        })
        .await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let response = self.send(Method::GET, &self.api_url(path), None).await?;
        http::handle_response(response, path).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, AppError> {
        let response = self
            .send(Method::POST, &self.api_url(path), Some(body))
            .await?;
        http::handle_response(response, path).await
    }

    /// Follow `Link: rel="next"` until exhausted.
    async fn get_all_pages<P, T, F>(&self, path: &str, extract: F) -> Result<Vec<T>, AppError>
    where
        P: DeserializeOwned,
        F: Fn(P) -> Vec<T>,
    {
        let separator = if path.contains('?') { '&' } else { '?' };
        let mut next = Some(self.api_url(&format!("{}{}per_page={}", path, separator, PER_PAGE)));
        let mut items = Vec::new();

        while let Some(url) = next {
            let response = self.send(Method::GET, &url, None).await?;
            next = next_link(response.headers());
            let page: P = http::handle_response(response, path).await?;
            items.extend(extract(page));
        }

        Ok(items)
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, AppError> {
        let url = self.graphql_url();
        let body = serde_json::json!({ "query": query, "variables": variables });
        let response = self.send(Method::POST, &url, Some(&body)).await?;
        let parsed: GraphQlResponse<T> = http::handle_response(response, "/graphql").await?;
        parsed.into_data()
    }

    async fn review_threads(&self, pr: &PrInfo) -> Result<Vec<ReviewThread>, AppError> {
        let data: ReviewThreadsData = self
            .graphql(
                REVIEW_THREADS_QUERY,
                serde_json::json!({
                    "owner": pr.organization,
                    "repo": pr.repo_id,
                    "number": pr.id,
                }),
            )
            .await?;
        Ok(data.into_threads())
    }

    async fn fetch_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<GhPullRequest, AppError> {
        self.get_json(&format!("/repos/{}/{}/pulls/{}", owner, repo, number))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    AppError::not_found_with_id("PullRequest", number.to_string())
                } else {
                    e
                }
            })
    }

    /// Head SHA from the snapshot, or a fresh fetch when absent.
    async fn head_sha(&self, pr: &PrInfo) -> Result<String, AppError> {
        if let Some(sha) = &pr.head_sha {
            return Ok(sha.clone());
        }
        let raw = self
            .fetch_pull_request(&pr.organization, &pr.repo_id, pr.id)
            .await?;
        Ok(raw.head.sha)
    }

    async fn check_run_output(&self, pr: &PrInfo, build_id: &str) -> Result<String, AppError> {
        let run: GhCheckRun = self
            .get_json(&self.repo_path(pr, &format!("/check-runs/{}", build_id)))
            .await?;
        let text: Vec<String> = [run.output.title, run.output.summary, run.output.text]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if text.is_empty() {
            return Err(AppError::not_found_with_id("BuildLogs", build_id));
        }
        Ok(text.join("\n"))
    }
}

#[async_trait]
impl ProviderBackend for GitHubBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn matches_url(&self, url: &str) -> bool {
        pr_url_regex().is_match(url.trim())
    }

    async fn get_pr(&self, id_or_url: &str) -> Result<PrInfo, AppError> {
        let parsed = parse_pr_identifier(id_or_url)?;
        let owner = parsed.owner.unwrap_or_else(|| self.config.owner.clone());
        let repo = parsed.repo.unwrap_or_else(|| self.config.repo.clone());
        if owner.is_empty() || repo.is_empty() {
            return Err(AppError::invalid_input_field(
                "GitHub owner/repo not configured; pass a full PR URL",
                "repo",
            ));
        }

        let raw = self.fetch_pull_request(&owner, &repo, parsed.number).await?;
        let status = match (raw.state.as_str(), raw.is_merged()) {
            ("open", _) => PrState::Active,
            (_, true) => PrState::Completed,
            _ => PrState::Abandoned,
        };

        Ok(PrInfo {
            id: raw.number,
            title: raw.title,
            description: raw.body.unwrap_or_default(),
            status,
            merge_status: raw.mergeable_state.unwrap_or_default(),
            source_branch: raw.head.ref_name,
            target_branch: raw.base.ref_name,
            author: raw.user.login,
            url: raw.html_url,
            repo_id: repo,
            project: owner.clone(),
            organization: owner,
            head_sha: Some(raw.head.sha),
        })
    }

    async fn get_pipeline_status(&self, pr: &PrInfo) -> Result<PipelineStatus, AppError> {
        let sha = self.head_sha(pr).await?;
        let runs = self
            .get_all_pages(
                &self.repo_path(pr, &format!("/commits/{}/check-runs", sha)),
                |page: GhCheckRunPage| page.check_runs,
            )
            .await?;
        let combined: GhCombinedStatus = self
            .get_json(&self.repo_path(pr, &format!("/commits/{}/status", sha)))
            .await?;
        Ok(aggregate_checks(runs, combined.statuses))
    }

    async fn get_comments(&self, pr: &PrInfo) -> Result<Vec<Comment>, AppError> {
        let issue_comments: Vec<GhIssueComment> = self
            .get_all_pages(
                &self.repo_path(pr, &format!("/issues/{}/comments", pr.id)),
                |page: Vec<GhIssueComment>| page,
            )
            .await?;
        let review_comments: Vec<GhReviewComment> = self
            .get_all_pages(
                &self.repo_path(pr, &format!("/pulls/{}/comments", pr.id)),
                |page: Vec<GhReviewComment>| page,
            )
            .await?;

        let resolved: HashMap<i64, bool> = if review_comments.is_empty() {
            HashMap::new()
        } else {
            match self.review_threads(pr).await {
                Ok(threads) => threads
                    .into_iter()
                    .map(|t| (t.root_comment_id, t.is_resolved))
                    .collect(),
                Err(e) => {
                    log::warn!(
                        "[github] Thread state unavailable for PR {}, treating all as open: {}",
                        pr.id,
                        e
                    );
                    HashMap::new()
                }
            }
        };

        Ok(merge_comments(issue_comments, review_comments, &resolved))
    }

    async fn post_comment(&self, pr: &PrInfo, body: &str) -> Result<(), AppError> {
        let _: serde_json::Value = self
            .post_json(
                &self.repo_path(pr, &format!("/issues/{}/comments", pr.id)),
                &serde_json::json!({ "body": body }),
            )
            .await?;
        Ok(())
    }

    async fn post_inline_comment(
        &self,
        pr: &PrInfo,
        comment: &InlineComment,
    ) -> Result<(), AppError> {
        let sha = self.head_sha(pr).await?;
        let side = match comment.side {
            CommentSide::Right => "RIGHT",
            CommentSide::Left => "LEFT",
        };
        let payload = serde_json::json!({
            "commit_id": sha,
            "event": "COMMENT",
            "comments": [{
                "path": comment.file_path.trim_start_matches('/'),
                "line": comment.line,
                "side": side,
                "body": comment.body,
            }],
        });
        let _: serde_json::Value = self
            .post_json(&self.repo_path(pr, &format!("/pulls/{}/reviews", pr.id)), &payload)
            .await?;
        Ok(())
    }

    async fn reply_to_comment(
        &self,
        pr: &PrInfo,
        thread_id: &str,
        body: &str,
    ) -> Result<(), AppError> {
        if let Some(issue_comment_id) = thread_id.strip_prefix(ISSUE_PREFIX) {
            let original: GhIssueComment = self
                .get_json(&self.repo_path(pr, &format!("/issues/comments/{}", issue_comment_id)))
                .await?;
            let reply = quote_reply(original.body.as_deref().unwrap_or_default(), body);
            return self.post_comment(pr, &reply).await;
        }

        let _: serde_json::Value = self
            .post_json(
                &self.repo_path(pr, &format!("/pulls/{}/comments/{}/replies", pr.id, thread_id)),
                &serde_json::json!({ "body": body }),
            )
            .await?;
        Ok(())
    }

    async fn resolve_comment(
        &self,
        pr: &PrInfo,
        thread_id: &str,
        resolution: CommentResolution,
    ) -> Result<(), AppError> {
        ensure_known_resolution(resolution)?;

        if thread_id.starts_with(ISSUE_PREFIX) {
            log::debug!(
                "[github] {} is an issue comment; nothing to resolve",
                thread_id
            );
            return Ok(());
        }

        let root_id = thread_id.parse::<i64>().map_err(|_| {
            AppError::invalid_input_field(format!("Invalid thread ID: {}", thread_id), "thread_id")
        })?;
        let thread = self
            .review_threads(pr)
            .await?
            .into_iter()
            .find(|t| t.root_comment_id == root_id)
            .ok_or_else(|| AppError::not_found_with_id("ReviewThread", thread_id))?;

        if thread.is_resolved {
            return Ok(());
        }

        let _: serde_json::Value = self
            .graphql(
                RESOLVE_THREAD_MUTATION,
                serde_json::json!({ "threadId": thread.node_id }),
            )
            .await?;
        log::debug!(
            "[github] Resolved thread {} on PR {} ({})",
            thread_id,
            pr.id,
            resolution
        );
        Ok(())
    }

    async fn get_build_logs(&self, pr: &PrInfo, build_id: &str) -> Result<String, AppError> {
        if build_id.starts_with(STATUS_PREFIX) {
            return Err(AppError::not_found_with_id("BuildLogs", build_id));
        }

        let path = self.repo_path(pr, &format!("/actions/jobs/{}/logs", build_id));
        let response = self.send(Method::GET, &self.api_url(&path), None).await?;

        let raw = if response.status() == StatusCode::NOT_FOUND {
            log::debug!(
                "[github] No Actions log for check run {}, using its output",
                build_id
            );
            self.check_run_output(pr, build_id).await?
        } else {
            http::read_success_text(response, &path).await?
        };

        Ok(log_distiller::distill(&raw))
    }

    async fn run_workflow(&self, _pr: &PrInfo, action: WorkflowAction) -> Result<(), AppError> {
        Err(AppError::unsupported(self.name(), action.to_string()))
    }
}

/// Merge check runs and commit statuses into one pipeline status.
pub fn aggregate_checks(runs: Vec<GhCheckRun>, statuses: Vec<GhCommitStatus>) -> PipelineStatus {
    let failed = runs.iter().any(|r| {
        r.conclusion
            .as_deref()
            .is_some_and(|c| FAILING_CONCLUSIONS.contains(&c))
    }) || statuses
        .iter()
        .any(|s| matches!(s.state.as_str(), "failure" | "error"));
    let in_progress = runs.iter().any(|r| r.status == "in_progress");
    let queued = runs
        .iter()
        .any(|r| matches!(r.status.as_str(), "queued" | "waiting" | "requested" | "pending"))
        || statuses.iter().any(|s| s.state == "pending");

    let mut builds: Vec<BuildInfo> = runs
        .into_iter()
        .map(|r| BuildInfo {
            id: r.id.to_string(),
            name: r.name,
            status: r.status,
            result: r.conclusion.unwrap_or_default(),
            url: r.html_url.unwrap_or_default(),
        })
        .collect();
    builds.extend(statuses.into_iter().map(|s| BuildInfo {
        id: format!("{}{}", STATUS_PREFIX, s.id),
        name: s.context,
        status: if s.state == "pending" {
            "pending".to_string()
        } else {
            "completed".to_string()
        },
        result: s.state,
        url: s.target_url.unwrap_or_default(),
    }));

    let state = if builds.is_empty() {
        PipelineState::Pending
    } else if failed {
        PipelineState::Failed
    } else if in_progress {
        PipelineState::InProgress
    } else if queued {
        PipelineState::Pending
    } else {
        PipelineState::Succeeded
    };

    PipelineStatus { state, builds }
}

/// Flatten issue and review comments into one list, oldest first.
pub fn merge_comments(
    issue_comments: Vec<GhIssueComment>,
    review_comments: Vec<GhReviewComment>,
    resolved_roots: &HashMap<i64, bool>,
) -> Vec<Comment> {
    let mut comments: Vec<Comment> = issue_comments
        .into_iter()
        .map(|c| {
            let id = format!("{}{}", ISSUE_PREFIX, c.id);
            Comment {
                thread_id: id.clone(),
                id,
                author: c.user.map(|u| u.login).unwrap_or_default(),
                body: c.body.unwrap_or_default(),
                file_path: None,
                line: None,
                is_resolved: false,
                comment_type: "issue".to_string(),
                created_at: c.created_at,
            }
        })
        .collect();

    comments.extend(review_comments.into_iter().map(|c| {
        let root = c.in_reply_to_id.unwrap_or(c.id);
        Comment {
            id: c.id.to_string(),
            thread_id: root.to_string(),
            author: c.user.map(|u| u.login).unwrap_or_default(),
            body: c.body.unwrap_or_default(),
            file_path: c.path,
            line: c.line.or(c.original_line),
            is_resolved: resolved_roots.get(&root).copied().unwrap_or(false),
            comment_type: "review".to_string(),
            created_at: c.created_at,
        }
    }));

    // RFC 3339 timestamps in UTC sort lexically.
    comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    comments
}

/// Quote the first lines of the original so an unthreaded reply has context.
fn quote_reply(original: &str, reply: &str) -> String {
    let quoted: Vec<String> = original
        .lines()
        .take(3)
        .map(|l| format!("> {}", l))
        .collect();
    if quoted.is_empty() {
        reply.to_string()
    } else {
        format!("{}\n\n{}", quoted.join("\n"), reply)
    }
}

/// URL of the `rel="next"` page from a `Link` header.
pub fn next_link(headers: &header::HeaderMap) -> Option<String> {
    let link = headers.get(header::LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.contains("rel=\"next\"") {
            return None;
        }
        let target = target.trim();
        Some(target.strip_prefix('<')?.strip_suffix('>')?.to_string())
    })
}
