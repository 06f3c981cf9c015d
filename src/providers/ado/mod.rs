//! Azure DevOps backend.
//!
//! Comments live inside threads and the thread carries resolution status.
//! Pipeline status comes from the builds queued for the PR merge ref,
//! deduplicated per pipeline definition. Requests authenticate with an Entra
//! bearer token when the `az` CLI can supply one, else with the PAT.
//!
//! ADO answers an invalid token with HTTP 203 and a sign-in page instead of a
//! 401. The first 203 drops the cached token and retries once; a second one
//! is reported as expired authentication.

pub mod auth;
pub mod identifier;
pub mod types;

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::{header, Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::AdoConfig;
use crate::error::AppError;
use crate::models::pull_request::short_branch;
use crate::models::{
    BuildInfo, Comment, CommentResolution, CommentSide, InlineComment, PipelineState,
    PipelineStatus, PrInfo, PrState, WorkflowAction,
};
use crate::services::credentials::{CredentialService, ADO_PAT_ENV};
use crate::services::log_distiller;

use self::auth::{basic_credentials, EntraTokenCache};
use self::identifier::{is_ado_pr_url, parse_pr_identifier};
use self::types::*;
use super::http::{self, endpoint_of, RetryPolicy};
use super::{ensure_known_resolution, ProviderBackend, DEFAULT_TIMEOUT_SECS, USER_AGENT};

pub use identifier::AdoPrRef;

/// REST API version used for every call.
pub const API_VERSION: &str = "7.1";

/// Reply posted on automated-reviewer threads by the `addressBot` action.
pub const BOT_ACK_REPLY: &str = "Acknowledged, addressed by Otto.";

/// Results that make a deduplicated build count as failed.
const FAILED_RESULTS: [&str; 3] = ["failed", "partiallySucceeded", "canceled"];

/// Request payload variants.
enum Payload<'a> {
    Empty,
    Json(&'a serde_json::Value),
    /// `application/json-patch+json`, used by work item creation.
    JsonPatch(&'a serde_json::Value),
}

/// Azure DevOps provider backend.
pub struct AdoBackend {
    client: Client,
    config: AdoConfig,
    pat: Option<String>,
    entra: Option<EntraTokenCache>,
    retry: RetryPolicy,
}

impl AdoBackend {
    /// Create a backend, resolving the PAT from config, `OTTO_ADO_PAT` or the keychain.
    pub fn new(config: AdoConfig) -> Result<Self, AppError> {
        let pat = CredentialService::resolve(config.pat.as_deref(), ADO_PAT_ENV, &config.base_url);
        Self::with_credentials(config, pat)
    }

    /// Create a backend with an explicit PAT and no keychain lookup.
    pub fn with_credentials(config: AdoConfig, pat: Option<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        let entra = config.use_entra.then(EntraTokenCache::new);

        Ok(Self {
            client,
            config,
            pat,
            entra,
            retry: RetryPolicy::default(),
        })
    }

    /// Override the rate-limit retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // ---- URLs ---------------------------------------------------------------

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// `{base}/{org}/{project}/_apis/{path}?api-version=7.1`
    fn project_url(&self, org: &str, project: &str, path: &str) -> String {
        with_api_version(format!(
            "{}/{}/{}/_apis/{}",
            self.base(),
            urlencoding::encode(org),
            urlencoding::encode(project),
            path
        ))
    }

    fn repo_url(&self, pr: &PrInfo, path: &str) -> String {
        self.project_url(
            &pr.organization,
            &pr.project,
            &format!("git/repositories/{}/{}", urlencoding::encode(&pr.repo_id), path),
        )
    }

    fn threads_url(&self, pr: &PrInfo) -> String {
        self.repo_url(pr, &format!("pullRequests/{}/threads", pr.id))
    }

    fn thread_url(&self, pr: &PrInfo, thread_id: &str, suffix: &str) -> String {
        self.repo_url(
            pr,
            &format!("pullRequests/{}/threads/{}{}", pr.id, thread_id, suffix),
        )
    }

    fn pr_web_url(&self, org: &str, project: &str, repo: &str, id: i64) -> String {
        format!(
            "{}/{}/{}/_git/{}/pullrequest/{}",
            self.base(),
            urlencoding::encode(org),
            urlencoding::encode(project),
            urlencoding::encode(repo),
            id
        )
    }

    // ---- Transport ----------------------------------------------------------

    async fn auth_header(&self) -> Result<String, AppError> {
        if let Some(entra) = &self.entra {
            match entra.token().await {
                Ok(token) => return Ok(format!("Bearer {}", token)),
                Err(e) => log::debug!("[ado] Entra token unavailable, using PAT: {}", e),
            }
        }
        match &self.pat {
            Some(pat) => Ok(format!("Basic {}", basic_credentials(pat))),
            None => Err(AppError::authentication(
                "No Entra token available and no ADO PAT configured",
            )),
        }
    }

    async fn invalidate_token(&self) {
        if let Some(entra) = &self.entra {
            entra.invalidate().await;
        }
    }

    /// Send with auth, 429 retry and the one-shot 203 re-auth.
    async fn send(
        &self,
        method: Method,
        url: &str,
        payload: Payload<'_>,
    ) -> Result<Response, AppError> {
        let endpoint = endpoint_of(url);
        let mut reauthenticated = false;

        loop {
            let auth = self.auth_header().await?;
            let response = http::send_with_retry(&self.retry, &endpoint, || {
                let request = self
                    .client
                    .request(method.clone(), url)
                    .header(header::AUTHORIZATION, auth.as_str())
                    .header(header::ACCEPT, "application/json");
                match &payload {
                    Payload::Empty => request,
                    Payload::Json(body) => request.json(body),
                    Payload::JsonPatch(body) => request
                        .header(header::CONTENT_TYPE, "application/json-patch+json")
                        .body(body.to_string()),
                }
            })
            .await?;

            if response.status() != StatusCode::NON_AUTHORITATIVE_INFORMATION {
                return Ok(response);
            }

            if reauthenticated {
                return Err(AppError::authentication_expired_for(
                    format!("ADO rejected credentials (HTTP 203) for {}", endpoint),
                    self.name(),
                ));
            }

            log::warn!("[ado] HTTP 203 from {}, refreshing credentials", endpoint);
            self.invalidate_token().await;
            reauthenticated = true;
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AppError> {
        let response = self.send(Method::GET, url, Payload::Empty).await?;
        http::handle_response(response, &endpoint_of(url)).await
    }

    async fn get_text(&self, url: &str) -> Result<String, AppError> {
        let response = self.send(Method::GET, url, Payload::Empty).await?;
        http::read_success_text(response, &endpoint_of(url)).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, AppError> {
        let response = self.send(method, url, Payload::Json(body)).await?;
        http::handle_response(response, &endpoint_of(url)).await
    }

    async fn send_json_discard(
        &self,
        method: Method,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<(), AppError> {
        let response = self.send(method, url, Payload::Json(body)).await?;
        http::expect_success(response, &endpoint_of(url)).await
    }

    // ---- Resource fetches ---------------------------------------------------

    async fn fetch_pull_request(
        &self,
        org: &str,
        project: &str,
        repo: &str,
        id: i64,
    ) -> Result<AdoPullRequest, AppError> {
        let url = self.project_url(
            org,
            project,
            &format!(
                "git/repositories/{}/pullrequests/{}",
                urlencoding::encode(repo),
                id
            ),
        );
        self.get_json(&url).await.map_err(|e| {
            if e.is_not_found() {
                AppError::not_found_with_id("PullRequest", id.to_string())
            } else {
                e
            }
        })
    }

    async fn fetch_threads(&self, pr: &PrInfo) -> Result<Vec<AdoThread>, AppError> {
        let list: AdoList<AdoThread> = self.get_json(&self.threads_url(pr)).await?;
        Ok(list.value)
    }

    /// `{base}/{org}/{project}/_git/{repo}/pullrequest/{id}` on a server
    /// outside the hosted domains.
    fn parse_server_url(&self, url: &str) -> Option<AdoPrRef> {
        let url = url.trim();
        let base = self.base();
        let prefix = url.get(..base.len())?;
        if !prefix.eq_ignore_ascii_case(base) {
            return None;
        }
        let path = url.get(base.len()..)?.split(['?', '#']).next()?;
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            [org, project, git, repo, pr, id, ..]
                if git.eq_ignore_ascii_case("_git") && pr.eq_ignore_ascii_case("pullrequest") =>
            {
                let decode = |s: &str| {
                    urlencoding::decode(s)
                        .map(|d| d.into_owned())
                        .unwrap_or_else(|_| s.to_string())
                };
                Some(AdoPrRef {
                    id: id.parse().ok()?,
                    organization: Some(decode(org)),
                    project: Some(decode(project)),
                    repository: Some(decode(repo)),
                })
            }
            _ => None,
        }
    }

    fn coordinates<'a>(
        &'a self,
        parsed: &'a AdoPrRef,
    ) -> Result<(&'a str, &'a str, &'a str), AppError> {
        let org = parsed
            .organization
            .as_deref()
            .unwrap_or(self.config.organization.as_str());
        let project = parsed
            .project
            .as_deref()
            .unwrap_or(self.config.project.as_str());
        let repo = parsed
            .repository
            .as_deref()
            .unwrap_or(self.config.repository.as_str());
        for (value, field) in [(org, "organization"), (project, "project"), (repo, "repository")] {
            if value.is_empty() {
                return Err(AppError::invalid_input_field(
                    format!("ADO {} not configured; pass a full PR URL", field),
                    field,
                ));
            }
        }
        Ok((org, project, repo))
    }

    // ---- Workflow actions ---------------------------------------------------

    async fn publish_draft(&self, pr: &PrInfo) -> Result<(), AppError> {
        let url = self.repo_url(pr, &format!("pullrequests/{}", pr.id));
        self.send_json_discard(Method::PATCH, &url, &serde_json::json!({ "isDraft": false }))
            .await
    }

    async fn enable_auto_complete(&self, pr: &PrInfo) -> Result<(), AppError> {
        let url = format!(
            "{}/{}/_apis/connectionData",
            self.base(),
            urlencoding::encode(&pr.organization)
        );
        let connection: AdoConnectionData = self.get_json(&url).await?;

        let body = serde_json::json!({
            "autoCompleteSetBy": { "id": connection.authenticated_user.id },
            "completionOptions": {
                "deleteSourceBranch": true,
                "mergeStrategy": "squash",
            },
        });
        let url = self.repo_url(pr, &format!("pullrequests/{}", pr.id));
        self.send_json_discard(Method::PATCH, &url, &body).await
    }

    async fn create_work_item(&self, pr: &PrInfo) -> Result<(), AppError> {
        let raw = self
            .fetch_pull_request(&pr.organization, &pr.project, &pr.repo_id, pr.id)
            .await?;
        let artifact = format!(
            "vstfs:///Git/PullRequestId/{}%2F{}%2F{}",
            raw.repository.project.id, raw.repository.id, pr.id
        );
        let body = serde_json::json!([
            { "op": "add", "path": "/fields/System.Title", "value": pr.title },
            {
                "op": "add",
                "path": "/relations/-",
                "value": {
                    "rel": "ArtifactLink",
                    "url": artifact,
                    "attributes": { "name": "Pull Request" },
                },
            },
        ]);
        let url = self.project_url(
            &pr.organization,
            &pr.project,
            &format!(
                "wit/workitems/${}",
                urlencoding::encode(&self.config.work_item_type)
            ),
        );
        let response = self
            .send(Method::POST, &url, Payload::JsonPatch(&body))
            .await?;
        let item: AdoWorkItem = http::handle_response(response, &endpoint_of(&url)).await?;
        log::info!("[ado] Created work item {} for PR {}", item.id, pr.id);
        Ok(())
    }

    async fn address_bot_threads(&self, pr: &PrInfo) -> Result<(), AppError> {
        let threads = self.fetch_threads(pr).await?;
        let mut addressed = 0usize;

        for thread in threads.iter().filter(|t| self.is_open_bot_thread(t)) {
            let thread_id = thread.id.to_string();
            self.reply_to_comment(pr, &thread_id, BOT_ACK_REPLY).await?;
            self.resolve_comment(pr, &thread_id, CommentResolution::Fixed)
                .await?;
            addressed += 1;
        }

        if addressed > 0 {
            log::info!("[ado] Addressed {} bot thread(s) on PR {}", addressed, pr.id);
        }
        Ok(())
    }

    fn is_open_bot_thread(&self, thread: &AdoThread) -> bool {
        if thread.is_deleted || !thread.status.as_ref().is_some_and(ThreadStatusValue::is_open) {
            return false;
        }
        thread.comments.first().is_some_and(|first| {
            self.config
                .bot_identities
                .iter()
                .any(|bot| bot == &first.author.display_name)
        })
    }
}

#[async_trait]
impl ProviderBackend for AdoBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn matches_url(&self, url: &str) -> bool {
        if is_ado_pr_url(url) {
            return true;
        }
        // On-premises servers: anything under the configured base URL.
        let base = self.base().to_lowercase();
        !base.contains("dev.azure.com")
            && url.to_lowercase().starts_with(&base)
            && url.to_lowercase().contains("/pullrequest/")
    }

    async fn get_pr(&self, id_or_url: &str) -> Result<PrInfo, AppError> {
        let parsed = match parse_pr_identifier(id_or_url) {
            Ok(parsed) => parsed,
            Err(e) => self.parse_server_url(id_or_url).ok_or(e)?,
        };
        let (org, project, repo) = self.coordinates(&parsed)?;
        let raw = self.fetch_pull_request(org, project, repo, parsed.id).await?;
        Ok(self.map_pull_request(org, raw))
    }

    async fn get_pipeline_status(&self, pr: &PrInfo) -> Result<PipelineStatus, AppError> {
        let branch = format!("refs/pull/{}/merge", pr.id);
        let url = self.project_url(
            &pr.organization,
            &pr.project,
            &format!(
                "build/builds?branchName={}&queryOrder=queueTimeDescending",
                urlencoding::encode(&branch)
            ),
        );
        let list: AdoList<AdoBuild> = self.get_json(&url).await?;
        Ok(aggregate_builds(list.value))
    }

    async fn get_comments(&self, pr: &PrInfo) -> Result<Vec<Comment>, AppError> {
        let threads = self.fetch_threads(pr).await?;
        Ok(threads
            .iter()
            .flat_map(|t| thread_comments(t, self.config.include_system_comments))
            .collect())
    }

    async fn post_comment(&self, pr: &PrInfo, body: &str) -> Result<(), AppError> {
        let payload = serde_json::json!({
            "comments": [{ "parentCommentId": 0, "content": body, "commentType": 1 }],
            "status": thread_status::ACTIVE,
        });
        let _: AdoThread = self
            .send_json(Method::POST, &self.threads_url(pr), &payload)
            .await?;
        Ok(())
    }

    async fn post_inline_comment(
        &self,
        pr: &PrInfo,
        comment: &InlineComment,
    ) -> Result<(), AppError> {
        #[derive(Serialize)]
        struct Position {
            line: i64,
            offset: i64,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct ThreadContext {
            file_path: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            right_file_start: Option<Position>,
            #[serde(skip_serializing_if = "Option::is_none")]
            right_file_end: Option<Position>,
            #[serde(skip_serializing_if = "Option::is_none")]
            left_file_start: Option<Position>,
            #[serde(skip_serializing_if = "Option::is_none")]
            left_file_end: Option<Position>,
        }

        let at = || Some(Position { line: comment.line, offset: 1 });
        let file_path = if comment.file_path.starts_with('/') {
            comment.file_path.clone()
        } else {
            format!("/{}", comment.file_path)
        };
        let context = match comment.side {
            CommentSide::Right => ThreadContext {
                file_path,
                right_file_start: at(),
                right_file_end: at(),
                left_file_start: None,
                left_file_end: None,
            },
            CommentSide::Left => ThreadContext {
                file_path,
                right_file_start: None,
                right_file_end: None,
                left_file_start: at(),
                left_file_end: at(),
            },
        };

        let payload = serde_json::json!({
            "comments": [{ "parentCommentId": 0, "content": comment.body, "commentType": 1 }],
            "status": thread_status::ACTIVE,
            "threadContext": context,
        });
        let _: AdoThread = self
            .send_json(Method::POST, &self.threads_url(pr), &payload)
            .await?;
        Ok(())
    }

    async fn reply_to_comment(
        &self,
        pr: &PrInfo,
        thread_id: &str,
        body: &str,
    ) -> Result<(), AppError> {
        let url = self.thread_url(pr, thread_id, "/comments");
        let payload = serde_json::json!({
            "content": body,
            "parentCommentId": 1,
            "commentType": 1,
        });
        self.send_json_discard(Method::POST, &url, &payload).await
    }

    async fn resolve_comment(
        &self,
        pr: &PrInfo,
        thread_id: &str,
        resolution: CommentResolution,
    ) -> Result<(), AppError> {
        ensure_known_resolution(resolution)?;
        let url = self.thread_url(pr, thread_id, "");
        let payload = serde_json::json!({ "status": resolution_code(resolution) });
        self.send_json_discard(Method::PATCH, &url, &payload)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    AppError::not_found_with_id("Thread", thread_id)
                } else {
                    e
                }
            })
    }

    async fn get_build_logs(&self, pr: &PrInfo, build_id: &str) -> Result<String, AppError> {
        let timeline_url = self.project_url(
            &pr.organization,
            &pr.project,
            &format!("build/builds/{}/timeline", build_id),
        );
        let timeline: AdoTimeline = self.get_json(&timeline_url).await?;

        let mut records: Vec<&AdoTimelineRecord> = timeline
            .records
            .iter()
            .filter(|r| r.log.is_some() && r.result.as_deref() == Some("failed"))
            .collect();
        if records.is_empty() {
            log::debug!(
                "[ado] Build {} has no failed timeline records, reading every log",
                build_id
            );
            records = timeline.records.iter().filter(|r| r.log.is_some()).collect();
        }
        if records.is_empty() {
            return Err(AppError::not_found_with_id("BuildLogs", build_id));
        }

        let mut sections = Vec::with_capacity(records.len());
        for record in records {
            let Some(log_ref) = &record.log else { continue };
            let url = self.project_url(
                &pr.organization,
                &pr.project,
                &format!("build/builds/{}/logs/{}", build_id, log_ref.id),
            );
            let raw = self.get_text(&url).await?;
            sections.push(format!(
                "=== {} ===\n{}",
                record.name,
                log_distiller::distill(&raw)
            ));
        }
        Ok(sections.join("\n\n"))
    }

    async fn run_workflow(&self, pr: &PrInfo, action: WorkflowAction) -> Result<(), AppError> {
        log::info!("[ado] Running workflow action {} on PR {}", action, pr.id);
        match action {
            WorkflowAction::Submit => self.publish_draft(pr).await,
            WorkflowAction::AutoComplete => self.enable_auto_complete(pr).await,
            WorkflowAction::CreateWorkItem => self.create_work_item(pr).await,
            WorkflowAction::AddressBot => self.address_bot_threads(pr).await,
        }
    }
}

impl AdoBackend {
    fn map_pull_request(&self, org: &str, raw: AdoPullRequest) -> PrInfo {
        let url = self.pr_web_url(
            org,
            &raw.repository.project.name,
            &raw.repository.name,
            raw.pull_request_id,
        );
        PrInfo {
            id: raw.pull_request_id,
            title: raw.title,
            description: raw.description.unwrap_or_default(),
            status: PrState::from(raw.status.as_str()),
            merge_status: raw.merge_status.unwrap_or_default(),
            source_branch: short_branch(&raw.source_ref_name),
            target_branch: short_branch(&raw.target_ref_name),
            author: raw.created_by.display_name,
            url,
            repo_id: raw.repository.name,
            project: raw.repository.project.name,
            organization: org.to_string(),
            head_sha: raw.last_merge_source_commit.map(|c| c.commit_id),
        }
    }
}

/// Keep the newest build per pipeline definition and aggregate the result.
///
/// `builds` must be ordered newest first, as the builds API returns them.
pub fn aggregate_builds(builds: Vec<AdoBuild>) -> PipelineStatus {
    let mut seen = HashSet::new();
    let builds: Vec<BuildInfo> = builds
        .into_iter()
        .filter(|b| seen.insert(b.definition.name.clone()))
        .map(|b| BuildInfo {
            id: b.id.to_string(),
            name: b.definition.name,
            status: b.status.unwrap_or_default(),
            result: b.result.unwrap_or_default(),
            url: b.links.web.map(|w| w.href).unwrap_or_default(),
        })
        .collect();

    let state = if builds.is_empty() {
        PipelineState::Pending
    } else if builds.iter().all(|b| b.result == "succeeded") {
        PipelineState::Succeeded
    } else if builds
        .iter()
        .any(|b| FAILED_RESULTS.contains(&b.result.as_str()))
    {
        PipelineState::Failed
    } else if builds.iter().any(|b| b.status == "inProgress") {
        PipelineState::InProgress
    } else {
        PipelineState::Pending
    };

    PipelineStatus { state, builds }
}

/// Flatten one thread into comments.
///
/// Comment IDs are `{thread}/{comment}` since ADO numbers comments per thread.
pub fn thread_comments(thread: &AdoThread, include_system: bool) -> Vec<Comment> {
    if thread.is_deleted {
        return Vec::new();
    }

    let is_resolved = thread.status.as_ref().is_some_and(|s| !s.is_open());
    let context = thread.thread_context.as_ref();
    let file_path = context.and_then(|c| c.file_path.clone());
    let line = context.and_then(|c| c.right_file_start.or(c.left_file_start).map(|p| p.line));
    let thread_id = thread.id.to_string();

    thread
        .comments
        .iter()
        .filter(|c| !c.is_deleted)
        .filter(|c| include_system || c.comment_type.as_deref() != Some("system"))
        .map(|c| Comment {
            id: format!("{}/{}", thread.id, c.id),
            thread_id: thread_id.clone(),
            author: c.author.display_name.clone(),
            body: c.content.clone().unwrap_or_default(),
            file_path: file_path.clone(),
            line,
            is_resolved,
            comment_type: c.comment_type.clone().unwrap_or_else(|| "text".to_string()),
            created_at: c.published_date.clone().unwrap_or_default(),
        })
        .collect()
}

/// Numeric thread status for a resolution.
pub fn resolution_code(resolution: CommentResolution) -> u8 {
    match resolution {
        CommentResolution::Fixed => thread_status::FIXED,
        CommentResolution::WontFix => thread_status::WONT_FIX,
        CommentResolution::ByDesign => thread_status::BY_DESIGN,
        CommentResolution::Unknown => thread_status::CLOSED,
    }
}

fn with_api_version(url: String) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}api-version={}", url, separator, API_VERSION)
}
