//! GitHub REST wire types.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GhUser {
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhBranchRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhPullRequest {
    pub number: i64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    /// `open` or `closed`.
    pub state: String,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub merged_at: Option<String>,
    #[serde(default)]
    pub mergeable_state: Option<String>,
    pub head: GhBranchRef,
    pub base: GhBranchRef,
    #[serde(default)]
    pub user: GhUser,
    pub html_url: String,
}

impl GhPullRequest {
    pub fn is_merged(&self) -> bool {
        self.merged || self.merged_at.is_some()
    }
}

/// Unthreaded conversation comment (Issues API).
#[derive(Debug, Clone, Deserialize)]
pub struct GhIssueComment {
    pub id: i64,
    #[serde(default)]
    pub user: Option<GhUser>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

/// File/line-anchored review comment.
#[derive(Debug, Clone, Deserialize)]
pub struct GhReviewComment {
    pub id: i64,
    #[serde(default)]
    pub in_reply_to_id: Option<i64>,
    #[serde(default)]
    pub user: Option<GhUser>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub line: Option<i64>,
    #[serde(default)]
    pub original_line: Option<i64>,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GhCheckOutput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhCheckRun {
    pub id: i64,
    pub name: String,
    /// `queued`, `in_progress`, `completed`...
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub output: GhCheckOutput,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhCheckRunPage {
    #[serde(default)]
    pub check_runs: Vec<GhCheckRun>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhCommitStatus {
    pub id: i64,
    pub context: String,
    /// `pending`, `success`, `failure` or `error`.
    pub state: String,
    #[serde(default)]
    pub target_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GhCombinedStatus {
    #[serde(default)]
    pub statuses: Vec<GhCommitStatus>,
}
