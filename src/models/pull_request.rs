//! Provider-neutral pull request snapshot.

use serde::{Deserialize, Serialize};

/// State of a pull request on the remote system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Active,
    Completed,
    Abandoned,
}

impl From<&str> for PrState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            // ADO says "completed", GitHub says "closed" + merged flag (mapped by the backend).
            "completed" | "merged" => Self::Completed,
            "abandoned" | "closed" => Self::Abandoned,
            _ => Self::Active,
        }
    }
}

impl std::fmt::Display for PrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Fresh snapshot of a pull request, produced on every fetch and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrInfo {
    /// Provider-scoped PR number.
    pub id: i64,

    /// PR title.
    pub title: String,

    /// PR description (Markdown).
    pub description: String,

    /// Remote state.
    pub status: PrState,

    /// Provider merge status string (`succeeded`, `conflicts`, `clean`, `dirty`...).
    pub merge_status: String,

    /// Source branch without the `refs/heads/` prefix.
    pub source_branch: String,

    /// Target branch without the `refs/heads/` prefix.
    pub target_branch: String,

    /// Author display name or login.
    pub author: String,

    /// Browser URL of the PR.
    pub url: String,

    /// Repository name (ADO repo name or GitHub repo name).
    pub repo_id: String,

    /// ADO project, or GitHub owner.
    pub project: String,

    /// ADO organization, or GitHub owner.
    pub organization: String,

    /// Head commit SHA when the provider exposes it (GitHub inline comments need it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_sha: Option<String>,
}

/// Strip a `refs/heads/` prefix from a branch ref.
pub fn short_branch(name: &str) -> String {
    name.trim_start_matches("refs/heads/").to_string()
}
