//! Durable per-PR tracking document.
//!
//! One document per `(provider, id)`. On disk it is a YAML front-matter block
//! followed by a free-form Markdown activity log:
//!
//! ```text
//! ---
//! id: 1234
//! provider: ado
//! status: watching
//! ...
//! ---
//! # Otto activity
//! - **2024-01-15 10:30 UTC** Tracking started
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::pull_request::PrInfo;

/// Front-matter delimiter line.
const FRONT_MATTER_DELIMITER: &str = "---";

/// Default fix attempt budget for newly tracked PRs.
pub const DEFAULT_MAX_FIX_ATTEMPTS: u32 = 5;

/// Tracking status of a PR document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    Watching,
    Fixing,
    Green,
    Failed,
    Abandoned,
}

impl From<&str> for DocStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "fixing" => Self::Fixing,
            "green" => Self::Green,
            "failed" => Self::Failed,
            "abandoned" => Self::Abandoned,
            _ => Self::Watching,
        }
    }
}

impl std::fmt::Display for DocStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Watching => write!(f, "watching"),
            Self::Fixing => write!(f, "fixing"),
            Self::Green => write!(f, "green"),
            Self::Failed => write!(f, "failed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Key/value block persisted ahead of the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FrontMatter {
    id: i64,
    title: String,
    provider: String,
    repo: String,
    branch: String,
    target: String,
    status: DocStatus,
    url: String,
    created: DateTime<Utc>,
    #[serde(default)]
    last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    fix_attempts: u32,
    #[serde(default = "default_max_fix_attempts")]
    max_fix_attempts: u32,
    #[serde(default)]
    seen_comment_ids: BTreeSet<String>,
}

fn default_max_fix_attempts() -> u32 {
    DEFAULT_MAX_FIX_ATTEMPTS
}

/// The unit of tracked state for one pull request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrDocument {
    pub id: i64,
    pub title: String,
    pub provider: String,
    pub repo: String,
    pub branch: String,
    pub target: String,
    pub status: DocStatus,
    pub url: String,
    pub created: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
    pub fix_attempts: u32,
    pub max_fix_attempts: u32,
    /// Grows monotonically; IDs are never removed.
    pub seen_comment_ids: BTreeSet<String>,
    /// Append-only Markdown activity log.
    pub body: String,
}

impl PrDocument {
    /// Start tracking a freshly fetched PR.
    pub fn new(provider: &str, pr: &PrInfo, max_fix_attempts: u32, now: DateTime<Utc>) -> Self {
        let mut doc = Self {
            id: pr.id,
            title: pr.title.clone(),
            provider: provider.to_string(),
            repo: pr.repo_id.clone(),
            branch: pr.source_branch.clone(),
            target: pr.target_branch.clone(),
            status: DocStatus::Watching,
            url: pr.url.clone(),
            created: now,
            last_checked: None,
            fix_attempts: 0,
            max_fix_attempts,
            seen_comment_ids: BTreeSet::new(),
            body: "# Otto activity\n".to_string(),
        };
        doc.append_log(now, "Tracking started");
        doc
    }

    /// Store file name for a `(provider, id)` pair.
    pub fn file_name_for(provider: &str, id: i64) -> String {
        format!("{}__{}", provider, id)
    }

    /// Store file name for this document.
    pub fn file_name(&self) -> String {
        Self::file_name_for(&self.provider, self.id)
    }

    /// Whether another fix attempt is allowed.
    pub fn can_fix(&self) -> bool {
        self.fix_attempts < self.max_fix_attempts
    }

    /// Whether the comment was already handled.
    pub fn has_seen(&self, comment_id: &str) -> bool {
        self.seen_comment_ids.contains(comment_id)
    }

    /// Record a comment as handled. Returns `false` if it was already seen.
    pub fn mark_seen(&mut self, comment_id: &str) -> bool {
        self.seen_comment_ids.insert(comment_id.to_string())
    }

    /// Append a dated entry to the activity log.
    pub fn append_log(&mut self, now: DateTime<Utc>, entry: &str) {
        if !self.body.ends_with('\n') && !self.body.is_empty() {
            self.body.push('\n');
        }
        let mut lines = entry.lines();
        let first = lines.next().unwrap_or_default();
        self.body.push_str(&format!(
            "- **{}** {}\n",
            now.format("%Y-%m-%d %H:%M UTC"),
            first
        ));
        for line in lines {
            self.body.push_str(&format!("  {}\n", line));
        }
    }

    /// Count one fix attempt and move to the follow-up state.
    ///
    /// Returns `true` when the budget is now exhausted (status is `failed`).
    pub fn record_fix_attempt(&mut self) -> bool {
        self.fix_attempts = (self.fix_attempts + 1).min(self.max_fix_attempts);
        if self.fix_attempts >= self.max_fix_attempts {
            self.status = DocStatus::Failed;
            true
        } else {
            self.status = DocStatus::Watching;
            false
        }
    }

    /// Parse a document from its on-disk representation.
    pub fn parse(content: &str) -> Result<Self, AppError> {
        let rest = content
            .strip_prefix(FRONT_MATTER_DELIMITER)
            .and_then(|r| r.strip_prefix('\n').or_else(|| r.strip_prefix("\r\n")))
            .ok_or_else(|| AppError::malformed("Document does not start with front matter"))?;

        let (header, body) = split_front_matter(rest)
            .ok_or_else(|| AppError::malformed("Unterminated front matter block"))?;

        let fm: FrontMatter = serde_yaml::from_str(header).map_err(|e| {
            AppError::malformed_with_context(format!("Invalid front matter: {}", e), header)
        })?;

        Ok(Self {
            id: fm.id,
            title: fm.title,
            provider: fm.provider,
            repo: fm.repo,
            branch: fm.branch,
            target: fm.target,
            status: fm.status,
            url: fm.url,
            created: fm.created,
            last_checked: fm.last_checked,
            fix_attempts: fm.fix_attempts.min(fm.max_fix_attempts),
            max_fix_attempts: fm.max_fix_attempts,
            seen_comment_ids: fm.seen_comment_ids,
            body: body.to_string(),
        })
    }

    /// Render the document for writing to disk.
    pub fn render(&self) -> Result<String, AppError> {
        let fm = FrontMatter {
            id: self.id,
            title: self.title.clone(),
            provider: self.provider.clone(),
            repo: self.repo.clone(),
            branch: self.branch.clone(),
            target: self.target.clone(),
            status: self.status,
            url: self.url.clone(),
            created: self.created,
            last_checked: self.last_checked,
            fix_attempts: self.fix_attempts,
            max_fix_attempts: self.max_fix_attempts,
            seen_comment_ids: self.seen_comment_ids.clone(),
        };
        let header = serde_yaml::to_string(&fm)?;
        Ok(format!(
            "{delim}\n{header}{delim}\n{body}",
            delim = FRONT_MATTER_DELIMITER,
            header = header,
            body = self.body
        ))
    }
}

/// Split `header\n---\nbody` at the closing delimiter line.
fn split_front_matter(rest: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FRONT_MATTER_DELIMITER {
            let header = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}
