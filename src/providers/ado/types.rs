//! ADO REST wire types (`api-version=7.1`).

use serde::Deserialize;

/// ADO wraps collections as `{"count": n, "value": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct AdoList<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoIdentity {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub unique_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdoProjectRef {
    #[serde(default)]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoRepository {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub project: AdoProjectRef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoCommitRef {
    pub commit_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoPullRequest {
    pub pull_request_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,
    #[serde(default)]
    pub merge_status: Option<String>,
    pub source_ref_name: String,
    pub target_ref_name: String,
    #[serde(default)]
    pub created_by: AdoIdentity,
    pub repository: AdoRepository,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub last_merge_source_commit: Option<AdoCommitRef>,
}

/// Thread status as returned by the API: usually a name, sometimes the numeric code.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ThreadStatusValue {
    Code(u8),
    Name(String),
}

/// Numeric thread status codes.
pub mod thread_status {
    pub const ACTIVE: u8 = 1;
    pub const FIXED: u8 = 2;
    pub const WONT_FIX: u8 = 3;
    pub const CLOSED: u8 = 4;
    pub const BY_DESIGN: u8 = 5;
    pub const PENDING: u8 = 6;
}

impl ThreadStatusValue {
    /// Canonical camelCase status name.
    pub fn name(&self) -> String {
        match self {
            Self::Code(code) => match *code {
                thread_status::ACTIVE => "active",
                thread_status::FIXED => "fixed",
                thread_status::WONT_FIX => "wontFix",
                thread_status::CLOSED => "closed",
                thread_status::BY_DESIGN => "byDesign",
                thread_status::PENDING => "pending",
                _ => "unknown",
            }
            .to_string(),
            Self::Name(name) => name.clone(),
        }
    }

    /// Threads still awaiting action.
    pub fn is_open(&self) -> bool {
        matches!(self.name().as_str(), "active" | "pending")
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AdoFilePosition {
    pub line: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoThreadContext {
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub right_file_start: Option<AdoFilePosition>,
    #[serde(default)]
    pub left_file_start: Option<AdoFilePosition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoComment {
    pub id: i64,
    #[serde(default)]
    pub parent_comment_id: i64,
    #[serde(default)]
    pub author: AdoIdentity,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub comment_type: Option<String>,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoThread {
    pub id: i64,
    #[serde(default)]
    pub status: Option<ThreadStatusValue>,
    #[serde(default)]
    pub thread_context: Option<AdoThreadContext>,
    #[serde(default)]
    pub comments: Vec<AdoComment>,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdoDefinitionRef {
    #[serde(default)]
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdoHref {
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdoBuildLinks {
    #[serde(default)]
    pub web: Option<AdoHref>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoBuild {
    pub id: i64,
    pub definition: AdoDefinitionRef,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default, rename = "_links")]
    pub links: AdoBuildLinks,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdoLogRef {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdoTimelineRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub log: Option<AdoLogRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdoTimeline {
    #[serde(default)]
    pub records: Vec<AdoTimelineRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoConnectionData {
    pub authenticated_user: AdoIdentity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdoWorkItem {
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_status_accepts_names_and_codes() {
        let named: AdoThread =
            serde_json::from_str(r#"{"id": 1, "status": "byDesign", "comments": []}"#).unwrap();
        assert_eq!(named.status.unwrap().name(), "byDesign");

        let coded: AdoThread =
            serde_json::from_str(r#"{"id": 2, "status": 2, "comments": []}"#).unwrap();
        let status = coded.status.unwrap();
        assert_eq!(status.name(), "fixed");
        assert!(!status.is_open());

        assert!(ThreadStatusValue::Code(thread_status::PENDING).is_open());
    }

    #[test]
    fn test_build_links_optional() {
        let build: AdoBuild = serde_json::from_str(
            r#"{"id": 7, "definition": {"id": 3, "name": "CI"}, "status": "completed", "result": "failed"}"#,
        )
        .unwrap();
        assert!(build.links.web.is_none());
        assert_eq!(build.result.as_deref(), Some("failed"));
    }
}
