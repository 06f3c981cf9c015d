//! GraphQL documents for review-thread resolution.
//!
//! REST exposes review comments but not the threads that group them, and
//! only GraphQL can resolve a thread. Threads are keyed here by the REST
//! database ID of their first comment.

use serde::Deserialize;

use crate::error::AppError;

pub const REVIEW_THREADS_QUERY: &str = r#"
query($owner: String!, $repo: String!, $number: Int!) {
  repository(owner: $owner, name: $repo) {
    pullRequest(number: $number) {
      reviewThreads(first: 100) {
        nodes {
          id
          isResolved
          comments(first: 1) { nodes { databaseId } }
        }
      }
    }
  }
}"#;

pub const RESOLVE_THREAD_MUTATION: &str = r#"
mutation($threadId: ID!) {
  resolveReviewThread(input: { threadId: $threadId }) {
    thread { id isResolved }
  }
}"#;

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

impl<T> GraphQlResponse<T> {
    /// Data, or the joined error messages.
    pub fn into_data(self) -> Result<T, AppError> {
        if !self.errors.is_empty() {
            let messages: Vec<_> = self.errors.into_iter().map(|e| e.message).collect();
            return Err(AppError::provider_api(format!(
                "GraphQL error: {}",
                messages.join("; ")
            )));
        }
        self.data
            .ok_or_else(|| AppError::malformed("GraphQL response has neither data nor errors"))
    }
}

#[derive(Debug, Deserialize)]
pub struct Nodes<T> {
    #[serde(default = "Vec::new")]
    pub nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRef {
    pub database_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadNode {
    pub id: String,
    pub is_resolved: bool,
    pub comments: Nodes<CommentRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestNode {
    pub review_threads: Nodes<ThreadNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryNode {
    pub pull_request: Option<PullRequestNode>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewThreadsData {
    pub repository: Option<RepositoryNode>,
}

/// A review thread keyed by its root comment.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewThread {
    pub node_id: String,
    pub root_comment_id: i64,
    pub is_resolved: bool,
}

impl ReviewThreadsData {
    pub fn into_threads(self) -> Vec<ReviewThread> {
        self.repository
            .and_then(|r| r.pull_request)
            .map(|pr| pr.review_threads.nodes)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|t| {
                let root = t.comments.nodes.first()?.database_id?;
                Some(ReviewThread {
                    node_id: t.id,
                    root_comment_id: root,
                    is_resolved: t.is_resolved,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threads_keyed_by_root_comment() {
        let response: GraphQlResponse<ReviewThreadsData> = serde_json::from_value(serde_json::json!({
            "data": { "repository": { "pullRequest": { "reviewThreads": { "nodes": [
                { "id": "PRRT_a", "isResolved": false,
                  "comments": { "nodes": [{ "databaseId": 101 }] } },
                { "id": "PRRT_b", "isResolved": true,
                  "comments": { "nodes": [] } }
            ] } } } }
        }))
        .unwrap();

        let threads = response.into_data().unwrap().into_threads();
        assert_eq!(
            threads,
            vec![ReviewThread {
                node_id: "PRRT_a".to_string(),
                root_comment_id: 101,
                is_resolved: false,
            }]
        );
    }

    #[test]
    fn test_errors_surface() {
        let response: GraphQlResponse<ReviewThreadsData> = serde_json::from_value(serde_json::json!({
            "data": null,
            "errors": [{ "message": "Resource not accessible by integration" }]
        }))
        .unwrap();
        let err = response.into_data().unwrap_err();
        assert!(err.to_string().contains("Resource not accessible"));
    }
}
