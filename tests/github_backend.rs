//! GitHub backend against an in-process mock server.

use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use otto_lib::config::GitHubConfig;
use otto_lib::models::{
    CommentResolution, CommentSide, InlineComment, PipelineState, PrState, WorkflowAction,
};
use otto_lib::providers::http::RetryPolicy;
use otto_lib::providers::{GitHubBackend, ProviderBackend};

fn backend(server: &MockServer) -> GitHubBackend {
    let config = GitHubConfig {
        api_base: server.base_url(),
        owner: "acme".to_string(),
        repo: "app".to_string(),
        ..GitHubConfig::default()
    };
    GitHubBackend::with_credentials(config, Some("ghp_test".to_string()))
        .unwrap()
        .with_retry_policy(RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        })
}

fn pr_json(state: &str, merged: bool) -> serde_json::Value {
    json!({
        "number": 17,
        "title": "Add cache",
        "body": null,
        "state": state,
        "merged": merged,
        "mergeable_state": "clean",
        "head": { "ref": "feature/cache", "sha": "deadbeef" },
        "base": { "ref": "main", "sha": "cafebabe" },
        "user": { "login": "dev" },
        "html_url": "https://github.com/acme/app/pull/17"
    })
}

fn mock_pr(server: &MockServer, state: &str, merged: bool) {
    let body = pr_json(state, merged);
    server.mock(move |when, then| {
        when.method(GET).path("/repos/acme/app/pulls/17");
        then.status(200).json_body(body);
    });
}

#[tokio::test]
async fn test_get_pr_by_url_and_state_mapping() {
    let server = MockServer::start();
    let pr_mock = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/app/pulls/17")
            .header("authorization", "Bearer ghp_test")
            .header("x-github-api-version", "2022-11-28");
        then.status(200).json_body(pr_json("open", false));
    });

    let gh = backend(&server);
    let pr = gh
        .get_pr("https://github.com/acme/app/pull/17/files")
        .await
        .unwrap();

    pr_mock.assert();
    assert_eq!(pr.status, PrState::Active);
    assert_eq!(pr.source_branch, "feature/cache");
    assert_eq!(pr.head_sha.as_deref(), Some("deadbeef"));
    assert_eq!(pr.description, "");
    assert!(gh.matches_url("https://github.com/acme/app/pull/17"));
    assert!(!gh.matches_url("https://dev.azure.com/acme/app/_git/api/pullrequest/17"));
}

#[tokio::test]
async fn test_closed_pr_states() {
    let server = MockServer::start();
    mock_pr(&server, "closed", true);
    assert_eq!(
        backend(&server).get_pr("17").await.unwrap().status,
        PrState::Completed
    );

    let server = MockServer::start();
    mock_pr(&server, "closed", false);
    assert_eq!(
        backend(&server).get_pr("#17").await.unwrap().status,
        PrState::Abandoned
    );
}

#[tokio::test]
async fn test_missing_pr_is_not_found() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/app/pulls/17");
        then.status(404).json_body(json!({ "message": "Not Found" }));
    });

    let err = backend(&server).get_pr("17").await.unwrap_err();
    assert!(err.is_not_found(), "{:?}", err);
}

#[tokio::test]
async fn test_pipeline_merges_check_runs_and_statuses() {
    let server = MockServer::start();
    mock_pr(&server, "open", false);
    server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/app/commits/deadbeef/check-runs")
            .query_param("per_page", "100");
        then.status(200).json_body(json!({ "total_count": 2, "check_runs": [
            { "id": 501, "name": "build", "status": "completed", "conclusion": "success" },
            { "id": 502, "name": "test", "status": "completed", "conclusion": "failure",
              "html_url": "https://github.com/acme/app/runs/502" }
        ]}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/app/commits/deadbeef/status");
        then.status(200).json_body(json!({ "state": "success", "statuses": [
            { "id": 9, "context": "ci/legacy", "state": "success" }
        ]}));
    });

    let gh = backend(&server);
    let pr = gh.get_pr("17").await.unwrap();
    let status = gh.get_pipeline_status(&pr).await.unwrap();

    assert_eq!(status.state, PipelineState::Failed);
    let failed: Vec<_> = status.failed_builds().map(|b| b.id.as_str()).collect();
    assert_eq!(failed, vec!["502"]);
    assert!(status.builds.iter().any(|b| b.id == "status-9"));
}

#[tokio::test]
async fn test_comments_follow_pages_and_thread_state() {
    let server = MockServer::start();
    mock_pr(&server, "open", false);
    let next = format!("{}/repositories/9/issues/17/comments?page=2", server.base_url());
    server.mock(move |when, then| {
        when.method(GET).path("/repos/acme/app/issues/17/comments");
        then.status(200)
            .header("Link", format!("<{}>; rel=\"next\"", next).as_str())
            .json_body(json!([
                { "id": 1, "user": { "login": "lead" }, "body": "Looks good overall",
                  "created_at": "2024-01-15T10:00:00Z" }
            ]));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/repositories/9/issues/17/comments")
            .query_param("page", "2");
        then.status(200).json_body(json!([
            { "id": 2, "user": { "login": "lead" }, "body": "One more thing",
              "created_at": "2024-01-15T12:00:00Z" }
        ]));
    });
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/app/pulls/17/comments");
        then.status(200).json_body(json!([
            { "id": 101, "user": { "login": "rev" }, "body": "Rename this",
              "path": "src/lib.rs", "line": 12, "created_at": "2024-01-15T11:00:00Z" },
            { "id": 102, "in_reply_to_id": 101, "user": { "login": "dev" }, "body": "Done",
              "path": "src/lib.rs", "original_line": 12, "created_at": "2024-01-15T11:30:00Z" }
        ]));
    });
    server.mock(|when, then| {
        when.method(POST).path("/graphql").body_contains("reviewThreads");
        then.status(200).json_body(json!({ "data": { "repository": { "pullRequest": {
            "reviewThreads": { "nodes": [
                { "id": "PRRT_1", "isResolved": true, "comments": { "nodes": [{ "databaseId": 101 }] } }
            ] }
        } } } }));
    });

    let gh = backend(&server);
    let pr = gh.get_pr("17").await.unwrap();
    let comments = gh.get_comments(&pr).await.unwrap();

    let ids: Vec<_> = comments.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["issue:1", "101", "102", "issue:2"]);
    assert!(comments[1].is_resolved && comments[2].is_resolved);
    assert_eq!(comments[2].thread_id, "101");
    assert_eq!(comments[2].line, Some(12));
    assert!(!comments[0].is_resolved);
}

#[tokio::test]
async fn test_graphql_failure_treats_threads_as_open() {
    let server = MockServer::start();
    mock_pr(&server, "open", false);
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/app/issues/17/comments");
        then.status(200).json_body(json!([]));
    });
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/app/pulls/17/comments");
        then.status(200).json_body(json!([
            { "id": 101, "user": { "login": "rev" }, "body": "Rename this",
              "path": "src/lib.rs", "line": 12, "created_at": "2024-01-15T11:00:00Z" }
        ]));
    });
    server.mock(|when, then| {
        when.method(POST).path("/graphql");
        then.status(200)
            .json_body(json!({ "data": null, "errors": [{ "message": "Forbidden" }] }));
    });

    let gh = backend(&server);
    let pr = gh.get_pr("17").await.unwrap();
    let comments = gh.get_comments(&pr).await.unwrap();

    assert_eq!(comments.len(), 1);
    assert!(!comments[0].is_resolved);
}

#[tokio::test]
async fn test_reply_and_resolve_review_thread() {
    let server = MockServer::start();
    mock_pr(&server, "open", false);
    let reply = server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/app/pulls/17/comments/101/replies")
            .json_body(json!({ "body": "Renamed." }));
        then.status(201).json_body(json!({ "id": 103 }));
    });
    server.mock(|when, then| {
        when.method(POST).path("/graphql").body_contains("reviewThreads");
        then.status(200).json_body(json!({ "data": { "repository": { "pullRequest": {
            "reviewThreads": { "nodes": [
                { "id": "PRRT_1", "isResolved": false, "comments": { "nodes": [{ "databaseId": 101 }] } }
            ] }
        } } } }));
    });
    let resolve = server.mock(|when, then| {
        when.method(POST)
            .path("/graphql")
            .body_contains("resolveReviewThread")
            .body_contains("PRRT_1");
        then.status(200).json_body(json!({ "data": { "resolveReviewThread": {
            "thread": { "id": "PRRT_1", "isResolved": true }
        } } }));
    });

    let gh = backend(&server);
    let pr = gh.get_pr("17").await.unwrap();
    gh.reply_to_comment(&pr, "101", "Renamed.").await.unwrap();
    gh.resolve_comment(&pr, "101", CommentResolution::Fixed)
        .await
        .unwrap();

    reply.assert();
    resolve.assert();
}

#[tokio::test]
async fn test_issue_comment_reply_quotes_original() {
    let server = MockServer::start();
    mock_pr(&server, "open", false);
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/app/issues/comments/1");
        then.status(200).json_body(json!({ "id": 1, "body": "Can we add docs?" }));
    });
    let post = server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/app/issues/17/comments")
            .body_contains("> Can we add docs?")
            .body_contains("Added a README section.");
        then.status(201).json_body(json!({ "id": 3 }));
    });
    let graphql = server.mock(|when, then| {
        when.method(POST).path("/graphql");
        then.status(200).json_body(json!({ "data": {} }));
    });

    let gh = backend(&server);
    let pr = gh.get_pr("17").await.unwrap();
    gh.reply_to_comment(&pr, "issue:1", "Added a README section.")
        .await
        .unwrap();
    // Issue comments have no thread to resolve.
    gh.resolve_comment(&pr, "issue:1", CommentResolution::ByDesign)
        .await
        .unwrap();

    post.assert();
    graphql.assert_hits(0);
}

#[tokio::test]
async fn test_inline_comment_uses_head_sha() {
    let server = MockServer::start();
    mock_pr(&server, "open", false);
    let review = server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/app/pulls/17/reviews")
            .json_body(json!({
                "commit_id": "deadbeef",
                "event": "COMMENT",
                "comments": [{ "path": "src/lib.rs", "line": 4, "side": "RIGHT", "body": "Note" }]
            }));
        then.status(200).json_body(json!({ "id": 77 }));
    });

    let gh = backend(&server);
    let pr = gh.get_pr("17").await.unwrap();
    gh.post_inline_comment(
        &pr,
        &InlineComment {
            file_path: "/src/lib.rs".to_string(),
            line: 4,
            body: "Note".to_string(),
            side: CommentSide::Right,
        },
    )
    .await
    .unwrap();

    review.assert();
}

#[tokio::test]
async fn test_build_logs_fall_back_to_check_run_output() {
    let server = MockServer::start();
    mock_pr(&server, "open", false);
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/app/actions/jobs/502/logs");
        then.status(404).json_body(json!({ "message": "Not Found" }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/repos/acme/app/check-runs/502");
        then.status(200).json_body(json!({
            "id": 502, "name": "test", "status": "completed", "conclusion": "failure",
            "output": { "title": "1 test failed", "summary": "error: assertion failed in parse_header" }
        }));
    });

    let gh = backend(&server);
    let pr = gh.get_pr("17").await.unwrap();
    let logs = gh.get_build_logs(&pr, "502").await.unwrap();
    assert!(logs.contains("assertion failed in parse_header"));

    let err = gh.get_build_logs(&pr, "status-9").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_workflows_are_unsupported() {
    let server = MockServer::start();
    mock_pr(&server, "open", false);

    let gh = backend(&server);
    let pr = gh.get_pr("17").await.unwrap();
    let err = gh
        .run_workflow(&pr, WorkflowAction::AddressBot)
        .await
        .unwrap_err();
    assert!(err.is_unsupported());
}
