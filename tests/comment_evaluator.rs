//! Comment triage end to end: LLM verdict, commit, reply, resolution, seen set.

mod common;

use common::*;
use otto_lib::models::{CommentResolution, OTTO_MARKER};
use otto_lib::services::comment_evaluator::Verdict;

#[tokio::test]
async fn test_agree_commits_and_cites_the_hash() {
    let h = Harness::new();
    h.track(1, 0, 5).await;
    std::fs::create_dir_all(h.work_dir.path().join("src")).unwrap();
    std::fs::write(
        h.work_dir.path().join("src/lib.rs"),
        "fn a() {}\nfn b() {}\nlet retries = 3;\nfn c() {}\n",
    )
    .unwrap();
    h.llm.push(
        r#"Here you go:
```json
{"decision":"AGREE","reply":"Good point, moved it to a constant.","fix_description":"Extract MAX_RETRIES constant"}
```"#,
    );

    let mut inline = comment("5/1", "Magic number, use a constant");
    inline.file_path = Some("/src/lib.rs".to_string());
    inline.line = Some(3);

    let pr = pr_info(1);
    let evaluation = h
        .evaluator()
        .evaluate(h.backend.as_ref(), &h.store, &pr, &inline)
        .await
        .unwrap();

    assert_eq!(evaluation.verdict, Some(Verdict::Agree));
    assert_eq!(evaluation.resolution, Some(CommentResolution::Fixed));
    assert_eq!(evaluation.commit.as_deref(), Some(h.git.hash.as_str()));
    assert!(evaluation.reply.ends_with("Fixed in commit 01234567."));

    // The prompt carried the marked source line.
    assert!(h.llm.last_prompt().contains(">    3 | let retries = 3;"));
    assert_eq!(
        h.git.messages.lock().unwrap().as_slice(),
        ["Extract MAX_RETRIES constant (review comment 5/1)".to_string()]
    );

    let replies = h.backend.calls_starting_with("reply:5:");
    assert_eq!(replies.len(), 1);
    assert!(replies[0].contains("Fixed in commit 01234567."));
    assert!(replies[0].contains(OTTO_MARKER));
    assert_eq!(h.backend.calls_starting_with("resolve:5:fixed").len(), 1);

    let doc = h.load(1).await;
    assert!(doc.has_seen("5/1"));
    assert!(doc.body.contains("Comment 5/1 by reviewer: AGREE, commit 01234567"));
}

#[tokio::test]
async fn test_wont_fix_resolves_without_commit() {
    let h = Harness::new();
    h.track(2, 0, 5).await;
    h.llm.push(r#"{"decision":"WONT_FIX","reply":"Out of scope for this PR."}"#);

    let evaluation = h
        .evaluator()
        .evaluate(h.backend.as_ref(), &h.store, &pr_info(2), &comment("9/1", "Rewrite it"))
        .await
        .unwrap();

    assert_eq!(evaluation.verdict, Some(Verdict::WontFix));
    assert_eq!(evaluation.commit, None);
    assert_eq!(h.git.commit_count(), 0);
    assert_eq!(h.backend.calls_starting_with("resolve:9:wontFix").len(), 1);
    assert!(h.load(2).await.has_seen("9/1"));
}

#[tokio::test]
async fn test_by_design_with_empty_reply_uses_default() {
    let h = Harness::new();
    h.track(3, 0, 5).await;
    h.llm.push(r#"{"decision":"BY_DESIGN","reply":"  "}"#);

    let evaluation = h
        .evaluator()
        .evaluate(h.backend.as_ref(), &h.store, &pr_info(3), &comment("4/2", "Why?"))
        .await
        .unwrap();

    assert_eq!(evaluation.reply, "This is intentional.");
    assert_eq!(h.backend.calls_starting_with("resolve:4:byDesign").len(), 1);
}

#[tokio::test]
async fn test_unparseable_reply_is_posted_without_resolution() {
    let h = Harness::new();
    h.track(4, 0, 5).await;
    h.llm.push("I think the reviewer has a point but I am not sure.");
    h.llm.push("Still prose.");

    let evaluation = h
        .evaluator()
        .with_json_retry_budget(1)
        .evaluate(h.backend.as_ref(), &h.store, &pr_info(4), &comment("6/1", "Hmm"))
        .await
        .unwrap();

    assert_eq!(evaluation.verdict, None);
    assert_eq!(evaluation.resolution, None);
    // One corrective round trip in the same session.
    assert_eq!(h.llm.prompt_count(), 2);
    assert_eq!(h.llm.sessions.lock().unwrap().len(), 1);

    let replies = h.backend.calls_starting_with("reply:6:");
    assert_eq!(replies.len(), 1);
    assert!(replies[0].contains("I think the reviewer has a point"));
    assert!(h.backend.calls_starting_with("resolve:").is_empty());

    let doc = h.load(4).await;
    assert!(doc.has_seen("6/1"));
    assert!(doc.body.contains("unparsed reply posted"));
}

#[tokio::test]
async fn test_llm_failure_leaves_comment_unseen() {
    let h = Harness::new();
    h.track(5, 0, 5).await;
    // No scripted reply.

    let result = h
        .evaluator()
        .evaluate(h.backend.as_ref(), &h.store, &pr_info(5), &comment("7/1", "Nit"))
        .await;

    assert!(result.is_err());
    assert!(!h.load(5).await.has_seen("7/1"));
    assert!(h.backend.calls_starting_with("reply:").is_empty());
    assert_eq!(h.llm.deleted.load(std::sync::atomic::Ordering::SeqCst), 1);
}
