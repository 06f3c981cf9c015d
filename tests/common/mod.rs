//! Shared fakes for the service-level integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use otto_lib::error::AppError;
use otto_lib::models::{
    BuildInfo, Comment, CommentResolution, InlineComment, PipelineState, PipelineStatus,
    PrDocument, PrInfo, PrState, WorkflowAction,
};
use otto_lib::providers::{ProviderBackend, Registry};
use otto_lib::services::git::{GitOps, Workspace};
use otto_lib::services::llm::LlmClient;
use otto_lib::services::{CommentEvaluator, Fixer, MonitorLoop, PrStore};

pub const PROVIDER: &str = "fake";

pub fn pr_info(id: i64) -> PrInfo {
    PrInfo {
        id,
        title: format!("PR {}", id),
        description: "Adds a feature".to_string(),
        status: PrState::Active,
        merge_status: "succeeded".to_string(),
        source_branch: "feature/x".to_string(),
        target_branch: "main".to_string(),
        author: "dev".to_string(),
        url: format!("https://fake.example/pr/{}", id),
        repo_id: "app".to_string(),
        project: "acme".to_string(),
        organization: "acme".to_string(),
        head_sha: Some("abc123".to_string()),
    }
}

pub fn comment(id: &str, body: &str) -> Comment {
    Comment {
        id: id.to_string(),
        thread_id: id.split('/').next().unwrap_or(id).to_string(),
        author: "reviewer".to_string(),
        body: body.to_string(),
        file_path: None,
        line: None,
        is_resolved: false,
        comment_type: "text".to_string(),
        created_at: "2024-01-15T10:30:00Z".to_string(),
    }
}

pub fn failed_pipeline() -> PipelineStatus {
    PipelineStatus {
        state: PipelineState::Failed,
        builds: vec![BuildInfo {
            id: "77".to_string(),
            name: "CI".to_string(),
            status: "completed".to_string(),
            result: "failed".to_string(),
            url: String::new(),
        }],
    }
}

pub fn pipeline(state: PipelineState) -> PipelineStatus {
    PipelineStatus {
        state,
        builds: Vec::new(),
    }
}

/// Scripted provider that records every call it receives.
pub struct FakeBackend {
    pub pr_state: Mutex<PrState>,
    pub pipeline: Mutex<PipelineStatus>,
    pub comments: Mutex<Vec<Comment>>,
    pub logs: Mutex<String>,
    pub calls: Mutex<Vec<String>>,
    pub address_bot_supported: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            pr_state: Mutex::new(PrState::Active),
            pipeline: Mutex::new(pipeline(PipelineState::InProgress)),
            comments: Mutex::new(Vec::new()),
            logs: Mutex::new("##[error]test_parse failed".to_string()),
            calls: Mutex::new(Vec::new()),
            address_bot_supported: true,
        }
    }

    pub fn set_pipeline(&self, status: PipelineStatus) {
        *self.pipeline.lock().unwrap() = status;
    }

    pub fn set_pr_state(&self, state: PrState) {
        *self.pr_state.lock().unwrap() = state;
    }

    pub fn set_comments(&self, comments: Vec<Comment>) {
        *self.comments.lock().unwrap() = comments;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ProviderBackend for FakeBackend {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn matches_url(&self, url: &str) -> bool {
        url.starts_with("https://fake.example/")
    }

    async fn get_pr(&self, id_or_url: &str) -> Result<PrInfo, AppError> {
        self.record(format!("get_pr:{}", id_or_url));
        let id = id_or_url
            .rsplit('/')
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| AppError::invalid_input("bad id"))?;
        let mut pr = pr_info(id);
        pr.status = *self.pr_state.lock().unwrap();
        Ok(pr)
    }

    async fn get_pipeline_status(&self, pr: &PrInfo) -> Result<PipelineStatus, AppError> {
        self.record(format!("pipeline:{}", pr.id));
        Ok(self.pipeline.lock().unwrap().clone())
    }

    async fn get_comments(&self, _pr: &PrInfo) -> Result<Vec<Comment>, AppError> {
        Ok(self.comments.lock().unwrap().clone())
    }

    async fn post_comment(&self, pr: &PrInfo, body: &str) -> Result<(), AppError> {
        self.record(format!("comment:{}:{}", pr.id, body));
        Ok(())
    }

    async fn post_inline_comment(
        &self,
        pr: &PrInfo,
        comment: &InlineComment,
    ) -> Result<(), AppError> {
        self.record(format!("inline:{}:{}:{}", pr.id, comment.file_path, comment.line));
        Ok(())
    }

    async fn reply_to_comment(
        &self,
        _pr: &PrInfo,
        thread_id: &str,
        body: &str,
    ) -> Result<(), AppError> {
        self.record(format!("reply:{}:{}", thread_id, body));
        Ok(())
    }

    async fn resolve_comment(
        &self,
        _pr: &PrInfo,
        thread_id: &str,
        resolution: CommentResolution,
    ) -> Result<(), AppError> {
        self.record(format!("resolve:{}:{}", thread_id, resolution));
        Ok(())
    }

    async fn get_build_logs(&self, _pr: &PrInfo, build_id: &str) -> Result<String, AppError> {
        self.record(format!("logs:{}", build_id));
        Ok(self.logs.lock().unwrap().clone())
    }

    async fn run_workflow(&self, _pr: &PrInfo, action: WorkflowAction) -> Result<(), AppError> {
        if !self.address_bot_supported {
            return Err(AppError::unsupported(PROVIDER, action.to_string()));
        }
        self.record(format!("workflow:{}", action));
        Ok(())
    }
}

/// LLM that answers from a queue and records every prompt.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<String>>,
    pub sessions: Mutex<Vec<(String, Option<PathBuf>)>>,
    pub deleted: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn push(&self, reply: &str) {
        self.replies.lock().unwrap().push_back(reply.to_string());
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn create_session(
        &self,
        title: &str,
        workdir: Option<&Path>,
    ) -> Result<String, AppError> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.push((title.to_string(), workdir.map(Path::to_path_buf)));
        Ok(format!("ses_{}", sessions.len()))
    }

    async fn send_prompt(&self, _session_id: &str, prompt: &str) -> Result<String, AppError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AppError::llm("no scripted reply left"))
    }

    async fn delete_session(&self, _session_id: &str) -> Result<(), AppError> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort_session(&self, _session_id: &str) -> Result<(), AppError> {
        Ok(())
    }
}

/// Git that "pushes" a fixed hash.
pub struct FakeGit {
    pub hash: String,
    pub commits: AtomicUsize,
    pub messages: Mutex<Vec<String>>,
}

impl FakeGit {
    pub fn new(hash: &str) -> Self {
        Self {
            hash: hash.to_string(),
            commits: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GitOps for FakeGit {
    async fn has_changes(&self, _workdir: &Path) -> Result<bool, AppError> {
        Ok(true)
    }

    async fn commit_and_push(&self, _workdir: &Path, message: &str) -> Result<String, AppError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().push(message.to_string());
        Ok(self.hash.clone())
    }
}

/// Every repo and branch lives in one directory.
pub struct FakeWorkspace {
    pub dir: PathBuf,
}

#[async_trait]
impl Workspace for FakeWorkspace {
    async fn workdir(&self, _repo: &str, _branch: &str) -> Result<PathBuf, AppError> {
        Ok(self.dir.clone())
    }
}

/// Wired-up monitor plus handles on every fake.
pub struct Harness {
    pub store: PrStore,
    pub backend: Arc<FakeBackend>,
    pub llm: Arc<ScriptedLlm>,
    pub git: Arc<FakeGit>,
    pub workspace: Arc<FakeWorkspace>,
    pub cancel: CancellationToken,
    pub store_dir: TempDir,
    pub work_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let store_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        Self {
            store: PrStore::open(store_dir.path()).unwrap(),
            backend: Arc::new(FakeBackend::new()),
            llm: Arc::new(ScriptedLlm::default()),
            git: Arc::new(FakeGit::new("0123456789abcdef0123456789abcdef01234567")),
            workspace: Arc::new(FakeWorkspace {
                dir: work_dir.path().to_path_buf(),
            }),
            cancel: CancellationToken::new(),
            store_dir,
            work_dir,
        }
    }

    /// Track PR `id` with the given attempt budget.
    pub async fn track(&self, id: i64, fix_attempts: u32, max_fix_attempts: u32) -> PrDocument {
        let mut doc = PrDocument::new(PROVIDER, &pr_info(id), max_fix_attempts, Utc::now());
        doc.fix_attempts = fix_attempts;
        self.store.create(&doc).await.unwrap();
        doc
    }

    pub async fn load(&self, id: i64) -> PrDocument {
        self.store.load(PROVIDER, id).await.unwrap()
    }

    pub fn fixer(&self) -> Fixer {
        Fixer::new(
            self.llm.clone(),
            self.git.clone(),
            self.workspace.clone(),
            self.cancel.clone(),
        )
    }

    pub fn evaluator(&self) -> CommentEvaluator {
        CommentEvaluator::new(
            self.llm.clone(),
            self.git.clone(),
            self.workspace.clone(),
            self.cancel.clone(),
        )
    }

    pub fn monitor(&self) -> MonitorLoop {
        let mut registry = Registry::new();
        registry.register(self.backend.clone());
        MonitorLoop::new(
            registry,
            PrStore::open(self.store_dir.path()).unwrap(),
            self.fixer(),
            self.evaluator(),
            self.cancel.clone(),
        )
    }
}
