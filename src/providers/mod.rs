//! Provider backends.
//!
//! Every remote PR system sits behind [`ProviderBackend`]. Each backend maps
//! its own comment and build model onto the shared types in [`crate::models`]
//! and owns its auth and rate-limit handling. Cancellation is cooperative: an
//! in-flight call is abandoned by dropping its future.

pub mod ado;
pub mod github;
pub mod http;
pub mod registry;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::{
    Comment, CommentResolution, InlineComment, PipelineStatus, PrInfo, WorkflowAction,
};

pub use ado::AdoBackend;
pub use github::GitHubBackend;
pub use registry::Registry;

/// Default HTTP request timeout for provider calls.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User agent sent to every provider.
pub const USER_AGENT: &str = concat!("otto/", env!("CARGO_PKG_VERSION"));

/// The contract every PR system backend satisfies.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// Registry name, also the `provider` key of stored documents.
    fn name(&self) -> &str;

    /// Whether a URL points at a PR this backend can serve.
    fn matches_url(&self, url: &str) -> bool;

    /// Fetch a PR by bare numeric ID (resolved against configured defaults)
    /// or by full provider URL.
    async fn get_pr(&self, id_or_url: &str) -> Result<PrInfo, AppError>;

    async fn get_pipeline_status(&self, pr: &PrInfo) -> Result<PipelineStatus, AppError>;

    async fn get_comments(&self, pr: &PrInfo) -> Result<Vec<Comment>, AppError>;

    async fn post_comment(&self, pr: &PrInfo, body: &str) -> Result<(), AppError>;

    async fn post_inline_comment(
        &self,
        pr: &PrInfo,
        comment: &InlineComment,
    ) -> Result<(), AppError>;

    async fn reply_to_comment(
        &self,
        pr: &PrInfo,
        thread_id: &str,
        body: &str,
    ) -> Result<(), AppError>;

    /// Resolve a thread. [`CommentResolution::Unknown`] is rejected.
    async fn resolve_comment(
        &self,
        pr: &PrInfo,
        thread_id: &str,
        resolution: CommentResolution,
    ) -> Result<(), AppError>;

    /// Logs for one build, already distilled.
    async fn get_build_logs(&self, pr: &PrInfo, build_id: &str) -> Result<String, AppError>;

    /// Run a workflow action, or fail with [`AppError::Unsupported`].
    async fn run_workflow(&self, pr: &PrInfo, action: WorkflowAction) -> Result<(), AppError>;
}

/// Reject the `unknown` resolution before any request is made.
pub(crate) fn ensure_known_resolution(resolution: CommentResolution) -> Result<(), AppError> {
    if resolution == CommentResolution::Unknown {
        return Err(AppError::invalid_input_field(
            "Resolution 'unknown' cannot be applied to a thread",
            "resolution",
        ));
    }
    Ok(())
}
