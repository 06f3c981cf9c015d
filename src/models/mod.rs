//! Data models for the application.
//!
//! These models are the provider-neutral shapes every backend maps onto,
//! plus the durable per-PR document the monitor loop persists.

pub mod comment;
pub mod document;
pub mod pipeline;
pub mod pull_request;
pub mod workflow;

// Re-exports for convenient access
pub use comment::{signed, Comment, CommentResolution, CommentSide, InlineComment, OTTO_MARKER};
pub use document::{DocStatus, PrDocument, DEFAULT_MAX_FIX_ATTEMPTS};
pub use pipeline::{BuildInfo, PipelineState, PipelineStatus};
pub use pull_request::{PrInfo, PrState};
pub use workflow::WorkflowAction;
