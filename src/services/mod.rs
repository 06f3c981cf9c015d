//! Business logic services.
//!
//! The document store, log distillation, the external collaborators (LLM,
//! git, credentials) and the lifecycle engine built on them: fixer, comment
//! evaluator, monitor loop and daemon.

pub mod comment_evaluator;
pub mod credentials;
pub mod daemon;
pub mod fixer;
pub mod git;
pub mod llm;
pub mod log_distiller;
pub mod monitor;
pub mod pr_store;

pub use comment_evaluator::CommentEvaluator;
pub use credentials::CredentialService;
pub use daemon::DaemonContext;
pub use fixer::Fixer;
pub use monitor::{MonitorLoop, TickReport};
pub use pr_store::PrStore;
