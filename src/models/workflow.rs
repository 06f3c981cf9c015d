//! Workflow actions a backend may be asked to run on a PR.

use serde::{Deserialize, Serialize};

/// Provider-side workflow action. Not every backend supports every action;
/// unsupported ones fail with [`crate::error::AppError::Unsupported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowAction {
    /// Publish a draft PR.
    Submit,
    /// Enable auto-complete (merge when policies pass).
    AutoComplete,
    /// Create a work item and link it to the PR.
    CreateWorkItem,
    /// Acknowledge and close automated-reviewer threads.
    AddressBot,
}

impl std::fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submit => write!(f, "submit"),
            Self::AutoComplete => write!(f, "autoComplete"),
            Self::CreateWorkItem => write!(f, "createWorkItem"),
            Self::AddressBot => write!(f, "addressBot"),
        }
    }
}
