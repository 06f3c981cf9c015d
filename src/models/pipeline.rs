//! CI pipeline status models.

use serde::{Deserialize, Serialize};

/// Overall CI state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineState {
    Succeeded,
    Failed,
    Pending,
    InProgress,
    Unknown,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "inProgress"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One build, check run or commit status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Provider build ID (ADO build ID, GitHub check-run ID).
    pub id: String,
    /// Pipeline definition or check name.
    pub name: String,
    /// Lifecycle status (`completed`, `inProgress`, `queued`...).
    pub status: String,
    /// Outcome (`succeeded`, `failed`, `failure`, `success`...); empty while running.
    pub result: String,
    /// Browser URL of the build.
    pub url: String,
}

impl BuildInfo {
    /// Whether the build ended in a failure the fixer should look at.
    pub fn is_failed(&self) -> bool {
        matches!(self.result.as_str(), "failed" | "failure")
    }
}

/// Aggregated CI status, builds ordered newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub builds: Vec<BuildInfo>,
}

impl PipelineStatus {
    /// Builds whose result is a failure.
    pub fn failed_builds(&self) -> impl Iterator<Item = &BuildInfo> {
        self.builds.iter().filter(|b| b.is_failed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(id: &str, result: &str) -> BuildInfo {
        BuildInfo {
            id: id.to_string(),
            name: format!("build-{}", id),
            status: "completed".to_string(),
            result: result.to_string(),
            url: String::new(),
        }
    }

    #[test]
    fn test_failed_builds() {
        let status = PipelineStatus {
            state: PipelineState::Failed,
            builds: vec![build("1", "succeeded"), build("2", "failed"), build("3", "failure")],
        };
        let ids: Vec<_> = status.failed_builds().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&PipelineState::InProgress).unwrap();
        assert_eq!(json, "\"inProgress\"");
    }
}
