//! Comment models shared by every provider backend.

use serde::{Deserialize, Serialize};

/// Hidden marker appended to everything Otto posts, so its own comments are
/// never triaged as reviewer feedback.
pub const OTTO_MARKER: &str = "<!-- otto -->";

/// Append [`OTTO_MARKER`] to an outbound comment body.
pub fn signed(body: &str) -> String {
    format!("{}\n\n{}", body.trim_end(), OTTO_MARKER)
}

/// A single review comment, flattened from the provider's native model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Provider comment ID.
    pub id: String,

    /// Resolution unit. ADO: the thread ID. GitHub review comments: the
    /// `in_reply_to` root (or the comment's own ID when it is the root).
    pub thread_id: String,

    /// Author display name or login.
    pub author: String,

    /// Comment content (Markdown).
    pub body: String,

    /// File path for inline comments.
    pub file_path: Option<String>,

    /// Line in the file for inline comments.
    pub line: Option<i64>,

    /// Whether the thread is already resolved.
    pub is_resolved: bool,

    /// Provider comment type: `text`, `system`, `review`, `issue`...
    pub comment_type: String,

    /// Creation timestamp (RFC 3339).
    pub created_at: String,
}

impl Comment {
    /// Check if this is an inline comment (associated with a file).
    pub fn is_inline(&self) -> bool {
        self.file_path.is_some()
    }

    /// Whether Otto wrote this comment.
    pub fn is_from_otto(&self) -> bool {
        self.body.contains(OTTO_MARKER)
    }
}

/// Which side of the diff an inline comment is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentSide {
    /// Deleted lines.
    Left,
    /// Added or modified lines.
    Right,
}

impl std::fmt::Display for CommentSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// Outbound inline comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineComment {
    pub file_path: String,
    pub line: i64,
    pub body: String,
    pub side: CommentSide,
}

/// How a thread is being closed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommentResolution {
    Fixed,
    WontFix,
    ByDesign,
    /// Never valid as an argument; operations reject it.
    Unknown,
}

impl From<&str> for CommentResolution {
    fn from(s: &str) -> Self {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "fixed" => Self::Fixed,
            "wontfix" => Self::WontFix,
            "bydesign" => Self::ByDesign,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for CommentResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::WontFix => write!(f, "wontFix"),
            Self::ByDesign => write!(f, "byDesign"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
