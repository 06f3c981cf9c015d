//! ADO pull request identifiers: bare IDs and browser URLs.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::AppError;

/// A parsed PR reference. URL forms carry their own coordinates; a bare ID
/// leaves them `None` so the backend's configured defaults apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdoPrRef {
    pub id: i64,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub repository: Option<String>,
}

fn dev_azure_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^https?://dev\.azure\.com/([^/]+)/([^/]+)/_git/([^/]+)/pullrequest/(\d+)")
            .expect("static dev.azure.com pattern")
    })
}

fn visualstudio_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^https?://([^./]+)\.visualstudio\.com/(?:DefaultCollection/)?([^/]+)/_git/([^/]+)/pullrequest/(\d+)",
        )
        .expect("static visualstudio.com pattern")
    })
}

/// Whether a URL is an ADO pull request URL on a hosted domain.
pub fn is_ado_pr_url(url: &str) -> bool {
    let url = url.trim();
    dev_azure_regex().is_match(url) || visualstudio_regex().is_match(url)
}

/// Parse `1234`, a `dev.azure.com` PR URL, or a `*.visualstudio.com` PR URL.
pub fn parse_pr_identifier(input: &str) -> Result<AdoPrRef, AppError> {
    let input = input.trim();

    if let Ok(id) = input.parse::<i64>() {
        return Ok(AdoPrRef {
            id,
            organization: None,
            project: None,
            repository: None,
        });
    }

    let caps = dev_azure_regex()
        .captures(input)
        .or_else(|| visualstudio_regex().captures(input))
        .ok_or_else(|| {
            AppError::invalid_input_field(
                format!("Not an ADO pull request ID or URL: {}", input),
                "pr",
            )
        })?;

    let id = caps[4]
        .parse::<i64>()
        .map_err(|_| AppError::invalid_input_field("PR number out of range", "pr"))?;

    Ok(AdoPrRef {
        id,
        organization: Some(decode_segment(&caps[1])),
        project: Some(decode_segment(&caps[2])),
        repository: Some(decode_segment(&caps[3])),
    })
}

/// Project and repository names may be percent-encoded in URLs (`My%20Project`).
fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}
