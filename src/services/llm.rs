//! LLM capability.
//!
//! Otto needs exactly four things from an agent: open a session scoped to a
//! working directory, send it a prompt and get text back, abort it, and
//! delete it. [`OpenCodeClient`] speaks that over HTTP to a locally running
//! agent server. Structured answers go through [`decode_or_repair`].

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::LlmConfig;
use crate::error::AppError;
use crate::providers::http::{expect_success, handle_response, truncate};

/// Agent session operations.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Open a session. `workdir` scopes file access for code-editing sessions.
    async fn create_session(&self, title: &str, workdir: Option<&Path>)
        -> Result<String, AppError>;

    /// Send a prompt and wait for the complete text reply.
    async fn send_prompt(&self, session_id: &str, prompt: &str) -> Result<String, AppError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), AppError>;

    /// Stop whatever the session is doing.
    async fn abort_session(&self, session_id: &str) -> Result<(), AppError>;
}

/// HTTP client for an OpenCode-style agent server.
pub struct OpenCodeClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct TextPart<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct MessageRequest<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Deserialize)]
struct SessionInfo {
    id: String,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessageResponse {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

impl OpenCodeClient {
    pub fn new(config: &LlmConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn llm_err(e: AppError) -> AppError {
    match e {
        AppError::MalformedResponse { .. } | AppError::Cancelled { .. } => e,
        other => AppError::llm(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenCodeClient {
    async fn create_session(
        &self,
        title: &str,
        workdir: Option<&Path>,
    ) -> Result<String, AppError> {
        let mut request = self
            .client
            .post(self.url("/session"))
            .json(&serde_json::json!({ "title": title }));
        if let Some(dir) = workdir {
            request = request.query(&[("directory", dir.to_string_lossy())]);
        }
        let response = request.send().await.map_err(|e| llm_err(e.into()))?;
        let session: SessionInfo = handle_response(response, "/session").await.map_err(llm_err)?;
        log::debug!("[llm] Opened session {} ({})", session.id, title);
        Ok(session.id)
    }

    async fn send_prompt(&self, session_id: &str, prompt: &str) -> Result<String, AppError> {
        let endpoint = format!("/session/{}/message", session_id);
        let body = MessageRequest {
            parts: vec![TextPart {
                kind: "text",
                text: prompt,
            }],
        };
        let response = self
            .client
            .post(self.url(&endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| llm_err(e.into()))?;
        let message: MessageResponse = handle_response(response, &endpoint).await.map_err(llm_err)?;

        let text: Vec<String> = message
            .parts
            .into_iter()
            .filter(|p| p.kind == "text")
            .filter_map(|p| p.text)
            .collect();
        Ok(text.join("\n"))
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), AppError> {
        let endpoint = format!("/session/{}", session_id);
        let response = self
            .client
            .delete(self.url(&endpoint))
            .send()
            .await
            .map_err(|e| llm_err(e.into()))?;
        expect_success(response, &endpoint).await.map_err(llm_err)
    }

    async fn abort_session(&self, session_id: &str) -> Result<(), AppError> {
        let endpoint = format!("/session/{}/abort", session_id);
        let response = self
            .client
            .post(self.url(&endpoint))
            .send()
            .await
            .map_err(|e| llm_err(e.into()))?;
        expect_success(response, &endpoint).await.map_err(llm_err)
    }
}

/// Run `op` inside a fresh session.
///
/// The session is deleted once `op` finishes. If `cancel` fires first, `op`
/// is dropped, the session is aborted and deleted, and `Cancelled` is returned.
pub async fn run_in_session<T, F, Fut>(
    llm: &dyn LlmClient,
    title: &str,
    workdir: Option<&Path>,
    cancel: &CancellationToken,
    op: F,
) -> Result<T, AppError>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let session = llm.create_session(title, workdir).await?;

    let result = tokio::select! {
        result = op(session.clone()) => result,
        _ = cancel.cancelled() => {
            if let Err(e) = llm.abort_session(&session).await {
                log::warn!("[llm] Abort of session {} failed: {}", session, e);
            }
            Err(AppError::cancelled(format!("'{}' interrupted by shutdown", title)))
        }
    };

    if let Err(e) = llm.delete_session(&session).await {
        log::debug!("[llm] Delete of session {} failed: {}", session, e);
    }
    result
}

/// Take the outermost `{...}` span, dropping code fences and chatter.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn try_decode<T: DeserializeOwned>(raw: &str) -> Result<T, serde_json::Error> {
    match serde_json::from_str::<T>(raw.trim()) {
        Ok(value) => Ok(value),
        Err(strict_err) => match extract_json_object(raw) {
            Some(candidate) => serde_json::from_str::<T>(candidate),
            None => Err(strict_err),
        },
    }
}

fn corrective_prompt(error: &serde_json::Error) -> String {
    format!(
        "Your previous reply was not valid JSON ({}). Reply with only the JSON object, \
         no prose and no code fences.",
        error
    )
}

/// Decode an LLM reply as `T`.
///
/// Tries a strict decode, then a cleanup pass, then up to `budget` corrective
/// round-trips in `session` (none when `session` is `None`).
pub async fn decode_or_repair<T: DeserializeOwned>(
    llm: &dyn LlmClient,
    session: Option<&str>,
    raw: &str,
    budget: usize,
) -> Result<T, AppError> {
    let mut last_error = match try_decode::<T>(raw) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    let mut last_reply = raw.to_string();

    if let Some(session) = session {
        for attempt in 1..=budget {
            log::debug!(
                "[llm] Reply was not valid JSON, corrective attempt {}/{}",
                attempt,
                budget
            );
            last_reply = llm
                .send_prompt(session, &corrective_prompt(&last_error))
                .await?;
            match try_decode::<T>(&last_reply) {
                Ok(value) => return Ok(value),
                Err(e) => last_error = e,
            }
        }
    }

    Err(AppError::malformed_with_context(
        format!("LLM reply is not valid JSON: {}", last_error),
        truncate(&last_reply, 500),
    ))
}
