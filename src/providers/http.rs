//! HTTP plumbing shared by the provider backends.
//!
//! Both backends send requests through [`send_with_retry`], which absorbs
//! HTTP 429 responses up to a fixed cap, and decode through
//! [`handle_response`], which maps error statuses onto [`AppError`].

use std::time::Duration;

use reqwest::{header::HeaderMap, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// Zero-based attempt number, sent only by unit tests so mocks can tell
/// attempts apart.
#[cfg(test)]
const RETRY_ATTEMPT_HEADER: &str = "x-otto-retry-attempt";

/// Longest `Retry-After` honored; larger values are clamped.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Maximum characters of a response body echoed into an error.
const MAX_ERROR_BODY: usize = 300;

/// Retry policy for rate-limited requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first request (so `max_retries + 1` requests at most).
    pub max_retries: u32,
    /// First backoff delay; doubled on each retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for a zero-based retry number: 1s, 2s, 4s...
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry.min(10)))
    }
}

/// Send a request, retrying HTTP 429 per `policy`.
///
/// `build` is called once per attempt because a `RequestBuilder` cannot be
/// reused after sending. Any non-429 response is returned untouched.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    endpoint: &str,
    mut build: F,
) -> Result<Response, AppError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut retry = 0u32;
    loop {
        let request = build();
        #[cfg(test)]
        let request = request.header(RETRY_ATTEMPT_HEADER, retry.to_string());
        let response = request.send().await?;

        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }

        if retry >= policy.max_retries {
            return Err(AppError::rate_limited(
                format!("Rate limit persisted after {} retries", policy.max_retries),
                endpoint,
            ));
        }

        let delay = parse_retry_after(response.headers()).unwrap_or_else(|| policy.backoff(retry));
        log::warn!(
            "[http] 429 from {}, retry {}/{} in {:?}",
            endpoint,
            retry + 1,
            policy.max_retries,
            delay
        );
        tokio::time::sleep(delay).await;
        retry += 1;
    }
}

/// Parse a numeric `Retry-After` header (seconds), capped at [`MAX_RETRY_AFTER`].
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get("retry-after")?.to_str().ok()?;
    let seconds = raw.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER))
}

/// Decode a JSON response, mapping error statuses onto [`AppError`].
pub async fn handle_response<T: DeserializeOwned>(
    response: Response,
    endpoint: &str,
) -> Result<T, AppError> {
    let text = read_success_text(response, endpoint).await?;
    serde_json::from_str::<T>(&text).map_err(|e| {
        AppError::malformed_with_context(
            format!("Failed to parse response from {}: {}", endpoint, e),
            truncate(&text, MAX_ERROR_BODY),
        )
    })
}

/// Expect a success status and discard the body.
pub async fn expect_success(response: Response, endpoint: &str) -> Result<(), AppError> {
    read_success_text(response, endpoint).await.map(|_| ())
}

/// Expect a success status and return the body as text.
pub async fn read_success_text(response: Response, endpoint: &str) -> Result<String, AppError> {
    let status = response.status();

    if status.is_success() {
        return response
            .text()
            .await
            .map_err(|e| AppError::network(format!("Failed to read response body: {}", e)));
    }

    if status == StatusCode::FORBIDDEN && is_exhausted_quota(response.headers()) {
        return Err(AppError::rate_limited("API quota exhausted", endpoint));
    }

    let status_code = status.as_u16();
    let body = response.text().await.unwrap_or_default();
    let body_message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            // ADO returns {"message": ...}, GitHub {"message": ..., "errors": [...]}
            v.get("message")
                .or_else(|| v.get("error"))
                .map(|m| m.as_str().map(String::from).unwrap_or_else(|| m.to_string()))
        });

    match status {
        StatusCode::UNAUTHORIZED => Err(AppError::authentication_expired(
            body_message.unwrap_or_else(|| "Token expired or revoked".to_string()),
        )),
        StatusCode::NOT_FOUND => Err(AppError::not_found_with_id("resource", endpoint)),
        _ => {
            let message = body_message.unwrap_or_else(|| {
                format!("Request failed ({}): {}", status_code, truncate(&body, MAX_ERROR_BODY))
            });
            Err(AppError::provider_api_full(message, status_code, endpoint))
        }
    }
}

/// GitHub signals a spent primary quota with 403 + `x-ratelimit-remaining: 0`.
fn is_exhausted_quota(headers: &HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false)
}

/// Path part of a URL, used as the endpoint label in errors and logs.
pub fn endpoint_of(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = without_scheme
        .find('/')
        .map(|i| &without_scheme[i..])
        .unwrap_or("/");
    path.split('?').next().unwrap_or(path).to_string()
}

/// Truncate text to `max_chars` characters, appending `...` when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
