//! ADO credentials: Entra ID bearer tokens from the `az` CLI, PAT fallback.

use base64::Engine;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::AppError;

/// Entra resource ID of Azure DevOps.
pub const ADO_RESOURCE_ID: &str = "499b84ac-1321-427f-aa17-267ca6975798";

/// Tokens are refreshed this long before their reported expiry.
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// Lifetime assumed when `az` reports no parseable expiry.
const ASSUMED_LIFETIME_MINUTES: i64 = 15;

/// After a failed `az` call, skip Entra for this long before trying again.
const FAILURE_BACKOFF_MINUTES: i64 = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzAccessToken {
    access_token: String,
    /// Local wall-clock time, e.g. `2024-01-15 11:30:00.000000`.
    #[serde(default)]
    expires_on: Option<String>,
    /// Unix seconds; newer `az` versions only.
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::minutes(REFRESH_MARGIN_MINUTES) < self.expires_at
    }
}

#[derive(Debug, Default)]
struct EntraState {
    cached: Option<CachedToken>,
    failed_at: Option<DateTime<Utc>>,
}

/// Azure CLI executable.
const AZ_PROGRAM: &str = "az";

/// Per-backend Entra token cache.
#[derive(Debug)]
pub struct EntraTokenCache {
    state: Mutex<EntraState>,
    program: String,
}

impl Default for EntraTokenCache {
    fn default() -> Self {
        Self {
            state: Mutex::new(EntraState::default()),
            program: AZ_PROGRAM.to_string(),
        }
    }
}

impl EntraTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another executable in place of `az`.
    #[cfg(test)]
    pub(crate) fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Cached token, or a fresh one from `az`. The lock is held across the
    /// subprocess so concurrent callers share one refresh.
    pub async fn token(&self) -> Result<String, AppError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        if let Some(cached) = state.cached.as_ref().filter(|c| c.is_fresh(now)) {
            return Ok(cached.token.clone());
        }

        if let Some(failed_at) = state.failed_at {
            if now < failed_at + Duration::minutes(FAILURE_BACKOFF_MINUTES) {
                return Err(AppError::authentication("Entra token recently unavailable"));
            }
        }

        match fetch_az_token(&self.program).await {
            Ok(fresh) => {
                log::debug!("[ado] Entra token refreshed, expires {}", fresh.expires_at);
                let token = fresh.token.clone();
                state.cached = Some(fresh);
                state.failed_at = None;
                Ok(token)
            }
            Err(e) => {
                state.cached = None;
                state.failed_at = Some(now);
                Err(e)
            }
        }
    }

    /// Drop the cached token so the next call refreshes it.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.cached = None;
        state.failed_at = None;
    }

    #[cfg(test)]
    pub(crate) async fn seed(&self, token: CachedToken) {
        self.state.lock().await.cached = Some(token);
    }
}

async fn fetch_az_token(program: &str) -> Result<CachedToken, AppError> {
    let output = Command::new(program)
        .args([
            "account",
            "get-access-token",
            "--resource",
            ADO_RESOURCE_ID,
            "--output",
            "json",
        ])
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| AppError::authentication(format!("Failed to run az CLI: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::authentication(format!(
            "az get-access-token failed: {}",
            stderr.trim()
        )));
    }

    parse_az_output(&String::from_utf8_lossy(&output.stdout), Utc::now())
}

/// Parse `az account get-access-token` JSON output.
pub fn parse_az_output(stdout: &str, now: DateTime<Utc>) -> Result<CachedToken, AppError> {
    let parsed: AzAccessToken = serde_json::from_str(stdout)
        .map_err(|e| AppError::authentication(format!("Unexpected az output: {}", e)))?;

    let expires_at = parsed
        .expires_on_epoch
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .or_else(|| parsed.expires_on.as_deref().and_then(parse_local_time))
        .unwrap_or_else(|| now + Duration::minutes(ASSUMED_LIFETIME_MINUTES));

    Ok(CachedToken {
        token: parsed.access_token,
        expires_at,
    })
}

fn parse_local_time(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Basic credentials for a PAT: `base64(":" + pat)`.
pub fn basic_credentials(pat: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!(":{}", pat))
}
