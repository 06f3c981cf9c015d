//! Application error types.
//!
//! These errors are serializable so the CLI can print them as structured
//! JSON, and they carry enough shape for callers to branch on the
//! distinguished cases (expired auth, unsupported workflow action, rate limit).

use serde::Serialize;
use thiserror::Error;

/// Application-level errors shared by providers, the store and the monitor loop.
///
/// All variants serialize to a structured JSON object for `--json` output.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Provider API request failed with a non-success status.
    #[error("Provider API error: {message}")]
    ProviderApi {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// HTTP 429 persisted past the in-backend retry cap.
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// Network request failed.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Authentication failed or no credential is available.
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Token expired or revoked, even after one refresh.
    #[error("Token expired: {message}")]
    AuthenticationExpired {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
    },

    /// Credential storage operation failed.
    #[error("Credential storage error: {message}")]
    CredentialStorage { message: String },

    /// Requested resource not found.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// The backend cannot perform this workflow action.
    #[error("{provider} does not support workflow action '{action}'")]
    Unsupported { provider: String, action: String },

    /// Provider or LLM output could not be parsed.
    #[error("Malformed response: {message}")]
    MalformedResponse {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },

    /// No registered backend matches a URL or name.
    #[error("No registered backend for {target}")]
    NoBackend { target: String },

    /// PR document store failure.
    #[error("Store error: {message}")]
    Store {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },

    /// Advisory file lock could not be acquired.
    #[error("Lock error: {message}")]
    Lock { message: String },

    /// LLM capability failure.
    #[error("LLM error: {message}")]
    Llm { message: String },

    /// Git subprocess failure.
    #[error("Git error: {message}")]
    Git { message: String },

    /// Configuration missing or invalid.
    #[error("Config error: {message}")]
    Config { message: String },

    /// Invalid input provided.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// Operation was cancelled by shutdown.
    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a provider API error.
    pub fn provider_api(message: impl Into<String>) -> Self {
        Self::ProviderApi {
            message: message.into(),
            status_code: None,
            endpoint: None,
        }
    }

    /// Create a provider API error with status code and endpoint.
    pub fn provider_api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::ProviderApi {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a rate-limit error for an endpoint.
    pub fn rate_limited(message: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create an authentication expired error.
    pub fn authentication_expired(message: impl Into<String>) -> Self {
        Self::AuthenticationExpired {
            message: message.into(),
            provider: None,
        }
    }

    /// Create an authentication expired error naming the provider.
    pub fn authentication_expired_for(
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self::AuthenticationExpired {
            message: message.into(),
            provider: Some(provider.into()),
        }
    }

    /// Create a credential storage error.
    pub fn credential_storage(message: impl Into<String>) -> Self {
        Self::CredentialStorage {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create the unsupported-workflow-action sentinel.
    pub fn unsupported(provider: impl Into<String>, action: impl Into<String>) -> Self {
        Self::Unsupported {
            provider: provider.into(),
            action: action.into(),
        }
    }

    /// Create a malformed response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
            context: None,
        }
    }

    /// Create a malformed response error with a snippet of the offending payload.
    pub fn malformed_with_context(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Create a no-backend error.
    pub fn no_backend(target: impl Into<String>) -> Self {
        Self::NoBackend {
            target: target.into(),
        }
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            path: None,
        }
    }

    /// Create a store error with the document path.
    pub fn store_at(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    /// Create a lock error.
    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock {
            message: message.into(),
        }
    }

    /// Create an LLM error.
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
        }
    }

    /// Create a git error.
    pub fn git(message: impl Into<String>) -> Self {
        Self::Git {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    /// Create an invalid input error with field name.
    pub fn invalid_input_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this is an authentication expired error.
    pub fn is_authentication_expired(&self) -> bool {
        matches!(self, Self::AuthenticationExpired { .. })
    }

    /// Check if this is the unsupported-workflow-action sentinel.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Transient errors may succeed on a later tick; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network { .. })
    }
}

// Conversions from common error types

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network("Request timed out")
        } else if err.is_connect() {
            Self::network("Failed to connect to server")
        } else if err.is_decode() {
            Self::malformed(format!("Failed to decode response: {}", err))
        } else if err.is_status() {
            Self::provider_api(format!("HTTP error: {}", err))
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::store(format!("YAML error: {}", err))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(format!("TOML error: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::not_found(err.to_string())
        } else {
            Self::internal(format!("I/O error: {}", err))
        }
    }
}
