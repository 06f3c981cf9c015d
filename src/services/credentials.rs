//! Credential lookup for provider tokens.
//!
//! Tokens come from, in order: the config file, an environment variable, and
//! the OS keychain (Keychain on macOS, Credential Manager on Windows, Secret
//! Service on Linux). `otto auth set` and `otto auth clear` manage the
//! keychain entry, keyed by the provider's configured base URL.

use crate::error::AppError;
use keyring::Entry;

/// Service name used in the keychain.
const SERVICE_NAME: &str = "otto";

/// Environment variable consulted for the ADO personal access token.
pub const ADO_PAT_ENV: &str = "OTTO_ADO_PAT";

/// Environment variable consulted for the GitHub token.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Credential storage operations.
pub struct CredentialService;

impl CredentialService {
    /// Store a token for a provider account.
    ///
    /// # Arguments
    /// * `account_url` - The provider base URL (used as the account identifier)
    /// * `token` - The personal access token to store
    pub fn store_token(account_url: &str, token: &str) -> Result<(), AppError> {
        let entry = Self::get_entry(account_url)?;

        entry
            .set_password(token)
            .map_err(|e| AppError::credential_storage(format!("Failed to store token: {}", e)))
    }

    /// Retrieve a token for a provider account.
    ///
    /// # Returns
    /// The stored token, or a not-found error if none is stored
    pub fn get_token(account_url: &str) -> Result<String, AppError> {
        let entry = Self::get_entry(account_url)?;

        entry.get_password().map_err(|e| match e {
            keyring::Error::NoEntry => AppError::not_found_with_id("credential", account_url),
            _ => AppError::credential_storage(format!("Failed to retrieve token: {}", e)),
        })
    }

    /// Delete a token. Deleting a non-existent token is not an error.
    pub fn delete_token(account_url: &str) -> Result<(), AppError> {
        let entry = Self::get_entry(account_url)?;

        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AppError::credential_storage(format!(
                "Failed to delete token: {}",
                e
            ))),
        }
    }

    /// Resolve a token: explicit config value, then env var, then keychain.
    ///
    /// Returns `None` when no source has a token; keychain failures other than
    /// a missing entry are logged and treated as absent.
    pub fn resolve(configured: Option<&str>, env_var: &str, account_url: &str) -> Option<String> {
        if let Some(token) = configured.map(str::trim).filter(|t| !t.is_empty()) {
            return Some(token.to_string());
        }
        if let Some(token) = std::env::var(env_var)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
        {
            return Some(token);
        }
        match Self::get_token(account_url) {
            Ok(token) => Some(token),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                log::warn!("[credentials] Keychain lookup for {} failed: {}", account_url, e);
                None
            }
        }
    }

    /// Create a keyring entry for the given account URL.
    fn get_entry(account_url: &str) -> Result<Entry, AppError> {
        let account = normalize_url(account_url);

        Entry::new(SERVICE_NAME, &account).map_err(|e| {
            AppError::credential_storage(format!("Failed to create keyring entry: {}", e))
        })
    }
}

/// Normalize a URL for use as an account identifier.
///
/// Removes trailing slashes and converts to lowercase.
pub fn normalize_url(url: &str) -> String {
    url.trim_end_matches('/').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://dev.azure.com/Contoso/"),
            "https://dev.azure.com/contoso"
        );
        assert_eq!(normalize_url("HTTPS://API.GitHub.COM"), "https://api.github.com");
        assert_eq!(
            normalize_url("https://github.example.com///"),
            "https://github.example.com"
        );
    }

    #[test]
    fn test_resolve_prefers_configured_value() {
        let token = CredentialService::resolve(
            Some("  from-config  "),
            "OTTO_TEST_UNSET_VARIABLE",
            "https://example.invalid",
        );
        assert_eq!(token.as_deref(), Some("from-config"));
    }

    // Keychain round-trips need a real secret service, so they are not run here.
}
