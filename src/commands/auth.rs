//! `otto auth ...` handlers: provider tokens in the OS keychain.

use std::io::BufRead;

use crate::cli::AuthCommand;
use crate::commands::Invocation;
use crate::config::Config;
use crate::error::AppError;
use crate::services::CredentialService;

pub fn run(inv: &Invocation, command: AuthCommand) -> Result<(), AppError> {
    match command {
        AuthCommand::Set { provider, token } => {
            let account = account_url(&inv.config, &provider)?;
            let token = match token {
                Some(token) => token,
                None => read_token(std::io::stdin().lock())?,
            };
            let token = token.trim();
            if token.is_empty() {
                return Err(AppError::invalid_input_field("token is empty", "token"));
            }
            CredentialService::store_token(&account, token)?;
            log::info!("[cli] Stored token for {}", account);
            inv.emit(
                &serde_json::json!({ "provider": provider, "account": account, "stored": true }),
                || format!("Stored token for {} ({})", provider, account),
            )
        }
        AuthCommand::Clear { provider } => {
            let account = account_url(&inv.config, &provider)?;
            CredentialService::delete_token(&account)?;
            inv.emit(
                &serde_json::json!({ "provider": provider, "account": account, "stored": false }),
                || format!("Removed token for {} ({})", provider, account),
            )
        }
    }
}

/// Keychain account of a configured provider.
fn account_url(config: &Config, provider: &str) -> Result<String, AppError> {
    config
        .providers
        .iter()
        .find(|p| p.name() == provider)
        .map(|p| p.account_url().to_string())
        .ok_or_else(|| AppError::not_found_with_id("provider", provider))
}

fn read_token(mut input: impl BufRead) -> Result<String, AppError> {
    let mut line = String::new();
    input
        .read_line(&mut line)
        .map_err(|e| AppError::invalid_input(format!("Failed to read token: {}", e)))?;
    Ok(line)
}
