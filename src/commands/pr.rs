//! `otto pr ...` handlers.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::cli::PrCommand;
use crate::commands::Invocation;
use crate::error::AppError;
use crate::models::{DocStatus, PrDocument};
use crate::providers::{ProviderBackend, Registry};
use crate::services::PrStore;

/// One row of `otto pr list`.
#[derive(Debug, Serialize)]
struct PrSummary<'a> {
    provider: &'a str,
    id: i64,
    status: DocStatus,
    fix_attempts: u32,
    max_fix_attempts: u32,
    title: &'a str,
    url: &'a str,
}

pub async fn run(inv: &Invocation, command: PrCommand) -> Result<(), AppError> {
    let store = PrStore::open(&inv.config.store_dir)?;
    match command {
        PrCommand::Add {
            target,
            provider,
            max_fix_attempts,
        } => {
            let registry = Registry::from_config(&inv.config)?;
            let backend = pick_backend(&registry, &target, provider.as_deref())?;
            let pr = backend.get_pr(&target).await?;
            let max = max_fix_attempts.unwrap_or(inv.config.max_fix_attempts);
            if max == 0 {
                return Err(AppError::invalid_input_field(
                    "max fix attempts must be positive",
                    "max_fix_attempts",
                ));
            }
            let doc = PrDocument::new(backend.name(), &pr, max, Utc::now());
            store.create(&doc).await?;
            log::info!("[cli] Tracking {}", doc.file_name());
            inv.emit(&doc, || format!("Tracking {} \"{}\" ({})", doc.file_name(), doc.title, doc.url))
        }
        PrCommand::Remove { provider, id } => {
            store.delete(&provider, id).await?;
            let key = PrDocument::file_name_for(&provider, id);
            inv.emit(&serde_json::json!({ "removed": key }), || format!("Stopped tracking {}", key))
        }
        PrCommand::List => {
            let docs = store.list().await?;
            let rows: Vec<PrSummary> = docs
                .iter()
                .map(|d| PrSummary {
                    provider: &d.provider,
                    id: d.id,
                    status: d.status,
                    fix_attempts: d.fix_attempts,
                    max_fix_attempts: d.max_fix_attempts,
                    title: &d.title,
                    url: &d.url,
                })
                .collect();
            inv.emit(&rows, || render_list(&rows))
        }
        PrCommand::Show { provider, id } => {
            let doc = store.load(&provider, id).await?;
            let rendered = doc.render()?;
            inv.emit(&doc, || rendered)
        }
        PrCommand::Retry { provider, id } => {
            let now = Utc::now();
            let doc = store.update(&provider, id, |doc| retry(doc, now)).await?;
            inv.emit(&doc, || {
                format!("{} is watching again with {} fix attempts", doc.file_name(), doc.max_fix_attempts)
            })
        }
    }
}

/// Choose the backend for `pr add`.
///
/// Explicit `--provider` wins; a URL is detected; a bare ID needs exactly one
/// configured backend.
fn pick_backend(
    registry: &Registry,
    target: &str,
    provider: Option<&str>,
) -> Result<Arc<dyn ProviderBackend>, AppError> {
    if let Some(name) = provider {
        return registry.get(name);
    }
    if target.contains("://") {
        return registry.detect(target);
    }
    match registry.names().as_slice() {
        [only] => registry.get(only),
        [] => Err(AppError::config("No providers configured")),
        names => Err(AppError::invalid_input_field(
            format!("Bare ID is ambiguous; pass --provider ({})", names.join(", ")),
            "provider",
        )),
    }
}

/// Manual way out of `failed`.
fn retry(doc: &mut PrDocument, now: chrono::DateTime<Utc>) -> Result<(), AppError> {
    if doc.status != DocStatus::Failed {
        return Err(AppError::invalid_input(format!(
            "{} is {}, only failed PRs can be retried",
            doc.file_name(),
            doc.status
        )));
    }
    doc.status = DocStatus::Watching;
    doc.fix_attempts = 0;
    doc.append_log(now, "Retry requested, fix attempts reset");
    Ok(())
}

fn render_list(rows: &[PrSummary]) -> String {
    if rows.is_empty() {
        return "No tracked PRs".to_string();
    }
    rows.iter()
        .map(|r| {
            format!(
                "{:<10} {:>7}  {:<10} {}/{}  {}",
                r.provider, r.id, r.status, r.fix_attempts, r.max_fix_attempts, r.title
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
