//! The PR lifecycle state machine.
//!
//! One tick walks every tracked document, strictly one PR at a time:
//!
//! ```text
//! watching --pipeline succeeded--> green
//! watching --pipeline failed--> fixing --attempt counted--> watching | failed
//! watching --remote closed--> abandoned (merged: green)
//! ```
//!
//! `green` documents still get comment triage every tick. `failed` and
//! `abandoned` are left alone until a human intervenes.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::{signed, DocStatus, PipelineState, PrDocument, PrInfo, PrState, WorkflowAction};
use crate::providers::{ProviderBackend, Registry};
use crate::services::comment_evaluator::CommentEvaluator;
use crate::services::fixer::Fixer;
use crate::services::pr_store::PrStore;

const SUCCESS_COMMENT: &str = "All pipelines succeeded. Otto will keep triaging review comments.";

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    /// Documents processed.
    pub checked: usize,
    /// Fix attempts that pushed a commit.
    pub fixed: usize,
    /// Comments evaluated.
    pub comments_handled: usize,
    /// One entry per failed step, prefixed with the document key.
    pub errors: Vec<String>,
}

pub struct MonitorLoop {
    registry: Registry,
    store: PrStore,
    fixer: Fixer,
    evaluator: CommentEvaluator,
    cancel: CancellationToken,
}

impl MonitorLoop {
    pub fn new(
        registry: Registry,
        store: PrStore,
        fixer: Fixer,
        evaluator: CommentEvaluator,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            store,
            fixer,
            evaluator,
            cancel,
        }
    }

    /// Tick now, then every `interval` or whenever `trigger` fires, until cancelled.
    pub async fn run(&self, interval: Duration, mut trigger: mpsc::Receiver<()>) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
                Some(()) = trigger.recv() => {
                    log::info!("[monitor] Poll triggered");
                    ticker.reset();
                }
            }
            self.run_tick().await;
        }
        log::info!("[monitor] Stopped");
    }

    async fn run_tick(&self) {
        let started = Instant::now();
        match self.tick().await {
            Ok(report) => {
                log::info!(
                    "[monitor] Tick done in {:?}: {} checked, {} fixed, {} comments, {} errors",
                    started.elapsed(),
                    report.checked,
                    report.fixed,
                    report.comments_handled,
                    report.errors.len()
                );
                for error in &report.errors {
                    log::warn!("[monitor] {}", error);
                }
            }
            Err(e) => log::error!("[monitor] Tick failed: {}", e),
        }
    }

    /// One full pass over the store.
    ///
    /// A failing PR is recorded in the report and the pass moves on; only a
    /// store listing failure aborts the tick.
    pub async fn tick(&self) -> Result<TickReport, AppError> {
        let mut report = TickReport::default();

        for doc in self.store.list().await? {
            if self.cancel.is_cancelled() {
                log::info!("[monitor] Shutdown requested, ending tick early");
                break;
            }
            // A document left in `fixing` by a crash resumes as `watching`.
            if !matches!(
                doc.status,
                DocStatus::Watching | DocStatus::Fixing | DocStatus::Green
            ) {
                continue;
            }

            report.checked += 1;
            if let Err(e) = self.process(&doc, &mut report).await {
                report.errors.push(format!("{}: {}", doc.file_name(), e));
            }
        }

        Ok(report)
    }

    async fn process(&self, doc: &PrDocument, report: &mut TickReport) -> Result<(), AppError> {
        let backend = self.registry.get(&doc.provider)?;
        let backend = backend.as_ref();
        let target = if doc.url.is_empty() {
            doc.id.to_string()
        } else {
            doc.url.clone()
        };
        let pr = backend.get_pr(&target).await?;

        if pr.status != PrState::Active {
            return self.close_out(doc, &pr).await;
        }

        if doc.status != DocStatus::Green {
            let done = self.check_pipeline(backend, doc, &pr, report).await?;
            if done {
                return Ok(());
            }
        }

        self.triage_comments(backend, &pr, report).await?;

        let now = Utc::now();
        self.store.update(&doc.provider, doc.id, |doc| {
            doc.last_checked = Some(now);
            Ok(())
        }).await?;
        Ok(())
    }

    /// Record a PR closed on the remote. Merged counts as green.
    async fn close_out(&self, doc: &PrDocument, pr: &PrInfo) -> Result<(), AppError> {
        let (status, entry) = match pr.status {
            PrState::Completed => (DocStatus::Green, "PR completed on the remote"),
            _ => (DocStatus::Abandoned, "PR abandoned on the remote"),
        };
        let now = Utc::now();
        self.store.update(&doc.provider, doc.id, |doc| {
            if doc.status != status {
                doc.status = status;
                doc.append_log(now, entry);
            }
            doc.last_checked = Some(now);
            Ok(())
        }).await?;
        log::info!("[monitor] {}: {}", doc.file_name(), entry);
        Ok(())
    }

    /// Pipeline step. Returns `true` when the rest of the tick is skipped.
    async fn check_pipeline(
        &self,
        backend: &dyn ProviderBackend,
        doc: &PrDocument,
        pr: &PrInfo,
        report: &mut TickReport,
    ) -> Result<bool, AppError> {
        let pipeline = backend.get_pipeline_status(pr).await?;
        log::debug!("[monitor] {}: pipeline {}", doc.file_name(), pipeline.state);

        match pipeline.state {
            PipelineState::Succeeded => {
                let now = Utc::now();
                self.store.update(&doc.provider, doc.id, |doc| {
                    doc.status = DocStatus::Green;
                    doc.last_checked = Some(now);
                    doc.append_log(now, "Pipeline succeeded");
                    Ok(())
                }).await?;
                log::info!("[monitor] {}: green", doc.file_name());
                if let Err(e) = backend.post_comment(pr, &signed(SUCCESS_COMMENT)).await {
                    report
                        .errors
                        .push(format!("{}: success comment: {}", doc.file_name(), e));
                }
                Ok(true)
            }
            PipelineState::Failed => {
                let current = self.store.load(&doc.provider, doc.id).await?;
                if !current.can_fix() {
                    log::warn!(
                        "[monitor] {}: pipeline failed and all {} fix attempts are used",
                        doc.file_name(),
                        current.max_fix_attempts
                    );
                    return Ok(false);
                }
                match self.fixer.fix(backend, &self.store, pr, &pipeline).await {
                    Ok(outcome) => {
                        if outcome.commit.is_some() {
                            report.fixed += 1;
                        }
                        if let Some(failure) = outcome.failure {
                            report
                                .errors
                                .push(format!("{}: fix attempt: {}", doc.file_name(), failure));
                        }
                    }
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => report
                        .errors
                        .push(format!("{}: fix skipped: {}", doc.file_name(), e)),
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Evaluate every new, unresolved reviewer comment.
    async fn triage_comments(
        &self,
        backend: &dyn ProviderBackend,
        pr: &PrInfo,
        report: &mut TickReport,
    ) -> Result<(), AppError> {
        let provider = backend.name();
        let comments = backend.get_comments(pr).await?;
        let mut doc = self.store.load(provider, pr.id).await?;
        let mut handled = 0;

        for comment in &comments {
            if self.cancel.is_cancelled() {
                break;
            }
            if comment.is_resolved || comment.is_from_otto() || doc.has_seen(&comment.id) {
                continue;
            }
            match self.evaluator.evaluate(backend, &self.store, pr, comment).await {
                Ok(_) => handled += 1,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => report.errors.push(format!(
                    "{}: comment {}: {}",
                    doc.file_name(),
                    comment.id,
                    e
                )),
            }
            doc = self.store.load(provider, pr.id).await?;
        }
        report.comments_handled += handled;

        if handled > 0 {
            match backend.run_workflow(pr, WorkflowAction::AddressBot).await {
                Ok(()) => log::debug!("[monitor] {}: bot threads addressed", doc.file_name()),
                Err(e) if e.is_unsupported() => {}
                Err(e) => log::warn!(
                    "[monitor] {}: addressing bot threads failed: {}",
                    doc.file_name(),
                    e
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_report_serializes() {
        let report = TickReport {
            checked: 2,
            fixed: 1,
            comments_handled: 3,
            errors: vec!["ado__1: boom".to_string()],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["comments_handled"], 3);
        assert_eq!(json["errors"][0], "ado__1: boom");
    }
}
