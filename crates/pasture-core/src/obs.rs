//! Structured observability hooks for pipeline lifecycle events.
//!
//! This module provides:
//! - Stage-scoped tracing spans via the `StageSpan` RAII guard
//! - Emission functions for key lifecycle events: stage start/skip/finish,
//!   first-run detection, var file upload and pipeline completion
//!
//! Events carry an `event` field so JSON output (`--json`) can be filtered by
//! machine consumers while the human-readable message stays on the line.

use tracing::{info, warn};

/// RAII guard that enters a stage-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = StageSpan::enter("1-resman");
/// // every log line below carries stage = "1-resman"
/// ```
pub struct StageSpan {
    _span: tracing::span::EnteredSpan,
}

impl StageSpan {
    pub fn enter(stage: &str) -> Self {
        let span = tracing::info_span!("pasture.stage", stage = %stage);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a stage is about to run `action` (deploy or destroy).
pub fn emit_stage_started(stage: &str, action: &str) {
    info!(event = "stage.started", stage = %stage, action = %action, "Running stage {stage}");
}

/// Emit event: a stage was not run, with the reason.
pub fn emit_stage_skipped(stage: &str, reason: &str) {
    info!(event = "stage.skipped", stage = %stage, reason = %reason, "Skipping stage {stage}: {reason}");
}

/// Emit event: a stage finished its action.
pub fn emit_stage_completed(stage: &str, action: &str, duration_ms: u64) {
    info!(
        event = "stage.completed",
        stage = %stage,
        action = %action,
        duration_ms = duration_ms,
        "Stage {stage} completed"
    );
}

pub fn emit_first_run_detected(stage: &str) {
    info!(
        event = "pipeline.first_run",
        stage = %stage,
        "No remote state found for {stage}, treating this as a first run"
    );
}

pub fn emit_var_file_uploaded(object: &str) {
    info!(event = "varfile.uploaded", object = %object, "Uploaded var file to {object}");
}

/// Emit event: a terraform output was expected but absent (warning level).
pub fn emit_output_missing(stage: &str, name: &str) {
    warn!(event = "stage.output_missing", stage = %stage, output = %name, "Output {name} not found in {stage}");
}

/// Emit event: the pipeline finished.
pub fn emit_pipeline_finished(mode: &str, stages: usize, duration_ms: u64, dry_run: bool) {
    info!(
        event = "pipeline.finished",
        mode = %mode,
        stages = stages,
        duration_ms = duration_ms,
        dry_run = dry_run,
        "Pipeline {mode} finished"
    );
}
