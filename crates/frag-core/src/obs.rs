//! Structured observability hooks for the ingestion lifecycle.
//!
//! This module provides:
//! - A cycle-scoped tracing span via [`cycle_span`]
//! - Emission functions for submission, collision, dispatch and cycle events
//!
//! Verbosity follows `RUST_LOG`; JSON output is selected in
//! [`crate::telemetry::init_tracing`].

use chrono::{DateTime, Utc};
use frag_store::{AssignmentId, PersonId, SubmissionId, SuiteId};
use tracing::{error, info, warn};

/// Span tagging every event of one poll cycle with its number.
///
/// Attach it with `Instrument::instrument` so it survives await points.
pub fn cycle_span(cycle: u64) -> tracing::Span {
    tracing::info_span!("frag.cycle", cycle = cycle)
}

/// Emit event: a submission was recorded.
pub fn emit_submission_created(
    submission: &SubmissionId,
    assignment: AssignmentId,
    author: PersonId,
    files: usize,
) {
    info!(
        event = "submission.created",
        submission = %submission,
        assignment = %assignment,
        author = %author,
        files = files,
    );
}

/// Emit event: a stamped insert collided and is retried with a perturbed stamp.
pub fn emit_stamp_retry(
    assignment: AssignmentId,
    author: PersonId,
    original: DateTime<Utc>,
    perturbed: DateTime<Utc>,
) {
    warn!(
        event = "submission.stamp_retry",
        assignment = %assignment,
        author = %author,
        original = %original.format("%Y-%m-%d %H:%M:%S%.6f"),
        perturbed = %perturbed.format("%Y-%m-%d %H:%M:%S%.6f"),
        "Retrying {} for {}, {} → {}",
        assignment,
        author,
        original.format("%Y-%m-%d %H:%M:%S%.6f"),
        perturbed.format("%Y-%m-%d %H:%M:%S%.6f"),
    );
}

/// Emit event: every perturbed stamp collided; the submission is not stored.
pub fn emit_stamp_exhausted(
    assignment: AssignmentId,
    author: PersonId,
    original: DateTime<Utc>,
    attempts: u32,
) {
    error!(
        event = "submission.stamp_exhausted",
        assignment = %assignment,
        author = %author,
        original = %original,
        attempts = attempts,
    );
}

/// Emit event: an evaluation request was staged.
pub fn emit_eval_requested(submission: &SubmissionId, suite: SuiteId) {
    info!(event = "eval.dispatched", submission = %submission, suite = %suite);
}

/// Emit event: a poll cycle finished.
pub fn emit_cycle_finished(cycle: u64, duration_ms: u64, success: bool) {
    info!(
        event = "cycle.finished",
        cycle = cycle,
        duration_ms = duration_ms,
        success = success,
    );
}
