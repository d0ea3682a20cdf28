//! Evaluation dispatch decision.
//!
//! Evaluation requests are restricted to staff submissions against suites
//! that are not yet active, so a new grading suite can be validated on
//! reference solutions before students see it.

use frag_store::{
    AssignmentId, EvaluationRequest, PersonId, Role, StorageResult, SubmissionId, SuiteId,
    UnitOfWork,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::obs;

/// Notification channel signalled once per created evaluation request.
pub const EVAL_REQ_CHANNEL: &str = "eval_req";

/// Requested evaluation behaviour for a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvalMode {
    Always,
    Never,
    #[default]
    TeacherOnlyWhenSuitePending,
}

impl EvalMode {
    /// Whether the author's role is needed to decide.
    pub fn needs_role(self) -> bool {
        self == EvalMode::TeacherOnlyWhenSuitePending
    }
}

/// Resolve the mode that actually applies to an author.
///
/// `TeacherOnlyWhenSuitePending` escalates to `Always` for teachers and
/// collapses to `Never` for everyone else.
pub fn effective_mode(mode: EvalMode, role: Role) -> EvalMode {
    match (mode, role) {
        (EvalMode::TeacherOnlyWhenSuitePending, Role::Teacher) => EvalMode::Always,
        (EvalMode::TeacherOnlyWhenSuitePending, Role::Student) => EvalMode::Never,
        (mode, _) => mode,
    }
}

/// Result of [`EvaluationDispatcher::maybe_dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The effective mode was `Never`.
    Skipped,
    /// The assignment has no current suite.
    NoSuite,
    /// The current suite is already active.
    SuiteActive(SuiteId),
    /// A request against the pending suite was staged.
    Requested(SuiteId),
}

/// Creates evaluation requests and notifies the evaluation worker.
#[derive(Debug, Clone)]
pub struct EvaluationDispatcher {
    channel: String,
}

impl Default for EvaluationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationDispatcher {
    pub fn new() -> Self {
        Self {
            channel: EVAL_REQ_CHANNEL.to_string(),
        }
    }

    /// Use a different notification channel.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Decide whether `submission` warrants an evaluation request and stage it.
    pub async fn maybe_dispatch(
        &self,
        uow: &mut dyn UnitOfWork,
        assignment: AssignmentId,
        submission: &SubmissionId,
        author: PersonId,
        mode: EvalMode,
    ) -> StorageResult<DispatchOutcome> {
        let mode = if mode.needs_role() {
            let role = if uow.is_teacher(author).await? {
                Role::Teacher
            } else {
                Role::Student
            };
            effective_mode(mode, role)
        } else {
            mode
        };

        if mode == EvalMode::Never {
            debug!(submission = %submission, "evaluation not requested");
            return Ok(DispatchOutcome::Skipped);
        }

        let suite = match uow.current_suite(assignment).await? {
            None => {
                debug!(assignment = %assignment, "no current suite, nothing to evaluate");
                return Ok(DispatchOutcome::NoSuite);
            }
            Some(suite) if suite.active => {
                debug!(assignment = %assignment, suite = %suite.id, "current suite already active");
                return Ok(DispatchOutcome::SuiteActive(suite.id));
            }
            Some(suite) => suite,
        };

        uow.insert_eval_request(EvaluationRequest {
            submission: submission.clone(),
            suite: suite.id,
        })
        .await?;
        uow.notify(&self.channel).await?;
        obs::emit_eval_requested(submission, suite.id);
        Ok(DispatchOutcome::Requested(suite.id))
    }
}
