//! Submission registry: idempotent creation of submission records.
//!
//! Every submission is written through its own unit of work: the submission
//! row, the content rows, the file associations and any evaluation request
//! become visible together or not at all.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, SubsecRound, Utc};
use frag_store::{
    AssignmentId, CommitMode, PersonId, StorageError, SubmissionId, SubmissionStore, UnitOfWork,
};
use tracing::debug;

use crate::content::{ContentStore, File};
use crate::dispatch::{DispatchOutcome, EvalMode, EvaluationDispatcher};
use crate::error::{FragError, Result};
use crate::obs;

/// Total number of insert attempts for a stamped submission.
pub const MAX_STAMP_ATTEMPTS: u32 = 10;

/// Normalize a stamp to UTC with microsecond precision.
pub fn normalize_stamp(stamp: DateTime<FixedOffset>) -> DateTime<Utc> {
    stamp.with_timezone(&Utc).trunc_subsecs(6)
}

/// A submission about to be recorded.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub assignment: AssignmentId,
    pub author: PersonId,
    pub files: Vec<File>,
    pub stamp: Option<DateTime<FixedOffset>>,
    pub eval: EvalMode,
}

impl NewSubmission {
    pub fn new(assignment: AssignmentId, author: PersonId, files: Vec<File>) -> Self {
        Self {
            assignment,
            author,
            files,
            stamp: None,
            eval: EvalMode::default(),
        }
    }

    pub fn with_stamp(mut self, stamp: impl Into<DateTime<FixedOffset>>) -> Self {
        self.stamp = Some(stamp.into());
        self
    }

    pub fn with_eval(mut self, eval: EvalMode) -> Self {
        self.eval = eval;
        self
    }
}

/// Outcome of [`SubmissionRegistry::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSubmission {
    pub id: SubmissionId,
    /// The stored stamp, after normalization and any perturbation.
    pub stamp: Option<DateTime<Utc>>,
    pub dispatch: DispatchOutcome,
}

/// Creates submission records in a [`SubmissionStore`].
pub struct SubmissionRegistry {
    store: Arc<dyn SubmissionStore>,
    content: ContentStore,
    dispatcher: EvaluationDispatcher,
    commit_mode: CommitMode,
}

impl SubmissionRegistry {
    pub fn new(store: Arc<dyn SubmissionStore>) -> Self {
        Self {
            store,
            content: ContentStore,
            dispatcher: EvaluationDispatcher::new(),
            commit_mode: CommitMode::Commit,
        }
    }

    /// Finish every unit of work with `mode` (`Simulate` for dry runs).
    pub fn with_commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = mode;
        self
    }

    pub fn commit_mode(&self) -> CommitMode {
        self.commit_mode
    }

    pub fn store(&self) -> &Arc<dyn SubmissionStore> {
        &self.store
    }

    /// Record a submission, its files and, if warranted, an evaluation request.
    ///
    /// A stamped submission whose stamp another writer commits first is
    /// retried in a fresh unit of work with the next perturbed stamp.
    pub async fn create(&self, submission: NewSubmission) -> Result<CreatedSubmission> {
        let NewSubmission {
            assignment,
            author,
            files,
            stamp,
            eval,
        } = submission;
        let original = stamp.map(normalize_stamp);

        let mut attempt = 1;
        loop {
            let mut uow = self.store.begin().await?;
            let (id, stamp, used) = self
                .insert_row(uow.as_mut(), author, assignment, original, attempt)
                .await?;

            for file in &files {
                let digest = self.content.put(uow.as_mut(), &file.data).await?;
                uow.insert_submission_file(&id, assignment, &file.name, &digest)
                    .await?;
            }

            let dispatch = self
                .dispatcher
                .maybe_dispatch(uow.as_mut(), assignment, &id, author, eval)
                .await?;

            match (uow.finish(self.commit_mode).await, original) {
                (Ok(()), _) => {
                    obs::emit_submission_created(&id, assignment, author, files.len());
                    debug!(submission = %id, ?dispatch, mode = ?self.commit_mode, "submission finished");
                    return Ok(CreatedSubmission {
                        id,
                        stamp,
                        dispatch,
                    });
                }
                (Err(StorageError::StampTaken(msg)), Some(original)) => {
                    debug!(%msg, "stamp taken at commit");
                    if used == MAX_STAMP_ATTEMPTS {
                        return Err(exhausted(assignment, author, original));
                    }
                    obs::emit_stamp_retry(assignment, author, original, perturb(original, used));
                    attempt = used + 1;
                }
                (Err(e), _) => return Err(e.into()),
            }
        }
    }

    /// Insert the submission row, starting at stamp attempt `first`.
    ///
    /// Returns the id, the stored stamp and the attempt that succeeded.
    async fn insert_row(
        &self,
        uow: &mut dyn UnitOfWork,
        author: PersonId,
        assignment: AssignmentId,
        original: Option<DateTime<Utc>>,
        first: u32,
    ) -> Result<(SubmissionId, Option<DateTime<Utc>>, u32)> {
        let Some(original) = original else {
            let id = uow
                .insert_submission(author, assignment, None)
                .await?
                .ok_or_else(|| {
                    StorageError::Conflict("unstamped submission rejected".to_string())
                })?;
            return Ok((id, None, first));
        };

        for attempt in first..=MAX_STAMP_ATTEMPTS {
            let candidate = perturb(original, attempt - 1);
            if let Some(id) = uow
                .insert_submission(author, assignment, Some(candidate))
                .await?
            {
                return Ok((id, Some(candidate), attempt));
            }
            if attempt < MAX_STAMP_ATTEMPTS {
                obs::emit_stamp_retry(assignment, author, original, perturb(original, attempt));
            }
        }

        Err(exhausted(assignment, author, original))
    }
}

/// The stamp tried after `offset` collisions.
fn perturb(original: DateTime<Utc>, offset: u32) -> DateTime<Utc> {
    original + Duration::microseconds(i64::from(offset))
}

fn exhausted(assignment: AssignmentId, author: PersonId, original: DateTime<Utc>) -> FragError {
    obs::emit_stamp_exhausted(assignment, author, original, MAX_STAMP_ATTEMPTS);
    FragError::StampCollision {
        author,
        assignment,
        stamp: original,
        attempts: MAX_STAMP_ATTEMPTS,
    }
}
