//! Where submissions come from.
//!
//! A [`SubmissionSource`] discovers candidate submissions for an assignment
//! and is told to acknowledge each one once it has been committed. Sources
//! must keep unacknowledged candidates so the next cycle sees them again.

pub mod spool;

pub use spool::SpoolSource;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use crate::assignment::Assignment;
use crate::content::File;
use crate::dispatch::EvalMode;
use crate::error::Result;

/// A submission found by a source, not yet recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Source-specific identity, used for acknowledgement and logging.
    pub key: String,
    pub login: String,
    pub files: Vec<File>,
    pub stamp: Option<DateTime<FixedOffset>>,
    /// Overrides the assignment's configured mode when set.
    pub eval: Option<EvalMode>,
}

#[async_trait]
pub trait SubmissionSource: Send + Sync {
    /// Candidates waiting for `assignment`, in a stable order.
    async fn discover(&self, assignment: &Assignment) -> Result<Vec<Candidate>>;

    /// Mark `candidate` as recorded so it is not discovered again.
    async fn acknowledge(&self, assignment: &Assignment, candidate: &Candidate) -> Result<()>;
}
