//! frag core library
//!
//! Submission ingestion for the frag grading system: content-addressed file
//! storage, idempotent submission records, evaluation dispatch and the
//! periodic poll loop that drives them.

pub mod assignment;
pub mod config;
pub mod content;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod obs;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod telemetry;

pub use assignment::{Assignment, AssignmentConfig, Enabled, EnabledWindow};
pub use config::{ConfigError, ConfigLoader, DatabaseConfig, PollConfig};
pub use content::{ContentStore, File};
pub use dispatch::{effective_mode, DispatchOutcome, EvalMode, EvaluationDispatcher, EVAL_REQ_CHANNEL};
pub use error::{FragError, Result};
pub use ingest::{IngestPoll, IngestStats};
pub use registry::{normalize_stamp, CreatedSubmission, NewSubmission, SubmissionRegistry, MAX_STAMP_ATTEMPTS};
pub use scheduler::{
    ConfigSource, Poll, PollScheduler, ScheduleSettings, SchedulerState, SchedulerSummary,
    StopReason,
};
pub use source::{Candidate, SpoolSource, SubmissionSource};

pub use frag_store::{
    AssignmentId, CommitMode, ContentDigest, Person, PersonId, Role, StorageError, SubmissionId,
    SubmissionStore, SuiteId,
};
