//! Error taxonomy for the ingestion pipeline.

use chrono::{DateTime, Utc};
use frag_store::{AssignmentId, PersonId, StorageError};

use crate::config::ConfigError;

/// frag domain errors.
#[derive(Debug, thiserror::Error)]
pub enum FragError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(
        "submission of assignment {assignment} by {author} at {stamp} still collides \
         after {attempts} attempts"
    )]
    StampCollision {
        author: PersonId,
        assignment: AssignmentId,
        stamp: DateTime<Utc>,
        attempts: u32,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("submission source error: {0}")]
    Source(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FragError {
    /// Whether the error invalidates the whole poll cycle rather than a
    /// single submission.
    pub fn aborts_cycle(&self) -> bool {
        matches!(self, FragError::Storage(_) | FragError::Config(_))
    }
}

/// Result type for frag domain operations.
pub type Result<T> = std::result::Result<T, FragError>;
