//! Storage trait definitions for frag
//!
//! These traits define the persistence seams of the ingestion pipeline:
//! - `SubmissionStore`: catalog/roster reads and unit-of-work creation
//! - `UnitOfWork`: the staged writes of a single submission, applied
//!   atomically by `finish(CommitMode::Commit)` or dropped by
//!   `finish(CommitMode::Simulate)`
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Content addressing
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier of a stored submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub String);

impl SubmissionId {
    /// Generate a new random SubmissionId
    pub fn new() -> Self {
        SubmissionId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Roster id of a person (teacher or student).
    PersonId
);
numeric_id!(
    /// Catalog id of an assignment.
    AssignmentId
);
numeric_id!(
    /// Id of an evaluation suite.
    SuiteId
);

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Role of a person in the course roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

/// A person from the externally maintained roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub uid: PersonId,
    pub login: String,
    pub name: String,
    pub role: Role,
}

impl Person {
    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }
}

/// One file association of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionFile {
    pub name: String,
    pub digest: ContentDigest,
}

/// A stored submission together with its files, in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: SubmissionId,
    pub author: PersonId,
    pub assignment: AssignmentId,
    /// Normalized UTC stamp; `None` for unstamped submissions.
    pub stamp: Option<DateTime<Utc>>,
    pub files: Vec<SubmissionFile>,
    pub created_at: DateTime<Utc>,
}

/// The current evaluation suite of an assignment.
///
/// A current suite that is not `active` is pending rollout and may receive
/// dry-run evaluation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSuite {
    pub id: SuiteId,
    pub assignment: AssignmentId,
    pub active: bool,
}

/// A request for the external evaluation worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub submission: SubmissionId,
    pub suite: SuiteId,
}

/// How a unit of work is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// Apply all staged writes atomically.
    #[default]
    Commit,
    /// Run all logic but discard the staged writes (dry run).
    Simulate,
}

// ---------------------------------------------------------------------------
// SubmissionStore / UnitOfWork
// ---------------------------------------------------------------------------

/// Persistent store for submissions, content and the read-only catalog.
///
/// Guarantees:
/// - Content rows are unique by digest.
/// - Stamped submissions are unique by (author, assignment, stamp).
/// - Writes only become visible through a committed [`UnitOfWork`].
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Open a new unit of work.
    async fn begin(&self) -> StorageResult<Box<dyn UnitOfWork>>;

    /// Resolve an assignment id by name.
    async fn assignment_id(&self, name: &str) -> StorageResult<Option<AssignmentId>>;

    /// Expected file names of an assignment.
    async fn assignment_files(&self, assignment: AssignmentId) -> StorageResult<Vec<String>>;

    /// All people on the teacher list.
    async fn teachers(&self) -> StorageResult<Vec<Person>>;

    /// All enrolled students.
    async fn students(&self) -> StorageResult<Vec<Person>>;

    /// Teachers followed by students.
    async fn people(&self) -> StorageResult<Vec<Person>> {
        let mut people = self.teachers().await?;
        people.extend(self.students().await?);
        Ok(people)
    }

    /// Retrieve content bytes by digest. Returns `StorageError::NotFound` if absent.
    async fn get_content(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>>;

    /// Retrieve a committed submission by id.
    async fn submission(&self, id: &SubmissionId) -> StorageResult<SubmissionRecord>;

    /// Committed submissions of an assignment, ordered by stamp (unstamped last).
    async fn submissions(&self, assignment: AssignmentId) -> StorageResult<Vec<SubmissionRecord>>;
}

/// Staged writes for one submission.
///
/// Reads issued through the unit of work observe its own staged writes.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Stage a content row. No-op if the digest is already stored or staged.
    async fn put_content(&mut self, digest: &ContentDigest, data: &[u8]) -> StorageResult<()>;

    /// Stage a submission row.
    ///
    /// With a stamp, returns `None` when a submission with the same
    /// (author, assignment, stamp) already exists. Without a stamp a new row
    /// is always staged.
    async fn insert_submission(
        &mut self,
        author: PersonId,
        assignment: AssignmentId,
        stamp: Option<DateTime<Utc>>,
    ) -> StorageResult<Option<SubmissionId>>;

    /// Stage a file association for a staged submission.
    async fn insert_submission_file(
        &mut self,
        submission: &SubmissionId,
        assignment: AssignmentId,
        name: &str,
        digest: &ContentDigest,
    ) -> StorageResult<()>;

    /// Whether the person is on the teacher list.
    async fn is_teacher(&mut self, person: PersonId) -> StorageResult<bool>;

    /// The current evaluation suite of an assignment, if any.
    async fn current_suite(
        &mut self,
        assignment: AssignmentId,
    ) -> StorageResult<Option<EvaluationSuite>>;

    /// Stage an evaluation request.
    async fn insert_eval_request(&mut self, request: EvaluationRequest) -> StorageResult<()>;

    /// Stage a notification on a named channel; published on commit only.
    async fn notify(&mut self, channel: &str) -> StorageResult<()>;

    /// Apply (`Commit`) or discard (`Simulate`) all staged writes.
    ///
    /// Fails with [`StorageError::StampTaken`] when another writer committed
    /// a staged stamp first; nothing is applied in that case.
    async fn finish(self: Box<Self>, mode: CommitMode) -> StorageResult<()>;
}
