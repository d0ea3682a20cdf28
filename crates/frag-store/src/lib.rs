//! frag-store: SurrealDB Backend for submission ingestion
//!
//! This crate provides the persistence layer of the frag poller. It handles
//! all I/O with SurrealDB behind the backend-agnostic traits in
//! [`storage_traits`].
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: content deduplication, unique submission stamps, and atomic
//! per-submission units of work.
//!
//! ## Key Components
//!
//! - `SurrealHandle`: Manages the connection and schema bootstrap
//! - `SurrealSubmissionStore`: `SubmissionStore` over SurrealDB
//! - `fakes::MemoryStore`: in-memory `SubmissionStore` for tests

mod error;
pub mod fakes;
mod handle;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::{ConnectionConfig, SurrealHandle};
pub use storage_traits::{
    AssignmentId, CommitMode, ContentDigest, EvaluationRequest, EvaluationSuite, Person, PersonId,
    Role, StorageResult, SubmissionFile, SubmissionId, SubmissionRecord, SubmissionStore, SuiteId,
    UnitOfWork,
};
pub use surreal_store::SurrealSubmissionStore;

/// Result type for frag-store connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
