//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryStore`, which satisfies the `SubmissionStore` and
//! `UnitOfWork` contracts without any external dependencies, plus seeding
//! and inspection helpers for the roster, catalog and evaluation tables.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Clone)]
struct SubmissionRow {
    id: SubmissionId,
    author: PersonId,
    assignment: AssignmentId,
    stamp: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl SubmissionRow {
    fn same_key(&self, author: PersonId, assignment: AssignmentId, stamp: DateTime<Utc>) -> bool {
        self.author == author && self.assignment == assignment && self.stamp == Some(stamp)
    }
}

#[derive(Debug, Clone)]
struct FileRow {
    submission: SubmissionId,
    name: String,
    digest: ContentDigest,
}

#[derive(Debug, Default)]
struct Tables {
    content: HashMap<ContentDigest, Vec<u8>>,
    submissions: Vec<SubmissionRow>,
    files: Vec<FileRow>,
    people: BTreeMap<PersonId, (String, String)>,
    teachers: BTreeSet<PersonId>,
    enrolled: BTreeSet<PersonId>,
    assignments: BTreeMap<AssignmentId, (String, Vec<String>)>,
    suites: HashMap<AssignmentId, EvaluationSuite>,
    eval_requests: Vec<EvaluationRequest>,
    notifications: Vec<String>,
    next_id: i64,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn person(&self, uid: PersonId, role: Role) -> Option<Person> {
        self.people.get(&uid).map(|(login, name)| Person {
            uid,
            login: login.clone(),
            name: name.clone(),
            role,
        })
    }

    fn record(&self, row: &SubmissionRow) -> SubmissionRecord {
        SubmissionRecord {
            id: row.id.clone(),
            author: row.author,
            assignment: row.assignment,
            stamp: row.stamp,
            files: self
                .files
                .iter()
                .filter(|f| f.submission == row.id)
                .map(|f| SubmissionFile {
                    name: f.name.clone(),
                    digest: f.digest.clone(),
                })
                .collect(),
            created_at: row.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory submission store.
///
/// Clones share the same tables, so a test can keep a handle for inspection
/// while the code under test owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap()
    }

    fn check_available(&self) -> StorageResult<()> {
        check_available(&self.unavailable)
    }

    /// Make every subsequent operation fail with `StorageError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Add a person to the roster with the given role.
    pub fn register_person(&self, login: &str, name: &str, role: Role) -> PersonId {
        let mut tables = self.lock();
        let uid = PersonId(tables.allocate_id());
        tables
            .people
            .insert(uid, (login.to_string(), name.to_string()));
        match role {
            Role::Teacher => tables.teachers.insert(uid),
            Role::Student => tables.enrolled.insert(uid),
        };
        uid
    }

    /// Add an assignment with its expected file names to the catalog.
    pub fn register_assignment(&self, name: &str, file_names: &[&str]) -> AssignmentId {
        let mut tables = self.lock();
        let id = AssignmentId(tables.allocate_id());
        tables.assignments.insert(
            id,
            (
                name.to_string(),
                file_names.iter().map(|f| f.to_string()).collect(),
            ),
        );
        id
    }

    /// Replace the current evaluation suite of an assignment.
    pub fn set_current_suite(&self, assignment: AssignmentId, active: bool) -> SuiteId {
        let mut tables = self.lock();
        let id = SuiteId(tables.allocate_id());
        tables.suites.insert(
            assignment,
            EvaluationSuite {
                id,
                assignment,
                active,
            },
        );
        id
    }

    /// Number of stored content rows.
    pub fn content_count(&self) -> usize {
        self.lock().content.len()
    }

    /// Number of committed submission rows.
    pub fn submission_count(&self) -> usize {
        self.lock().submissions.len()
    }

    /// Committed evaluation requests, in commit order.
    pub fn eval_requests(&self) -> Vec<EvaluationRequest> {
        self.lock().eval_requests.clone()
    }

    /// Channels of published notifications, in commit order.
    pub fn notifications(&self) -> Vec<String> {
        self.lock().notifications.clone()
    }
}

fn check_available(flag: &AtomicBool) -> StorageResult<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(StorageError::Unavailable(
            "memory store switched off".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn begin(&self) -> StorageResult<Box<dyn UnitOfWork>> {
        self.check_available()?;
        Ok(Box::new(MemoryUnitOfWork {
            store: self.clone(),
            staged: Staged::default(),
        }))
    }

    async fn assignment_id(&self, name: &str) -> StorageResult<Option<AssignmentId>> {
        self.check_available()?;
        let tables = self.lock();
        Ok(tables
            .assignments
            .iter()
            .find(|(_, (n, _))| n == name)
            .map(|(id, _)| *id))
    }

    async fn assignment_files(&self, assignment: AssignmentId) -> StorageResult<Vec<String>> {
        self.check_available()?;
        let tables = self.lock();
        Ok(tables
            .assignments
            .get(&assignment)
            .map(|(_, files)| files.clone())
            .unwrap_or_default())
    }

    async fn teachers(&self) -> StorageResult<Vec<Person>> {
        self.check_available()?;
        let tables = self.lock();
        Ok(tables
            .teachers
            .iter()
            .filter_map(|uid| tables.person(*uid, Role::Teacher))
            .collect())
    }

    async fn students(&self) -> StorageResult<Vec<Person>> {
        self.check_available()?;
        let tables = self.lock();
        Ok(tables
            .enrolled
            .iter()
            .filter_map(|uid| tables.person(*uid, Role::Student))
            .collect())
    }

    async fn get_content(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        self.check_available()?;
        let tables = self.lock();
        tables
            .content
            .get(digest)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                what: "content",
                key: digest.to_string(),
            })
    }

    async fn submission(&self, id: &SubmissionId) -> StorageResult<SubmissionRecord> {
        self.check_available()?;
        let tables = self.lock();
        tables
            .submissions
            .iter()
            .find(|row| row.id == *id)
            .map(|row| tables.record(row))
            .ok_or_else(|| StorageError::NotFound {
                what: "submission",
                key: id.to_string(),
            })
    }

    async fn submissions(&self, assignment: AssignmentId) -> StorageResult<Vec<SubmissionRecord>> {
        self.check_available()?;
        let tables = self.lock();
        let mut records: Vec<SubmissionRecord> = tables
            .submissions
            .iter()
            .filter(|row| row.assignment == assignment)
            .map(|row| tables.record(row))
            .collect();
        records.sort_by_key(|r| (r.stamp.is_none(), r.stamp, r.created_at));
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// MemoryUnitOfWork
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Staged {
    content: Vec<(ContentDigest, Vec<u8>)>,
    submissions: Vec<SubmissionRow>,
    files: Vec<FileRow>,
    eval_requests: Vec<EvaluationRequest>,
    notifications: Vec<String>,
}

/// Unit of work over a [`MemoryStore`].
///
/// Staged rows are validated again at commit so that two units of work
/// racing for the same stamp behave like a unique index violation.
#[derive(Debug)]
pub struct MemoryUnitOfWork {
    store: MemoryStore,
    staged: Staged,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn put_content(&mut self, digest: &ContentDigest, data: &[u8]) -> StorageResult<()> {
        self.store.check_available()?;
        let stored = self.store.lock().content.contains_key(digest);
        let staged = self.staged.content.iter().any(|(d, _)| d == digest);
        if !stored && !staged {
            self.staged.content.push((digest.clone(), data.to_vec()));
        }
        Ok(())
    }

    async fn insert_submission(
        &mut self,
        author: PersonId,
        assignment: AssignmentId,
        stamp: Option<DateTime<Utc>>,
    ) -> StorageResult<Option<SubmissionId>> {
        self.store.check_available()?;
        if let Some(stamp) = stamp {
            let tables = self.store.lock();
            let taken = tables
                .submissions
                .iter()
                .chain(self.staged.submissions.iter())
                .any(|row| row.same_key(author, assignment, stamp));
            if taken {
                return Ok(None);
            }
        }

        let id = SubmissionId::new();
        self.staged.submissions.push(SubmissionRow {
            id: id.clone(),
            author,
            assignment,
            stamp,
            created_at: Utc::now(),
        });
        Ok(Some(id))
    }

    async fn insert_submission_file(
        &mut self,
        submission: &SubmissionId,
        _assignment: AssignmentId,
        name: &str,
        digest: &ContentDigest,
    ) -> StorageResult<()> {
        self.store.check_available()?;
        self.staged.files.push(FileRow {
            submission: submission.clone(),
            name: name.to_string(),
            digest: digest.clone(),
        });
        Ok(())
    }

    async fn is_teacher(&mut self, person: PersonId) -> StorageResult<bool> {
        self.store.check_available()?;
        Ok(self.store.lock().teachers.contains(&person))
    }

    async fn current_suite(
        &mut self,
        assignment: AssignmentId,
    ) -> StorageResult<Option<EvaluationSuite>> {
        self.store.check_available()?;
        Ok(self.store.lock().suites.get(&assignment).copied())
    }

    async fn insert_eval_request(&mut self, request: EvaluationRequest) -> StorageResult<()> {
        self.store.check_available()?;
        self.staged.eval_requests.push(request);
        Ok(())
    }

    async fn notify(&mut self, channel: &str) -> StorageResult<()> {
        self.store.check_available()?;
        self.staged.notifications.push(channel.to_string());
        Ok(())
    }

    async fn finish(self: Box<Self>, mode: CommitMode) -> StorageResult<()> {
        let MemoryUnitOfWork { store, staged } = *self;
        if mode == CommitMode::Simulate {
            debug!(
                submissions = staged.submissions.len(),
                files = staged.files.len(),
                "commit skipped"
            );
            return Ok(());
        }
        store.check_available()?;

        let mut tables = store.lock();
        for row in &staged.submissions {
            if let Some(stamp) = row.stamp {
                if tables
                    .submissions
                    .iter()
                    .any(|existing| existing.same_key(row.author, row.assignment, stamp))
                {
                    return Err(StorageError::StampTaken(format!(
                        "submission ({}, {}, {}) already exists",
                        row.author, row.assignment, stamp
                    )));
                }
            }
        }

        for (digest, data) in staged.content {
            tables.content.entry(digest).or_insert(data);
        }
        tables.submissions.extend(staged.submissions);
        tables.files.extend(staged.files);
        tables.eval_requests.extend(staged.eval_requests);
        tables.notifications.extend(staged.notifications);
        debug!("commit");
        Ok(())
    }
}
