//! SurrealDB-backed SubmissionStore implementation
//!
//! Uses the rows in `schema` for persistence, converting to/from
//! `storage_traits` types at the boundary. A unit of work stages its writes
//! and sends them as a single `BEGIN TRANSACTION ... COMMIT TRANSACTION`
//! query. Content is keyed by its digest and written with `INSERT IGNORE`,
//! so pollers storing the same bytes never conflict; the unique index on
//! `submission.stamp_key` arbitrates stamped submissions and surfaces as
//! [`StorageError::StampTaken`].

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::handle::SurrealHandle;
use crate::schema::{
    AssignmentFileRow, AssignmentRow, ContentRow, CurrentSuiteRow, EnrollmentRow, EvalReqRow,
    NotificationRow, PersonRow, SubmissionFileRow, SubmissionRow, TeacherRow,
};
use crate::storage_traits::*;

fn backend(e: surrealdb::Error) -> StorageError {
    StorageError::Unavailable(e.to_string())
}

/// SurrealDB-backed implementation of [`SubmissionStore`].
#[derive(Clone)]
pub struct SurrealSubmissionStore {
    db: Surreal<Any>,
}

impl SurrealSubmissionStore {
    pub fn new(handle: &SurrealHandle) -> Self {
        Self {
            db: handle.db().clone(),
        }
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        let handle = SurrealHandle::in_memory().await?;
        info!("SurrealSubmissionStore connected (in-memory)");
        Ok(Self::new(&handle))
    }

    // -- roster / catalog maintenance ----------------------------------------

    /// Add a person to the roster, on the teacher list or enrolled.
    pub async fn register_person(
        &self,
        uid: PersonId,
        login: &str,
        name: &str,
        role: Role,
    ) -> StorageResult<()> {
        let row = PersonRow {
            uid: uid.0,
            login: login.to_string(),
            name: name.to_string(),
        };
        let sql = match role {
            Role::Teacher => {
                "CREATE person CONTENT $row; CREATE teacher_list CONTENT { teacher: $uid };"
            }
            Role::Student => {
                "CREATE person CONTENT $row; CREATE enrollment CONTENT { student: $uid };"
            }
        };
        self.db
            .query(sql)
            .bind(("row", row))
            .bind(("uid", uid.0))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }

    /// Add an assignment with its expected file names to the catalog.
    pub async fn register_assignment(
        &self,
        id: AssignmentId,
        name: &str,
        file_names: &[&str],
    ) -> StorageResult<()> {
        let row = AssignmentRow {
            assignment_id: id.0,
            name: name.to_string(),
        };
        let files: Vec<AssignmentFileRow> = file_names
            .iter()
            .map(|f| AssignmentFileRow {
                assignment_id: id.0,
                name: f.to_string(),
            })
            .collect();
        let sql = if files.is_empty() {
            "CREATE assignment CONTENT $row;"
        } else {
            "CREATE assignment CONTENT $row; INSERT INTO assignment_in $files;"
        };
        self.db
            .query(sql)
            .bind(("row", row))
            .bind(("files", files))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }

    /// Replace the current evaluation suite of an assignment.
    pub async fn set_current_suite(&self, suite: EvaluationSuite) -> StorageResult<()> {
        let row = CurrentSuiteRow {
            suite_id: suite.id.0,
            assignment_id: suite.assignment.0,
            active: suite.active,
        };
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE current_suite WHERE assignment_id = $aid; \
                 CREATE current_suite CONTENT $row; \
                 COMMIT TRANSACTION;",
            )
            .bind(("aid", suite.assignment.0))
            .bind(("row", row))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }

    /// All evaluation requests, oldest first.
    pub async fn eval_requests(&self) -> StorageResult<Vec<EvaluationRequest>> {
        let mut res = self
            .db
            .query("SELECT * FROM eval_req ORDER BY created_at ASC")
            .await
            .map_err(backend)?;
        let rows: Vec<EvalReqRow> = res.take(0).map_err(backend)?;
        Ok(rows
            .into_iter()
            .map(|row| EvaluationRequest {
                submission: SubmissionId(row.submission_id),
                suite: SuiteId(row.suite_id),
            })
            .collect())
    }

    /// Number of notifications published on a channel.
    pub async fn notification_count(&self, channel: &str) -> StorageResult<usize> {
        let mut res = self
            .db
            .query("SELECT * FROM notification WHERE channel = $channel")
            .bind(("channel", channel.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<NotificationRow> = res.take(0).map_err(backend)?;
        Ok(rows.len())
    }

    // -- private helpers -----------------------------------------------------

    async fn roster(&self, list: &'static str, role: Role) -> StorageResult<Vec<Person>> {
        let mut res = self
            .db
            .query(format!("SELECT * FROM {list}; SELECT * FROM person ORDER BY uid ASC;"))
            .await
            .map_err(backend)?;
        let members: HashSet<i64> = match role {
            Role::Teacher => {
                let rows: Vec<TeacherRow> = res.take(0).map_err(backend)?;
                rows.into_iter().map(|r| r.teacher).collect()
            }
            Role::Student => {
                let rows: Vec<EnrollmentRow> = res.take(0).map_err(backend)?;
                rows.into_iter().map(|r| r.student).collect()
            }
        };
        let people: Vec<PersonRow> = res.take(1).map_err(backend)?;
        Ok(people
            .into_iter()
            .filter(|p| members.contains(&p.uid))
            .map(|p| Person {
                uid: PersonId(p.uid),
                login: p.login,
                name: p.name,
                role,
            })
            .collect())
    }

    fn db_submission_to_record(
        row: SubmissionRow,
        files: Vec<SubmissionFileRow>,
    ) -> StorageResult<SubmissionRecord> {
        let files = files
            .into_iter()
            .map(|f| {
                Ok(SubmissionFile {
                    name: f.name,
                    digest: ContentDigest::try_from(f.content_sha)?,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;
        Ok(SubmissionRecord {
            id: SubmissionId(row.submission_id),
            author: PersonId(row.author),
            assignment: AssignmentId(row.assignment_id),
            stamp: row.stamp,
            files,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DigestOnly {
    #[allow(dead_code)]
    digest: String,
}

#[derive(Debug, Deserialize)]
struct SubmissionIdOnly {
    #[allow(dead_code)]
    submission_id: String,
}

#[async_trait]
impl SubmissionStore for SurrealSubmissionStore {
    async fn begin(&self) -> StorageResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(SurrealUnitOfWork {
            db: self.db.clone(),
            staged: Vec::new(),
            staged_digests: HashSet::new(),
            staged_keys: HashSet::new(),
            next_seq: 0,
        }))
    }

    async fn assignment_id(&self, name: &str) -> StorageResult<Option<AssignmentId>> {
        let mut res = self
            .db
            .query("SELECT * FROM assignment WHERE name = $name")
            .bind(("name", name.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<AssignmentRow> = res.take(0).map_err(backend)?;
        Ok(rows
            .into_iter()
            .next()
            .map(|row| AssignmentId(row.assignment_id)))
    }

    async fn assignment_files(&self, assignment: AssignmentId) -> StorageResult<Vec<String>> {
        let mut res = self
            .db
            .query("SELECT * FROM assignment_in WHERE assignment_id = $aid")
            .bind(("aid", assignment.0))
            .await
            .map_err(backend)?;
        let rows: Vec<AssignmentFileRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().map(|row| row.name).collect())
    }

    async fn teachers(&self) -> StorageResult<Vec<Person>> {
        self.roster("teacher_list", Role::Teacher).await
    }

    async fn students(&self) -> StorageResult<Vec<Person>> {
        self.roster("enrollment", Role::Student).await
    }

    async fn get_content(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        let mut res = self
            .db
            .query("SELECT * FROM content WHERE digest = $digest")
            .bind(("digest", digest.as_str().to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<ContentRow> = res.take(0).map_err(backend)?;
        let row = rows.into_iter().next().ok_or_else(|| StorageError::NotFound {
            what: "content",
            key: digest.to_string(),
        })?;
        hex::decode(&row.data).map_err(|e| {
            StorageError::Unavailable(format!("corrupt content {}: {e}", digest.short()))
        })
    }

    async fn submission(&self, id: &SubmissionId) -> StorageResult<SubmissionRecord> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM submission WHERE submission_id = $sid; \
                 SELECT * FROM submission_in WHERE submission_id = $sid ORDER BY seq ASC;",
            )
            .bind(("sid", id.0.clone()))
            .await
            .map_err(backend)?;
        let rows: Vec<SubmissionRow> = res.take(0).map_err(backend)?;
        let files: Vec<SubmissionFileRow> = res.take(1).map_err(backend)?;
        let row = rows.into_iter().next().ok_or_else(|| StorageError::NotFound {
            what: "submission",
            key: id.to_string(),
        })?;
        Self::db_submission_to_record(row, files)
    }

    async fn submissions(&self, assignment: AssignmentId) -> StorageResult<Vec<SubmissionRecord>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM submission WHERE assignment_id = $aid; \
                 SELECT * FROM submission_in WHERE assignment_id = $aid ORDER BY seq ASC;",
            )
            .bind(("aid", assignment.0))
            .await
            .map_err(backend)?;
        let rows: Vec<SubmissionRow> = res.take(0).map_err(backend)?;
        let file_rows: Vec<SubmissionFileRow> = res.take(1).map_err(backend)?;

        let mut files: HashMap<String, Vec<SubmissionFileRow>> = HashMap::new();
        for f in file_rows {
            files.entry(f.submission_id.clone()).or_default().push(f);
        }

        let mut records = rows
            .into_iter()
            .map(|row| {
                let own = files.remove(&row.submission_id).unwrap_or_default();
                Self::db_submission_to_record(row, own)
            })
            .collect::<StorageResult<Vec<_>>>()?;
        records.sort_by_key(|r| (r.stamp.is_none(), r.stamp, r.created_at));
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// SurrealUnitOfWork
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Staged {
    Content(ContentRow),
    Submission(SubmissionRow),
    File(SubmissionFileRow),
    EvalReq(EvalReqRow),
    Notification(NotificationRow),
}

impl Staged {
    fn statement(&self, param: &str) -> String {
        let table = match self {
            Staged::Content(_) => {
                return format!(
                    "INSERT IGNORE INTO content {{ id: type::thing('content', ${param}.digest), \
                     digest: ${param}.digest, data: ${param}.data }};"
                );
            }
            Staged::Submission(_) => "submission",
            Staged::File(_) => "submission_in",
            Staged::EvalReq(_) => "eval_req",
            Staged::Notification(_) => "notification",
        };
        format!("CREATE {table} CONTENT ${param};")
    }
}

/// Unit of work over a [`SurrealSubmissionStore`].
pub struct SurrealUnitOfWork {
    db: Surreal<Any>,
    staged: Vec<Staged>,
    staged_digests: HashSet<String>,
    staged_keys: HashSet<String>,
    next_seq: i64,
}

#[async_trait]
impl UnitOfWork for SurrealUnitOfWork {
    async fn put_content(&mut self, digest: &ContentDigest, data: &[u8]) -> StorageResult<()> {
        if self.staged_digests.contains(digest.as_str()) {
            return Ok(());
        }
        let mut res = self
            .db
            .query("SELECT digest FROM content WHERE digest = $digest")
            .bind(("digest", digest.as_str().to_string()))
            .await
            .map_err(backend)?;
        let existing: Vec<DigestOnly> = res.take(0).map_err(backend)?;
        if existing.is_empty() {
            self.staged_digests.insert(digest.as_str().to_string());
            self.staged
                .push(Staged::Content(ContentRow::new(digest.as_str(), data)));
        }
        Ok(())
    }

    async fn insert_submission(
        &mut self,
        author: PersonId,
        assignment: AssignmentId,
        stamp: Option<DateTime<Utc>>,
    ) -> StorageResult<Option<SubmissionId>> {
        let id = SubmissionId::new();
        let row = SubmissionRow::new(&id, author, assignment, stamp);

        if stamp.is_some() {
            if self.staged_keys.contains(&row.stamp_key) {
                return Ok(None);
            }
            let mut res = self
                .db
                .query("SELECT submission_id FROM submission WHERE stamp_key = $key")
                .bind(("key", row.stamp_key.clone()))
                .await
                .map_err(backend)?;
            let existing: Vec<SubmissionIdOnly> = res.take(0).map_err(backend)?;
            if !existing.is_empty() {
                return Ok(None);
            }
        }

        self.staged_keys.insert(row.stamp_key.clone());
        self.staged.push(Staged::Submission(row));
        Ok(Some(id))
    }

    async fn insert_submission_file(
        &mut self,
        submission: &SubmissionId,
        assignment: AssignmentId,
        name: &str,
        digest: &ContentDigest,
    ) -> StorageResult<()> {
        self.next_seq += 1;
        self.staged.push(Staged::File(SubmissionFileRow {
            submission_id: submission.0.clone(),
            assignment_id: assignment.0,
            seq: self.next_seq,
            name: name.to_string(),
            content_sha: digest.as_str().to_string(),
        }));
        Ok(())
    }

    async fn is_teacher(&mut self, person: PersonId) -> StorageResult<bool> {
        let mut res = self
            .db
            .query("SELECT * FROM teacher_list WHERE teacher = $uid")
            .bind(("uid", person.0))
            .await
            .map_err(backend)?;
        let rows: Vec<TeacherRow> = res.take(0).map_err(backend)?;
        Ok(!rows.is_empty())
    }

    async fn current_suite(
        &mut self,
        assignment: AssignmentId,
    ) -> StorageResult<Option<EvaluationSuite>> {
        let mut res = self
            .db
            .query("SELECT * FROM current_suite WHERE assignment_id = $aid")
            .bind(("aid", assignment.0))
            .await
            .map_err(backend)?;
        let rows: Vec<CurrentSuiteRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next().map(|row| EvaluationSuite {
            id: SuiteId(row.suite_id),
            assignment: AssignmentId(row.assignment_id),
            active: row.active,
        }))
    }

    async fn insert_eval_request(&mut self, request: EvaluationRequest) -> StorageResult<()> {
        self.staged.push(Staged::EvalReq(EvalReqRow {
            submission_id: request.submission.0,
            suite_id: request.suite.0,
            created_at: Utc::now(),
        }));
        Ok(())
    }

    async fn notify(&mut self, channel: &str) -> StorageResult<()> {
        self.staged.push(Staged::Notification(NotificationRow {
            channel: channel.to_string(),
            created_at: Utc::now(),
        }));
        Ok(())
    }

    async fn finish(self: Box<Self>, mode: CommitMode) -> StorageResult<()> {
        let SurrealUnitOfWork { db, staged, .. } = *self;
        if mode == CommitMode::Simulate {
            debug!(statements = staged.len(), "commit skipped");
            return Ok(());
        }
        if staged.is_empty() {
            return Ok(());
        }

        let mut sql = String::from("BEGIN TRANSACTION;\n");
        for (i, stmt) in staged.iter().enumerate() {
            sql.push_str(&stmt.statement(&format!("p{i}")));
            sql.push('\n');
        }
        sql.push_str("COMMIT TRANSACTION;");

        let mut query = db.query(sql);
        for (i, stmt) in staged.into_iter().enumerate() {
            let key = format!("p{i}");
            query = match stmt {
                Staged::Content(row) => query.bind((key, row)),
                Staged::Submission(row) => query.bind((key, row)),
                Staged::File(row) => query.bind((key, row)),
                Staged::EvalReq(row) => query.bind((key, row)),
                Staged::Notification(row) => query.bind((key, row)),
            };
        }

        query.await.map_err(backend)?.check().map_err(|e| {
            let msg = e.to_string();
            if msg.contains("idx_stamp_key") {
                StorageError::StampTaken(msg)
            } else if msg.contains("already contains") {
                StorageError::Conflict(msg)
            } else {
                StorageError::Unavailable(msg)
            }
        })?;
        debug!("commit");
        Ok(())
    }
}
