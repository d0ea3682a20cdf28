//! SubmissionRegistry behaviour against the in-memory store.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use frag_core::{
    CommitMode, DispatchOutcome, EvalMode, File, FragError, NewSubmission, SubmissionRegistry,
    SubmissionStore, MAX_STAMP_ATTEMPTS,
};
use frag_store::fakes::MemoryStore;
use frag_store::{
    AssignmentId, ContentDigest, EvaluationRequest, EvaluationSuite, Person, PersonId, Role,
    StorageError, StorageResult, SubmissionId, SubmissionRecord, UnitOfWork,
};
use tracing_test::traced_test;

struct Fixture {
    store: MemoryStore,
    registry: SubmissionRegistry,
    assignment: AssignmentId,
    student: PersonId,
    teacher: PersonId,
}

fn fixture() -> Fixture {
    let store = MemoryStore::new();
    let assignment = store.register_assignment("hw01", &["main.c"]);
    let student = store.register_person("xstudent", "Some Student", Role::Student);
    let teacher = store.register_person("xteacher", "Some Teacher", Role::Teacher);
    let registry = SubmissionRegistry::new(Arc::new(store.clone()));
    Fixture {
        store,
        registry,
        assignment,
        student,
        teacher,
    }
}

fn stamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 14, 15, 9, 26).unwrap() + Duration::microseconds(535_897)
}

fn files() -> Vec<File> {
    vec![File::new("main.c", "int main() { return 0; }")]
}

#[tokio::test]
async fn unstamped_submissions_get_fresh_ids() {
    let fx = fixture();
    let a = fx
        .registry
        .create(NewSubmission::new(fx.assignment, fx.student, files()))
        .await
        .unwrap();
    let b = fx
        .registry
        .create(NewSubmission::new(fx.assignment, fx.student, files()))
        .await
        .unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(fx.store.submission_count(), 2);
    assert_eq!(fx.store.content_count(), 1);
}

#[tokio::test]
async fn files_are_recorded_in_order_with_duplicates() {
    let fx = fixture();
    let sub = NewSubmission::new(
        fx.assignment,
        fx.student,
        vec![
            File::new("b.c", "second"),
            File::new("a.c", "first"),
            File::new("b.c", "second"),
        ],
    );
    let created = fx.registry.create(sub).await.unwrap();

    let record = fx.store.submission(&created.id).await.unwrap();
    let names: Vec<_> = record.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["b.c", "a.c", "b.c"]);
    assert_eq!(record.files[0].digest, record.files[2].digest);
    assert_eq!(fx.store.content_count(), 2);
}

#[tokio::test]
async fn stamp_is_normalized_to_utc() {
    let fx = fixture();
    let local = chrono::FixedOffset::west_opt(5 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 3, 14, 10, 9, 26)
        .unwrap();
    let created = fx
        .registry
        .create(NewSubmission::new(fx.assignment, fx.student, files()).with_stamp(local))
        .await
        .unwrap();

    assert_eq!(
        created.stamp,
        Some(Utc.with_ymd_and_hms(2024, 3, 14, 15, 9, 26).unwrap())
    );
}

#[traced_test]
#[tokio::test]
async fn duplicate_stamp_is_perturbed_by_one_microsecond() {
    let fx = fixture();
    let first = fx
        .registry
        .create(NewSubmission::new(fx.assignment, fx.student, files()).with_stamp(stamp()))
        .await
        .unwrap();
    let second = fx
        .registry
        .create(NewSubmission::new(fx.assignment, fx.student, files()).with_stamp(stamp()))
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(first.stamp, Some(stamp()));
    assert_eq!(second.stamp, Some(stamp() + Duration::microseconds(1)));
    assert_eq!(fx.store.submission_count(), 2);

    assert!(logs_contain("2024-03-14 15:09:26.535897"));
    assert!(logs_contain("2024-03-14 15:09:26.535898"));
    logs_assert(|lines: &[&str]| {
        let retries = lines
            .iter()
            .filter(|l| l.contains("submission.stamp_retry"))
            .count();
        if retries == 1 {
            Ok(())
        } else {
            Err(format!("expected one collision warning, saw {retries}"))
        }
    });
}

#[tokio::test]
async fn same_stamp_different_authors_do_not_collide() {
    let fx = fixture();
    let a = fx
        .registry
        .create(NewSubmission::new(fx.assignment, fx.student, files()).with_stamp(stamp()))
        .await
        .unwrap();
    let b = fx
        .registry
        .create(NewSubmission::new(fx.assignment, fx.teacher, files()).with_stamp(stamp()))
        .await
        .unwrap();

    assert_eq!(a.stamp, b.stamp);
}

#[traced_test]
#[tokio::test]
async fn collision_exhaustion_commits_nothing() {
    let fx = fixture();
    for n in 0..MAX_STAMP_ATTEMPTS {
        let created = fx
            .registry
            .create(NewSubmission::new(fx.assignment, fx.student, files()).with_stamp(stamp()))
            .await
            .unwrap();
        assert_eq!(
            created.stamp,
            Some(stamp() + Duration::microseconds(i64::from(n)))
        );
    }
    let before = fx.store.submission_count();

    let err = fx
        .registry
        .create(
            NewSubmission::new(fx.assignment, fx.student, vec![File::new("x.c", "fresh")])
                .with_stamp(stamp()),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FragError::StampCollision { attempts, .. } if attempts == MAX_STAMP_ATTEMPTS
    ));
    assert_eq!(fx.store.submission_count(), before);
    assert_eq!(fx.store.content_count(), 1);
    assert!(logs_contain("submission.stamp_exhausted"));
}

#[tokio::test]
async fn concurrent_distinct_stamps_get_distinct_ids() {
    let fx = fixture();
    let registry = Arc::new(fx.registry);

    let mut handles = Vec::new();
    for i in 0..8 {
        let registry = Arc::clone(&registry);
        let sub = NewSubmission::new(fx.assignment, fx.student, files())
            .with_stamp(stamp() + Duration::seconds(i));
        handles.push(tokio::spawn(async move { registry.create(sub).await }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        let created = handle.await.unwrap().unwrap();
        assert_eq!(created.stamp.unwrap().timestamp_subsec_micros(), 535_897);
        ids.insert(created.id);
    }
    assert_eq!(ids.len(), 8);
    assert_eq!(fx.store.submission_count(), 8);
}

#[tokio::test]
async fn student_submission_does_not_request_evaluation() {
    let fx = fixture();
    fx.store.set_current_suite(fx.assignment, false);

    let created = fx
        .registry
        .create(NewSubmission::new(fx.assignment, fx.student, files()))
        .await
        .unwrap();

    assert_eq!(created.dispatch, DispatchOutcome::Skipped);
    assert!(fx.store.eval_requests().is_empty());
    assert!(fx.store.notifications().is_empty());
}

#[tokio::test]
async fn teacher_submission_requests_pending_suite() {
    let fx = fixture();
    let suite = fx.store.set_current_suite(fx.assignment, false);

    let created = fx
        .registry
        .create(NewSubmission::new(fx.assignment, fx.teacher, files()))
        .await
        .unwrap();

    assert_eq!(created.dispatch, DispatchOutcome::Requested(suite));
    let requests = fx.store.eval_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].submission, created.id);
    assert_eq!(requests[0].suite, suite);
    assert_eq!(fx.store.notifications(), vec!["eval_req".to_string()]);
}

#[tokio::test]
async fn teacher_submission_skips_active_suite() {
    let fx = fixture();
    let suite = fx.store.set_current_suite(fx.assignment, true);

    let created = fx
        .registry
        .create(NewSubmission::new(fx.assignment, fx.teacher, files()))
        .await
        .unwrap();

    assert_eq!(created.dispatch, DispatchOutcome::SuiteActive(suite));
    assert!(fx.store.eval_requests().is_empty());
    assert!(fx.store.notifications().is_empty());
}

#[tokio::test]
async fn explicit_modes_ignore_role() {
    let fx = fixture();
    let suite = fx.store.set_current_suite(fx.assignment, false);

    let always = fx
        .registry
        .create(NewSubmission::new(fx.assignment, fx.student, files()).with_eval(EvalMode::Always))
        .await
        .unwrap();
    let never = fx
        .registry
        .create(NewSubmission::new(fx.assignment, fx.teacher, files()).with_eval(EvalMode::Never))
        .await
        .unwrap();

    assert_eq!(always.dispatch, DispatchOutcome::Requested(suite));
    assert_eq!(never.dispatch, DispatchOutcome::Skipped);
    assert_eq!(fx.store.eval_requests().len(), 1);
}

#[tokio::test]
async fn no_suite_is_not_an_error() {
    let fx = fixture();
    let created = fx
        .registry
        .create(NewSubmission::new(fx.assignment, fx.teacher, files()))
        .await
        .unwrap();
    assert_eq!(created.dispatch, DispatchOutcome::NoSuite);
}

#[tokio::test]
async fn simulate_leaves_store_untouched() {
    let store = MemoryStore::new();
    let assignment = store.register_assignment("hw01", &[]);
    let teacher = store.register_person("xteacher", "T", Role::Teacher);
    store.set_current_suite(assignment, false);
    let registry =
        SubmissionRegistry::new(Arc::new(store.clone())).with_commit_mode(CommitMode::Simulate);

    let created = registry
        .create(NewSubmission::new(assignment, teacher, files()).with_stamp(stamp()))
        .await
        .unwrap();

    assert!(matches!(created.dispatch, DispatchOutcome::Requested(_)));
    assert_eq!(store.submission_count(), 0);
    assert_eq!(store.content_count(), 0);
    assert!(store.eval_requests().is_empty());
    assert!(store.notifications().is_empty());
}

#[tokio::test]
async fn unavailable_store_propagates() {
    let fx = fixture();
    fx.store.set_unavailable(true);

    let err = fx
        .registry
        .create(NewSubmission::new(fx.assignment, fx.student, files()))
        .await
        .unwrap_err();

    assert!(matches!(err, FragError::Storage(StorageError::Unavailable(_))));
    assert!(err.aborts_cycle());
}

#[tokio::test]
async fn surreal_backend_perturbs_duplicate_stamp() {
    let store = frag_store::SurrealSubmissionStore::in_memory().await.unwrap();
    let assignment = AssignmentId(1);
    let teacher = PersonId(2);
    store
        .register_assignment(assignment, "hw01", &["main.c"])
        .await
        .unwrap();
    store
        .register_person(teacher, "xteacher", "T", Role::Teacher)
        .await
        .unwrap();
    store
        .set_current_suite(frag_store::EvaluationSuite {
            id: frag_core::SuiteId(3),
            assignment,
            active: false,
        })
        .await
        .unwrap();
    let registry = SubmissionRegistry::new(Arc::new(store.clone()));

    let first = registry
        .create(NewSubmission::new(assignment, teacher, files()).with_stamp(stamp()))
        .await
        .unwrap();
    let second = registry
        .create(NewSubmission::new(assignment, teacher, files()).with_stamp(stamp()))
        .await
        .unwrap();

    assert_eq!(second.stamp, Some(stamp() + Duration::microseconds(1)));
    let records = store.submissions(assignment).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, first.id);
    assert_eq!(records[1].files[0].digest, records[0].files[0].digest);
    assert_eq!(store.eval_requests().await.unwrap().len(), 2);
    assert_eq!(store.notification_count("eval_req").await.unwrap(), 2);
}

/// Store whose next unit of work loses its stamp to another writer that
/// commits just before it.
struct RivalStore {
    inner: MemoryStore,
    rival: Mutex<Option<(AssignmentId, PersonId, DateTime<Utc>)>>,
}

struct RivalUnitOfWork {
    store: MemoryStore,
    inner: Box<dyn UnitOfWork>,
    rival: Option<(AssignmentId, PersonId, DateTime<Utc>)>,
}

#[async_trait]
impl SubmissionStore for RivalStore {
    async fn begin(&self) -> StorageResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(RivalUnitOfWork {
            store: self.inner.clone(),
            inner: self.inner.begin().await?,
            rival: self.rival.lock().unwrap().take(),
        }))
    }

    async fn assignment_id(&self, name: &str) -> StorageResult<Option<AssignmentId>> {
        self.inner.assignment_id(name).await
    }

    async fn assignment_files(&self, assignment: AssignmentId) -> StorageResult<Vec<String>> {
        self.inner.assignment_files(assignment).await
    }

    async fn teachers(&self) -> StorageResult<Vec<Person>> {
        self.inner.teachers().await
    }

    async fn students(&self) -> StorageResult<Vec<Person>> {
        self.inner.students().await
    }

    async fn get_content(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        self.inner.get_content(digest).await
    }

    async fn submission(&self, id: &SubmissionId) -> StorageResult<SubmissionRecord> {
        self.inner.submission(id).await
    }

    async fn submissions(&self, assignment: AssignmentId) -> StorageResult<Vec<SubmissionRecord>> {
        self.inner.submissions(assignment).await
    }
}

#[async_trait]
impl UnitOfWork for RivalUnitOfWork {
    async fn put_content(&mut self, digest: &ContentDigest, data: &[u8]) -> StorageResult<()> {
        self.inner.put_content(digest, data).await
    }

    async fn insert_submission(
        &mut self,
        author: PersonId,
        assignment: AssignmentId,
        stamp: Option<DateTime<Utc>>,
    ) -> StorageResult<Option<SubmissionId>> {
        self.inner.insert_submission(author, assignment, stamp).await
    }

    async fn insert_submission_file(
        &mut self,
        submission: &SubmissionId,
        assignment: AssignmentId,
        name: &str,
        digest: &ContentDigest,
    ) -> StorageResult<()> {
        self.inner
            .insert_submission_file(submission, assignment, name, digest)
            .await
    }

    async fn is_teacher(&mut self, person: PersonId) -> StorageResult<bool> {
        self.inner.is_teacher(person).await
    }

    async fn current_suite(
        &mut self,
        assignment: AssignmentId,
    ) -> StorageResult<Option<EvaluationSuite>> {
        self.inner.current_suite(assignment).await
    }

    async fn insert_eval_request(&mut self, request: EvaluationRequest) -> StorageResult<()> {
        self.inner.insert_eval_request(request).await
    }

    async fn notify(&mut self, channel: &str) -> StorageResult<()> {
        self.inner.notify(channel).await
    }

    async fn finish(self: Box<Self>, mode: CommitMode) -> StorageResult<()> {
        let RivalUnitOfWork {
            store,
            inner,
            rival,
        } = *self;
        if let Some((assignment, author, stamp)) = rival {
            let mut other = store.begin().await?;
            other
                .insert_submission(author, assignment, Some(stamp))
                .await?;
            other.finish(CommitMode::Commit).await?;
        }
        inner.finish(mode).await
    }
}

#[traced_test]
#[tokio::test]
async fn stamp_taken_at_commit_is_retried_with_next_microsecond() {
    let fx = fixture();
    let store = Arc::new(RivalStore {
        inner: fx.store.clone(),
        rival: Mutex::new(Some((fx.assignment, fx.student, stamp()))),
    });
    let registry = SubmissionRegistry::new(store);

    let created = registry
        .create(NewSubmission::new(fx.assignment, fx.student, files()).with_stamp(stamp()))
        .await
        .unwrap();

    assert_eq!(created.stamp, Some(stamp() + Duration::microseconds(1)));
    assert_eq!(fx.store.submission_count(), 2);
    assert_eq!(fx.store.content_count(), 1);
    let record = fx.store.submission(&created.id).await.unwrap();
    assert_eq!(record.files.len(), 1);
    assert!(logs_contain("submission.stamp_retry"));
}
