//! Trait contract tests for SubmissionStore and UnitOfWork.
//!
//! These tests verify the behavioral contracts of the storage traits
//! using the in-memory fake. Any conforming implementation must pass these.

use chrono::{TimeZone, Utc};
use frag_store::fakes::MemoryStore;
use frag_store::storage_traits::*;
use frag_store::StorageError;

fn stamp() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 1, 8, 30, 0).unwrap()
}

// ===========================================================================
// Content contract tests
// ===========================================================================

#[tokio::test]
async fn content_put_twice_stores_one_row() {
    let store = MemoryStore::new();
    let data = b"identical bytes";
    let digest = ContentDigest::from_bytes(data);

    for _ in 0..2 {
        let mut uow = store.begin().await.unwrap();
        uow.put_content(&digest, data).await.unwrap();
        uow.finish(CommitMode::Commit).await.unwrap();
    }

    assert_eq!(store.content_count(), 1);
    assert_eq!(store.get_content(&digest).await.unwrap(), data);
}

#[tokio::test]
async fn content_put_twice_in_one_unit_of_work() {
    let store = MemoryStore::new();
    let digest = ContentDigest::from_bytes(b"twice");

    let mut uow = store.begin().await.unwrap();
    uow.put_content(&digest, b"twice").await.unwrap();
    uow.put_content(&digest, b"twice").await.unwrap();
    uow.finish(CommitMode::Commit).await.unwrap();

    assert_eq!(store.content_count(), 1);
}

#[tokio::test]
async fn content_get_not_found() {
    let store = MemoryStore::new();
    let bogus = ContentDigest::from_bytes(b"nonexistent data for bogus digest");
    let err = store.get_content(&bogus).await.unwrap_err();

    assert!(matches!(err, StorageError::NotFound { what: "content", .. }));
}

#[tokio::test]
async fn content_preserves_binary_data() {
    let store = MemoryStore::new();
    let data: Vec<u8> = (0u8..=255).collect();
    let digest = ContentDigest::from_bytes(&data);

    let mut uow = store.begin().await.unwrap();
    uow.put_content(&digest, &data).await.unwrap();
    uow.finish(CommitMode::Commit).await.unwrap();

    assert_eq!(store.get_content(&digest).await.unwrap(), data);
}

#[test]
fn digest_rejects_non_hex() {
    let err = ContentDigest::try_from("zz".repeat(32)).unwrap_err();
    assert!(matches!(err, StorageError::InvalidDigest { .. }));
}

#[test]
fn digest_normalizes_case() {
    let upper = ContentDigest::from_bytes(b"x").as_str().to_ascii_uppercase();
    let parsed = ContentDigest::try_from(upper).unwrap();
    assert_eq!(parsed, ContentDigest::from_bytes(b"x"));
}

// ===========================================================================
// Submission contract tests
// ===========================================================================

#[tokio::test]
async fn stamped_insert_reports_existing_key() {
    let store = MemoryStore::new();
    let author = store.register_person("xuser", "X User", Role::Student);
    let asgn = store.register_assignment("hw01", &["main.c"]);

    let mut uow = store.begin().await.unwrap();
    let first = uow.insert_submission(author, asgn, Some(stamp())).await.unwrap();
    uow.finish(CommitMode::Commit).await.unwrap();
    assert!(first.is_some());

    let mut uow = store.begin().await.unwrap();
    let second = uow.insert_submission(author, asgn, Some(stamp())).await.unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn stamped_insert_sees_own_staged_rows() {
    let store = MemoryStore::new();
    let author = store.register_person("xuser", "X User", Role::Student);
    let asgn = store.register_assignment("hw01", &[]);

    let mut uow = store.begin().await.unwrap();
    assert!(uow
        .insert_submission(author, asgn, Some(stamp()))
        .await
        .unwrap()
        .is_some());
    assert!(uow
        .insert_submission(author, asgn, Some(stamp()))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn unstamped_inserts_never_collide() {
    let store = MemoryStore::new();
    let author = store.register_person("xuser", "X User", Role::Student);
    let asgn = store.register_assignment("hw01", &[]);

    let mut uow = store.begin().await.unwrap();
    let a = uow.insert_submission(author, asgn, None).await.unwrap();
    let b = uow.insert_submission(author, asgn, None).await.unwrap();
    uow.finish(CommitMode::Commit).await.unwrap();

    assert_ne!(a.unwrap(), b.unwrap());
    assert_eq!(store.submission_count(), 2);
}

#[tokio::test]
async fn racing_units_of_work_report_stamp_taken() {
    let store = MemoryStore::new();
    let author = store.register_person("xuser", "X User", Role::Student);
    let asgn = store.register_assignment("hw01", &[]);

    let mut a = store.begin().await.unwrap();
    let mut b = store.begin().await.unwrap();
    assert!(a.insert_submission(author, asgn, Some(stamp())).await.unwrap().is_some());
    assert!(b.insert_submission(author, asgn, Some(stamp())).await.unwrap().is_some());

    a.finish(CommitMode::Commit).await.unwrap();
    let err = b.finish(CommitMode::Commit).await.unwrap_err();

    assert!(matches!(err, StorageError::StampTaken(_)));
    assert_eq!(store.submission_count(), 1);
}

#[tokio::test]
async fn submission_read_back_keeps_file_order() {
    let store = MemoryStore::new();
    let author = store.register_person("xuser", "X User", Role::Student);
    let asgn = store.register_assignment("hw01", &["a.c", "b.c"]);
    let da = ContentDigest::from_bytes(b"a");
    let db = ContentDigest::from_bytes(b"b");

    let mut uow = store.begin().await.unwrap();
    let id = uow
        .insert_submission(author, asgn, Some(stamp()))
        .await
        .unwrap()
        .unwrap();
    uow.put_content(&db, b"b").await.unwrap();
    uow.insert_submission_file(&id, asgn, "b.c", &db).await.unwrap();
    uow.put_content(&da, b"a").await.unwrap();
    uow.insert_submission_file(&id, asgn, "a.c", &da).await.unwrap();
    uow.finish(CommitMode::Commit).await.unwrap();

    let record = store.submission(&id).await.unwrap();
    assert_eq!(record.author, author);
    assert_eq!(record.assignment, asgn);
    assert_eq!(record.stamp, Some(stamp()));
    let names: Vec<&str> = record.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["b.c", "a.c"]);
}

#[tokio::test]
async fn submissions_sorted_with_unstamped_last() {
    let store = MemoryStore::new();
    let author = store.register_person("xuser", "X User", Role::Student);
    let asgn = store.register_assignment("hw01", &[]);

    let mut uow = store.begin().await.unwrap();
    uow.insert_submission(author, asgn, None).await.unwrap();
    uow.insert_submission(author, asgn, Some(stamp() + chrono::Duration::hours(1)))
        .await
        .unwrap();
    uow.insert_submission(author, asgn, Some(stamp())).await.unwrap();
    uow.finish(CommitMode::Commit).await.unwrap();

    let stamps: Vec<_> = store
        .submissions(asgn)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.stamp)
        .collect();
    assert_eq!(
        stamps,
        vec![
            Some(stamp()),
            Some(stamp() + chrono::Duration::hours(1)),
            None
        ]
    );
}

// ===========================================================================
// Commit mode contract tests
// ===========================================================================

#[tokio::test]
async fn simulate_discards_all_writes() {
    let store = MemoryStore::new();
    let author = store.register_person("xuser", "X User", Role::Teacher);
    let asgn = store.register_assignment("hw01", &[]);
    let digest = ContentDigest::from_bytes(b"dry");

    let mut uow = store.begin().await.unwrap();
    let id = uow
        .insert_submission(author, asgn, None)
        .await
        .unwrap()
        .unwrap();
    uow.put_content(&digest, b"dry").await.unwrap();
    uow.insert_submission_file(&id, asgn, "dry.txt", &digest)
        .await
        .unwrap();
    uow.insert_eval_request(EvaluationRequest {
        submission: id.clone(),
        suite: SuiteId(1),
    })
    .await
    .unwrap();
    uow.notify("eval_req").await.unwrap();
    uow.finish(CommitMode::Simulate).await.unwrap();

    assert_eq!(store.content_count(), 0);
    assert_eq!(store.submission_count(), 0);
    assert!(store.eval_requests().is_empty());
    assert!(store.notifications().is_empty());
    assert!(matches!(
        store.submission(&id).await.unwrap_err(),
        StorageError::NotFound { .. }
    ));
}

#[tokio::test]
async fn dropped_unit_of_work_publishes_nothing() {
    let store = MemoryStore::new();

    {
        let mut uow = store.begin().await.unwrap();
        uow.notify("eval_req").await.unwrap();
    }

    assert!(store.notifications().is_empty());
}

#[tokio::test]
async fn unavailable_store_fails_operations() {
    let store = MemoryStore::new();
    let mut uow = store.begin().await.unwrap();
    store.set_unavailable(true);

    let digest = ContentDigest::from_bytes(b"x");
    let err = uow.put_content(&digest, b"x").await.unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));
    assert!(store.begin().await.is_err());
}

// ===========================================================================
// Roster / catalog contract tests
// ===========================================================================

#[tokio::test]
async fn roster_lists_teachers_before_students() {
    let store = MemoryStore::new();
    let student = store.register_person("student", "A Student", Role::Student);
    let teacher = store.register_person("teacher", "A Teacher", Role::Teacher);

    let people = store.people().await.unwrap();
    let uids: Vec<PersonId> = people.iter().map(|p| p.uid).collect();
    assert_eq!(uids, vec![teacher, student]);
    assert!(people[0].is_teacher());
    assert!(!people[1].is_teacher());

    let mut uow = store.begin().await.unwrap();
    assert!(uow.is_teacher(teacher).await.unwrap());
    assert!(!uow.is_teacher(student).await.unwrap());
}

#[tokio::test]
async fn catalog_resolves_assignment_by_name() {
    let store = MemoryStore::new();
    let asgn = store.register_assignment("hw01", &["main.c", "util.h"]);

    assert_eq!(store.assignment_id("hw01").await.unwrap(), Some(asgn));
    assert_eq!(store.assignment_id("hw99").await.unwrap(), None);
    assert_eq!(
        store.assignment_files(asgn).await.unwrap(),
        vec!["main.c".to_string(), "util.h".to_string()]
    );
}

#[tokio::test]
async fn current_suite_replaced_by_later_one() {
    let store = MemoryStore::new();
    let asgn = store.register_assignment("hw01", &[]);
    store.set_current_suite(asgn, true);
    let pending = store.set_current_suite(asgn, false);

    let mut uow = store.begin().await.unwrap();
    let suite = uow.current_suite(asgn).await.unwrap().unwrap();
    assert_eq!(suite.id, pending);
    assert!(!suite.active);
}
