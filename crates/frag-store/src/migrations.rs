//! SurrealDB schema migrations and initialization
//!
//! This module provides initialization functions to set up all tables
//! with the uniqueness constraints the ingestion protocol relies on.

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all frag tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing frag SurrealDB schema");

    init_catalog_tables(db).await?;
    init_roster_tables(db).await?;
    init_content_table(db).await?;
    init_submission_tables(db).await?;
    init_evaluation_tables(db).await?;

    info!("frag schema initialization complete");
    Ok(())
}

async fn run_ddl(db: &Surreal<Any>, table: &str, sql: &str) -> Result<()> {
    debug!("Initializing {} table", table);
    db.query(sql)
        .await?
        .check()
        .map_err(|e| StateError::SchemaSetup(format!("{table}: {e}")))?;
    info!("✓ {} table initialized", table);
    Ok(())
}

/// Initialize `assignment` and `assignment_in`
///
/// Schema:
/// ```text
/// TABLE assignment    { assignment_id: INT (unique), name: STRING (unique) }
/// TABLE assignment_in { assignment_id: INT, name: STRING }
/// ```
async fn init_catalog_tables(db: &Surreal<Any>) -> Result<()> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS assignment SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_assignment_id ON TABLE assignment COLUMNS assignment_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_assignment_name ON TABLE assignment COLUMNS name UNIQUE;

        DEFINE TABLE IF NOT EXISTS assignment_in SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_assignment_in_asgn ON TABLE assignment_in COLUMNS assignment_id;
    "#;
    run_ddl(db, "assignment", sql).await
}

/// Initialize `person`, `teacher_list` and `enrollment`
async fn init_roster_tables(db: &Surreal<Any>) -> Result<()> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS person SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_person_uid ON TABLE person COLUMNS uid UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_person_login ON TABLE person COLUMNS login UNIQUE;

        DEFINE TABLE IF NOT EXISTS teacher_list SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_teacher ON TABLE teacher_list COLUMNS teacher UNIQUE;

        DEFINE TABLE IF NOT EXISTS enrollment SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_student ON TABLE enrollment COLUMNS student UNIQUE;
    "#;
    run_ddl(db, "person", sql).await
}

/// Initialize `content`
///
/// Constraints:
/// - record id and `digest` are both the hex digest; rows are immutable
///   (no update, no delete)
async fn init_content_table(db: &Surreal<Any>) -> Result<()> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS content
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_content_digest ON TABLE content COLUMNS digest UNIQUE;
    "#;
    run_ddl(db, "content", sql).await
}

/// Initialize `submission` and `submission_in`
///
/// Schema:
/// ```text
/// TABLE submission {
///   submission_id:  STRING (unique)
///   author:         INT
///   assignment_id:  INT (indexed)
///   stamp:          DATETIME?
///   stamp_key:      STRING (unique)
///   created_at:     DATETIME
/// }
/// TABLE submission_in {
///   submission_id, assignment_id, seq, name, content_sha
/// }
/// ```
///
/// Constraints:
/// - `stamp_key` is unique: (author, assignment, stamp) for stamped rows
async fn init_submission_tables(db: &Surreal<Any>) -> Result<()> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS submission
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_submission_id ON TABLE submission COLUMNS submission_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_stamp_key ON TABLE submission COLUMNS stamp_key UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_submission_asgn ON TABLE submission COLUMNS assignment_id;

        DEFINE TABLE IF NOT EXISTS submission_in SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_submission_in_sid ON TABLE submission_in COLUMNS submission_id;
        DEFINE INDEX IF NOT EXISTS idx_submission_in_sha ON TABLE submission_in COLUMNS content_sha;
    "#;
    run_ddl(db, "submission", sql).await
}

/// Initialize `current_suite`, `eval_req` and `notification`
async fn init_evaluation_tables(db: &Surreal<Any>) -> Result<()> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS current_suite SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_current_suite_asgn ON TABLE current_suite COLUMNS assignment_id UNIQUE;

        DEFINE TABLE IF NOT EXISTS eval_req SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_eval_req_sid ON TABLE eval_req COLUMNS submission_id;

        DEFINE TABLE IF NOT EXISTS notification SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_notification_channel ON TABLE notification COLUMNS channel;
    "#;
    run_ddl(db, "eval_req", sql).await
}
