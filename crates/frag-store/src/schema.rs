//! Row definitions for the frag SurrealDB tables
//!
//! Tables written here:
//! - content: Deduplicated file bytes keyed by digest
//! - submission: One row per submission, unique by `stamp_key`
//! - submission_in: File associations of a submission
//! - eval_req: Evaluation requests
//! - notification: Publish records for LIVE SELECT consumers
//!
//! Tables read here (owned by the roster/catalog tooling):
//! - assignment, assignment_in, person, teacher_list, enrollment, current_suite

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::{AssignmentId, PersonId, SubmissionId};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Content row; `data` is hex encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRow {
    pub digest: String,
    pub data: String,
}

impl ContentRow {
    pub fn new(digest: &str, data: &[u8]) -> Self {
        Self {
            digest: digest.to_string(),
            data: hex::encode(data),
        }
    }
}

/// Submission row.
///
/// `stamp_key` carries the uniqueness constraint: `author:assignment:stamp`
/// for stamped submissions and the submission id otherwise, so unstamped rows
/// never collide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRow {
    pub submission_id: String,
    pub author: i64,
    pub assignment_id: i64,
    #[serde(with = "surreal_datetime_opt", default)]
    pub stamp: Option<DateTime<Utc>>,
    pub stamp_key: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl SubmissionRow {
    pub fn new(
        id: &SubmissionId,
        author: PersonId,
        assignment: AssignmentId,
        stamp: Option<DateTime<Utc>>,
    ) -> Self {
        let stamp_key = match stamp {
            Some(stamp) => Self::stamp_key(author, assignment, stamp),
            None => id.0.clone(),
        };
        Self {
            submission_id: id.0.clone(),
            author: author.0,
            assignment_id: assignment.0,
            stamp,
            stamp_key,
            created_at: Utc::now(),
        }
    }

    /// Uniqueness key of a stamped submission.
    pub fn stamp_key(author: PersonId, assignment: AssignmentId, stamp: DateTime<Utc>) -> String {
        format!(
            "{}:{}:{}",
            author.0,
            assignment.0,
            stamp.format("%Y-%m-%dT%H:%M:%S%.6fZ")
        )
    }
}

/// File association row; `seq` preserves insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionFileRow {
    pub submission_id: String,
    pub assignment_id: i64,
    pub seq: i64,
    pub name: String,
    pub content_sha: String,
}

/// Evaluation request row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReqRow {
    pub submission_id: String,
    pub suite_id: i64,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

/// Notification row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRow {
    pub channel: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

/// Catalog row of the `assignment` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub assignment_id: i64,
    pub name: String,
}

/// Catalog row of the `assignment_in` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentFileRow {
    pub assignment_id: i64,
    pub name: String,
}

/// Roster row of the `person` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonRow {
    pub uid: i64,
    pub login: String,
    pub name: String,
}

/// Row of the `teacher_list` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeacherRow {
    pub teacher: i64,
}

/// Row of the `enrollment` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRow {
    pub student: i64,
}

/// Row of the `current_suite` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentSuiteRow {
    pub suite_id: i64,
    pub assignment_id: i64,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stamp_key_includes_microseconds() {
        let stamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let later = stamp + chrono::Duration::microseconds(1);
        let a = SubmissionRow::stamp_key(PersonId(1), AssignmentId(2), stamp);
        let b = SubmissionRow::stamp_key(PersonId(1), AssignmentId(2), later);

        assert_eq!(a, "1:2:2024-03-01T12:00:00.000000Z");
        assert_ne!(a, b);
    }

    #[test]
    fn unstamped_rows_key_on_submission_id() {
        let id = SubmissionId::new();
        let row = SubmissionRow::new(&id, PersonId(1), AssignmentId(2), None);

        assert_eq!(row.stamp_key, id.0);
        assert!(row.stamp.is_none());
    }

    #[test]
    fn content_row_hex_encodes_data() {
        let row = ContentRow::new("ab", &[0x00, 0xff]);
        assert_eq!(row.data, "00ff");
    }
}
