//! Configured assignments resolved against the catalog.

use std::fmt;

use chrono::NaiveDate;
use frag_store::{AssignmentId, StorageResult, SubmissionStore};
use serde::{Deserialize, Serialize};

use crate::dispatch::EvalMode;

/// Date window in which an assignment accepts submissions.
///
/// A missing bound defaults to the day of evaluation, so `{from = X}` means
/// "from X on" and `{to = Y}` means "until Y".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnabledWindow {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

/// The `enabled` field of an assignment entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Enabled {
    Flag(bool),
    Window(EnabledWindow),
}

impl Default for Enabled {
    fn default() -> Self {
        Enabled::Flag(true)
    }
}

impl Enabled {
    /// Whether submissions are accepted on `today` (bounds inclusive).
    pub fn is_enabled_on(&self, today: NaiveDate) -> bool {
        match self {
            Enabled::Flag(flag) => *flag,
            Enabled::Window(window) => {
                let from = window.from.unwrap_or(today);
                let to = window.to.unwrap_or(today);
                from <= today && today <= to
            }
        }
    }
}

/// One entry of the `assignments` configuration map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentConfig {
    #[serde(default)]
    pub enabled: Enabled,
    #[serde(default)]
    pub eval: EvalMode,
}

/// An assignment as seen by one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub name: String,
    pub enabled: bool,
    pub eval: EvalMode,
    /// Catalog id, `None` when the catalog does not know the name.
    pub id: Option<AssignmentId>,
    pub file_names: Option<Vec<String>>,
}

impl Assignment {
    /// Evaluate `entry` for `today` and look the name up in the catalog.
    pub async fn resolve(
        name: &str,
        entry: &AssignmentConfig,
        store: &dyn SubmissionStore,
        today: NaiveDate,
    ) -> StorageResult<Self> {
        let id = store.assignment_id(name).await?;
        let file_names = match id {
            Some(id) => Some(store.assignment_files(id).await?),
            None => None,
        };
        Ok(Self {
            name: name.to_string(),
            enabled: entry.enabled.is_enabled_on(today),
            eval: entry.eval,
            id,
            file_names,
        })
    }

    /// Enabled and known to the catalog.
    pub fn is_pollable(&self) -> bool {
        self.enabled && self.id.is_some()
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Assignment[{} enabled = {}", self.name, self.enabled)?;
        if let Some(id) = self.id {
            write!(f, " id = {id}")?;
        }
        if let Some(names) = &self.file_names {
            write!(f, " file_names = [{}]", names.join(", "))?;
        }
        write!(f, "]")
    }
}
