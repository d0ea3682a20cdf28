//! Directory spool source.
//!
//! Layout: `<inbox>/<assignment>/<login>/<entry>/<files...>`. Each entry
//! directory is one submission. Writers should create entries under a
//! temporary name and rename them into place. Names starting with `.` are
//! ignored at every level.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use tokio::fs;
use tracing::{debug, warn};

use super::{Candidate, SubmissionSource};
use crate::assignment::Assignment;
use crate::content::File;
use crate::error::{FragError, Result};

/// Directory receiving acknowledged entries, relative to the inbox.
pub const PROCESSED_DIR: &str = ".processed";

#[derive(Debug, Clone)]
pub struct SpoolSource {
    inbox: PathBuf,
}

impl SpoolSource {
    pub fn new(inbox: impl Into<PathBuf>) -> Self {
        Self {
            inbox: inbox.into(),
        }
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    fn processed_root(&self) -> PathBuf {
        self.inbox.join(PROCESSED_DIR)
    }

    async fn read_entry(&self, login: &str, entry: &Path, key: String) -> Result<Option<Candidate>> {
        let mut files = Vec::new();
        for path in sorted_children(entry).await? {
            let meta = fs::metadata(&path).await?;
            if !meta.is_file() {
                debug!(path = %path.display(), "skipping non-file in spool entry");
                continue;
            }
            let name = file_name(&path);
            files.push(File::new(name, fs::read(&path).await?));
        }
        if files.is_empty() {
            debug!(entry = %key, "empty spool entry");
            return Ok(None);
        }

        let stamp = match DateTime::parse_from_rfc3339(&file_name(entry)) {
            Ok(stamp) => Some(stamp),
            Err(_) => modified_stamp(entry).await,
        };

        Ok(Some(Candidate {
            key,
            login: login.to_string(),
            files,
            stamp,
            eval: None,
        }))
    }
}

#[async_trait]
impl SubmissionSource for SpoolSource {
    async fn discover(&self, assignment: &Assignment) -> Result<Vec<Candidate>> {
        let root = self.inbox.join(&assignment.name);
        if !fs::try_exists(&root).await? {
            debug!(path = %root.display(), "no spool directory for assignment");
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for login_dir in sorted_children(&root).await? {
            if !fs::metadata(&login_dir).await?.is_dir() {
                continue;
            }
            let login = file_name(&login_dir);
            for entry in sorted_children(&login_dir).await? {
                if !fs::metadata(&entry).await?.is_dir() {
                    continue;
                }
                let key = format!("{}/{}/{}", assignment.name, login, file_name(&entry));
                if let Some(candidate) = self.read_entry(&login, &entry, key).await? {
                    candidates.push(candidate);
                }
            }
        }
        debug!(assignment = %assignment.name, found = candidates.len(), "spool scanned");
        Ok(candidates)
    }

    async fn acknowledge(&self, _assignment: &Assignment, candidate: &Candidate) -> Result<()> {
        let from = self.inbox.join(&candidate.key);
        let mut to = self.processed_root().join(&candidate.key);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }

        let base = to.clone();
        let mut suffix = 0u32;
        while fs::try_exists(&to).await? {
            suffix += 1;
            if suffix > 1000 {
                return Err(FragError::Source(format!(
                    "no free name for processed entry {}",
                    base.display()
                )));
            }
            to = PathBuf::from(format!("{}.{suffix}", base.display()));
        }
        if suffix > 0 {
            warn!(entry = %candidate.key, target = %to.display(), "processed entry already exists, renaming");
        }

        fs::rename(&from, &to).await?;
        debug!(entry = %candidate.key, "spool entry acknowledged");
        Ok(())
    }
}

/// Children of `dir` sorted by name, dot-files excluded.
async fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut reader = fs::read_dir(dir).await?;
    let mut out = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        out.push(entry.path());
    }
    out.sort();
    Ok(out)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn modified_stamp(path: &Path) -> Option<DateTime<FixedOffset>> {
    let modified = fs::metadata(path).await.ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified).fixed_offset())
}
