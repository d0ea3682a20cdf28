//! The poll callback: move discovered submissions into the registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use frag_store::{CommitMode, Person};
use tracing::{debug, error, info, warn};

use crate::assignment::Assignment;
use crate::config::PollConfig;
use crate::dispatch::DispatchOutcome;
use crate::error::{FragError, Result};
use crate::registry::{NewSubmission, SubmissionRegistry};
use crate::scheduler::Poll;
use crate::source::{Candidate, SubmissionSource};

/// Per-cycle tallies, logged when the cycle ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub created: usize,
    pub eval_requested: usize,
    pub unknown_author: usize,
    pub collisions: usize,
    pub source_errors: usize,
}

pub struct IngestPoll {
    registry: SubmissionRegistry,
    source: Arc<dyn SubmissionSource>,
    today: Option<NaiveDate>,
}

impl IngestPoll {
    pub fn new(registry: SubmissionRegistry, source: Arc<dyn SubmissionSource>) -> Self {
        Self {
            registry,
            source,
            today: None,
        }
    }

    /// Evaluate enablement windows against a fixed date instead of today.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Run one ingestion pass over every configured assignment.
    pub async fn ingest(&self, config: &PollConfig) -> Result<IngestStats> {
        let store = self.registry.store();
        let today = self.today.unwrap_or_else(|| Local::now().date_naive());

        let mut people: HashMap<String, Person> = HashMap::new();
        for person in store.people().await? {
            people.entry(person.login.clone()).or_insert(person);
        }

        let mut stats = IngestStats::default();
        for (name, entry) in &config.assignments {
            let assignment = Assignment::resolve(name, entry, &**store, today).await?;
            debug!("{assignment}");
            if !assignment.is_pollable() {
                if assignment.enabled {
                    warn!(assignment = %name, "assignment is not in the catalog");
                }
                continue;
            }

            let candidates = match self.source.discover(&assignment).await {
                Ok(candidates) => candidates,
                Err(e) if e.aborts_cycle() => return Err(e),
                Err(e) => {
                    stats.source_errors += 1;
                    warn!(assignment = %name, error = %e, "could not scan submission source");
                    continue;
                }
            };

            for candidate in candidates {
                self.ingest_one(&assignment, &people, candidate, &mut stats)
                    .await?;
            }
        }

        info!(
            event = "ingest.finished",
            created = stats.created,
            eval_requested = stats.eval_requested,
            unknown_author = stats.unknown_author,
            collisions = stats.collisions,
            source_errors = stats.source_errors,
        );
        Ok(stats)
    }

    async fn ingest_one(
        &self,
        assignment: &Assignment,
        people: &HashMap<String, Person>,
        mut candidate: Candidate,
        stats: &mut IngestStats,
    ) -> Result<()> {
        let Some(id) = assignment.id else {
            return Ok(());
        };
        let Some(author) = people.get(&candidate.login) else {
            stats.unknown_author += 1;
            warn!(login = %candidate.login, entry = %candidate.key, "submission from unknown login");
            return Ok(());
        };

        let mut submission = NewSubmission::new(id, author.uid, std::mem::take(&mut candidate.files))
            .with_eval(candidate.eval.unwrap_or(assignment.eval));
        submission.stamp = candidate.stamp;

        let created = match self.registry.create(submission).await {
            Ok(created) => created,
            Err(e @ FragError::StampCollision { .. }) => {
                stats.collisions += 1;
                error!(entry = %candidate.key, error = %e, "submission left in source");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        stats.created += 1;
        if matches!(created.dispatch, DispatchOutcome::Requested(_)) {
            stats.eval_requested += 1;
        }

        if self.registry.commit_mode() == CommitMode::Simulate {
            debug!(entry = %candidate.key, "dry run, source entry kept");
            return Ok(());
        }
        if let Err(e) = self.source.acknowledge(assignment, &candidate).await {
            stats.source_errors += 1;
            warn!(entry = %candidate.key, error = %e, "could not acknowledge submission");
        }
        Ok(())
    }
}

#[async_trait]
impl Poll<PollConfig> for IngestPoll {
    async fn poll(&self, config: Arc<PollConfig>) -> Result<()> {
        self.ingest(&config).await.map(|_| ())
    }
}
