//! Periodic poll loop with cooperative cancellation.
//!
//! Each cycle reloads the configuration, runs the poll callback to
//! completion and then sleeps for the rest of the interval in one-second
//! ticks. Cancellation is observed between ticks and wakes a tick early;
//! an in-progress callback is never aborted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::ConfigError;
use crate::error::Result;
use crate::obs;

const TICK: Duration = Duration::from_secs(1);

/// Scheduling parameters carried by a configuration snapshot.
pub trait ScheduleSettings {
    fn interval(&self) -> Duration;
}

/// Produces a fresh configuration snapshot on every call.
pub trait ConfigSource: Send + Sync {
    type Snapshot: ScheduleSettings + Send + Sync + 'static;

    fn reload(&self) -> std::result::Result<Self::Snapshot, ConfigError>;
}

/// The work done once per cycle.
#[async_trait]
pub trait Poll<S: Send + Sync + 'static>: Send + Sync {
    async fn poll(&self, config: Arc<S>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Oneshot,
    Cancelled,
}

/// What a finished [`PollScheduler::run`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub reload_failures: u64,
    pub reason: StopReason,
}

pub struct PollScheduler<C: ConfigSource> {
    source: C,
    snapshot: Arc<C::Snapshot>,
    state: SchedulerState,
}

impl<C: ConfigSource> PollScheduler<C> {
    /// Load the initial snapshot. Failure here is fatal for the caller.
    pub fn new(source: C) -> std::result::Result<Self, ConfigError> {
        let snapshot = Arc::new(source.reload()?);
        Ok(Self {
            source,
            snapshot,
            state: SchedulerState::Idle,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// The last successfully loaded snapshot.
    pub fn snapshot(&self) -> Arc<C::Snapshot> {
        Arc::clone(&self.snapshot)
    }

    /// Run cycles until `oneshot` completes one or `cancel` fires.
    pub async fn run<P>(
        &mut self,
        poll: &P,
        cancel: &CancellationToken,
        oneshot: bool,
    ) -> SchedulerSummary
    where
        P: Poll<C::Snapshot> + ?Sized,
    {
        let mut summary = SchedulerSummary {
            cycles: 0,
            failed_cycles: 0,
            reload_failures: 0,
            reason: StopReason::Cancelled,
        };

        while !cancel.is_cancelled() {
            summary.cycles += 1;
            let cycle = summary.cycles;

            match self.source.reload() {
                Ok(snapshot) => self.snapshot = Arc::new(snapshot),
                Err(e) => {
                    summary.reload_failures += 1;
                    warn!(cycle, error = %e, "configuration reload failed, keeping previous");
                }
            }

            self.state = SchedulerState::Running;
            let interval = self.snapshot.interval();
            let start = Instant::now();
            let outcome = poll
                .poll(Arc::clone(&self.snapshot))
                .instrument(obs::cycle_span(cycle))
                .await;
            let elapsed = start.elapsed();
            obs::emit_cycle_finished(cycle, elapsed.as_millis() as u64, outcome.is_ok());
            if let Err(e) = outcome {
                summary.failed_cycles += 1;
                error!(cycle, error = %e, "poll cycle failed");
            }

            self.state = SchedulerState::Sleeping;
            if let Some(reason) = self.sleep(interval, elapsed, cancel, oneshot).await {
                summary.reason = reason;
                self.state = SchedulerState::Stopped;
                info!(cycles = summary.cycles, ?reason, "scheduler stopped");
                return summary;
            }
            self.state = SchedulerState::Idle;
        }

        self.state = SchedulerState::Stopped;
        info!(cycles = summary.cycles, "scheduler stopped before cycle");
        summary
    }

    /// Sleep the rest of the interval, whole seconds only.
    async fn sleep(
        &self,
        interval: Duration,
        elapsed: Duration,
        cancel: &CancellationToken,
        oneshot: bool,
    ) -> Option<StopReason> {
        let ticks = interval.saturating_sub(elapsed).as_secs();
        debug!(ticks, "sleeping until next cycle");

        for _ in 0..ticks {
            if let Some(reason) = stop_reason(cancel, oneshot) {
                return Some(reason);
            }
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(TICK) => {}
            }
        }
        stop_reason(cancel, oneshot)
    }
}

fn stop_reason(cancel: &CancellationToken, oneshot: bool) -> Option<StopReason> {
    if oneshot {
        Some(StopReason::Oneshot)
    } else if cancel.is_cancelled() {
        Some(StopReason::Cancelled)
    } else {
        None
    }
}
