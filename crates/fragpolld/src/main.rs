//! fragpolld - frag submission poller
//!
//! Periodically scans the submission spool, records new submissions with
//! their content-addressed files and requests evaluation where a pending
//! suite needs validating.
//!
//! Exit status: 0 after a oneshot run or a signalled shutdown, 2 when the
//! configuration cannot be loaded, 1 on any other startup failure.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use frag_core::telemetry::{default_level, init_tracing};
use frag_core::{
    CommitMode, ConfigLoader, IngestPoll, PollScheduler, SpoolSource, SubmissionRegistry,
    SubmissionStore,
};
use frag_store::{SurrealHandle, SurrealSubmissionStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit status for configuration errors at startup.
const EXIT_CONFIG: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "fragpolld")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "frag submission poller", long_about = None)]
struct Cli {
    /// Configuration file (YAML when named *.yaml or *.yml, TOML otherwise)
    config: PathBuf,

    /// Run a single poll cycle and exit
    #[arg(long)]
    oneshot: bool,

    /// Do not commit anything; implies --oneshot and --verbose
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn oneshot(&self) -> bool {
        self.oneshot || self.dry_run
    }

    fn verbose(&self) -> bool {
        self.verbose || self.dry_run
    }

    fn commit_mode(&self) -> CommitMode {
        if self.dry_run {
            CommitMode::Simulate
        } else {
            CommitMode::Commit
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json, default_level(cli.verbose()));

    let mut scheduler = match PollScheduler::new(ConfigLoader::new(&cli.config)) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!(error = %e, "cannot load configuration");
            std::process::exit(EXIT_CONFIG);
        }
    };
    let config = scheduler.snapshot();
    let Some(inbox) = config.inbox.clone() else {
        error!(config = %cli.config.display(), "no inbox configured");
        std::process::exit(EXIT_CONFIG);
    };

    let handle = SurrealHandle::connect(&config.connection())
        .await
        .context("Failed to connect to the frag database")?;
    let store: Arc<dyn SubmissionStore> = Arc::new(SurrealSubmissionStore::new(&handle));
    let registry = SubmissionRegistry::new(store).with_commit_mode(cli.commit_mode());
    let poll = IngestPoll::new(registry, Arc::new(SpoolSource::new(&inbox)));

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    info!(
        course = %config.course,
        inbox = %inbox.display(),
        oneshot = cli.oneshot(),
        dry_run = cli.dry_run,
        "fragpolld started"
    );
    let summary = scheduler.run(&poll, &cancel, cli.oneshot()).await;
    info!(
        cycles = summary.cycles,
        failed_cycles = summary.failed_cycles,
        reason = ?summary.reason,
        "fragpolld finished"
    );
    Ok(())
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("cancellation pending (SIGINT)"),
                    _ = term.recv() => info!("cancellation pending (SIGTERM)"),
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("cancellation pending (SIGINT)");
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancellation pending (Ctrl-C)");
        }
    }
    token.cancel();
}
