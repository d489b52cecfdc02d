//! Backup run orchestration.
//!
//! # Design
//! - One entry point, [`BackupOrchestrator::run_backup`], shared by every trigger.
//! - Stages run strictly in order: resolve, connect, archive, transfer and
//!   verify, cleanup, prune. State only moves forward and ends in
//!   `Succeeded` or `Failed`.
//! - Configuration is resolved in full before any network action.
//! - Remote cleanup runs after every attempted transfer and never changes
//!   the transfer outcome; retention runs only after a verified upload and
//!   never fails the run.
//! - A keyed single-flight guard rejects overlapping runs, and panics are
//!   caught at this boundary and reported as failed runs.
//! - Each run owns a spawned task. A caller that stops waiting does not
//!   cancel cleanup or the session close.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use mailvault_config::{BackupConfiguration, ConfigSource, SecretResolver};
use mailvault_telemetry::{Metrics, backup_run_span, record_run_state};
use tracing::{Instrument, Span, debug, error, info, warn};
use uuid::Uuid;

use crate::archive::ArchiveBuilder;
use crate::clock::{Clock, SystemClock};
use crate::error::{BackupError, StageFailure, describe};
use crate::model::{BackupArtifact, BackupReport, BackupStage, BackupState, Trigger};
use crate::retention::RetentionPruner;
use crate::session::{RemoteSession, SessionConnector};
use crate::shell::maintenance_command;
use crate::single_flight::SingleFlight;
use crate::storage::ObjectStore;
use crate::transfer::{TransferAgent, agent_for};

/// Single-flight key shared by every trigger.
pub const BACKUP_JOB: &str = "mail-backup";

const STAGE_COMPLETED: &str = "completed";
const STAGE_FAILED: &str = "failed";
const STAGE_DISPATCHED: &str = "dispatched";

struct RunFailure {
    stage: BackupStage,
    error: BackupError,
}

struct RunSuccess {
    artifact: String,
    pruned: Vec<String>,
    prune_warning: Option<String>,
}

struct RunProgress<'a> {
    span: Span,
    metrics: &'a Metrics,
    state: BackupState,
}

impl<'a> RunProgress<'a> {
    fn new(span: Span, metrics: &'a Metrics) -> Self {
        record_run_state(&span, BackupState::Idle.as_str());
        Self {
            span,
            metrics,
            state: BackupState::Idle,
        }
    }

    fn advance(&mut self, next: BackupState) {
        if self.state.can_advance_to(next) {
            debug!(from = self.state.as_str(), to = next.as_str(), "run state advanced");
            self.state = next;
            record_run_state(&self.span, next.as_str());
        } else {
            warn!(
                from = self.state.as_str(),
                to = next.as_str(),
                "ignored backwards state transition"
            );
        }
    }

    fn stage(&self, stage: BackupStage, status: &str) {
        self.metrics.inc_backup_stage(stage.as_str(), status);
    }

    fn fail(&self, stage: BackupStage, error: BackupError) -> RunFailure {
        self.stage(stage, STAGE_FAILED);
        RunFailure { stage, error }
    }
}

/// Command, exit status and stderr of a failed remote command, when that
/// is what ended the run.
fn remote_exit(error: &BackupError) -> Option<(&str, Option<i32>, &str)> {
    match error {
        BackupError::ArchiveFailed {
            source:
                StageFailure::NonZeroExit {
                    command,
                    exit_status,
                    stderr,
                },
        }
        | BackupError::TransferFailed {
            source:
                StageFailure::NonZeroExit {
                    command,
                    exit_status,
                    stderr,
                },
        } => Some((command.as_str(), *exit_status, stderr.as_str())),
        _ => None,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Check the uploaded object exists, is non-empty and, when the transfer
/// observed a byte count, has that size.
async fn verify_upload(
    store: &dyn ObjectStore,
    name: &str,
    expected: Option<u64>,
) -> Result<BackupArtifact, StageFailure> {
    let verification = |reason| StageFailure::Verification {
        name: name.to_string(),
        reason,
    };
    let stored = store
        .stat(name)
        .await?
        .ok_or_else(|| verification("object missing after upload"))?;
    if stored.size == 0 {
        return Err(verification("object is empty"));
    }
    if expected.is_some_and(|bytes| bytes != stored.size) {
        return Err(verification("object size differs from archive"));
    }
    Ok(stored)
}

/// Runs the backup pipeline end to end.
#[derive(Clone)]
pub struct BackupOrchestrator {
    source: Arc<dyn ConfigSource>,
    connector: Arc<dyn SessionConnector>,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    flights: SingleFlight,
}

impl BackupOrchestrator {
    /// Orchestrator over the given collaborators using wall-clock time.
    #[must_use]
    pub fn new(
        source: Arc<dyn ConfigSource>,
        connector: Arc<dyn SessionConnector>,
        store: Arc<dyn ObjectStore>,
        metrics: Metrics,
    ) -> Self {
        Self {
            source,
            connector,
            store,
            clock: Arc::new(SystemClock),
            metrics,
            flights: SingleFlight::new(),
        }
    }

    /// Replace the time source used for naming and retention.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether a run is currently in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.flights.is_active(BACKUP_JOB)
    }

    /// Metrics registry the orchestrator reports to.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run one backup. Never panics and always returns a report; an
    /// overlapping run is reported as a failure of the `orchestrate` stage.
    pub async fn run_backup(&self, trigger: Trigger) -> BackupReport {
        let started_at = self.clock.now();
        match self.try_run_backup(trigger).await {
            Ok(report) => report,
            Err(error) => BackupReport {
                run_id: Uuid::new_v4(),
                trigger,
                success: false,
                state: BackupState::Failed,
                failed_stage: Some(BackupStage::Orchestrate),
                error: Some(describe(&error)),
                artifact: None,
                pruned: Vec::new(),
                prune_warning: None,
                started_at,
                finished_at: self.clock.now(),
            },
        }
    }

    /// Run one backup unless another run holds the job key.
    ///
    /// The run executes on its own task, so dropping the returned future
    /// does not interrupt it; cleanup and session close still happen.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::AlreadyRunning`] when a run is in flight and
    /// [`BackupError::Interrupted`] when the run task was torn down by the
    /// runtime. Every other failure is carried in the returned report.
    pub async fn try_run_backup(&self, trigger: Trigger) -> Result<BackupReport, BackupError> {
        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();

        let Some(flight) = self.flights.try_acquire(BACKUP_JOB) else {
            warn!(
                run_id = %run_id,
                trigger = trigger.as_str(),
                "rejected overlapping backup run"
            );
            self.metrics.inc_backup_run(trigger.as_str(), "rejected");
            return Err(BackupError::AlreadyRunning { job: BACKUP_JOB });
        };

        let this = self.clone();
        let run = tokio::spawn(async move {
            let _flight = flight;
            this.complete_run(trigger, run_id, started_at).await
        });
        run.await.map_err(|source| BackupError::Interrupted { source })
    }

    /// Resolve once no run holds the job key.
    pub async fn idle(&self) {
        self.flights.released(BACKUP_JOB).await;
    }

    async fn complete_run(
        self,
        trigger: Trigger,
        run_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> BackupReport {
        let span = backup_run_span(&run_id.to_string(), trigger.as_str());
        let _in_flight = self.metrics.track_run();
        let mut progress = RunProgress::new(span.clone(), &self.metrics);
        let outcome = AssertUnwindSafe(self.execute(&mut progress, started_at))
            .catch_unwind()
            .instrument(span.clone())
            .await;
        let outcome = outcome.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            Err(progress.fail(BackupStage::Orchestrate, BackupError::Panicked { message }))
        });

        span.in_scope(|| {
            let finished_at = self.clock.now();
            match outcome {
                Ok(success) => {
                    progress.advance(BackupState::Succeeded);
                    self.metrics.inc_backup_run(trigger.as_str(), "success");
                    self.metrics.set_last_success(finished_at.timestamp());
                    info!(
                        artifact = %success.artifact,
                        pruned = success.pruned.len(),
                        "backup run succeeded"
                    );
                    BackupReport {
                        run_id,
                        trigger,
                        success: true,
                        state: progress.state,
                        failed_stage: None,
                        error: None,
                        artifact: Some(success.artifact),
                        pruned: success.pruned,
                        prune_warning: success.prune_warning,
                        started_at,
                        finished_at,
                    }
                }
                Err(failure) => {
                    progress.advance(BackupState::Failed);
                    self.metrics.inc_backup_run(trigger.as_str(), "failure");
                    let rendered = describe(&failure.error);
                    if let Some((command, exit_status, stderr)) = remote_exit(&failure.error) {
                        error!(
                            stage = failure.stage.as_str(),
                            command,
                            exit_status = ?exit_status,
                            stderr,
                            error = %rendered,
                            "backup run failed"
                        );
                    } else {
                        error!(
                            stage = failure.stage.as_str(),
                            error = %rendered,
                            "backup run failed"
                        );
                    }
                    BackupReport {
                        run_id,
                        trigger,
                        success: false,
                        state: progress.state,
                        failed_stage: Some(failure.stage),
                        error: Some(rendered),
                        artifact: None,
                        pruned: Vec::new(),
                        prune_warning: None,
                        started_at,
                        finished_at,
                    }
                }
            }
        })
    }

    async fn execute(
        &self,
        progress: &mut RunProgress<'_>,
        started_at: DateTime<Utc>,
    ) -> Result<RunSuccess, RunFailure> {
        progress.advance(BackupState::Resolving);
        let config = SecretResolver::new(self.source.as_ref())
            .resolve_backup()
            .map_err(|source| {
                progress.fail(
                    BackupStage::Resolve,
                    BackupError::ConfigurationMissing { source },
                )
            })?;
        progress.stage(BackupStage::Resolve, STAGE_COMPLETED);

        let session = self.connector.connect(&config).await.map_err(|source| {
            progress.fail(
                BackupStage::Connect,
                BackupError::ConnectionFailed {
                    host: config.host.clone(),
                    source,
                },
            )
        })?;
        progress.stage(BackupStage::Connect, STAGE_COMPLETED);
        progress.advance(BackupState::Connected);
        info!(host = %config.host, user = %config.username, "backup session established");

        let transferred = self
            .with_session(progress, &config, session.as_ref(), started_at)
            .await;
        if let Err(err) = session.close().await {
            warn!(error = %describe(&err), "closing backup session failed");
        }
        let artifact = transferred?;

        progress.advance(BackupState::Pruning);
        let (pruned, prune_warning) = self.prune(progress, &config, &artifact).await;
        Ok(RunSuccess {
            artifact,
            pruned,
            prune_warning,
        })
    }

    async fn with_session(
        &self,
        progress: &mut RunProgress<'_>,
        config: &BackupConfiguration,
        session: &dyn RemoteSession,
        started_at: DateTime<Utc>,
    ) -> Result<String, RunFailure> {
        let pipeline = &config.pipeline;
        if pipeline.remote_maintenance {
            session.spawn_detached(&maintenance_command(pipeline.use_sudo));
            progress.stage(BackupStage::Maintenance, STAGE_DISPATCHED);
        }

        progress.advance(BackupState::Archiving);
        let builder = ArchiveBuilder::new(pipeline.use_sudo);
        builder
            .create_archive(session, &config.source_path, &config.archive_filename)
            .await
            .map_err(|source| {
                progress.fail(BackupStage::Archive, BackupError::ArchiveFailed { source })
            })?;
        progress.stage(BackupStage::Archive, STAGE_COMPLETED);

        progress.advance(BackupState::Transferring);
        let artifact = BackupArtifact::name_for(started_at, &config.archive_filename);
        let agent = agent_for(Arc::clone(&self.store), pipeline);
        let transferred = self
            .transfer(progress, agent.as_ref(), session, config, &artifact)
            .await;

        match builder
            .delete_archive(session, &config.archive_filename)
            .await
        {
            Ok(()) => progress.stage(BackupStage::Cleanup, STAGE_COMPLETED),
            Err(err) => {
                warn!(
                    archive = %config.archive_filename,
                    error = %describe(&err),
                    "remote archive cleanup failed"
                );
                progress.stage(BackupStage::Cleanup, STAGE_FAILED);
            }
        }

        transferred?;
        Ok(artifact)
    }

    async fn transfer(
        &self,
        progress: &RunProgress<'_>,
        agent: &dyn TransferAgent,
        session: &dyn RemoteSession,
        config: &BackupConfiguration,
        artifact: &str,
    ) -> Result<(), RunFailure> {
        let outcome = agent
            .transfer(session, &config.archive_filename, artifact)
            .await
            .map_err(|source| {
                progress.fail(BackupStage::Transfer, BackupError::TransferFailed { source })
            })?;
        progress.stage(BackupStage::Transfer, STAGE_COMPLETED);

        let stored = verify_upload(self.store.as_ref(), artifact, outcome.bytes)
            .await
            .map_err(|source| {
                progress.fail(BackupStage::Verify, BackupError::TransferFailed { source })
            })?;
        progress.stage(BackupStage::Verify, STAGE_COMPLETED);
        info!(
            artifact,
            bytes = stored.size,
            mode = agent.mode().as_str(),
            "backup artifact stored"
        );
        Ok(())
    }

    async fn prune(
        &self,
        progress: &RunProgress<'_>,
        config: &BackupConfiguration,
        artifact: &str,
    ) -> (Vec<String>, Option<String>) {
        let pruner = RetentionPruner::new(
            Arc::clone(&self.store),
            config.pipeline.retention_window(),
        );
        match pruner.prune(self.clock.now(), artifact).await {
            Ok(report) => {
                self.metrics.add_pruned(report.deleted.len() as u64);
                if report.is_clean() {
                    progress.stage(BackupStage::Prune, STAGE_COMPLETED);
                    (report.deleted, None)
                } else {
                    progress.stage(BackupStage::Prune, STAGE_FAILED);
                    let names: Vec<&str> =
                        report.failed.iter().map(|(name, _)| name.as_str()).collect();
                    let warning =
                        format!("could not delete expired artifacts: {}", names.join(", "));
                    warn!(warning = %warning, "retention incomplete");
                    (report.deleted, Some(warning))
                }
            }
            Err(source) => {
                let err = BackupError::PruneFailed { source };
                let warning = describe(&err);
                progress.stage(BackupStage::Prune, STAGE_FAILED);
                warn!(error = %warning, "retention skipped; run outcome unchanged");
                (Vec::new(), Some(warning))
            }
        }
    }
}
