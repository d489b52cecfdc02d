//! Process bootstrap.
//!
//! # Design
//! - Process-level settings (storage, schedule, listener, logging) are loaded
//!   once at boot. Backup settings are resolved by the orchestrator per run.
//! - Logging comes up before a configuration error is returned, so the error
//!   reaches the configured sink.
//! - Shutdown stops the scheduler and listener, then waits for a run already
//!   in flight so its cleanup completes.

use std::sync::Arc;

use mailvault_backup::{AzureBlobStore, BackupOrchestrator, OpenSshConnector, Trigger};
use mailvault_config::{AppConfig, ConfigSource, EnvSource};
use mailvault_telemetry::{
    DEFAULT_LOG_LEVEL, GlobalContextGuard, LogFormat, LoggingConfig, Metrics, build_sha,
    init_logging,
};
use tracing::{error, info, warn};

use crate::cli::Command;
use crate::error::{AppError, AppResult};
use crate::http::{self, HttpState};
use crate::scheduler::Scheduler;

/// Dependencies required to run either mode.
pub(crate) struct BootstrapDependencies {
    source: Arc<dyn ConfigSource>,
    config: AppConfig,
    orchestrator: BackupOrchestrator,
}

impl BootstrapDependencies {
    pub(crate) fn new(
        source: Arc<dyn ConfigSource>,
        config: AppConfig,
        orchestrator: BackupOrchestrator,
    ) -> Self {
        Self {
            source,
            config,
            orchestrator,
        }
    }

    /// Production wiring: system `ssh` and Azure Blob storage.
    pub(crate) fn production(source: Arc<dyn ConfigSource>, config: AppConfig) -> AppResult<Self> {
        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        let store = AzureBlobStore::new(&config.storage)
            .map_err(|err| AppError::storage("storage.client", err))?;
        info!(
            account = %config.storage.account,
            container = %store.container(),
            "storage binding ready"
        );
        let orchestrator = BackupOrchestrator::new(
            Arc::clone(&source),
            Arc::new(OpenSshConnector::new()),
            Arc::new(store),
            metrics,
        );
        Ok(Self::new(source, config, orchestrator))
    }
}

/// Boot from the process environment and run `command`.
///
/// Returns whether the process should exit successfully.
///
/// # Errors
///
/// Returns an error if logging, configuration, storage wiring, or the HTTP
/// listener cannot be brought up. A failed backup is not an error.
pub async fn run_app(command: Command) -> AppResult<bool> {
    let source: Arc<dyn ConfigSource> = Arc::new(EnvSource);
    let loaded = AppConfig::load(source.as_ref());
    let logging = loaded.as_ref().ok().map(|config| &config.logging);
    init_logging(&LoggingConfig {
        level: logging.map_or(DEFAULT_LOG_LEVEL, |settings| settings.level.as_str()),
        format: LogFormat::from_setting(logging.and_then(|settings| settings.format.as_deref())),
        build_sha: build_sha(),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new(command.mode());

    let config = loaded.map_err(|err| {
        error!(error = %err, "configuration could not be loaded");
        AppError::config("app_config.load", err)
    })?;
    let dependencies = BootstrapDependencies::production(source, config)?;
    run_app_with(dependencies, command).await
}

/// Run `command` against injected dependencies.
pub(crate) async fn run_app_with(
    dependencies: BootstrapDependencies,
    command: Command,
) -> AppResult<bool> {
    info!(mode = command.mode(), "mailvault starting");
    let BootstrapDependencies {
        source,
        config,
        orchestrator,
    } = dependencies;

    match command {
        Command::Run => {
            let report = orchestrator.run_backup(Trigger::Cli).await;
            let rendered = serde_json::to_string_pretty(&report)
                .map_err(|err| AppError::serialize("report.render", err))?;
            println!("{rendered}");
            Ok(report.success)
        }
        Command::Serve => {
            let scheduler =
                Scheduler::new(orchestrator.clone(), source, config.schedule).spawn();
            let router = http::router(HttpState::new(
                orchestrator.clone(),
                config.server.trigger_key,
            ));
            let served = http::serve(router, config.server.bind_addr, shutdown_signal()).await;
            scheduler.abort();
            if orchestrator.is_running() {
                info!("waiting for the in-flight backup to finish");
                orchestrator.idle().await;
            }
            info!("mailvault stopped");
            served.map(|()| true)
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "interrupt handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
