//! Daily backup trigger.
//!
//! # Design
//! - One slot per day at a fixed UTC time. A slot missed while the process was
//!   down is not replayed.
//! - The periodic flag is read from configuration at every tick, so it can be
//!   flipped without a restart.

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use mailvault_backup::{BackupOrchestrator, BackupReport, Trigger};
use mailvault_config::{ConfigSource, ScheduleSettings, SecretResolver};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// First instant strictly after `now` whose UTC wall-clock time is `at`.
#[must_use]
pub fn next_occurrence(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

/// Drives the orchestrator from the daily schedule.
pub struct Scheduler {
    orchestrator: BackupOrchestrator,
    source: Arc<dyn ConfigSource>,
    schedule: ScheduleSettings,
}

impl Scheduler {
    /// Scheduler reading its flag from `source`.
    #[must_use]
    pub fn new(
        orchestrator: BackupOrchestrator,
        source: Arc<dyn ConfigSource>,
        schedule: ScheduleSettings,
    ) -> Self {
        Self {
            orchestrator,
            source,
            schedule,
        }
    }

    /// Run the schedule on the current runtime until the handle is aborted.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        if self.schedule.run_on_startup {
            self.tick(Trigger::Startup).await;
        }
        loop {
            let now = Utc::now();
            let next = next_occurrence(now, self.schedule.daily_at);
            info!(next = %next, "next scheduled backup");
            tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;
            self.tick(Trigger::Scheduled).await;
        }
    }

    /// Run one backup if the periodic flag is enabled. Returns `None` when the
    /// tick was skipped.
    pub async fn tick(&self, trigger: Trigger) -> Option<BackupReport> {
        match SecretResolver::new(self.source.as_ref()).periodic_enabled() {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    trigger = trigger.as_str(),
                    "periodic backup disabled; tick skipped"
                );
                return None;
            }
            Err(err) => {
                warn!(
                    trigger = trigger.as_str(),
                    error = %err,
                    "periodic flag unreadable; tick skipped"
                );
                return None;
            }
        }

        let report = self.orchestrator.run_backup(trigger).await;
        if report.success {
            info!(
                run_id = %report.run_id,
                artifact = report.artifact.as_deref().unwrap_or_default(),
                "scheduled backup completed"
            );
        } else {
            warn!(
                run_id = %report.run_id,
                error = report.error.as_deref().unwrap_or_default(),
                "scheduled backup failed"
            );
        }
        Some(report)
    }
}
