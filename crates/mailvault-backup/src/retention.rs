//! Age-based pruning of stored backups.
//!
//! # Design
//! - Selection is a pure function of the listing, the current time and the
//!   window, so the age rule is tested without a store.
//! - An artifact is expired when `now - created_at >= window`.
//! - Only names under a `YYYY-MM-DD/` prefix are considered; the artifact
//!   written by the current run is never selected.
//! - One failed deletion does not stop the sweep.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};

use crate::error::{StorageError, describe};
use crate::model::BackupArtifact;
use crate::storage::ObjectStore;

/// Artifacts in `listing` old enough to delete.
#[must_use]
pub fn select_expired<'a>(
    listing: &'a [BackupArtifact],
    now: DateTime<Utc>,
    window: TimeDelta,
    protected: &str,
) -> Vec<&'a BackupArtifact> {
    listing
        .iter()
        .filter(|artifact| artifact.name != protected)
        .filter(|artifact| BackupArtifact::is_backup_name(&artifact.name))
        .filter(|artifact| now.signed_duration_since(artifact.created_at) >= window)
        .collect()
}

/// Result of one retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Names deleted.
    pub deleted: Vec<String>,
    /// Names whose deletion failed, with the rendered error.
    pub failed: Vec<(String, String)>,
}

impl PruneReport {
    /// Whether every selected artifact was deleted.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Deletes artifacts older than the retention window.
pub struct RetentionPruner {
    store: Arc<dyn ObjectStore>,
    window: TimeDelta,
}

impl RetentionPruner {
    /// Pruner over `store` keeping artifacts younger than `window`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, window: TimeDelta) -> Self {
        Self { store, window }
    }

    /// List the container and delete every expired artifact except `protected`.
    ///
    /// # Errors
    ///
    /// Returns the listing error; deletion failures are collected in the report.
    pub async fn prune(
        &self,
        now: DateTime<Utc>,
        protected: &str,
    ) -> Result<PruneReport, StorageError> {
        let listing = self.store.list(None).await?;
        let expired = select_expired(&listing, now, self.window, protected);
        let mut report = PruneReport::default();
        for artifact in expired {
            match self.store.delete(&artifact.name).await {
                Ok(()) => report.deleted.push(artifact.name.clone()),
                Err(err) => {
                    warn!(
                        artifact = %artifact.name,
                        error = %describe(&err),
                        "artifact deletion failed"
                    );
                    report.failed.push((artifact.name.clone(), describe(&err)));
                }
            }
        }
        info!(
            listed = listing.len(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "retention sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 5, 30, 0)
            .single()
            .unwrap_or_default()
    }

    fn aged(name: &str, age: TimeDelta) -> BackupArtifact {
        BackupArtifact {
            name: name.to_string(),
            created_at: now() - age,
            size: 1,
        }
    }

    fn names<'a>(selected: &[&'a BackupArtifact]) -> Vec<&'a str> {
        selected.iter().map(|artifact| artifact.name.as_str()).collect()
    }

    #[test]
    fn deletes_exactly_the_artifacts_at_or_past_the_window() {
        let listing = [
            aged("2024-03-09/zero.tar", TimeDelta::zero()),
            aged("2024-03-08/one.tar", TimeDelta::days(1)),
            aged("2024-03-07/two.tar", TimeDelta::days(2)),
            aged("2024-03-06/three.tar", TimeDelta::days(3)),
        ];
        let selected = select_expired(&listing, now(), TimeDelta::days(2), "");
        assert_eq!(names(&selected), ["2024-03-07/two.tar", "2024-03-06/three.tar"]);
    }

    #[test]
    fn boundary_is_inclusive() {
        let listing = [
            aged("2024-03-07/edge.tar", TimeDelta::days(2)),
            aged("2024-03-07/young.tar", TimeDelta::days(2) - TimeDelta::seconds(1)),
        ];
        let selected = select_expired(&listing, now(), TimeDelta::days(2), "");
        assert_eq!(names(&selected), ["2024-03-07/edge.tar"]);
    }

    #[test]
    fn protected_and_foreign_names_are_never_selected() {
        let listing = [
            aged("2024-03-01/current.tar", TimeDelta::days(8)),
            aged("readme.txt", TimeDelta::days(30)),
            aged("not-a-date/x.tar", TimeDelta::days(30)),
        ];
        let selected =
            select_expired(&listing, now(), TimeDelta::days(2), "2024-03-01/current.tar");
        assert!(selected.is_empty());
    }

    #[test]
    fn future_timestamps_are_kept() {
        let listing = [aged("2024-03-10/skewed.tar", TimeDelta::hours(-3))];
        assert!(select_expired(&listing, now(), TimeDelta::days(2), "").is_empty());
    }
}
