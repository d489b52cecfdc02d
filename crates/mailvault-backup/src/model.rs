//! Data carried through a backup run.

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Outcome of one remote command. Success is decided from `exit_status` only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Command text with secrets redacted.
    pub command: String,
    /// Exit status; `None` when the command was terminated by a signal.
    pub exit_status: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandResult {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_status, Some(0))
    }
}

/// A stored backup object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    /// Object name within the container.
    pub name: String,
    /// Container-level creation time.
    pub created_at: DateTime<Utc>,
    /// Object size in bytes.
    pub size: u64,
}

impl BackupArtifact {
    /// Whether `name` follows the `{YYYY-MM-DD}/...` backup layout.
    #[must_use]
    pub fn is_backup_name(name: &str) -> bool {
        name.split_once('/').is_some_and(|(day, rest)| {
            !rest.is_empty() && NaiveDate::parse_from_str(day, "%Y-%m-%d").is_ok()
        })
    }

    /// Object name for a run started at `started_at`.
    ///
    /// The date prefix gives day granularity; the timestamp keeps same-day runs distinct.
    #[must_use]
    pub fn name_for(started_at: DateTime<Utc>, archive_filename: &str) -> String {
        format!(
            "{}/{}-{}",
            started_at.format("%Y-%m-%d"),
            started_at.format("%Y%m%dT%H%M%SZ"),
            archive_filename
        )
    }
}

/// Operations a delegated credential may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOperation {
    /// Create a new object.
    Create,
    /// Write object content.
    Write,
}

/// Short-lived, object-scoped upload grant minted for a single run.
#[derive(Clone, PartialEq, Eq)]
pub struct DelegatedWriteCredential {
    /// Full URI including the signed query.
    pub target_uri: Url,
    /// Instant after which the grant is void.
    pub expires_at: DateTime<Utc>,
    /// Permitted operations.
    pub allowed_operations: Vec<WriteOperation>,
}

impl DelegatedWriteCredential {
    /// URI with the signed query removed, safe to log.
    #[must_use]
    pub fn redacted_uri(&self) -> String {
        let mut uri = self.target_uri.clone();
        uri.set_query(None);
        format!("{uri}?<redacted>")
    }
}

impl fmt::Debug for DelegatedWriteCredential {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DelegatedWriteCredential")
            .field("target_uri", &self.redacted_uri())
            .field("expires_at", &self.expires_at)
            .field("allowed_operations", &self.allowed_operations)
            .finish()
    }
}

impl Display for DelegatedWriteCredential {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.redacted_uri())
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Daily schedule.
    Scheduled,
    /// Scheduler start-up run.
    Startup,
    /// On-demand HTTP request.
    Manual,
    /// One-shot command line invocation.
    Cli,
}

impl Trigger {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Startup => "startup",
            Self::Manual => "manual",
            Self::Cli => "cli",
        }
    }
}

/// Lifecycle state of a run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupState {
    /// Not started.
    Idle,
    /// Resolving configuration.
    Resolving,
    /// Session established.
    Connected,
    /// Building the remote archive.
    Archiving,
    /// Moving and verifying the archive.
    Transferring,
    /// Applying retention.
    Pruning,
    /// Finished successfully.
    Succeeded,
    /// Finished with a failure.
    Failed,
}

impl BackupState {
    /// Stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Connected => "connected",
            Self::Archiving => "archiving",
            Self::Transferring => "transferring",
            Self::Pruning => "pruning",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transitions are allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `next` is a legal transition from `self`.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => true,
            Self::Idle => false,
            _ => next > self,
        }
    }
}

/// Unit of work within a run, used for metrics and failure attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStage {
    /// Configuration lookup.
    Resolve,
    /// Session establishment.
    Connect,
    /// Detached package update.
    Maintenance,
    /// Remote archive command.
    Archive,
    /// Upload.
    Transfer,
    /// Post-upload existence and size check.
    Verify,
    /// Remote archive deletion.
    Cleanup,
    /// Retention sweep.
    Prune,
    /// Anything else (panics, guard rejection).
    Orchestrate,
}

impl BackupStage {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Connect => "connect",
            Self::Maintenance => "maintenance",
            Self::Archive => "archive",
            Self::Transfer => "transfer",
            Self::Verify => "verify",
            Self::Cleanup => "cleanup",
            Self::Prune => "prune",
            Self::Orchestrate => "orchestrate",
        }
    }
}

/// Summary returned by every run, from either trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupReport {
    /// Run identifier, also recorded on the run span.
    pub run_id: Uuid,
    /// What started the run.
    pub trigger: Trigger,
    /// Overall outcome.
    pub success: bool,
    /// Final lifecycle state.
    pub state: BackupState,
    /// Stage that failed, if any.
    pub failed_stage: Option<BackupStage>,
    /// Failure description, if any.
    pub error: Option<String>,
    /// Name of the artifact written by this run.
    pub artifact: Option<String>,
    /// Artifacts removed by retention.
    pub pruned: Vec<String>,
    /// Non-fatal retention problem.
    pub prune_warning: Option<String>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Finish time.
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn artifact_names_carry_day_prefix_and_timestamp() {
        let started = Utc
            .with_ymd_and_hms(2024, 3, 9, 5, 30, 7)
            .single()
            .expect("valid time");
        let name = BackupArtifact::name_for(started, "mailbackup.tar");
        assert_eq!(name, "2024-03-09/20240309T053007Z-mailbackup.tar");
        assert!(BackupArtifact::is_backup_name(&name));
    }

    #[test]
    fn non_backup_names_are_recognised() {
        assert!(!BackupArtifact::is_backup_name("notes.txt"));
        assert!(!BackupArtifact::is_backup_name("2024-13-01/x.tar"));
        assert!(!BackupArtifact::is_backup_name("2024-03-09/"));
        assert!(!BackupArtifact::is_backup_name("images/2024-03-09/x.tar"));
    }

    #[test]
    fn states_only_move_forward() {
        assert!(BackupState::Idle.can_advance_to(BackupState::Resolving));
        assert!(BackupState::Connected.can_advance_to(BackupState::Archiving));
        assert!(BackupState::Transferring.can_advance_to(BackupState::Failed));
        assert!(!BackupState::Archiving.can_advance_to(BackupState::Connected));
        assert!(!BackupState::Archiving.can_advance_to(BackupState::Archiving));
        assert!(!BackupState::Succeeded.can_advance_to(BackupState::Failed));
        assert!(!BackupState::Failed.can_advance_to(BackupState::Succeeded));
        assert!(!BackupState::Resolving.can_advance_to(BackupState::Idle));
    }

    #[test]
    fn credential_rendering_hides_signature() -> Result<(), url::ParseError> {
        let credential = DelegatedWriteCredential {
            target_uri: Url::parse(
                "https://acct.blob.core.windows.net/mail-backup/2024-03-09/a.tar?sv=2020-10-02&sig=abc",
            )?,
            expires_at: Utc::now(),
            allowed_operations: vec![WriteOperation::Create, WriteOperation::Write],
        };
        let shown = credential.to_string();
        assert_eq!(
            shown,
            "https://acct.blob.core.windows.net/mail-backup/2024-03-09/a.tar?<redacted>"
        );
        assert!(!format!("{credential:?}").contains("sig=abc"));
        Ok(())
    }

    #[test]
    fn command_success_requires_zero_exit() {
        let mut result = CommandResult {
            command: "true".into(),
            exit_status: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(result.success());
        result.exit_status = Some(1);
        assert!(!result.success());
        result.exit_status = None;
        assert!(!result.success());
    }
}
