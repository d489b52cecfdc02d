//! # Design
//!
//! - Constant-message errors with the context needed to reproduce a failure.
//! - `BackupError` mirrors the pipeline's failure taxonomy one-to-one; the
//!   lower-level `SessionError` and `StorageError` travel as sources.
//! - Secrets never appear in fields: commands are stored in their redacted form.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use mailvault_config::ConfigError;
use thiserror::Error;

/// Failures raised by a remote session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The local SSH client could not be started.
    #[error("ssh client could not be started")]
    Spawn {
        /// Operation that tried to start the client.
        operation: &'static str,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Authentication or network failure while opening the session.
    #[error("ssh connection to {host} failed")]
    Connect {
        /// Remote host.
        host: String,
        /// Client exit status, when it exited normally.
        exit_status: Option<i32>,
        /// Client diagnostic output.
        stderr: String,
    },
    /// A remote command exceeded its time budget.
    #[error("remote command timed out")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Budget that was exceeded.
        timeout: Duration,
    },
    /// The requested remote file does not exist.
    #[error("remote file not found")]
    RemoteFileNotFound {
        /// Remote path.
        path: String,
    },
    /// Streaming a remote file failed part-way.
    #[error("remote file stream failed")]
    Stream {
        /// Remote path.
        path: String,
        /// Exit status of the remote reader, when known.
        exit_status: Option<i32>,
        /// Diagnostic output from the reader.
        stderr: String,
    },
    /// Local filesystem failure while preparing the session.
    #[error("session io failure")]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Underlying IO error.
        source: io::Error,
    },
}

/// Failures raised by an object store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The HTTP request could not be completed.
    #[error("storage request failed")]
    Http {
        /// Operation that issued the request.
        operation: &'static str,
        /// Underlying client error.
        source: reqwest::Error,
    },
    /// The service answered with an unexpected status.
    #[error("storage returned status {status}")]
    Status {
        /// Operation that issued the request.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// A container listing could not be decoded.
    #[error("storage listing could not be parsed")]
    Listing {
        /// Underlying XML error.
        source: quick_xml::DeError,
    },
    /// The account key is not valid base64.
    #[error("storage account key is not valid base64")]
    InvalidKey {
        /// Underlying decode error.
        source: base64::DecodeError,
    },
    /// A timestamp reported by the service could not be parsed.
    #[error("storage timestamp could not be parsed")]
    InvalidTimestamp {
        /// Raw value.
        value: String,
        /// Underlying parse error.
        source: chrono::ParseError,
    },
    /// A request signature could not be computed.
    #[error("storage signature could not be computed")]
    Signing {
        /// Operation that signed the request.
        operation: &'static str,
    },
    /// A request URL could not be built.
    #[error("storage url could not be built")]
    Url {
        /// Operation that built the URL.
        operation: &'static str,
        /// Offending value.
        value: String,
    },
    /// Reading the upload body failed.
    #[error("storage upload body failed")]
    Body {
        /// Underlying IO error.
        source: io::Error,
    },
    /// The store refused the operation.
    #[error("storage operation rejected")]
    Rejected {
        /// Operation that was rejected.
        operation: &'static str,
        /// Object involved.
        name: String,
    },
}

impl StorageError {
    pub(crate) fn http(operation: &'static str, source: reqwest::Error) -> Self {
        Self::Http { operation, source }
    }
}

/// Why a pipeline stage failed.
#[derive(Debug, Error)]
pub enum StageFailure {
    /// The remote command ran but reported failure.
    #[error(
        "remote command exited with status {}{}",
        exit_label(*exit_status),
        stderr_detail(stderr)
    )]
    NonZeroExit {
        /// Redacted command text.
        command: String,
        /// Exit status; `None` when terminated by a signal.
        exit_status: Option<i32>,
        /// Captured diagnostic output.
        stderr: String,
    },
    /// The session itself failed (spawn, timeout, stream).
    #[error("remote session failure")]
    Session {
        /// Underlying session error.
        #[from]
        source: SessionError,
    },
    /// The object store failed.
    #[error("object storage failure")]
    Storage {
        /// Underlying storage error.
        #[from]
        source: StorageError,
    },
    /// The uploaded object did not pass verification.
    #[error("uploaded object failed verification: {reason}")]
    Verification {
        /// Object name.
        name: String,
        /// Static reason.
        reason: &'static str,
    },
}

fn exit_label(status: Option<i32>) -> String {
    status.map_or_else(|| "none (terminated)".to_string(), |code| code.to_string())
}

fn stderr_detail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" (stderr: {trimmed})")
    }
}

/// Terminal failures of a backup run.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Required configuration was absent; nothing was attempted.
    #[error("backup configuration incomplete")]
    ConfigurationMissing {
        /// Aggregated configuration error.
        source: ConfigError,
    },
    /// The remote host could not be reached or authenticated.
    #[error("connection to backup host failed")]
    ConnectionFailed {
        /// Remote host.
        host: String,
        /// Underlying session error.
        source: SessionError,
    },
    /// The remote archive command failed; no transfer was attempted.
    #[error("remote archive creation failed")]
    ArchiveFailed {
        /// Underlying stage failure.
        source: StageFailure,
    },
    /// The archive did not reach storage intact; retention was not run.
    #[error("archive transfer failed")]
    TransferFailed {
        /// Underlying stage failure.
        source: StageFailure,
    },
    /// Retention could not complete. Never fails a run on its own.
    #[error("retention pruning failed")]
    PruneFailed {
        /// Underlying storage error.
        source: StorageError,
    },
    /// Another run of the same job is in flight.
    #[error("backup already running")]
    AlreadyRunning {
        /// Job key held by the other run.
        job: &'static str,
    },
    /// An unanticipated fault was caught at the orchestrator boundary.
    #[error("backup run panicked")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
    /// The run task was torn down before it produced a report.
    #[error("backup run task did not complete")]
    Interrupted {
        /// Join failure from the runtime.
        source: tokio::task::JoinError,
    },
}

/// Convenience alias for backup results.
pub type BackupResult<T> = Result<T, BackupError>;

/// Render an error with its full source chain, outermost first.
#[must_use]
pub fn describe(error: &(dyn StdError + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut current = error.source();
    while let Some(cause) = current {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        current = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_walks_the_source_chain() {
        let err = BackupError::ArchiveFailed {
            source: StageFailure::NonZeroExit {
                command: "sudo tar -cf 'a.tar' '/var/mail'".into(),
                exit_status: Some(2),
                stderr: "tar: /var/mail: Cannot open".into(),
            },
        };
        assert_eq!(
            describe(&err),
            "remote archive creation failed: remote command exited with status 2 \
             (stderr: tar: /var/mail: Cannot open)"
        );
    }

    #[test]
    fn terminated_commands_render_without_status() {
        let failure = StageFailure::NonZeroExit {
            command: "tar".into(),
            exit_status: None,
            stderr: String::new(),
        };
        assert_eq!(
            failure.to_string(),
            "remote command exited with status none (terminated)"
        );
    }

    #[test]
    fn configuration_errors_keep_missing_keys() {
        let err = BackupError::ConfigurationMissing {
            source: ConfigError::MissingKeys {
                keys: vec!["MAILVAULT_SSH_HOST"],
            },
        };
        assert_eq!(
            describe(&err),
            "backup configuration incomplete: missing configuration values: MAILVAULT_SSH_HOST"
        );
    }

    #[test]
    fn session_errors_chain_through_stage_failure() {
        let err = BackupError::TransferFailed {
            source: StageFailure::from(SessionError::Timeout {
                operation: "run",
                timeout: Duration::from_secs(5),
            }),
        };
        assert_eq!(
            describe(&err),
            "archive transfer failed: remote session failure: remote command timed out"
        );
    }
}
