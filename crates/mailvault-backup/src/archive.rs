//! Remote archive creation and removal.

use tracing::{info, warn};

use crate::error::StageFailure;
use crate::model::CommandResult;
use crate::session::RemoteSession;
use crate::shell::{RemoteCommand, quote};

/// Issues the remote `tar` and `rm` commands for one run.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveBuilder {
    use_sudo: bool,
}

impl ArchiveBuilder {
    /// Builder that optionally elevates with `sudo -n`.
    #[must_use]
    pub const fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }

    const fn sudo(self) -> &'static str {
        if self.use_sudo { "sudo -n " } else { "" }
    }

    /// Command that packs `source_path` into `archive`.
    #[must_use]
    pub fn create_command(self, source_path: &str, archive: &str) -> RemoteCommand {
        RemoteCommand::new(format!(
            "{}tar -cf {} {}",
            self.sudo(),
            quote(archive),
            quote(source_path)
        ))
    }

    /// Command that removes `archive`; succeeds when it is already gone.
    #[must_use]
    pub fn delete_command(self, archive: &str) -> RemoteCommand {
        RemoteCommand::new(format!("{}rm -f {}", self.sudo(), quote(archive)))
    }

    /// Create the archive. Success is exit status zero and nothing else.
    ///
    /// # Errors
    ///
    /// Returns [`StageFailure::NonZeroExit`] when the command fails, or
    /// [`StageFailure::Session`] when it could not run or timed out.
    pub async fn create_archive(
        self,
        session: &dyn RemoteSession,
        source_path: &str,
        archive: &str,
    ) -> Result<CommandResult, StageFailure> {
        let result = session
            .run(&self.create_command(source_path, archive))
            .await?;
        if !result.success() {
            return Err(StageFailure::NonZeroExit {
                command: result.command,
                exit_status: result.exit_status,
                stderr: result.stderr,
            });
        }
        info!(archive, source_path, "remote archive created");
        Ok(result)
    }

    /// Remove the archive. Best effort: callers log failures and move on.
    ///
    /// # Errors
    ///
    /// Returns the failure so the caller can record it; it never changes a
    /// transfer outcome.
    pub async fn delete_archive(
        self,
        session: &dyn RemoteSession,
        archive: &str,
    ) -> Result<(), StageFailure> {
        let result = session.run(&self.delete_command(archive)).await?;
        if result.success() {
            Ok(())
        } else {
            warn!(
                archive,
                exit_status = ?result.exit_status,
                stderr = %result.stderr,
                "remote archive removal failed"
            );
            Err(StageFailure::NonZeroExit {
                command: result.command,
                exit_status: result.exit_status,
                stderr: result.stderr,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::session::RemoteFile;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ExitWith {
        status: i32,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteSession for ExitWith {
        async fn run(&self, command: &RemoteCommand) -> Result<CommandResult, SessionError> {
            self.seen
                .lock()
                .map_err(|_| SessionError::Io {
                    operation: "test.lock",
                    source: std::io::Error::other("poisoned"),
                })?
                .push(command.text().to_string());
            Ok(CommandResult {
                command: command.display().to_string(),
                exit_status: Some(self.status),
                stdout: String::new(),
                stderr: "tar: /var/mail: Cannot stat".into(),
            })
        }

        async fn open_read(&self, path: &str) -> Result<RemoteFile, SessionError> {
            Err(SessionError::RemoteFileNotFound {
                path: path.to_string(),
            })
        }

        fn spawn_detached(&self, _command: &RemoteCommand) {}

        async fn close(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn session(status: i32) -> ExitWith {
        ExitWith {
            status,
            seen: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn commands_quote_paths_and_honour_sudo() {
        let builder = ArchiveBuilder::new(true);
        assert_eq!(
            builder.create_command("/var/mail", "mailbackup.tar").text(),
            "sudo -n tar -cf 'mailbackup.tar' '/var/mail'"
        );
        assert_eq!(
            ArchiveBuilder::new(false).delete_command("mail backup.tar").text(),
            "rm -f 'mail backup.tar'"
        );
    }

    #[tokio::test]
    async fn zero_exit_creates_archive() -> Result<(), StageFailure> {
        let remote = session(0);
        let result = ArchiveBuilder::new(false)
            .create_archive(&remote, "/var/mail", "mailbackup.tar")
            .await?;
        assert!(result.success());
        Ok(())
    }

    #[tokio::test]
    async fn non_zero_exit_fails_regardless_of_output() {
        let remote = session(2);
        let err = ArchiveBuilder::new(false)
            .create_archive(&remote, "/var/mail", "mailbackup.tar")
            .await
            .expect_err("tar failed");
        assert!(matches!(
            err,
            StageFailure::NonZeroExit {
                exit_status: Some(2),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn delete_reports_failure_without_panicking() {
        let remote = session(1);
        let result = ArchiveBuilder::new(true)
            .delete_archive(&remote, "mailbackup.tar")
            .await;
        assert!(result.is_err());
        let seen = remote.seen.lock().expect("lock");
        assert_eq!(seen.as_slice(), ["sudo -n rm -f 'mailbackup.tar'"]);
    }
}
