//! Remote session abstraction.
//!
//! # Design
//! - One session per run; the orchestrator owns it and closes it on every path.
//! - Success is judged from exit status only, never from output.
//! - Detached commands are dispatched and never awaited by the caller.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use mailvault_config::BackupConfiguration;
use tokio::io::AsyncRead;

use crate::error::SessionError;
use crate::model::CommandResult;
use crate::shell::RemoteCommand;

/// Streaming read handle for a remote file.
///
/// `reader` yields the file bytes; `completion` resolves once the remote reader
/// has exited and reports whether the stream was complete. Callers must drain
/// `reader` before awaiting `completion`.
pub struct RemoteFile {
    /// File size reported by the remote host.
    pub length: u64,
    /// File content.
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    /// Remote reader exit check.
    pub completion: BoxFuture<'static, Result<(), SessionError>>,
}

impl fmt::Debug for RemoteFile {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteFile")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// One authenticated connection to the backup host.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a command to completion and capture its result.
    async fn run(&self, command: &RemoteCommand) -> Result<CommandResult, SessionError>;

    /// Open a remote file for streaming read.
    async fn open_read(&self, path: &str) -> Result<RemoteFile, SessionError>;

    /// Dispatch a command without waiting for it. Failures are logged, never returned.
    fn spawn_detached(&self, command: &RemoteCommand);

    /// Release the connection.
    async fn close(&self) -> Result<(), SessionError>;
}

/// Opens sessions to the configured host.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Authenticate and return a live session.
    async fn connect(
        &self,
        config: &BackupConfiguration,
    ) -> Result<Box<dyn RemoteSession>, SessionError>;
}
