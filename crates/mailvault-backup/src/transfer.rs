//! Moving the remote archive into object storage.
//!
//! # Design
//! - Two strategies behind one trait, chosen per run from configuration.
//! - Delegated: the store mints a blob-scoped write grant before any remote
//!   command runs; the remote host uploads directly and removes its archive
//!   in the same command chain, preserving the upload's exit status.
//! - Streaming: the archive is read over the session and written to the
//!   store from this process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mailvault_config::{PipelineSettings, TransferMode};
use tracing::info;

use crate::archive::ArchiveBuilder;
use crate::error::{SessionError, StageFailure};
use crate::sas::SAS_VERSION;
use crate::session::{RemoteFile, RemoteSession};
use crate::shell::{RemoteCommand, quote};
use crate::storage::ObjectStore;

/// What a transfer reported about the bytes it moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferOutcome {
    /// Bytes written, when the strategy observed them.
    pub bytes: Option<u64>,
}

/// Moves one remote archive to one destination object.
#[async_trait]
pub trait TransferAgent: Send + Sync {
    /// Strategy implemented by this agent.
    fn mode(&self) -> TransferMode;

    /// Transfer `archive` on the remote host to `destination` in the store.
    ///
    /// # Errors
    ///
    /// Any non-zero exit, stream fault or storage failure.
    async fn transfer(
        &self,
        session: &dyn RemoteSession,
        archive: &str,
        destination: &str,
    ) -> Result<TransferOutcome, StageFailure>;
}

/// Build the agent selected by `pipeline.transfer_mode`.
#[must_use]
pub fn agent_for(
    store: Arc<dyn ObjectStore>,
    pipeline: &PipelineSettings,
) -> Box<dyn TransferAgent> {
    match pipeline.transfer_mode {
        TransferMode::Delegated => Box::new(DelegatedUploadAgent::new(
            store,
            pipeline.credential_ttl,
            ArchiveBuilder::new(pipeline.use_sudo),
        )),
        TransferMode::Streaming => {
            Box::new(StreamingAgent::new(store, pipeline.command_timeout))
        }
    }
}

/// Remote host uploads with `curl` to a delegated URI.
pub struct DelegatedUploadAgent {
    store: Arc<dyn ObjectStore>,
    ttl: Duration,
    builder: ArchiveBuilder,
}

impl DelegatedUploadAgent {
    /// Agent minting grants valid for `ttl`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, ttl: Duration, builder: ArchiveBuilder) -> Self {
        Self {
            store,
            ttl,
            builder,
        }
    }

    fn upload_command(&self, archive: &str, uri: &str) -> String {
        format!(
            "curl --fail --silent --show-error -T {} -H {} -H {} {}; status=$?; {}; exit $status",
            quote(archive),
            quote("x-ms-blob-type: BlockBlob"),
            quote(&format!("x-ms-version: {SAS_VERSION}")),
            quote(uri),
            self.builder.delete_command(archive).text()
        )
    }
}

#[async_trait]
impl TransferAgent for DelegatedUploadAgent {
    fn mode(&self) -> TransferMode {
        TransferMode::Delegated
    }

    async fn transfer(
        &self,
        session: &dyn RemoteSession,
        archive: &str,
        destination: &str,
    ) -> Result<TransferOutcome, StageFailure> {
        let credential = self.store.delegate_write(destination, self.ttl)?;
        let command = RemoteCommand::redacted(
            self.upload_command(archive, credential.target_uri.as_str()),
            self.upload_command(archive, &credential.redacted_uri()),
        );
        let result = session.run(&command).await?;
        if !result.success() {
            return Err(StageFailure::NonZeroExit {
                command: result.command,
                exit_status: result.exit_status,
                stderr: result.stderr,
            });
        }
        info!(
            archive,
            destination,
            expires_at = %credential.expires_at,
            "delegated upload completed"
        );
        Ok(TransferOutcome::default())
    }
}

/// This process reads the archive over the session and uploads it.
pub struct StreamingAgent {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl StreamingAgent {
    /// Agent bounding the whole transfer by `timeout`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn stream(
        &self,
        session: &dyn RemoteSession,
        archive: &str,
        destination: &str,
    ) -> Result<TransferOutcome, StageFailure> {
        let RemoteFile {
            length,
            reader,
            completion,
        } = session.open_read(archive).await?;
        self.store.put_stream(destination, reader, length).await?;
        completion.await?;
        info!(archive, destination, bytes = length, "streamed archive to storage");
        Ok(TransferOutcome {
            bytes: Some(length),
        })
    }
}

#[async_trait]
impl TransferAgent for StreamingAgent {
    fn mode(&self) -> TransferMode {
        TransferMode::Streaming
    }

    async fn transfer(
        &self,
        session: &dyn RemoteSession,
        archive: &str,
        destination: &str,
    ) -> Result<TransferOutcome, StageFailure> {
        tokio::time::timeout(self.timeout, self.stream(session, archive, destination))
            .await
            .map_err(|_| SessionError::Timeout {
                operation: "transfer.stream",
                timeout: self.timeout,
            })?
    }
}
