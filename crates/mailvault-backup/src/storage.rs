//! Object storage boundary.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::StorageError;
use crate::model::{BackupArtifact, DelegatedWriteCredential};

/// Upload body handed to [`ObjectStore::put_stream`].
pub type UploadBody = Pin<Box<dyn AsyncRead + Send>>;

/// Container holding backup artifacts.
///
/// Deletion is idempotent: removing an object that does not exist succeeds.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object, optionally restricted to a name prefix.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<BackupArtifact>, StorageError>;

    /// Properties of one object, `None` when it does not exist.
    async fn stat(&self, name: &str) -> Result<Option<BackupArtifact>, StorageError>;

    /// Delete one object.
    async fn delete(&self, name: &str) -> Result<(), StorageError>;

    /// Upload `length` bytes read from `body` as `name`.
    async fn put_stream(
        &self,
        name: &str,
        body: UploadBody,
        length: u64,
    ) -> Result<(), StorageError>;

    /// Mint a create/write grant for `name` valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns an error when the grant cannot be signed.
    fn delegate_write(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<DelegatedWriteCredential, StorageError>;
}
