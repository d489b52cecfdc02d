//! In-memory object container with an operation log.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mailvault_backup::{
    BackupArtifact, Clock, DelegatedWriteCredential, ObjectStore, StorageError, UploadBody,
    WriteOperation,
};
use tokio::io::AsyncReadExt;
use url::Url;

const DELEGATED_SCHEME: &str = "memory://";

/// One call observed by [`MemoryObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Container listing.
    List,
    /// Property lookup.
    Stat(String),
    /// Streamed or delegated upload.
    Put(String),
    /// Deletion attempt.
    Delete(String),
    /// Delegated credential minted.
    Delegate(String),
}

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<String, BackupArtifact>,
    ops: Vec<StoreOp>,
    observed_backups: Vec<usize>,
    failing_deletes: HashSet<String>,
    fail_list: bool,
    discard_uploads: bool,
}

impl StoreState {
    fn record(&mut self, op: StoreOp) {
        self.ops.push(op);
        let backups = self
            .objects
            .keys()
            .filter(|name| BackupArtifact::is_backup_name(name))
            .count();
        self.observed_backups.push(backups);
    }

    fn store(&mut self, artifact: BackupArtifact) {
        let name = artifact.name.clone();
        if !self.discard_uploads {
            self.objects.insert(name.clone(), artifact);
        }
        self.record(StoreOp::Put(name));
    }
}

/// Container kept in memory. Clones share contents and log.
#[derive(Clone)]
pub struct MemoryObjectStore {
    container: String,
    state: Arc<Mutex<StoreState>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryObjectStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MemoryObjectStore")
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl MemoryObjectStore {
    /// Empty container stamping uploads with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            container: "mail-backup".to_string(),
            state: Arc::new(Mutex::new(StoreState::default())),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object without logging an operation.
    pub fn insert_at(&self, name: &str, created_at: DateTime<Utc>, size: u64) {
        self.lock().objects.insert(
            name.to_string(),
            BackupArtifact {
                name: name.to_string(),
                created_at,
                size,
            },
        );
    }

    /// Seed an object `age` older than the clock's current time.
    pub fn insert_aged(&self, name: &str, age: TimeDelta) {
        self.insert_at(name, self.clock.now() - age, 1024);
    }

    /// Names currently stored, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// One stored object.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<BackupArtifact> {
        self.lock().objects.get(name).cloned()
    }

    /// Every operation so far, in order.
    #[must_use]
    pub fn ops(&self) -> Vec<StoreOp> {
        self.lock().ops.clone()
    }

    /// Number of backup objects present after each logged operation.
    #[must_use]
    pub fn observed_backup_counts(&self) -> Vec<usize> {
        self.lock().observed_backups.clone()
    }

    /// Make deletions of `name` fail.
    pub fn fail_deletes_of(&self, name: &str) {
        self.lock().failing_deletes.insert(name.to_string());
    }

    /// Make listings fail.
    pub fn fail_listing(&self) {
        self.lock().fail_list = true;
    }

    /// Accept uploads but never store them.
    pub fn discard_uploads(&self) {
        self.lock().discard_uploads = true;
    }

    /// Apply the upload a remote `curl` would perform for a delegated URI in
    /// `command`. Returns `false` when the command carries no such URI.
    pub fn accept_delegated_upload(&self, command: &str, size: u64) -> bool {
        let Some(start) = command.find(DELEGATED_SCHEME) else {
            return false;
        };
        let rest = &command[start..];
        let end = rest.find('\'').unwrap_or(rest.len());
        let Ok(uri) = Url::parse(&rest[..end]) else {
            return false;
        };
        let name = uri.path().trim_start_matches('/').to_string();
        if name.is_empty() {
            return false;
        }
        let artifact = BackupArtifact {
            name,
            created_at: self.clock.now(),
            size,
        };
        self.lock().store(artifact);
        true
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<BackupArtifact>, StorageError> {
        let mut state = self.lock();
        state.record(StoreOp::List);
        if state.fail_list {
            return Err(StorageError::Status {
                operation: "memory.list",
                status: 503,
                body: "listing unavailable".to_string(),
            });
        }
        Ok(state
            .objects
            .values()
            .filter(|artifact| prefix.is_none_or(|prefix| artifact.name.starts_with(prefix)))
            .cloned()
            .collect())
    }

    async fn stat(&self, name: &str) -> Result<Option<BackupArtifact>, StorageError> {
        let mut state = self.lock();
        state.record(StoreOp::Stat(name.to_string()));
        Ok(state.objects.get(name).cloned())
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let mut state = self.lock();
        if state.failing_deletes.contains(name) {
            state.record(StoreOp::Delete(name.to_string()));
            return Err(StorageError::Status {
                operation: "memory.delete",
                status: 500,
                body: "delete refused".to_string(),
            });
        }
        state.objects.remove(name);
        state.record(StoreOp::Delete(name.to_string()));
        Ok(())
    }

    async fn put_stream(
        &self,
        name: &str,
        mut body: UploadBody,
        _length: u64,
    ) -> Result<(), StorageError> {
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes)
            .await
            .map_err(|source| StorageError::Body { source })?;
        let artifact = BackupArtifact {
            name: name.to_string(),
            created_at: self.clock.now(),
            size: bytes.len() as u64,
        };
        self.lock().store(artifact);
        Ok(())
    }

    fn delegate_write(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<DelegatedWriteCredential, StorageError> {
        let rejected = || StorageError::Rejected {
            operation: "memory.delegate",
            name: name.to_string(),
        };
        let mut target_uri =
            Url::parse(&format!("{DELEGATED_SCHEME}{}/", self.container)).map_err(|_| rejected())?;
        target_uri
            .path_segments_mut()
            .map_err(|()| rejected())?
            .pop_if_empty()
            .extend(name.split('/'));
        target_uri
            .query_pairs_mut()
            .append_pair("sp", "cw")
            .append_pair("sig", "fixture-signature");
        let ttl = TimeDelta::from_std(ttl).map_err(|_| rejected())?;
        self.lock().record(StoreOp::Delegate(name.to_string()));
        Ok(DelegatedWriteCredential {
            target_uri,
            expires_at: self.clock.now() + ttl,
            allowed_operations: vec![WriteOperation::Create, WriteOperation::Write],
        })
    }
}
