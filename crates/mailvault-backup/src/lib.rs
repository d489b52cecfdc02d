//! Remote mail backup pipeline.
//!
//! A run resolves its configuration, opens one SSH session to the mail host,
//! archives the mail directory there, moves the archive into Blob storage,
//! cleans up the remote copy and prunes expired backups. Every stage sits
//! behind a trait so the pipeline runs against scripted fakes in tests.
#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod azure;
pub mod clock;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod retention;
pub mod sas;
pub mod session;
pub mod shell;
pub mod single_flight;
pub mod ssh;
pub mod storage;
pub mod transfer;

pub use archive::ArchiveBuilder;
pub use azure::AzureBlobStore;
pub use clock::{Clock, SystemClock};
pub use error::{BackupError, BackupResult, SessionError, StageFailure, StorageError, describe};
pub use model::{
    BackupArtifact, BackupReport, BackupStage, BackupState, CommandResult,
    DelegatedWriteCredential, Trigger, WriteOperation,
};
pub use orchestrator::{BACKUP_JOB, BackupOrchestrator};
pub use retention::{PruneReport, RetentionPruner, select_expired};
pub use sas::{SAS_VERSION, SasGrant, SasScope, SasSigner, SasToken};
pub use session::{RemoteFile, RemoteSession, SessionConnector};
pub use shell::{RemoteCommand, maintenance_command, quote};
pub use single_flight::{FlightGuard, SingleFlight};
pub use ssh::{OpenSshConnector, OpenSshSession};
pub use storage::{ObjectStore, UploadBody};
pub use transfer::{DelegatedUploadAgent, StreamingAgent, TransferAgent, TransferOutcome, agent_for};
