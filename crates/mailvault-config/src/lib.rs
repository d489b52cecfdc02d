//! Flat key/value configuration facade for the mail backup service.
//!
//! Layout: `keys.rs` (every recognised key and its environment name),
//! `loader.rs` (`ConfigSource` lookups and the `SecretResolver`), `model.rs`
//! (typed settings), `validate.rs` (parsing helpers), `defaults.rs`.
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

pub mod defaults;
pub mod error;
pub mod keys;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use keys::ConfigKey;
pub use loader::{ConfigSource, EnvSource, MapSource, SecretResolver};
pub use model::{
    AppConfig, BackupConfiguration, LoggingSettings, PipelineSettings, ScheduleSettings, Secret,
    ServerSettings, StorageSettings, TransferMode,
};
