//! Default values applied when optional keys are absent.
//!
//! # Design
//! - Keep time-based defaults explicit for auditability.
//! - The delegated credential outlives the longest permitted remote command.

/// SSH port used when none is configured.
pub const SSH_PORT: u16 = 22;
/// Retention window, in days, applied to stored backups.
pub const RETENTION_DAYS: u32 = 2;
/// Upper bound for a single remote command, in seconds.
pub const COMMAND_TIMEOUT_SECS: u64 = 90 * 60;
/// Lifetime of the delegated write credential, in seconds.
pub const CREDENTIAL_TTL_SECS: u64 = 2 * 60 * 60;
/// Daily schedule (UTC) used when none is configured.
pub const SCHEDULE_AT: &str = "05:30";
/// Destination container used when none is configured.
pub const STORAGE_CONTAINER: &str = "mail-backup";
/// Listener for the on-demand trigger.
pub const BIND_ADDR: &str = "127.0.0.1:7070";
/// Log level used when neither `RUST_LOG` nor the level key is set.
pub const LOG_LEVEL: &str = "info";
