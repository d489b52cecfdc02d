//! Every configuration key understood by the service.

use std::fmt::{self, Display, Formatter};

/// A recognised configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Remote host name or address.
    SshHost,
    /// Remote login name.
    SshUser,
    /// Private key material (PEM/OpenSSH text, not a path).
    SshPrivateKey,
    /// Directory tree archived on the remote host.
    SourcePath,
    /// File name of the archive created on the remote host.
    ArchiveFilename,
    /// Remote SSH port.
    SshPort,
    /// Optional known-hosts file pinning the remote host key.
    SshKnownHosts,
    /// Whether remote archive commands run under `sudo`.
    UseSudo,
    /// Whether to trigger the background package update on connect.
    RemoteMaintenance,
    /// Transfer strategy selector.
    TransferMode,
    /// Retention window in days.
    RetentionDays,
    /// Upper bound for each remote command, in seconds.
    CommandTimeoutSecs,
    /// Lifetime of the delegated write credential, in seconds.
    CredentialTtlSecs,
    /// Feature flag gating the scheduled run.
    PeriodicBackup,
    /// Daily schedule time (`HH:MM`, UTC).
    ScheduleAt,
    /// Run one backup immediately when the scheduler starts.
    RunOnStartup,
    /// Storage account name.
    StorageAccount,
    /// Storage account key (base64).
    StorageKey,
    /// Destination container.
    StorageContainer,
    /// Optional storage endpoint override.
    StorageEndpoint,
    /// Listener address for the on-demand trigger.
    BindAddr,
    /// Optional shared key required by the on-demand trigger.
    TriggerKey,
    /// Log level.
    LogLevel,
    /// Log format (`json` or `pretty`).
    LogFormat,
}

impl ConfigKey {
    /// Keys that must all be present before a backup may touch the network.
    pub const REQUIRED_FOR_BACKUP: [Self; 5] = [
        Self::SshHost,
        Self::SshUser,
        Self::SshPrivateKey,
        Self::SourcePath,
        Self::ArchiveFilename,
    ];

    /// Keys that must be present to bind the storage container at boot.
    pub const REQUIRED_FOR_STORAGE: [Self; 2] = [Self::StorageAccount, Self::StorageKey];

    /// Environment variable carrying this key.
    #[must_use]
    pub const fn env_name(self) -> &'static str {
        match self {
            Self::SshHost => "MAILVAULT_SSH_HOST",
            Self::SshUser => "MAILVAULT_SSH_USER",
            Self::SshPrivateKey => "MAILVAULT_SSH_PRIVATE_KEY",
            Self::SourcePath => "MAILVAULT_SOURCE_PATH",
            Self::ArchiveFilename => "MAILVAULT_ARCHIVE_FILENAME",
            Self::SshPort => "MAILVAULT_SSH_PORT",
            Self::SshKnownHosts => "MAILVAULT_SSH_KNOWN_HOSTS",
            Self::UseSudo => "MAILVAULT_USE_SUDO",
            Self::RemoteMaintenance => "MAILVAULT_REMOTE_MAINTENANCE",
            Self::TransferMode => "MAILVAULT_TRANSFER_MODE",
            Self::RetentionDays => "MAILVAULT_RETENTION_DAYS",
            Self::CommandTimeoutSecs => "MAILVAULT_COMMAND_TIMEOUT_SECS",
            Self::CredentialTtlSecs => "MAILVAULT_CREDENTIAL_TTL_SECS",
            Self::PeriodicBackup => "MAILVAULT_PERIODIC_BACKUP",
            Self::ScheduleAt => "MAILVAULT_SCHEDULE_AT",
            Self::RunOnStartup => "MAILVAULT_RUN_ON_STARTUP",
            Self::StorageAccount => "MAILVAULT_STORAGE_ACCOUNT",
            Self::StorageKey => "MAILVAULT_STORAGE_KEY",
            Self::StorageContainer => "MAILVAULT_STORAGE_CONTAINER",
            Self::StorageEndpoint => "MAILVAULT_STORAGE_ENDPOINT",
            Self::BindAddr => "MAILVAULT_BIND_ADDR",
            Self::TriggerKey => "MAILVAULT_TRIGGER_KEY",
            Self::LogLevel => "MAILVAULT_LOG_LEVEL",
            Self::LogFormat => "MAILVAULT_LOG_FORMAT",
        }
    }

    /// Whether values for this key must never be echoed in diagnostics.
    #[must_use]
    pub const fn is_secret(self) -> bool {
        matches!(self, Self::SshPrivateKey | Self::StorageKey | Self::TriggerKey)
    }
}

impl Display for ConfigKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.env_name())
    }
}
