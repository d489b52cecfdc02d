//! Key lookup sources and the resolver that turns them into typed settings.
//!
//! # Design
//! - Sources are plain lookups; all trimming, defaulting and validation lives in
//!   [`SecretResolver`].
//! - Missing required keys are gathered before reporting so one diagnostic names
//!   all of them.
//! - Nothing here caches: each call reads the source again.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::warn;

use crate::defaults;
use crate::error::{ConfigError, ConfigResult};
use crate::keys::ConfigKey;
use crate::model::{
    AppConfig, BackupConfiguration, LoggingSettings, PipelineSettings, ScheduleSettings, Secret,
    ServerSettings, StorageSettings,
};
use crate::validate;

/// A flat key/value store consulted for configuration.
pub trait ConfigSource: Send + Sync {
    /// Raw value for `key`, if the store holds one.
    fn lookup(&self, key: ConfigKey) -> Option<String>;
}

/// Reads keys from process environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn lookup(&self, key: ConfigKey) -> Option<String> {
        std::env::var(key.env_name()).ok()
    }
}

/// In-memory source, used by tests and embedders.
#[derive(Debug, Default, Clone)]
pub struct MapSource {
    values: HashMap<ConfigKey, String>,
}

impl MapSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: ConfigKey, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    /// Insert or replace a value.
    pub fn set(&mut self, key: ConfigKey, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }

    /// Remove a value.
    pub fn remove(&mut self, key: ConfigKey) {
        self.values.remove(&key);
    }
}

impl ConfigSource for MapSource {
    fn lookup(&self, key: ConfigKey) -> Option<String> {
        self.values.get(&key).cloned()
    }
}

impl AppConfig {
    /// Resolve process-wide settings from `source`.
    ///
    /// # Errors
    ///
    /// See [`SecretResolver::resolve_app`].
    pub fn load(source: &dyn ConfigSource) -> ConfigResult<Self> {
        SecretResolver::new(source).resolve_app()
    }
}

/// Resolves named settings from a [`ConfigSource`].
pub struct SecretResolver<'a> {
    source: &'a dyn ConfigSource,
}

impl<'a> SecretResolver<'a> {
    /// Wrap a source.
    #[must_use]
    pub fn new(source: &'a dyn ConfigSource) -> Self {
        Self { source }
    }

    /// Trimmed, non-empty value for `key`.
    #[must_use]
    pub fn optional(&self, key: ConfigKey) -> Option<String> {
        self.source
            .lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// Trimmed, non-empty value for a required `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingKeys`] naming `key` when it is absent or blank.
    pub fn resolve(&self, key: ConfigKey) -> ConfigResult<String> {
        self.optional(key).ok_or_else(|| ConfigError::MissingKeys {
            keys: vec![key.env_name()],
        })
    }

    /// Read the periodic-run feature flag. Absent means disabled.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the flag is not a boolean.
    pub fn periodic_enabled(&self) -> ConfigResult<bool> {
        self.flag(ConfigKey::PeriodicBackup, false)
    }

    /// Resolve the complete connection tuple and run tunables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingKeys`] listing every absent required key, or
    /// [`ConfigError::InvalidField`] when a tunable fails to parse.
    pub fn resolve_backup(&self) -> ConfigResult<BackupConfiguration> {
        let [host, username, private_key, source_path, archive_filename] =
            self.require_all(ConfigKey::REQUIRED_FOR_BACKUP)?;
        let archive_filename =
            validate::validate_archive_filename(ConfigKey::ArchiveFilename, &archive_filename)?;

        Ok(BackupConfiguration {
            host,
            username,
            private_key: Secret::new(private_key),
            source_path,
            archive_filename,
            pipeline: self.pipeline()?,
        })
    }

    /// Resolve process-wide settings needed at boot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingKeys`] when storage credentials are absent,
    /// or [`ConfigError::InvalidField`] for malformed values.
    pub fn resolve_app(&self) -> ConfigResult<AppConfig> {
        let [account, account_key] = self.require_all(ConfigKey::REQUIRED_FOR_STORAGE)?;
        let container = self
            .optional(ConfigKey::StorageContainer)
            .unwrap_or_else(|| defaults::STORAGE_CONTAINER.to_string());
        let container = validate::validate_container_name(ConfigKey::StorageContainer, &container)?;

        let daily_at = validate::parse_time_of_day(
            ConfigKey::ScheduleAt,
            &self
                .optional(ConfigKey::ScheduleAt)
                .unwrap_or_else(|| defaults::SCHEDULE_AT.to_string()),
        )?;
        let bind_addr = validate::parse_socket_addr(
            ConfigKey::BindAddr,
            &self
                .optional(ConfigKey::BindAddr)
                .unwrap_or_else(|| defaults::BIND_ADDR.to_string()),
        )?;

        Ok(AppConfig {
            storage: StorageSettings {
                account,
                account_key: Secret::new(account_key),
                container,
                endpoint: self.optional(ConfigKey::StorageEndpoint),
            },
            schedule: ScheduleSettings {
                daily_at,
                run_on_startup: self.flag(ConfigKey::RunOnStartup, false)?,
            },
            server: ServerSettings {
                bind_addr,
                trigger_key: self.optional(ConfigKey::TriggerKey).map(Secret::new),
            },
            logging: LoggingSettings {
                level: self
                    .optional(ConfigKey::LogLevel)
                    .unwrap_or_else(|| defaults::LOG_LEVEL.to_string()),
                format: self.optional(ConfigKey::LogFormat),
            },
        })
    }

    fn require_all<const N: usize>(&self, keys: [ConfigKey; N]) -> ConfigResult<[String; N]> {
        let values = keys.map(|key| self.optional(key));
        let missing: Vec<&'static str> = keys
            .iter()
            .zip(values.iter())
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| key.env_name())
            .collect();
        if !missing.is_empty() {
            warn!(keys = ?missing, "required configuration values are missing");
            return Err(ConfigError::MissingKeys { keys: missing });
        }
        Ok(values.map(Option::unwrap_or_default))
    }

    fn flag(&self, key: ConfigKey, default: bool) -> ConfigResult<bool> {
        self.optional(key)
            .map_or(Ok(default), |value| validate::parse_bool(key, &value))
    }

    fn pipeline(&self) -> ConfigResult<PipelineSettings> {
        let base = PipelineSettings::default();
        let ssh_port = self
            .optional(ConfigKey::SshPort)
            .map_or(Ok(base.ssh_port), |value| {
                validate::parse_port(ConfigKey::SshPort, &value)
            })?;
        let transfer_mode = self
            .optional(ConfigKey::TransferMode)
            .map_or(Ok(base.transfer_mode), |value| {
                validate::parse_transfer_mode(ConfigKey::TransferMode, &value)
            })?;
        let retention_days = self
            .optional(ConfigKey::RetentionDays)
            .map_or(Ok(base.retention_days), |value| {
                validate::parse_days(ConfigKey::RetentionDays, &value)
            })?;
        let command_timeout = self
            .optional(ConfigKey::CommandTimeoutSecs)
            .map_or(Ok(base.command_timeout), |value| {
                validate::parse_seconds(ConfigKey::CommandTimeoutSecs, &value)
            })?;
        let credential_ttl = self
            .optional(ConfigKey::CredentialTtlSecs)
            .map_or(Ok(base.credential_ttl), |value| {
                validate::parse_seconds(ConfigKey::CredentialTtlSecs, &value)
            })?;

        if credential_ttl < command_timeout {
            return Err(ConfigError::invalid(
                ConfigKey::CredentialTtlSecs.env_name(),
                "shorter_than_command_timeout",
                &credential_ttl.as_secs().to_string(),
            ));
        }

        Ok(PipelineSettings {
            ssh_port,
            known_hosts: self.optional(ConfigKey::SshKnownHosts).map(PathBuf::from),
            use_sudo: self.flag(ConfigKey::UseSudo, base.use_sudo)?,
            remote_maintenance: self.flag(ConfigKey::RemoteMaintenance, base.remote_maintenance)?,
            transfer_mode,
            retention_days,
            command_timeout,
            credential_ttl,
        })
    }
}
