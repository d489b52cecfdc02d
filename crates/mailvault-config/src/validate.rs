//! Parsing helpers for flat string configuration values.
//!
//! Each helper takes the key being parsed so failures can name it, and never
//! echoes values belonging to secret keys.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::NaiveTime;

use crate::error::{ConfigError, ConfigResult};
use crate::keys::ConfigKey;
use crate::model::TransferMode;

fn invalid(key: ConfigKey, reason: &'static str, value: &str) -> ConfigError {
    if key.is_secret() {
        ConfigError::InvalidField {
            field: key.env_name(),
            reason,
            value: None,
        }
    } else {
        ConfigError::invalid(key.env_name(), reason, value)
    }
}

/// Parse a boolean flag. Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for any other spelling.
pub fn parse_bool(key: ConfigKey, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, "not_a_boolean", value)),
    }
}

/// Parse a TCP port, rejecting zero.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when the value is not in `1..=65535`.
pub fn parse_port(key: ConfigKey, value: &str) -> ConfigResult<u16> {
    match value.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid(key, "not_a_port", value)),
        Ok(port) => Ok(port),
    }
}

/// Parse a strictly positive whole number of seconds.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for zero or non-numeric values.
pub fn parse_seconds(key: ConfigKey, value: &str) -> ConfigResult<Duration> {
    match value.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(invalid(key, "must_be_positive_integer", value)),
        Ok(secs) => Ok(Duration::from_secs(secs)),
    }
}

/// Longest accepted day count (one hundred years).
const MAX_DAYS: u32 = 36_500;

/// Parse a strictly positive day count of at most one hundred years.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for zero, oversized or non-numeric values.
pub fn parse_days(key: ConfigKey, value: &str) -> ConfigResult<u32> {
    match value.trim().parse::<u32>() {
        Ok(0) | Err(_) => Err(invalid(key, "must_be_positive_integer", value)),
        Ok(days) if days > MAX_DAYS => Err(invalid(key, "out_of_range", value)),
        Ok(days) => Ok(days),
    }
}

/// Parse an `HH:MM` time of day.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when the value is not a valid time.
pub fn parse_time_of_day(key: ConfigKey, value: &str) -> ConfigResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| invalid(key, "expected_hh_mm", value))
}

/// Parse a socket address such as `127.0.0.1:7070`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when the address does not parse.
pub fn parse_socket_addr(key: ConfigKey, value: &str) -> ConfigResult<SocketAddr> {
    value
        .trim()
        .parse::<SocketAddr>()
        .map_err(|_| invalid(key, "not_a_socket_address", value))
}

/// Parse the transfer mode selector.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for unknown modes.
pub fn parse_transfer_mode(key: ConfigKey, value: &str) -> ConfigResult<TransferMode> {
    TransferMode::parse(value).ok_or_else(|| invalid(key, "unknown_transfer_mode", value))
}

/// Validate a blob container name: 3-63 characters of lowercase letters,
/// digits and single hyphens, starting and ending with an alphanumeric.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when the name breaks those rules.
pub fn validate_container_name(key: ConfigKey, value: &str) -> ConfigResult<String> {
    let name = value.trim();
    let length_ok = (3..=63).contains(&name.len());
    let chars_ok = name
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-');
    let edges_ok = name
        .chars()
        .next()
        .zip(name.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());
    if length_ok && chars_ok && edges_ok && !name.contains("--") {
        Ok(name.to_string())
    } else {
        Err(invalid(key, "invalid_container_name", value))
    }
}

/// Validate the archive file name: a single path segment with no quoting hazards.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when the name contains a path
/// separator, control characters, or is a relative directory marker.
pub fn validate_archive_filename(key: ConfigKey, value: &str) -> ConfigResult<String> {
    let name = value.trim();
    let bad_char = name.chars().any(|ch| ch == '/' || ch == '\\' || ch.is_control());
    if bad_char || name == "." || name == ".." {
        Err(invalid(key, "invalid_archive_filename", value))
    } else {
        Ok(name.to_string())
    }
}
