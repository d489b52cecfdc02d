//! Remote shell command construction.

use std::fmt::{self, Display, Formatter};

/// Quote a value for a POSIX shell using single quotes.
#[must_use]
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// A remote command line plus the form of it that is safe to log.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    text: String,
    display: String,
}

impl RemoteCommand {
    /// Command whose text contains nothing sensitive.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            display: text.clone(),
            text,
        }
    }

    /// Command whose logged form differs from the executed text.
    #[must_use]
    pub fn redacted(text: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            display: display.into(),
        }
    }

    /// Text sent to the remote shell.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Text safe for logs and reports.
    #[must_use]
    pub fn display(&self) -> &str {
        &self.display
    }
}

impl fmt::Debug for RemoteCommand {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_tuple("RemoteCommand")
            .field(&self.display)
            .finish()
    }
}

impl Display for RemoteCommand {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.display)
    }
}

/// Fire-and-forget package refresh run after connecting.
///
/// Output is discarded and the remote shell returns immediately; the caller
/// never inspects the result.
#[must_use]
pub fn maintenance_command(use_sudo: bool) -> RemoteCommand {
    let sudo = if use_sudo { "sudo -n " } else { "" };
    let inner = format!("{sudo}apt-get -y update && {sudo}apt-get -y upgrade");
    RemoteCommand::new(format!("nohup sh -c {} >/dev/null 2>&1 &", quote(&inner)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(quote("/var/mail"), "'/var/mail'");
        assert_eq!(quote("it's"), "'it'\\''s'");
        assert_eq!(quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn redacted_command_hides_text_from_debug() {
        let command =
            RemoteCommand::redacted("curl 'https://x?sig=secret'", "curl 'https://x?<redacted>'");
        assert!(command.text().contains("sig=secret"));
        assert!(!format!("{command:?}").contains("sig=secret"));
        assert!(!command.to_string().contains("sig=secret"));
    }

    #[test]
    fn maintenance_runs_detached() {
        let command = maintenance_command(true);
        assert_eq!(
            command.text(),
            "nohup sh -c 'sudo -n apt-get -y update && sudo -n apt-get -y upgrade' >/dev/null 2>&1 &"
        );
        assert!(!maintenance_command(false).text().contains("sudo"));
    }
}
