//! Scripted SSH host.
//!
//! Commands are matched against substring rules to pick an exit status. A
//! successful `tar -cf` materialises the archive, `rm -f` removes it, and a
//! successful delegated `curl` upload lands in the attached
//! [`MemoryObjectStore`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::FutureExt;
use mailvault_backup::{
    CommandResult, RemoteCommand, RemoteFile, RemoteSession, SessionConnector, SessionError,
};
use mailvault_config::BackupConfiguration;
use tokio::sync::Notify;

use crate::store::MemoryObjectStore;

/// Bytes written for every archive the scripted host creates.
pub const ARCHIVE_BYTES: &[u8] = b"scripted tar archive";

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    exit_status: Option<i32>,
    stderr: String,
}

/// Pauses commands matching a pattern until released.
#[derive(Debug, Default)]
pub struct CommandGate {
    pattern: String,
    entered: Notify,
    release: Notify,
}

impl CommandGate {
    /// Wait until a matching command has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the paused command finish.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
struct RemoteState {
    rules: Vec<Rule>,
    commands: Vec<RemoteCommand>,
    detached: Vec<String>,
    files: HashMap<String, Vec<u8>>,
    connect_error: Option<String>,
    panic_pattern: Option<String>,
    gate: Option<Arc<CommandGate>>,
    upload_target: Option<MemoryObjectStore>,
    hosts: Vec<String>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<RemoteState>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

/// Connector and host in one. Clones share the script and the logs.
#[derive(Clone, Default)]
pub struct ScriptedRemote {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ScriptedRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ScriptedRemote")
            .field("connects", &self.connects())
            .finish_non_exhaustive()
    }
}

fn quoted_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start = text.find(marker)? + marker.len();
    let rest = text[start..].strip_prefix('\'')?;
    rest.find('\'').map(|end| &rest[..end])
}

impl ScriptedRemote {
    /// Host on which every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commands containing `pattern` exit with `exit_status`. Earlier rules win.
    #[must_use]
    pub fn exit_with(self, pattern: &str, exit_status: i32, stderr: &str) -> Self {
        self.lock().rules.push(Rule {
            pattern: pattern.to_string(),
            exit_status: Some(exit_status),
            stderr: stderr.to_string(),
        });
        self
    }

    /// Commands containing `pattern` are terminated without a status.
    #[must_use]
    pub fn terminate(self, pattern: &str) -> Self {
        self.lock().rules.push(Rule {
            pattern: pattern.to_string(),
            exit_status: None,
            stderr: "killed".to_string(),
        });
        self
    }

    /// Every connection attempt fails.
    #[must_use]
    pub fn refuse_connections(self, stderr: &str) -> Self {
        self.lock().connect_error = Some(stderr.to_string());
        self
    }

    /// Panic while running a command containing `pattern`.
    #[must_use]
    pub fn panic_on(self, pattern: &str) -> Self {
        self.lock().panic_pattern = Some(pattern.to_string());
        self
    }

    /// Successful delegated uploads are written to `store`.
    #[must_use]
    pub fn uploading_to(self, store: MemoryObjectStore) -> Self {
        self.lock().upload_target = Some(store);
        self
    }

    /// Pause commands containing `pattern` until the returned gate is released.
    #[must_use]
    pub fn gate(&self, pattern: &str) -> Arc<CommandGate> {
        let gate = Arc::new(CommandGate {
            pattern: pattern.to_string(),
            ..CommandGate::default()
        });
        self.lock().gate = Some(Arc::clone(&gate));
        gate
    }

    /// Place a file on the host.
    pub fn put_file(&self, path: &str, bytes: &[u8]) {
        self.lock().files.insert(path.to_string(), bytes.to_vec());
    }

    /// Whether `path` exists on the host.
    #[must_use]
    pub fn has_file(&self, path: &str) -> bool {
        self.lock().files.contains_key(path)
    }

    /// Connection attempts so far.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Sessions closed so far.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Hosts that connection attempts targeted.
    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        self.lock().hosts.clone()
    }

    /// Executed command text, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .map(|command| command.text().to_string())
            .collect()
    }

    /// Logged form of each executed command, in order.
    #[must_use]
    pub fn displayed_commands(&self) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .map(|command| command.display().to_string())
            .collect()
    }

    /// Detached commands dispatched so far.
    #[must_use]
    pub fn detached(&self) -> Vec<String> {
        self.lock().detached.clone()
    }

    /// Whether any executed command contains `pattern`.
    #[must_use]
    pub fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|command| command.contains(pattern))
    }

    fn outcome(&self, text: &str) -> (Option<i32>, String) {
        self.lock()
            .rules
            .iter()
            .find(|rule| text.contains(&rule.pattern))
            .map_or((Some(0), String::new()), |rule| {
                (rule.exit_status, rule.stderr.clone())
            })
    }

    fn apply_effects(&self, text: &str) {
        let mut state = self.lock();
        if let Some(archive) = quoted_after(text, "tar -cf ") {
            state.files.insert(archive.to_string(), ARCHIVE_BYTES.to_vec());
        }
        if text.starts_with("curl ") {
            let uploaded = quoted_after(text, "-T ")
                .and_then(|archive| state.files.get(archive))
                .map(|bytes| bytes.len() as u64);
            if let (Some(size), Some(store)) = (uploaded, state.upload_target.as_ref()) {
                store.accept_delegated_upload(text, size);
            }
        }
        if let Some(archive) = quoted_after(text, "rm -f ") {
            state.files.remove(archive);
        }
    }
}

#[async_trait]
impl SessionConnector for ScriptedRemote {
    async fn connect(
        &self,
        config: &BackupConfiguration,
    ) -> Result<Box<dyn RemoteSession>, SessionError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let refused = {
            let mut state = self.lock();
            state.hosts.push(config.host.clone());
            state.connect_error.clone()
        };
        if let Some(stderr) = refused {
            return Err(SessionError::Connect {
                host: config.host.clone(),
                exit_status: Some(255),
                stderr,
            });
        }
        Ok(Box::new(ScriptedSession {
            remote: self.clone(),
        }))
    }
}

struct ScriptedSession {
    remote: ScriptedRemote,
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn run(&self, command: &RemoteCommand) -> Result<CommandResult, SessionError> {
        let text = command.text().to_string();
        let (gate, panics) = {
            let mut state = self.remote.lock();
            state.commands.push(command.clone());
            let gate = state
                .gate
                .as_ref()
                .filter(|gate| text.contains(&gate.pattern))
                .cloned();
            let panics = state
                .panic_pattern
                .as_ref()
                .is_some_and(|pattern| text.contains(pattern));
            (gate, panics)
        };
        assert!(!panics, "scripted panic while running {text}");
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let (exit_status, stderr) = self.remote.outcome(&text);
        if exit_status == Some(0) {
            self.remote.apply_effects(&text);
        }
        Ok(CommandResult {
            command: command.display().to_string(),
            exit_status,
            stdout: String::new(),
            stderr,
        })
    }

    async fn open_read(&self, path: &str) -> Result<RemoteFile, SessionError> {
        let bytes = self.remote.lock().files.get(path).cloned().ok_or_else(|| {
            SessionError::RemoteFileNotFound {
                path: path.to_string(),
            }
        })?;
        Ok(RemoteFile {
            length: bytes.len() as u64,
            reader: Box::pin(std::io::Cursor::new(bytes)),
            completion: async { Ok(()) }.boxed(),
        })
    }

    fn spawn_detached(&self, command: &RemoteCommand) {
        self.remote.lock().detached.push(command.text().to_string());
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.remote.inner.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_arguments_are_extracted() {
        assert_eq!(
            quoted_after("sudo -n tar -cf 'mail.tar' '/var/mail'", "tar -cf "),
            Some("mail.tar")
        );
        assert_eq!(quoted_after("rm -f mail.tar", "rm -f "), None);
    }

    #[tokio::test]
    async fn rules_pick_exit_status_and_effects_follow_success() -> Result<(), SessionError> {
        let remote = ScriptedRemote::new().exit_with("rm -f", 1, "busy");
        let session = ScriptedSession {
            remote: remote.clone(),
        };
        let created = session
            .run(&RemoteCommand::new("tar -cf 'a.tar' '/var/mail'"))
            .await?;
        assert!(created.success());
        assert!(remote.has_file("a.tar"));

        let removed = session.run(&RemoteCommand::new("rm -f 'a.tar'")).await?;
        assert_eq!(removed.exit_status, Some(1));
        assert!(remote.has_file("a.tar"));
        assert_eq!(remote.commands().len(), 2);
        Ok(())
    }
}
