//! Provider process supervision.
//!
//! A [`ManagedProcess`] owns one provider: the OS child, the line channel over
//! its stdin/stdout, a ring buffer of its recent stderr output, and the lock
//! that serialises every exchange with it.
//!
//! # Lifecycle
//!
//! ```text
//! Spawning ──▶ Handshaking ──▶ Ready ──▶ Terminated
//!     │             │            │
//!     └─────────────┴────────────┴──▶ Failed
//! ```
//!
//! `Failed` is sticky: releasing the streams of a failed provider does not
//! turn it into `Terminated`.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use crate::config::ProviderConfig;
use crate::error::BridgeError;
use crate::mcp::protocol::RequestId;
use crate::mcp::transport::LineChannel;

/// Number of stderr lines retained per provider.
const STDERR_LINES: usize = 64;

/// How long `terminate` waits for a killed child to be reaped.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// First request ID used for `tools/call`; 1 and 2 belong to the handshake.
const FIRST_CALL_ID: i64 = 3;

/// Lifecycle state of a provider process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Created, streams not yet used.
    Spawning,
    /// Handshake in progress.
    Handshaking,
    /// Handshake completed, tool calls are accepted.
    Ready,
    /// Spawn, handshake or I/O failed.
    Failed,
    /// Stopped by the bridge or exited on its own.
    Terminated,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Spawning => "spawning",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Recent stderr output of a provider.
#[derive(Debug, Clone, Default)]
pub struct StderrLog {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrLog {
    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == STDERR_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Returns the buffered lines joined by newlines, or `None` if empty.
    #[must_use]
    pub fn snapshot(&self) -> Option<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.is_empty() {
            return None;
        }
        Some(lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n"))
    }
}

/// One provider process and everything the bridge holds for it.
#[derive(Debug)]
pub struct ManagedProcess {
    config: ProviderConfig,
    state: Mutex<ProcessState>,
    failure: Mutex<Option<String>>,
    /// The serialisation lock: whoever holds it owns the pipe pair.
    channel: tokio::sync::Mutex<Option<LineChannel>>,
    child: Mutex<Option<Child>>,
    stderr: StderrLog,
    next_id: AtomicI64,
}

impl ManagedProcess {
    /// Launches the provider described by `config`.
    ///
    /// The configured environment overrides are merged onto the bridge's own
    /// environment. On Windows the command line is run through `cmd /C`.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Spawn`] if the command is empty, the process
    /// cannot be created, its pipes are unavailable, or it has already exited.
    pub fn spawn(config: ProviderConfig) -> Result<Self, BridgeError> {
        let spawn_error = |reason: String| BridgeError::Spawn {
            provider: config.name.clone(),
            reason,
        };

        if config.command.trim().is_empty() {
            return Err(spawn_error("no command configured".to_string()));
        }

        let mut command = build_command(&config);
        command
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| spawn_error(format!("could not run '{}': {e}", config.command)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            return Err(spawn_error("stdio pipes unavailable".to_string()));
        };

        let stderr_log = StderrLog::default();
        if let Some(stderr) = stderr {
            capture_stderr(config.name.clone(), stderr, stderr_log.clone());
        }

        if let Ok(Some(status)) = child.try_wait() {
            let captured = stderr_log.snapshot().unwrap_or_default();
            return Err(spawn_error(format!(
                "process exited immediately ({status}). Stderr: {captured}"
            )));
        }

        tracing::debug!(
            provider = %config.name,
            command = %config.command,
            pid = ?child.id(),
            "Spawned provider process"
        );

        Ok(Self::assemble(
            config,
            Some(LineChannel::new(stdout, stdin)),
            Some(child),
            stderr_log,
        ))
    }

    /// Wraps an already connected provider given as a pair of streams.
    ///
    /// `reader` carries the provider's output and `writer` its input. There
    /// is no OS process behind the result, so `terminate` only closes the
    /// streams. Used for in-process providers and tests.
    pub fn from_streams<R, W>(config: ProviderConfig, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
        W: AsyncWrite + Send + Sync + Unpin + 'static,
    {
        Self::assemble(
            config,
            Some(LineChannel::new(reader, writer)),
            None,
            StderrLog::default(),
        )
    }

    /// Records a provider that never got a process.
    #[must_use]
    pub fn failed(config: ProviderConfig, error: &BridgeError) -> Self {
        let process = Self::assemble(config, None, None, StderrLog::default());
        process.fail(error.to_string());
        process
    }

    fn assemble(
        config: ProviderConfig,
        channel: Option<LineChannel>,
        child: Option<Child>,
        stderr: StderrLog,
    ) -> Self {
        Self {
            config,
            state: Mutex::new(ProcessState::Spawning),
            failure: Mutex::new(None),
            channel: tokio::sync::Mutex::new(channel),
            child: Mutex::new(child),
            stderr,
            next_id: AtomicI64::new(FIRST_CALL_ID),
        }
    }

    /// Returns the provider name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the provider definition this process was started from.
    #[must_use]
    pub const fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Returns the current state, noticing a child that has exited.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        let mut state = self.lock_state();
        if matches!(*state, ProcessState::Handshaking | ProcessState::Ready) {
            let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(status) = child.as_mut().and_then(|c| c.try_wait().ok().flatten()) {
                tracing::warn!(provider = %self.config.name, %status, "Provider process exited");
                *state = ProcessState::Terminated;
            }
        }
        *state
    }

    /// Returns the reason the provider failed, if it did.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns recent stderr output of the provider.
    #[must_use]
    pub fn stderr(&self) -> Option<String> {
        self.stderr.snapshot()
    }

    pub(crate) fn set_state(&self, next: ProcessState) {
        *self.lock_state() = next;
    }

    pub(crate) fn fail(&self, reason: String) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
        self.set_state(ProcessState::Failed);
    }

    /// Allocates the ID for the next `tools/call` request.
    pub(crate) fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Acquires exclusive use of the pipe pair. Waiters are served in order.
    pub(crate) async fn channel(&self) -> tokio::sync::MutexGuard<'_, Option<LineChannel>> {
        self.channel.lock().await
    }

    /// Stops the provider and releases its streams.
    ///
    /// Best effort and idempotent. The child is killed first so that a call
    /// currently blocked on its output sees EOF and gives up the lock.
    pub async fn terminate(&self) {
        let child = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                tracing::debug!(provider = %self.config.name, error = %e, "Kill failed");
            }
            match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(provider = %self.config.name, %status, "Provider stopped");
                }
                Ok(Err(e)) => {
                    tracing::debug!(provider = %self.config.name, error = %e, "Wait failed");
                }
                Err(_) => {
                    tracing::warn!(provider = %self.config.name, "Provider did not exit in time");
                }
            }
        }

        if let Some(mut channel) = self.channel.lock().await.take() {
            if let Err(e) = channel.close().await {
                tracing::debug!(provider = %self.config.name, error = %e, "Closing stdin failed");
            }
        }

        let mut state = self.lock_state();
        if *state != ProcessState::Failed {
            *state = ProcessState::Terminated;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(windows)]
fn build_command(config: &ProviderConfig) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(&config.command).args(&config.args);
    command
}

#[cfg(not(windows))]
fn build_command(config: &ProviderConfig) -> Command {
    let mut command = Command::new(&config.command);
    command.args(&config.args);
    command
}

/// Drains the child's stderr into `log`, echoing each line at debug level.
fn capture_stderr(provider: String, stderr: ChildStderr, log: StderrLog) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::debug!(provider = %provider, stderr = %line, "Provider stderr");
                    log.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(provider = %provider, error = %e, "Stderr read failed");
                    break;
                }
            }
        }
    });
}
