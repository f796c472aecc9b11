//! Subprocess-based transport implementation
//!
//! This module implements the Transport trait using a subprocess to run the Claude CLI.
//! Stdout is consumed by a single worker task running the handler chain from
//! [`super::pipeline`]; stderr goes to a temp file that is removed on close.

use super::{
    StreamMessage, Transport, TransportState,
    command::{build_command, build_command_with_prompt},
    pipeline,
};
use crate::{
    channel::Inbound,
    errors::{Result, SdkError},
    types::{ClaudeCodeOptions, Message},
};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Environment variable identifying the calling library to the CLI
pub const ENTRYPOINT_ENV: &str = "CLAUDE_CODE_ENTRYPOINT";

/// Entrypoint tag for one-shot queries
pub const ONE_SHOT_ENTRYPOINT: &str = "sdk-rust";

/// How long close waits for the worker and for the child after SIGTERM
pub const TERMINATION_TIMEOUT: Duration = Duration::from_secs(5);

/// OS error text that means the child is already gone
const PROCESS_GONE_MESSAGES: &[&str] = &[
    "process already finished",
    "process already released",
    "no child processes",
    "no such process",
    "signal: killed",
];

/// Why a SIGKILL was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerminationReason {
    Timeout,
    Cancellation,
    SignalFailure,
}

impl TerminationReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Cancellation => "context cancellation",
            Self::SignalFailure => "SIGTERM failure",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Interrupt,
    Terminate,
}

impl Signal {
    fn name(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }
}

type SharedChild = Arc<Mutex<Option<Child>>>;
type SignalSender = fn(u32, Signal) -> io::Result<()>;

/// Per-connection resources
struct Connection {
    state: TransportState,
    child: SharedChild,
    pid: Option<u32>,
    parent: Option<CancellationToken>,
    done: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
    messages: Option<Inbound<Message>>,
    errors: Option<Inbound<SdkError>>,
    stderr_file: Option<NamedTempFile>,
}

impl Connection {
    fn disconnected() -> Self {
        Self {
            state: TransportState::Disconnected,
            child: Arc::new(Mutex::new(None)),
            pid: None,
            parent: None,
            done: None,
            worker: None,
            watcher: None,
            messages: None,
            errors: None,
            stderr_file: None,
        }
    }
}

/// Subprocess-based transport for Claude CLI
pub struct SubprocessTransport {
    /// CLI binary path
    cli_path: PathBuf,
    /// Configuration options
    options: ClaudeCodeOptions,
    /// Close stdin after the first envelope
    close_stdin: bool,
    /// Prompt passed on the command line instead of stdin
    prompt: Option<String>,
    /// Value of `CLAUDE_CODE_ENTRYPOINT`
    entrypoint: String,
    /// Platform name used for interrupt support
    platform: &'static str,
    conn: RwLock<Connection>,
    stdin: Mutex<Option<ChildStdin>>,
}

impl std::fmt::Debug for SubprocessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessTransport")
            .field("cli_path", &self.cli_path)
            .field("close_stdin", &self.close_stdin)
            .field("prompt_mode", &self.prompt.is_some())
            .field("entrypoint", &self.entrypoint)
            .finish_non_exhaustive()
    }
}

impl SubprocessTransport {
    /// Create a transport that feeds the CLI through stdin
    pub fn new(
        cli_path: impl Into<PathBuf>,
        options: ClaudeCodeOptions,
        close_stdin: bool,
        entrypoint: impl Into<String>,
    ) -> Self {
        Self {
            cli_path: cli_path.into(),
            options,
            close_stdin,
            prompt: None,
            entrypoint: entrypoint.into(),
            platform: std::env::consts::OS,
            conn: RwLock::new(Connection::disconnected()),
            stdin: Mutex::new(None),
        }
    }

    /// Create a one-shot transport with the prompt on the command line
    pub fn with_prompt(
        cli_path: impl Into<PathBuf>,
        options: ClaudeCodeOptions,
        prompt: impl Into<String>,
    ) -> Self {
        let mut transport = Self::new(cli_path, options, false, ONE_SHOT_ENTRYPOINT);
        transport.prompt = Some(prompt.into());
        transport
    }

    /// Current lifecycle state
    pub async fn state(&self) -> TransportState {
        self.conn.read().await.state
    }

    /// Whether the CLI is running and connected
    pub async fn is_connected(&self) -> bool {
        self.state().await == TransportState::Connected
    }

    /// Path of the stderr capture file while connected
    pub async fn stderr_path(&self) -> Option<PathBuf> {
        self.conn
            .read()
            .await
            .stderr_file
            .as_ref()
            .map(|file| file.path().to_path_buf())
    }

    /// PID of the running CLI
    pub async fn pid(&self) -> Option<u32> {
        self.conn.read().await.pid
    }

    #[cfg(test)]
    pub(crate) fn set_platform(&mut self, platform: &'static str) {
        self.platform = platform;
    }

    fn argv(&self) -> Vec<String> {
        match &self.prompt {
            Some(prompt) => build_command_with_prompt(&self.cli_path, &self.options, prompt),
            None => build_command(&self.cli_path, &self.options, self.close_stdin),
        }
    }

    fn build_process(&self, stderr: std::fs::File) -> Command {
        let argv = self.argv();
        debug!("Claude CLI argv: {:?}", argv);

        let mut cmd = Command::new(&self.cli_path);
        cmd.args(&argv[1..]);
        cmd.env(ENTRYPOINT_ENV, &self.entrypoint);

        if let Some(cwd) = self.options.cwd.as_deref().filter(|cwd| cwd.exists()) {
            cmd.current_dir(cwd);
        }

        let stdin = if self.prompt.is_some() {
            Stdio::null()
        } else {
            Stdio::piped()
        };
        cmd.stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        cmd
    }
}

fn stderr_capture() -> Result<(NamedTempFile, std::fs::File)> {
    let file = tempfile::Builder::new()
        .prefix("claude_stderr_")
        .suffix(".log")
        .tempfile()
        .map_err(|e| SdkError::connection("failed to create stderr capture file", e))?;
    let handle = file
        .reopen()
        .map_err(|e| SdkError::connection("failed to open stderr capture file", e))?;
    Ok((file, handle))
}

fn missing_pipe(name: &str) -> SdkError {
    SdkError::connection(
        format!("failed to capture {name}"),
        io::Error::new(io::ErrorKind::BrokenPipe, format!("{name} pipe missing")),
    )
}

#[async_trait]
impl Transport for SubprocessTransport {
    async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SdkError::Cancelled("connect"));
        }

        let mut conn = self.conn.write().await;
        match conn.state {
            TransportState::Disconnected => {},
            TransportState::Connected | TransportState::Closing => {
                return Err(SdkError::AlreadyConnected);
            },
            TransportState::Closed => {
                return Err(SdkError::invalid_state(
                    "transport is closed; create a new one to reconnect",
                ));
            },
        }

        let (stderr_file, stderr) = stderr_capture()?;
        let mut cmd = self.build_process(stderr);

        let mut child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn Claude CLI at {}: {}", self.cli_path.display(), e);
            SdkError::connection(
                format!("failed to start {}", self.cli_path.display()),
                e,
            )
        })?;

        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stdin = match self.prompt {
            Some(_) => None,
            None => Some(child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?),
        };

        let done = cancel.child_token();
        let (sink, msg_rx, err_rx) = pipeline::sink_channels(done.clone());
        let worker = tokio::spawn(pipeline::run_stdout_worker(stdout, sink));

        let pid = child.id();
        info!("Claude CLI started (pid {:?})", pid);

        let child: SharedChild = Arc::new(Mutex::new(Some(child)));
        let watcher = tokio::spawn(kill_on_cancel(
            cancel.clone(),
            done.clone(),
            Arc::clone(&child),
        ));

        *self.stdin.lock().await = stdin;
        conn.state = TransportState::Connected;
        conn.child = child;
        conn.watcher = Some(watcher);
        conn.pid = pid;
        conn.parent = Some(cancel.clone());
        conn.done = Some(done);
        conn.worker = Some(worker);
        conn.messages = Some(Inbound::new(msg_rx));
        conn.errors = Some(Inbound::new(err_rx));
        conn.stderr_file = Some(stderr_file);

        Ok(())
    }

    async fn send_message(&self, cancel: &CancellationToken, message: StreamMessage) -> Result<()> {
        if self.prompt.is_some() {
            return Ok(());
        }

        if self.conn.read().await.state != TransportState::Connected {
            return Err(SdkError::NotConnected);
        }

        if cancel.is_cancelled() {
            return Err(SdkError::Cancelled("send message"));
        }

        let mut line = serde_json::to_string(&message).map_err(SdkError::MarshalFailed)?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(SdkError::NotConnected)?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(SdkError::WriteMessageFailed)?;
        stdin.flush().await.map_err(SdkError::WriteMessageFailed)?;
        debug!("Sent message to Claude CLI ({} bytes)", line.len());

        if self.close_stdin {
            guard.take();
            debug!("Closed stdin after first message");
        }

        Ok(())
    }

    async fn receive_messages(&self) -> (Inbound<Message>, Inbound<SdkError>) {
        let conn = self.conn.read().await;
        match (&conn.messages, &conn.errors) {
            (Some(messages), Some(errors)) => (messages.clone(), errors.clone()),
            _ => (Inbound::closed(), Inbound::closed()),
        }
    }

    async fn interrupt(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SdkError::Cancelled("interrupt"));
        }

        let conn = self.conn.read().await;
        if conn.state != TransportState::Connected {
            return Err(SdkError::NotConnected);
        }
        let pid = conn.pid.ok_or(SdkError::ProcessNotRunning)?;

        if self.platform == "windows" {
            return Err(SdkError::InterruptNotSupported {
                platform: self.platform.to_string(),
            });
        }

        info!("Sending SIGINT to Claude CLI (pid {})", pid);
        send_signal(pid, Signal::Interrupt).map_err(|source| SdkError::SignalFailed {
            signal: Signal::Interrupt.name(),
            source,
        })
    }

    async fn close(&self) -> Result<()> {
        let mut conn = self.conn.write().await;
        if conn.state != TransportState::Connected {
            return Ok(());
        }

        info!("Closing Claude CLI transport");
        conn.state = TransportState::Closing;

        if let Some(done) = &conn.done {
            done.cancel();
        }
        self.stdin.lock().await.take();

        if let Some(mut worker) = conn.worker.take() {
            if tokio::time::timeout(TERMINATION_TIMEOUT, &mut worker)
                .await
                .is_err()
            {
                warn!("Stdout worker did not stop in time, aborting it");
                worker.abort();
            }
        }

        // the watcher either exits or finishes its kill once done is cancelled
        if let Some(watcher) = conn.watcher.take() {
            if let Err(e) = watcher.await {
                warn!("Cancellation watcher failed: {}", e);
            }
        }

        let parent = conn.parent.take().unwrap_or_default();
        let status = match conn.child.lock().await.take() {
            Some(mut child) => terminate(&mut child, &parent, send_signal).await,
            None => Ok(None),
        };

        let stderr_file = conn.stderr_file.take();
        let result = status.and_then(|status| exit_result(status, stderr_file.as_ref()));

        if let Some(file) = stderr_file {
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                warn!("Failed to remove stderr file {}: {}", path.display(), e);
            }
        }

        conn.pid = None;
        conn.done = None;
        conn.messages = None;
        conn.errors = None;
        conn.state = TransportState::Closed;
        info!("Claude CLI transport closed");

        result
    }
}

impl Drop for SubprocessTransport {
    fn drop(&mut self) {
        let conn = self.conn.get_mut();
        if let Some(done) = &conn.done {
            done.cancel();
        }
        if let Some(watcher) = conn.watcher.take() {
            watcher.abort();
        }
        if let Ok(mut guard) = conn.child.try_lock() {
            if let Some(mut child) = guard.take() {
                let _ = child.start_kill();
            }
        }
    }
}

/// Kill the child as soon as the caller's token is cancelled
///
/// Returns without touching the child when `done` fires for a plain close.
async fn kill_on_cancel(parent: CancellationToken, done: CancellationToken, child: SharedChild) {
    done.cancelled().await;
    if !parent.is_cancelled() {
        return;
    }

    let mut guard = child.lock().await;
    let Some(child) = guard.as_mut() else {
        return;
    };
    if let Ok(Some(status)) = child.try_wait() {
        debug!("Claude CLI already exited: {}", status);
        return;
    }
    match kill_child(child, TerminationReason::Cancellation).await {
        Ok(status) => debug!("Claude CLI stopped after cancellation: {:?}", status),
        Err(e) => warn!("Failed to kill Claude CLI after cancellation: {}", e),
    }
}

/// Stop the child: SIGTERM, then SIGKILL on timeout or cancellation
async fn terminate(
    child: &mut Child,
    parent: &CancellationToken,
    signal: SignalSender,
) -> Result<Option<ExitStatus>> {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!("Claude CLI already exited: {}", status);
            return Ok(Some(status));
        },
        Ok(None) => {},
        Err(e) => debug!("Failed to poll Claude CLI status: {}", e),
    }

    let Some(pid) = child.id() else {
        return Ok(None);
    };

    if let Err(e) = signal(pid, Signal::Terminate) {
        if is_process_gone(&e) {
            debug!("Claude CLI already gone: {}", e);
            return Ok(None);
        }
        warn!("Failed to send SIGTERM to Claude CLI: {}", e);
        return kill_child(child, TerminationReason::SignalFailure).await;
    }

    enum Outcome {
        Exited(io::Result<ExitStatus>),
        Kill(TerminationReason),
    }

    let outcome = tokio::select! {
        biased;
        status = child.wait() => Outcome::Exited(status),
        _ = tokio::time::sleep(TERMINATION_TIMEOUT) => Outcome::Kill(TerminationReason::Timeout),
        _ = parent.cancelled() => Outcome::Kill(TerminationReason::Cancellation),
    };

    match outcome {
        Outcome::Exited(Ok(status)) => Ok(Some(status)),
        Outcome::Exited(Err(e)) if is_process_gone(&e) => Ok(None),
        Outcome::Exited(Err(e)) => Err(SdkError::connection("failed to wait for Claude CLI", e)),
        Outcome::Kill(reason) => kill_child(child, reason).await,
    }
}

async fn kill_child(child: &mut Child, reason: TerminationReason) -> Result<Option<ExitStatus>> {
    warn!("Killing Claude CLI after {}", reason.as_str());

    if let Err(e) = child.start_kill() {
        if !is_process_gone(&e) {
            return Err(SdkError::KillFailed {
                reason: reason.as_str(),
                source: e,
            });
        }
    }

    match child.wait().await {
        Ok(status) => Ok(Some(status)),
        Err(e) if is_process_gone(&e) => Ok(None),
        Err(e) => Err(SdkError::KillFailed {
            reason: reason.as_str(),
            source: e,
        }),
    }
}

/// Signal deaths are a normal shutdown; non-zero exit codes are reported
fn exit_result(status: Option<ExitStatus>, stderr_file: Option<&NamedTempFile>) -> Result<()> {
    match status.and_then(|status| status.code()) {
        None | Some(0) => Ok(()),
        Some(code) => {
            let stderr = stderr_file
                .map(|file| read_stderr(file.path()))
                .unwrap_or_default();
            Err(SdkError::ProcessError {
                message: "Claude CLI exited with an error".to_string(),
                exit_code: Some(code),
                stderr,
            })
        },
    }
}

fn read_stderr(path: &Path) -> String {
    match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_string(),
        Err(e) => {
            warn!("Failed to read stderr file {}: {}", path.display(), e);
            String::new()
        },
    }
}

fn is_process_gone(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        if matches!(err.raw_os_error(), Some(libc::ESRCH) | Some(libc::ECHILD)) {
            return true;
        }
    }

    if err.kind() == io::ErrorKind::InvalidInput {
        return true;
    }

    let text = err.to_string().to_lowercase();
    PROCESS_GONE_MESSAGES.iter().any(|m| text.contains(m))
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    let signum = match signal {
        Signal::Interrupt => libc::SIGINT,
        Signal::Terminate => libc::SIGTERM,
    };

    // SAFETY: kill(2) takes plain integers and has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signum) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, signal: Signal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} is not available on this platform", signal.name()),
    ))
}
