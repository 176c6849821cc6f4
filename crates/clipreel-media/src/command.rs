//! Cancellable runner for external commands.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{
    parse_progress_line, sanitize_tail, DiagnosticTail, ProgressCallback, ProgressLine,
    DEFAULT_TAIL_CAPACITY, LOGGED_TAIL_LINES,
};
use crate::shutdown::ShutdownSignal;
use crate::supervisor::{send_terminate, ProcessSupervisor};
use crate::template::CommandSpec;

/// How long an interrupted child gets to exit before it is killed.
const CHILD_TERM_GRACE: Duration = Duration::from_millis(500);

/// How long to wait for the stream readers after the child exits.
const READER_JOIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Result of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code, `None` when terminated by a signal
    pub exit_code: Option<i32>,
    pub success: bool,
    /// Buffered non-progress diagnostic lines (bounded)
    pub diagnostics: Vec<String>,
    /// Captured stdout, empty unless requested
    pub stdout: Vec<u8>,
}

impl ProcessOutput {
    fn new(status: ExitStatus, diagnostics: Vec<String>, stdout: Vec<u8>) -> Self {
        Self {
            exit_code: status.code(),
            success: status.success(),
            diagnostics,
            stdout,
        }
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Sanitized tail of the diagnostic output, suitable for logs.
    pub fn diagnostic_tail(&self) -> String {
        sanitize_tail(&self.diagnostics, LOGGED_TAIL_LINES)
    }

    /// Turn a non-zero exit into [`MediaError::CommandFailed`].
    pub fn ensure_success(self, tool: &str) -> MediaResult<Self> {
        if self.success {
            return Ok(self);
        }
        let message = match self.exit_code {
            Some(code) => format!("exited with status {}", code),
            None => "terminated by signal".to_string(),
        };
        let tail = self.diagnostic_tail();
        Err(MediaError::command_failed(
            tool,
            message,
            self.exit_code,
            (!tail.is_empty()).then_some(tail),
        ))
    }
}

/// Runs one external command at a time per call, observing the shutdown
/// signal for its whole life.
///
/// Cheap to clone; clones share the supervisor.
#[derive(Clone)]
pub struct ProcessRunner {
    supervisor: Arc<ProcessSupervisor>,
    tail_capacity: usize,
    log_commands: bool,
}

impl ProcessRunner {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self {
            supervisor,
            tail_capacity: DEFAULT_TAIL_CAPACITY,
            log_commands: false,
        }
    }

    /// Log full command lines at info instead of debug.
    pub fn with_command_logging(mut self, enabled: bool) -> Self {
        self.log_commands = enabled;
        self
    }

    pub fn with_tail_capacity(mut self, lines: usize) -> Self {
        self.tail_capacity = lines;
        self
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        self.supervisor.shutdown_signal()
    }

    /// Run to completion, discarding stdout.
    pub async fn run(&self, spec: &CommandSpec) -> MediaResult<ProcessOutput> {
        self.execute(spec, None, false).await
    }

    /// Run to completion, forwarding elapsed-time markers to `progress`.
    pub async fn run_with_progress(
        &self,
        spec: &CommandSpec,
        progress: ProgressCallback,
    ) -> MediaResult<ProcessOutput> {
        self.execute(spec, Some(progress), false).await
    }

    /// Run to completion, capturing stdout.
    pub async fn run_capture(&self, spec: &CommandSpec) -> MediaResult<ProcessOutput> {
        self.execute(spec, None, true).await
    }

    async fn execute(
        &self,
        spec: &CommandSpec,
        progress: Option<ProgressCallback>,
        capture_stdout: bool,
    ) -> MediaResult<ProcessOutput> {
        let shutdown = self.shutdown().clone();
        if shutdown.is_signaled() {
            return Err(MediaError::Interrupted);
        }

        which::which(spec.program()).map_err(|_| MediaError::not_found(spec.program()))?;

        if self.log_commands {
            info!(tool = spec.label(), "Running: {}", spec);
        } else {
            debug!(tool = spec.label(), "Running: {}", spec);
        }

        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(if capture_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MediaError::not_found(spec.program())
            } else {
                MediaError::Io(e)
            }
        })?;

        let handle = match self.supervisor.register(child.id(), spec.label()) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill().await;
                return Err(e);
            }
        };

        let stderr_reader = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_reader(stderr, progress, self.tail_capacity));
        let stdout_reader: Option<JoinHandle<Vec<u8>>> = child.stdout.take().map(|mut stdout| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stdout.read_to_end(&mut buf).await;
                buf
            })
        });

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = shutdown.signaled() => None,
        };

        let status = match waited {
            Some(status) => {
                self.supervisor.unregister(handle);
                status?
            }
            None => {
                warn!(tool = spec.label(), "Shutdown requested, stopping child");
                stop_child(&mut child).await;
                self.supervisor.unregister(handle);
                if let Some(reader) = stderr_reader {
                    reader.abort();
                }
                if let Some(reader) = stdout_reader {
                    reader.abort();
                }
                return Err(MediaError::Interrupted);
            }
        };

        let diagnostics = match stderr_reader {
            Some(reader) => match tokio::time::timeout(READER_JOIN_TIMEOUT, reader).await {
                Ok(Ok(tail)) => tail.into_lines(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        };
        let stdout = match stdout_reader {
            Some(reader) => match tokio::time::timeout(READER_JOIN_TIMEOUT, reader).await {
                Ok(Ok(buf)) => buf,
                _ => Vec::new(),
            },
            None => Vec::new(),
        };

        Ok(ProcessOutput::new(status, diagnostics, stdout))
    }
}

impl std::fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("tail_capacity", &self.tail_capacity)
            .field("log_commands", &self.log_commands)
            .finish()
    }
}

/// Drain stderr line by line: time markers go to the callback, other
/// progress keys are dropped, everything else lands in the tail.
fn spawn_stderr_reader(
    stderr: ChildStderr,
    progress: Option<ProgressCallback>,
    capacity: usize,
) -> JoinHandle<DiagnosticTail> {
    tokio::spawn(async move {
        let mut tail = DiagnosticTail::new(capacity);
        let mut lines = BufReader::new(stderr).split(b'\n');

        while let Ok(Some(raw)) = lines.next_segment().await {
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\r');
            match parse_progress_line(line) {
                Some(ProgressLine::Elapsed(secs)) => {
                    if let Some(cb) = &progress {
                        cb(secs);
                    }
                }
                Some(_) => {}
                None => tail.push(line),
            }
        }

        tail
    })
}

/// Terminate, wait out a short grace, then kill.
async fn stop_child(child: &mut Child) {
    match child.id() {
        Some(pid) => send_terminate(pid),
        None => return,
    }
    match tokio::time::timeout(CHILD_TERM_GRACE, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            let _ = child.kill().await;
        }
    }
}
