//! Subprocess primitive
//!
//! Spawns a child process with exactly the environment it is given: nothing
//! is inherited unless the executor merged it in beforehand. Output is
//! captured into bounded buffers (truncation flagged) or streamed to a
//! caller sink. Timeouts terminate gracefully first, then kill after a
//! grace period; cancellation does the same.

use crate::executor::cancel::CancelHandle;
use crate::primitives::OutputSink;
use sdk::errors::KernelError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

/// Default per-dispatch timeout when the merged config declares none
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Cap for each inline-captured stream
pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// How long a terminated child gets to exit before it is killed
const TERM_GRACE: Duration = Duration::from_secs(2);

/// How captured output is returned
pub enum Capture {
    /// Buffer stdout and stderr up to `limit` bytes each
    Inline { limit: usize },
    /// Hand stdout chunks to the sink; stderr is still captured inline
    Streamed(Box<dyn OutputSink>),
}

/// A fully-resolved subprocess invocation
pub struct SubprocessRequest {
    pub command: String,
    pub args: Vec<String>,
    /// The child's entire environment; no inheritance
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
    pub stdin_bytes: Option<Vec<u8>>,
    pub capture: Capture,
}

/// What the child did
#[derive(Debug, Clone)]
pub struct SubprocessOutput {
    /// Child exit code, reported verbatim; -1 when killed by signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub truncated: bool,
}

enum WaitOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run a subprocess to completion, timeout, or cancellation
pub async fn run(
    request: SubprocessRequest,
    cancel: &CancelHandle,
) -> Result<SubprocessOutput, KernelError> {
    tracing::debug!("Spawning '{}' with {} args", request.command, request.args.len());

    let mut command = Command::new(&request.command);
    command
        .args(&request.args)
        .env_clear()
        .envs(&request.env)
        .stdin(if request.stdin_bytes.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &request.cwd {
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(|e| {
        KernelError::PrimitiveFailure(format!("failed to spawn '{}': {}", request.command, e))
    })?;

    if let Some(bytes) = &request.stdin_bytes {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(bytes).await.map_err(KernelError::Io)?;
            // Dropping closes the pipe so the child sees EOF
        }
    }

    let stdout = child.stdout.take().expect("stdout piped above");
    let stderr = child.stderr.take().expect("stderr piped above");

    let (mut capture, mut sink) = match request.capture {
        Capture::Inline { limit } => (CappedBuffer::new(limit), None),
        Capture::Streamed(sink) => (CappedBuffer::new(0), Some(sink)),
    };
    let mut stderr_capture = CappedBuffer::new(MAX_CAPTURE_BYTES);

    let read_stdout = read_stream(stdout, &mut capture, sink.as_deref_mut());
    let read_stderr = read_stream(stderr, &mut stderr_capture, None);

    let wait = async {
        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            _ = tokio::time::sleep(request.timeout) => WaitOutcome::TimedOut,
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
        };
        match outcome {
            WaitOutcome::Exited(status) => WaitOutcome::Exited(status),
            other => {
                terminate(&mut child).await;
                other
            }
        }
    };

    let (outcome, stdout_read, stderr_read) = tokio::join!(wait, read_stdout, read_stderr);
    stdout_read?;
    stderr_read?;

    let (exit_code, timed_out) = match outcome {
        WaitOutcome::Exited(status) => {
            let status = status.map_err(KernelError::Io)?;
            (status.code().unwrap_or(-1), false)
        }
        WaitOutcome::TimedOut => {
            tracing::warn!(
                "'{}' timed out after {} ms",
                request.command,
                request.timeout.as_millis()
            );
            (-1, true)
        }
        WaitOutcome::Cancelled => return Err(KernelError::Cancelled),
    };

    let truncated = capture.truncated || stderr_capture.truncated;
    Ok(SubprocessOutput {
        exit_code,
        stdout: capture.into_string(),
        stderr: stderr_capture.into_string(),
        timed_out,
        truncated,
    })
}

/// Ask the child to exit, then kill it after the grace period
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            let graceful =
                tokio::time::timeout(TERM_GRACE, child.wait()).await;
            if graceful.is_ok() {
                return;
            }
        }
    }

    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill child process: {}", e);
    }
}

/// Drain a stream, buffering up to the capture cap and forwarding to the
/// sink when one is present. The stream is always read to EOF so a child
/// writing past the cap never blocks on a full pipe.
async fn read_stream<R>(
    mut reader: R,
    buffer: &mut CappedBuffer,
    mut sink: Option<&mut (dyn OutputSink + 'static)>,
) -> Result<(), KernelError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await.map_err(KernelError::Io)?;
        if n == 0 {
            return Ok(());
        }
        match &mut sink {
            Some(sink) => sink
                .write_chunk(&chunk[..n])
                .await
                .map_err(KernelError::Io)?,
            None => buffer.extend(&chunk[..n]),
        }
    }
}

struct CappedBuffer {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CappedBuffer {
    fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn extend(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.buf.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}
