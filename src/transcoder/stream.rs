//! Transcoder process lifecycle and chunk streaming
//!
//! The spawned process is read by a producer task that feeds a bounded
//! channel of MPEG-TS chunks; dropping the consumer (or cancelling the
//! handle) tears the process down with a graceful terminate, a 5 second
//! grace period, then a force kill.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Grace period between terminate and force kill
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Bounded chunk queue between the reader task and the consumer
const CHUNK_QUEUE_DEPTH: usize = 32;

/// How much trailing stderr to keep for diagnostics
const STDERR_TAIL_BYTES: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("failed to spawn transcoder: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("transcoder produced no stdout pipe")]
    NoStdout,

    #[error("transcoder exited with status {status}: {stderr_tail}")]
    ProcessFailed { status: i32, stderr_tail: String },
}

/// Handle to a running transcoder process.
///
/// Cloneable; any clone can request termination. The producer task owns the
/// `Child` exclusively and is the only place that awaits it.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    exited: Arc<AtomicBool>,
    cancel: CancellationToken,
    bytes_read: Arc<AtomicU64>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        !self.exited.load(Ordering::Acquire)
    }

    /// Total stdout bytes read so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Ask the producer task to stop reading and shut the process down.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether termination was requested (by the watchdog or a consumer
    /// drop) rather than the process ending on its own.
    pub fn was_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Terminate the process: graceful signal, wait up to the grace period,
    /// then force kill. Used by the watchdog when output stalls.
    pub async fn terminate(&self) {
        self.cancel.cancel();
        send_terminate_signal(self.pid);

        let deadline = tokio::time::Instant::now() + TERMINATE_GRACE;
        while tokio::time::Instant::now() < deadline {
            if self.exited.load(Ordering::Acquire) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        send_kill_signal(self.pid);
    }
}

#[cfg(unix)]
fn send_terminate_signal(pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_terminate_signal(_pid: Option<u32>) {}

#[cfg(unix)]
fn send_kill_signal(pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn send_kill_signal(_pid: Option<u32>) {}

/// Consumer side of a running transcode: a stream of MPEG-TS chunks.
///
/// A final `Err` item reports abnormal process exit; a plain close is a
/// clean end of stream. Dropping the stream cancels the producer.
pub struct TranscodeStream {
    rx: mpsc::Receiver<Result<Bytes, TranscodeError>>,
    handle: ProcessHandle,
}

impl TranscodeStream {
    pub async fn recv(&mut self) -> Option<Result<Bytes, TranscodeError>> {
        self.rx.recv().await
    }

    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }
}

impl Drop for TranscodeStream {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

/// Spawn the given argv and stream its stdout in `chunk_size` reads.
pub fn spawn_transcoder(
    argv: &[String],
    chunk_size: usize,
) -> Result<(TranscodeStream, ProcessHandle), TranscodeError> {
    let (program, args) = argv.split_first().ok_or(TranscodeError::NoStdout)?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child.stdout.take().ok_or(TranscodeError::NoStdout)?;
    let stderr = child.stderr.take();
    let pid = child.id();

    let exited = Arc::new(AtomicBool::new(false));
    let bytes_read = Arc::new(AtomicU64::new(0));
    let cancel = CancellationToken::new();

    let handle = ProcessHandle {
        pid,
        exited: exited.clone(),
        cancel: cancel.clone(),
        bytes_read: bytes_read.clone(),
    };

    let (tx, rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);

    // Stderr tail collector; the last bytes are the ones worth keeping
    let stderr_tail: Arc<tokio::sync::Mutex<VecDeque<u8>>> =
        Arc::new(tokio::sync::Mutex::new(VecDeque::with_capacity(STDERR_TAIL_BYTES)));
    if let Some(mut stderr) = stderr {
        let tail = stderr_tail.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            while let Ok(n) = stderr.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                let mut tail = tail.lock().await;
                for &b in &buf[..n] {
                    if tail.len() == STDERR_TAIL_BYTES {
                        tail.pop_front();
                    }
                    tail.push_back(b);
                }
            }
        });
    }

    tokio::spawn(reader_task(
        child,
        stdout,
        tx,
        cancel,
        exited,
        bytes_read,
        stderr_tail,
        chunk_size,
    ));

    Ok((TranscodeStream { rx, handle: handle.clone() }, handle))
}

#[allow(clippy::too_many_arguments)]
async fn reader_task(
    mut child: Child,
    mut stdout: tokio::process::ChildStdout,
    tx: mpsc::Sender<Result<Bytes, TranscodeError>>,
    cancel: CancellationToken,
    exited: Arc<AtomicBool>,
    bytes_read: Arc<AtomicU64>,
    stderr_tail: Arc<tokio::sync::Mutex<VecDeque<u8>>>,
    chunk_size: usize,
) {
    let mut buf = vec![0u8; chunk_size];
    let mut clean_eof = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = stdout.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        clean_eof = true;
                        break;
                    }
                    Ok(n) => {
                        bytes_read.fetch_add(n as u64, Ordering::Relaxed);
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            sent = tx.send(Ok(chunk)) => {
                                if sent.is_err() {
                                    // Consumer went away; tear down
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(TranscodeError::ProcessFailed {
                                status: -1,
                                stderr_tail: format!("stdout read error: {}", e),
                            }))
                            .await;
                        break;
                    }
                }
            }
        }
    }

    let status = if clean_eof {
        // Pipe closed on its own; reap normally
        child.wait().await.ok()
    } else {
        shutdown_child(&mut child).await
    };
    exited.store(true, Ordering::Release);

    if let Some(status) = status {
        let code = status.code().unwrap_or(-1);
        if clean_eof && code != 0 {
            // Let the stderr collector drain the pipe before snapshotting
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut tail = stderr_tail.lock().await;
            let tail_text = String::from_utf8_lossy(tail.make_contiguous()).into_owned();
            drop(tail);
            tracing::warn!("Transcoder exited with status {}: {}", code, tail_text);
            let _ = tx
                .send(Err(TranscodeError::ProcessFailed {
                    status: code,
                    stderr_tail: tail_text,
                }))
                .await;
        }
    }
}

/// Graceful terminate, bounded wait, then kill.
async fn shutdown_child(child: &mut Child) -> Option<std::process::ExitStatus> {
    send_terminate_signal(child.id());

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(result) => result.ok(),
        Err(_) => {
            let _ = child.kill().await;
            child.wait().await.ok()
        }
    }
}
