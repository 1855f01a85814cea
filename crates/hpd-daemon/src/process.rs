//! Image command process management

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use hpd_core::events::{ProcessEvent, StreamKind};
use hpd_core::prelude::*;

/// Shell used to run image commands verbatim
pub const DEFAULT_SHELL: &str = "sh";

/// Read size for the output pipes
const READ_CHUNK: usize = 4096;

/// How long pipe readers may keep draining after a kill
const KILL_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// A spawned image command.
///
/// The `Child` handle is moved into a dedicated `wait_for_exit` background task that
/// calls `child.wait()`, waits for both pipe readers to drain, and then emits
/// exactly one `ProcessEvent::Exited` as the final event for this process.
///
/// `ImageProcess` retains a kill channel ([`kill_tx`]) to request termination and
/// an atomic flag ([`exited`]) for synchronous `has_exited()` checks.
pub struct ImageProcess {
    /// Process ID for logging
    pid: Option<u32>,
    /// One-shot sender that tells the wait task to kill the process.
    /// Consumed on first use (or on drop).
    kill_tx: Option<oneshot::Sender<()>>,
    /// Set to `true` by the wait task once the child has exited.
    exited: Arc<AtomicBool>,
}

impl std::fmt::Debug for ImageProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageProcess")
            .field("pid", &self.pid)
            .field("exited", &self.has_exited())
            .finish()
    }
}

impl ImageProcess {
    /// Spawn `sh -c <command>` and stream its output to `event_tx`.
    ///
    /// Launch is non-blocking; completion is reported through the
    /// `ProcessEvent::Exited` event.
    pub fn spawn(command: &str, event_tx: mpsc::Sender<ProcessEvent>) -> Result<Self> {
        Self::spawn_with_shell(DEFAULT_SHELL, command, event_tx)
    }

    /// Spawn `<shell> -c <command>`
    pub fn spawn_with_shell(
        shell: &str,
        command: &str,
        event_tx: mpsc::Sender<ProcessEvent>,
    ) -> Result<Self> {
        info!("Spawning image command: {} -c {}", shell, command);

        let mut child = Command::new(shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ProcessSpawn {
                reason: e.to_string(),
            })?;

        let pid = child.id();
        info!("Image command started with PID: {:?}", pid);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::process("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::process("stderr was not captured"))?;

        let readers = [
            tokio::spawn(Self::pipe_reader(stdout, StreamKind::Stdout, event_tx.clone())),
            tokio::spawn(Self::pipe_reader(stderr, StreamKind::Stderr, event_tx.clone())),
        ];

        let exited = Arc::new(AtomicBool::new(false));

        // Kill channel: ImageProcess holds the sender, wait task holds the receiver.
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(Self::wait_for_exit(
            child,
            readers,
            kill_rx,
            event_tx,
            Arc::clone(&exited),
        ));

        Ok(Self {
            pid,
            kill_tx: Some(kill_tx),
            exited,
        })
    }

    /// Background task: owns `child`, waits for it to exit, emits `ProcessEvent::Exited`.
    ///
    /// Two ways the task can end:
    /// 1. The command exits on its own; `child.wait()` resolves.
    /// 2. `kill_rx` fires: we kill the child first, then wait for it.
    ///
    /// Either way the pipe readers are drained before the exit event so every
    /// output chunk is delivered ahead of it.
    async fn wait_for_exit(
        mut child: Child,
        readers: [JoinHandle<()>; 2],
        kill_rx: oneshot::Receiver<()>,
        event_tx: mpsc::Sender<ProcessEvent>,
        exited: Arc<AtomicBool>,
    ) {
        let mut killed = false;
        let code: Option<i32> = tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        info!("Image command exited with status: {:?}", status);
                        status.code()
                    }
                    Err(e) => {
                        error!("Error waiting for image command: {}", e);
                        None
                    }
                }
            }
            Ok(()) = kill_rx => {
                info!("Kill requested, terminating image command");
                killed = true;
                if let Err(e) = child.kill().await {
                    error!("Failed to kill image command: {}", e);
                }
                match child.wait().await {
                    Ok(status) => {
                        info!("Image command killed, exit status: {:?}", status);
                        status.code()
                    }
                    Err(e) => {
                        error!("Error waiting after kill: {}", e);
                        None
                    }
                }
            }
        };

        // Grandchildren may keep the pipes open. Their output still belongs to
        // this process, so wait for EOF unless we were asked to kill it.
        for mut reader in readers {
            if killed {
                if tokio::time::timeout(KILL_DRAIN_GRACE, &mut reader).await.is_err() {
                    debug!("Pipe still open after kill, abandoning reader");
                    reader.abort();
                }
            } else if let Err(e) = reader.await {
                warn!("Pipe reader task failed: {}", e);
            }
        }

        exited.store(true, Ordering::Release);

        debug!("Sending ProcessEvent::Exited {{ code: {:?} }}", code);
        let _ = event_tx.send(ProcessEvent::Exited { code }).await;
    }

    /// Forward raw chunks from one pipe until EOF.
    ///
    /// Chunks are not split into lines: carriage returns must reach the
    /// aggregator untouched.
    async fn pipe_reader<R>(mut pipe: R, stream: StreamKind, tx: mpsc::Sender<ProcessEvent>)
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    trace!("{}: {} bytes", stream, n);
                    let event = ProcessEvent::Output {
                        stream,
                        bytes: buf[..n].to_vec(),
                    };
                    if tx.send(event).await.is_err() {
                        debug!("{} channel closed", stream);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Error reading {}: {}", stream, e);
                    break;
                }
            }
        }

        debug!("{} reader finished", stream);
    }

    /// Request termination.
    ///
    /// The wait task kills the child and still emits `ProcessEvent::Exited`,
    /// so callers tear down on that event as usual.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            info!("Killing image command (PID {:?})", self.pid);
            // Ignore send error; the wait task may have already finished.
            let _ = tx.send(());
        }
    }

    /// Non-blocking check backed by an atomic flag set by the wait task.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        !self.has_exited()
    }

    /// Get the process ID
    pub fn id(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for ImageProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("ImageProcess dropped while process may still be running");
            self.kill();
        }
        // kill_on_drop(true) on the Child is the final safety net if the
        // wait task hasn't had a chance to handle the kill yet.
        debug!("ImageProcess dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collect events until `Exited` arrives or the deadline passes.
    async fn collect_until_exit(rx: &mut mpsc::Receiver<ProcessEvent>) -> Vec<ProcessEvent> {
        let mut events = Vec::new();
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(event)) => {
                    let done = event.is_exit();
                    events.push(event);
                    if done {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        events
    }

    fn stream_bytes(events: &[ProcessEvent], kind: StreamKind) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                ProcessEvent::Output { stream, bytes } if *stream == kind => Some(bytes.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[tokio::test]
    async fn test_exit_code_captured_on_normal_exit() {
        let (tx, mut rx) = mpsc::channel(16);
        let _process = ImageProcess::spawn("exit 0", tx).unwrap();

        let events = collect_until_exit(&mut rx).await;
        assert_eq!(events.last(), Some(&ProcessEvent::Exited { code: Some(0) }));
    }

    #[tokio::test]
    async fn test_exit_code_captured_on_error_exit() {
        let (tx, mut rx) = mpsc::channel(16);
        let _process = ImageProcess::spawn("exit 42", tx).unwrap();

        let events = collect_until_exit(&mut rx).await;
        assert_eq!(events.last(), Some(&ProcessEvent::Exited { code: Some(42) }));
    }

    #[tokio::test]
    async fn test_output_precedes_exit_and_keeps_carriage_returns() {
        let (tx, mut rx) = mpsc::channel(64);
        let _process = ImageProcess::spawn("printf '50%%\\r100%%\\n'", tx).unwrap();

        let events = collect_until_exit(&mut rx).await;
        assert!(events.last().map(|e| e.is_exit()).unwrap_or(false));
        assert_eq!(stream_bytes(&events, StreamKind::Stdout), b"50%\r100%\n");
    }

    #[tokio::test]
    async fn test_stderr_is_tagged() {
        let (tx, mut rx) = mpsc::channel(64);
        let _process = ImageProcess::spawn("echo problem >&2", tx).unwrap();

        let events = collect_until_exit(&mut rx).await;
        assert_eq!(stream_bytes(&events, StreamKind::Stderr), b"problem\n");
        assert!(stream_bytes(&events, StreamKind::Stdout).is_empty());
    }

    #[tokio::test]
    async fn test_exactly_one_exit_event() {
        let (tx, mut rx) = mpsc::channel(32);
        let _process = ImageProcess::spawn("echo hi", tx).unwrap();

        let mut exited_count = 0usize;
        let deadline = tokio::time::sleep(Duration::from_millis(500));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(ProcessEvent::Exited { .. }) => exited_count += 1,
                        Some(_) => {}
                        None => break,
                    }
                }
                _ = &mut deadline => break,
            }
        }

        assert_eq!(exited_count, 1, "expected exactly one Exited event");
    }

    #[tokio::test]
    async fn test_has_exited_becomes_true_after_exit() {
        let (tx, mut rx) = mpsc::channel(16);
        let process = ImageProcess::spawn("true", tx).unwrap();

        collect_until_exit(&mut rx).await;

        assert!(process.has_exited());
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_kill_terminates_long_running_process() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut process = ImageProcess::spawn("exec sleep 60", tx).unwrap();
        assert!(process.is_running());
        assert!(process.id().is_some());

        process.kill();

        let events = collect_until_exit(&mut rx).await;
        assert!(
            matches!(events.last(), Some(ProcessEvent::Exited { code: None })),
            "killed process should report no exit code, got {:?}",
            events.last()
        );
    }
}
