//! Runtime state of one in-flight image execution

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};
use hpd_core::prelude::*;
use hpd_core::{ImageKey, OutputAggregator, StreamKind};
use hpd_daemon::ImageProcess;

use crate::notify::NotificationId;

/// Unique identifier for a session
pub type SessionId = u64;

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a new unique session ID
pub fn next_session_id() -> SessionId {
    SESSION_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// A running image command, its output, and its notification
#[derive(Debug)]
pub struct ProcessSession {
    pub id: SessionId,

    /// Identity used for single-flight checks
    pub key: ImageKey,

    /// Device label at launch time
    pub device_name: String,

    /// Command captured at launch; later config edits do not touch it
    pub command: String,

    pub process: ImageProcess,
    pub aggregator: OutputAggregator,

    /// `None` until the first output chunk has been pushed
    pub notification_id: Option<NotificationId>,

    /// Stream of the most recent chunk
    pub last_stream: Option<StreamKind>,

    pub started_at: DateTime<Local>,
}

impl ProcessSession {
    pub fn new(
        id: SessionId,
        key: ImageKey,
        device_name: impl Into<String>,
        command: impl Into<String>,
        process: ImageProcess,
    ) -> Self {
        Self {
            id,
            key,
            device_name: device_name.into(),
            command: command.into(),
            process,
            aggregator: OutputAggregator::new(),
            notification_id: None,
            last_stream: None,
            started_at: Local::now(),
        }
    }

    /// Cap the output buffer at `max_bytes` (0 = unbounded)
    pub fn with_output_limit(mut self, max_bytes: usize) -> Self {
        self.aggregator = OutputAggregator::new().with_limit(max_bytes);
        self
    }

    /// Feed a chunk to the aggregator
    pub fn append(&mut self, stream: StreamKind, bytes: &[u8]) -> Result<()> {
        self.last_stream = Some(stream);
        self.aggregator.append(bytes)
    }

    /// Notification title, e.g. `Example: target`
    pub fn summary(&self) -> String {
        format!("{}: {}", self.device_name, self.key.image_name)
    }

    /// Time since launch
    pub fn elapsed(&self) -> chrono::Duration {
        Local::now().signed_duration_since(self.started_at)
    }

    /// Release the output buffer and stop the process if it still runs
    pub fn teardown(&mut self) {
        self.aggregator.clear();
        if self.process.is_running() {
            self.process.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpd_core::DeviceId;
    use tokio::sync::mpsc;

    fn session(command: &str) -> (ProcessSession, mpsc::Receiver<hpd_core::ProcessEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let process = ImageProcess::spawn(command, tx).unwrap();
        let key = ImageKey::new(DeviceId::new("1234:5678"), "target");
        (
            ProcessSession::new(next_session_id(), key, "Example", command, process),
            rx,
        )
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = next_session_id();
        let b = next_session_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_new_session_state() {
        let (session, _rx) = session("exec sleep 5");
        assert_eq!(session.summary(), "Example: target");
        assert_eq!(session.command, "exec sleep 5");
        assert!(session.aggregator.is_empty());
        assert!(session.notification_id.is_none());
        assert!(session.last_stream.is_none());
        assert!(session.elapsed() >= chrono::Duration::zero());
    }

    #[tokio::test]
    async fn test_append_tracks_stream() {
        let (mut session, _rx) = session("exec sleep 5");
        session.append(StreamKind::Stdout, b"10%\r").unwrap();
        session.append(StreamKind::Stderr, b"20%\n").unwrap();

        assert_eq!(session.last_stream, Some(StreamKind::Stderr));
        assert_eq!(session.aggregator.render(), "20%\n");
    }

    #[tokio::test]
    async fn test_teardown_kills_and_clears() {
        let (mut session, mut rx) = session("exec sleep 30");
        session.append(StreamKind::Stdout, b"output\n").unwrap();

        session.teardown();
        assert!(session.aggregator.is_empty());

        let exit = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                if event.is_exit() {
                    return Some(event);
                }
            }
            None
        })
        .await
        .unwrap();
        assert!(exit.is_some());
    }
}
