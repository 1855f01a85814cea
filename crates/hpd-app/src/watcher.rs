//! Config directory watcher
//!
//! Watches the configuration directory and reports changes to
//! `devices.toml` as `Message::ConfigChanged`. The directory is watched
//! rather than the file so atomic renames by editors (and by our own saves)
//! are seen.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use hpd_core::prelude::*;
use notify::{Event, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::{mpsc, oneshot};

use crate::config::CONFIG_FILENAME;
use crate::message::Message;

/// Default debounce duration in milliseconds; 0 reloads on every event
pub const DEFAULT_DEBOUNCE_MS: u64 = 0;

/// How often the blocking watcher thread checks for a stop request
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the config watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Coalescing window for bursts of file events
    pub debounce: Duration,
    /// File name within the directory that triggers a reload
    pub file_name: OsString,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            file_name: OsString::from(CONFIG_FILENAME),
        }
    }
}

impl WatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set debounce duration in milliseconds
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce = Duration::from_millis(ms);
        self
    }

    pub fn with_file_name(mut self, name: impl Into<OsString>) -> Self {
        self.file_name = name.into();
        self
    }
}

/// Watches one configuration directory
pub struct ConfigWatcher {
    dir: PathBuf,
    config: WatcherConfig,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl ConfigWatcher {
    pub fn new(dir: impl Into<PathBuf>, config: WatcherConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
            stop_tx: None,
        }
    }

    /// Start watching; change notifications go to `message_tx`
    pub fn start(&mut self, message_tx: mpsc::Sender<Message>) -> Result<()> {
        if self.is_running() {
            return Err(Error::watcher("watcher is already running"));
        }

        let dir = self.dir.clone();
        let config = self.config.clone();
        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);

        // The debouncer delivers events on its own thread
        tokio::task::spawn_blocking(move || {
            Self::run_watcher(dir, config, message_tx, stop_rx);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    fn run_watcher(
        dir: PathBuf,
        config: WatcherConfig,
        message_tx: mpsc::Sender<Message>,
        stop_rx: oneshot::Receiver<()>,
    ) {
        if config.debounce.is_zero() {
            Self::run_immediate(dir, config.file_name, message_tx, stop_rx);
        } else {
            Self::run_debounced(dir, config, message_tx, stop_rx);
        }
    }

    /// Every relevant event triggers its own reload
    fn run_immediate(
        dir: PathBuf,
        file_name: OsString,
        message_tx: mpsc::Sender<Message>,
        stop_rx: oneshot::Receiver<()>,
    ) {
        let tx = message_tx.clone();
        let watcher_result = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    if is_config_event(&event, &file_name) {
                        debug!("Config file changed ({:?})", event.kind);
                        let _ = tx.blocking_send(Message::ConfigChanged);
                    }
                }
                Err(error) => report_error(&tx, error),
            }
        });

        let mut watcher = match watcher_result {
            Ok(w) => w,
            Err(e) => return report_setup_failure(&message_tx, "Failed to create watcher", e),
        };

        if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            return report_setup_failure(
                &message_tx,
                &format!("Failed to watch {}", dir.display()),
                e,
            );
        }
        info!("Watching {} for config changes", dir.display());

        wait_for_stop(stop_rx);
    }

    /// Bursts within the debounce window trigger one reload
    fn run_debounced(
        dir: PathBuf,
        config: WatcherConfig,
        message_tx: mpsc::Sender<Message>,
        stop_rx: oneshot::Receiver<()>,
    ) {
        let tx = message_tx.clone();
        let file_name = config.file_name.clone();

        let debouncer_result = new_debouncer(
            config.debounce,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let relevant = events
                        .iter()
                        .any(|event| is_config_event(event, &file_name));

                    if relevant {
                        debug!("Config file changed ({} event(s))", events.len());
                        let _ = tx.blocking_send(Message::ConfigChanged);
                    }
                }
                Err(errors) => {
                    for error in errors {
                        report_error(&tx, error);
                    }
                }
            },
        );

        let mut debouncer = match debouncer_result {
            Ok(d) => d,
            Err(e) => return report_setup_failure(&message_tx, "Failed to create watcher", e),
        };

        if let Err(e) = debouncer.watch(&dir, RecursiveMode::NonRecursive) {
            return report_setup_failure(
                &message_tx,
                &format!("Failed to watch {}", dir.display()),
                e,
            );
        }
        info!(
            "Watching {} for config changes (debounce {:?})",
            dir.display(),
            config.debounce
        );

        wait_for_stop(stop_rx);
    }
}

/// A non-access event touching the watched file name
fn is_config_event(event: &Event, file_name: &OsString) -> bool {
    !event.kind.is_access()
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name.as_os_str()))
}

fn report_error(tx: &mpsc::Sender<Message>, error: notify::Error) {
    warn!("Config watcher error: {:?}", error);
    let _ = tx.blocking_send(Message::WatcherError {
        message: error.to_string(),
    });
}

fn report_setup_failure(tx: &mpsc::Sender<Message>, context: &str, error: notify::Error) {
    error!("{}: {}", context, error);
    let _ = tx.blocking_send(Message::WatcherError {
        message: format!("{}: {}", context, error),
    });
}

/// Block the watcher thread until a stop is requested or the handle is gone
fn wait_for_stop(mut stop_rx: oneshot::Receiver<()>) {
    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(oneshot::error::TryRecvError::Closed) => {
                info!("Config watcher stopping");
                break;
            }
            Err(oneshot::error::TryRecvError::Empty) => {
                std::thread::sleep(STOP_POLL_INTERVAL);
            }
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_watcher_config_default() {
        let config = WatcherConfig::default();
        assert_eq!(config.debounce, Duration::ZERO);
        assert_eq!(config.file_name, OsString::from("devices.toml"));
    }

    #[test]
    fn test_watcher_config_builder() {
        let config = WatcherConfig::new()
            .with_debounce_ms(250)
            .with_file_name("other.toml");

        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.file_name, OsString::from("other.toml"));
    }

    #[tokio::test]
    async fn test_stop_when_not_started() {
        let mut watcher = ConfigWatcher::new("/tmp/none", WatcherConfig::default());
        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_double_start_error() {
        let dir = TempDir::new().unwrap();
        let mut watcher = ConfigWatcher::new(dir.path(), WatcherConfig::default());
        let (tx, _rx) = mpsc::channel(8);

        assert!(watcher.start(tx.clone()).is_ok());
        assert!(watcher.is_running());

        let err = watcher.start(tx).unwrap_err();
        assert!(matches!(err, Error::Watcher { .. }));

        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_config_write_sends_config_changed() {
        let dir = TempDir::new().unwrap();
        let mut watcher =
            ConfigWatcher::new(dir.path(), WatcherConfig::new().with_debounce_ms(50));
        let (tx, mut rx) = mpsc::channel(8);
        watcher.start(tx).unwrap();

        // Give the watch a moment to register
        tokio::time::sleep(Duration::from_millis(200)).await;

        std::fs::write(dir.path().join("unrelated.txt"), "x").unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), "[[devices]]\n").unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("change reported")
            .expect("channel open");
        assert!(matches!(msg, Message::ConfigChanged));

        watcher.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_undebounced_watcher_reports_each_write() {
        let dir = TempDir::new().unwrap();
        let mut watcher = ConfigWatcher::new(dir.path(), WatcherConfig::default());
        let (tx, mut rx) = mpsc::channel(64);
        watcher.start(tx).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(dir.path().join(CONFIG_FILENAME), "").unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("change reported")
            .expect("channel open");
        assert!(matches!(msg, Message::ConfigChanged));

        // Drain the first write, then a second write is reported on its own
        tokio::time::sleep(Duration::from_millis(200)).await;
        while rx.try_recv().is_ok() {}
        std::fs::write(dir.path().join(CONFIG_FILENAME), "[[devices]]\n").unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("second change reported")
            .expect("channel open");
        assert!(matches!(msg, Message::ConfigChanged));

        watcher.stop();
    }

    #[test]
    fn test_access_events_are_ignored() {
        let name = OsString::from(CONFIG_FILENAME);
        let path = PathBuf::from("/cfg").join(CONFIG_FILENAME);

        let modify = Event::new(notify::EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(path.clone());
        let access = Event::new(notify::EventKind::Access(notify::event::AccessKind::Any))
            .add_path(path);
        let other = Event::new(notify::EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("/cfg/settings.toml"));

        assert!(is_config_event(&modify, &name));
        assert!(!is_config_event(&access, &name));
        assert!(!is_config_event(&other, &name));
    }

    #[tokio::test]
    async fn test_missing_directory_reports_error() {
        let mut watcher =
            ConfigWatcher::new("/definitely/not/a/dir", WatcherConfig::default());
        let (tx, mut rx) = mpsc::channel(8);
        watcher.start(tx).unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("error reported")
            .expect("channel open");
        assert!(matches!(msg, Message::WatcherError { .. }));
    }
}
