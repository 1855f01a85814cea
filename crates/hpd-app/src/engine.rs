//! DispatchEngine - turns attach, process and config events into sessions
//!
//! The engine owns the message channel and consumes it from a single task,
//! so the session table, the config snapshot and every aggregator are only
//! ever touched by one event at a time. Input sources (USB monitor, config
//! watcher, signal handler, per-session process forwarders) hold clones of
//! the sender.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hpd_core::prelude::*;
use hpd_core::{resolve_device_id, Config, DeviceId, ImageKey, ProcessEvent, StreamKind};
use hpd_daemon::ImageProcess;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::{ConfigStore, Settings, Urgency};
use crate::control::ControlReply;
use crate::message::Message;
use crate::notify::{Notification, Notifier};
use crate::session::{next_session_id, ProcessSession, SessionId};
use crate::session_manager::SessionManager;

/// Capacity of the engine's message channel
const MESSAGE_CAPACITY: usize = 256;

/// Capacity of each session's process event channel
const PROCESS_EVENT_CAPACITY: usize = 64;

/// How long shutdown waits for killed sessions to report their exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Orchestrator for hotplug-dispatch
pub struct DispatchEngine {
    store: ConfigStore,

    /// Read view of the config, replaced wholesale on reload
    config: Arc<Config>,

    sessions: SessionManager,
    notifier: Arc<dyn Notifier>,
    settings: Settings,

    /// Sender half of the message channel. Clone for input sources.
    msg_tx: mpsc::Sender<Message>,
    msg_rx: mpsc::Receiver<Message>,

    /// Send `true` to stop background tasks
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    quit_requested: bool,
}

impl DispatchEngine {
    pub fn new(store: ConfigStore, settings: Settings, notifier: Arc<dyn Notifier>) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel::<Message>(MESSAGE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config: store.snapshot(),
            store,
            sessions: SessionManager::new(),
            notifier,
            settings,
            msg_tx,
            msg_rx,
            shutdown_tx,
            shutdown_rx,
            quit_requested: false,
        }
    }

    /// Get a clone of the message sender for spawning input sources.
    pub fn msg_sender(&self) -> mpsc::Sender<Message> {
        self.msg_tx.clone()
    }

    /// Get a clone of the shutdown receiver for background tasks.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn should_quit(&self) -> bool {
        self.quit_requested
    }

    /// Current config view
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ─────────────────────────────────────────────────────────
    // Event Loop
    // ─────────────────────────────────────────────────────────

    /// Consume messages until `Quit`, then shut down.
    pub async fn run(&mut self) {
        info!(
            "Dispatch engine running with {} device(s) configured",
            self.config.devices.len()
        );

        while !self.quit_requested {
            match self.msg_rx.recv().await {
                Some(msg) => self.process_message(msg),
                None => break,
            }
        }

        self.shutdown().await;
    }

    /// Handle one message. Failures are logged; none stop the loop.
    pub fn process_message(&mut self, msg: Message) {
        match msg {
            Message::DeviceAttached { path } => self.on_device_attached(&path),
            Message::Process { session_id, event } => match event {
                ProcessEvent::Output { stream, bytes } => {
                    self.on_process_output(session_id, stream, &bytes)
                }
                ProcessEvent::Exited { code } => self.on_process_exited(session_id, code),
            },
            Message::ConfigChanged => self.on_config_changed(),
            Message::WatcherError { message } => {
                warn!("Config watcher error: {}", message);
            }
            Message::MonitorError { message } => {
                warn!("USB monitor error: {}", message);
            }
            Message::SetDefaultImage {
                device_id,
                image,
                reply,
            } => {
                let outcome = self
                    .set_default_image(&device_id, image.as_deref())
                    .map(|()| match &image {
                        Some(name) => format!("{}: default image is now {}", device_id, name),
                        None => format!("{}: auto-launch disabled", device_id),
                    });
                respond(reply, outcome, "Cannot set default image");
            }
            Message::LaunchImage { key, reply } => {
                let outcome = self.launch_image(&key).map(|started| match started {
                    Some(session_id) => format!("Started {} (session {})", key, session_id),
                    None => format!("{} is already running", key),
                });
                respond(reply, outcome, "Cannot launch image");
            }
            Message::Quit => {
                info!("Quit requested");
                self.quit_requested = true;
            }
        }
    }

    // ─────────────────────────────────────────────────────────
    // Attach and Launch
    // ─────────────────────────────────────────────────────────

    /// Auto-launch the default image of the device at `path`, if any.
    pub fn on_device_attached(&mut self, path: &Path) {
        let Some(id) = resolve_device_id(path) else {
            trace!("No device id for {}", path.display());
            return;
        };

        let config = Arc::clone(&self.config);
        let Some(device) = config.find_device(&id) else {
            debug!("Device added: {} (not configured)", id);
            return;
        };
        info!("Device added: {} ({})", device.label(), id);

        let Some(default_name) = device.default_image.as_deref() else {
            info!("{} has no default image, nothing to launch", device.label());
            return;
        };

        let Some(image) = device.default_image() else {
            warn!(
                "Default image {:?} of {} no longer exists",
                default_name,
                device.label()
            );
            return;
        };

        let key = device.image_key(image);
        if let Err(e) = self.start_session(&key) {
            error!("Failed to start {}: {}", key, e);
        }
    }

    /// Run any configured image by (device, name).
    pub fn launch_image(&mut self, key: &ImageKey) -> Result<Option<SessionId>> {
        let device = self
            .config
            .find_device(&key.device_id)
            .ok_or_else(|| Error::unknown_device(key.device_id.as_str()))?;
        if device.find_image(&key.image_name).is_none() {
            return Err(Error::unknown_image(
                key.device_id.as_str(),
                key.image_name.as_str(),
            ));
        }

        self.start_session(key)
    }

    /// Spawn the image's command unless a session for it already runs.
    ///
    /// Returns `Ok(None)` for the no-op case. A spawn failure leaves no
    /// session behind.
    pub fn start_session(&mut self, key: &ImageKey) -> Result<Option<SessionId>> {
        if let Some(existing) = self.sessions.find_by_key(key) {
            info!("{} is already running (session {}), ignoring", key, existing);
            return Ok(None);
        }

        let config = Arc::clone(&self.config);
        let (device, image) = config
            .find_image(key)
            .ok_or_else(|| Error::unknown_image(key.device_id.as_str(), key.image_name.as_str()))?;

        let session_id = next_session_id();
        let (event_tx, event_rx) = mpsc::channel(PROCESS_EVENT_CAPACITY);
        let process =
            ImageProcess::spawn_with_shell(&self.settings.process.shell, &image.command, event_tx)?;

        spawn_event_forwarder(session_id, event_rx, self.msg_tx.clone());

        let session = ProcessSession::new(
            session_id,
            key.clone(),
            device.label(),
            image.command.clone(),
            process,
        )
        .with_output_limit(self.settings.process.max_output_bytes);
        self.sessions.insert(session)?;

        info!("Started {} as session {}", key, session_id);
        Ok(Some(session_id))
    }

    // ─────────────────────────────────────────────────────────
    // Process Events
    // ─────────────────────────────────────────────────────────

    /// Aggregate a chunk and push the rendered text, replacing the
    /// session's previous notification.
    pub fn on_process_output(&mut self, session_id: SessionId, stream: StreamKind, bytes: &[u8]) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            trace!("Output for unknown session {} ignored", session_id);
            return;
        };

        if let Err(e) = session.append(stream, bytes) {
            error!("Session {} ({}) dropped: {}", session_id, session.key, e);
            if let Some(mut session) = self.sessions.remove(session_id) {
                session.teardown();
            }
            return;
        }

        let body = session
            .aggregator
            .render_tail(self.settings.notification.max_body_lines);
        let notification = Notification::new(&self.settings.notification, session.summary(), body)
            .replacing(session.notification_id);

        match self.notifier.push(notification) {
            Ok(id) => session.notification_id = Some(id),
            Err(e) => warn!("Notification for session {} failed: {}", session_id, e),
        }
    }

    /// Remove the session and release its buffer and process handle.
    pub fn on_process_exited(&mut self, session_id: SessionId, code: Option<i32>) {
        let Some(mut session) = self.sessions.remove(session_id) else {
            trace!("Exit for unknown session {} ignored", session_id);
            return;
        };

        info!(
            "{} exited with {:?} after {}s",
            session.key,
            code,
            session.elapsed().num_seconds()
        );

        if self.settings.notification.notify_on_exit {
            let status = exit_status(code);
            let tail = session
                .aggregator
                .render_tail(self.settings.notification.max_body_lines);
            let body = if tail.is_empty() {
                status
            } else if tail.ends_with('\n') {
                format!("{}{}", tail, status)
            } else {
                format!("{}\n{}", tail, status)
            };

            let mut notification =
                Notification::new(&self.settings.notification, session.summary(), body)
                    .replacing(session.notification_id);
            if code != Some(0) {
                notification = notification.with_urgency(Urgency::Critical);
            }

            if let Err(e) = self.notifier.push(notification) {
                warn!("Exit notification for session {} failed: {}", session_id, e);
            }
        }

        session.teardown();
    }

    // ─────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────

    /// Reload the config file and rebind the engine's view.
    ///
    /// Running sessions are untouched, even when their image is gone.
    pub fn on_config_changed(&mut self) {
        match self.store.reload() {
            Ok(config) => {
                self.config = config;
                for session in self.sessions.iter() {
                    if self.config.find_image(&session.key).is_none() {
                        info!(
                            "{} was removed from the config; session {} keeps running",
                            session.key, session.id
                        );
                    }
                }
            }
            Err(e) => error!("Config reload failed: {}", e),
        }
    }

    pub fn set_default_image(&mut self, device_id: &DeviceId, image: Option<&str>) -> Result<()> {
        self.config = self.store.set_default_image(device_id, image)?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────
    // Shutdown
    // ─────────────────────────────────────────────────────────

    /// Signal background tasks, kill running sessions and wait briefly for
    /// their exit events.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);

        let killed = self.sessions.kill_all();
        if killed > 0 {
            info!("Stopping {} running session(s)", killed);
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while !self.sessions.is_empty() {
            match tokio::time::timeout_at(deadline, self.msg_rx.recv()).await {
                Ok(Some(msg @ Message::Process { .. })) => self.process_message(msg),
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }

        if !self.sessions.is_empty() {
            warn!(
                "{} session(s) did not report exit in time",
                self.sessions.len()
            );
        }

        info!("Dispatch engine stopped");
    }
}

/// Relay one session's process events into the engine channel.
///
/// Ends after the process's event channel closes, which follows `Exited`.
fn spawn_event_forwarder(
    session_id: SessionId,
    mut event_rx: mpsc::Receiver<ProcessEvent>,
    msg_tx: mpsc::Sender<Message>,
) {
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if msg_tx
                .send(Message::Process { session_id, event })
                .await
                .is_err()
            {
                debug!("Engine channel closed, dropping session {} events", session_id);
                break;
            }
        }
    });
}

/// Log a failed request and answer its sender, if any
fn respond(reply: Option<oneshot::Sender<ControlReply>>, outcome: Result<String>, context: &str) {
    match &outcome {
        Ok(message) => info!("{}", message),
        Err(e) => warn!("{}: {}", context, e),
    }
    if let Some(reply) = reply {
        let _ = reply.send(ControlReply::from_result(outcome));
    }
}

fn exit_status(code: Option<i32>) -> String {
    match code {
        Some(0) => "Finished".to_string(),
        Some(code) => format!("Failed with exit code {}", code),
        None => "Terminated".to_string(),
    }
}
