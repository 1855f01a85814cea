//! hotplug-dispatch Library
//!
//! Runs a configured command when a known USB device is plugged in and shows
//! its live output as a desktop notification.
//!
//! The work is split across the workspace crates:
//! - `hpd-core` - domain types, device ids, output aggregation, errors, logging
//! - `hpd-daemon` - process spawning and the USB attach monitor
//! - `hpd-app` - configuration, sessions, notifications and the engine

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hpd_app::{
    default_config_dir, load_settings, send_request, socket_path, spawn_control_server,
    spawn_signal_handler, ConfigStore, ConfigWatcher, ControlReply, ControlRequest,
    DesktopNotifier, DispatchEngine, LogNotifier, Message, Notifier, WatcherConfig,
};
use hpd_core::prelude::*;
use hpd_core::DeviceId;
use hpd_daemon::{spawn_usb_monitor, MonitorConfig, MonitorEvent};
use tokio::sync::mpsc;

pub use hpd_app;
pub use hpd_core;
pub use hpd_daemon;

/// Capacity of the monitor → engine bridge
const MONITOR_CHANNEL_CAPACITY: usize = 32;

/// How long to wait for background tasks after the engine stops
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Options for [`run_daemon`]
#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    /// Configuration directory; `None` for the platform default
    pub config_dir: Option<PathBuf>,
    /// Mirror the log to stderr
    pub foreground: bool,
    /// Log notifications instead of sending them to the desktop
    pub no_notify: bool,
    /// Treat devices present at start-up as attached
    pub scan_existing: bool,
}

/// Resolve the configuration directory from an optional override
pub fn resolve_config_dir(config_dir: Option<PathBuf>) -> Result<PathBuf> {
    match config_dir {
        Some(dir) => Ok(dir),
        None => default_config_dir()
            .ok_or_else(|| Error::config("Cannot determine the user configuration directory")),
    }
}

/// Open (and on first run create) the device configuration
pub fn open_store(config_dir: Option<PathBuf>) -> Result<ConfigStore> {
    ConfigStore::open(resolve_config_dir(config_dir)?)
}

/// Run the daemon until SIGINT/SIGTERM.
pub async fn run_daemon(options: DaemonOptions) -> Result<()> {
    hpd_core::logging::init(options.foreground)?;

    let result = run_daemon_inner(options).await;
    if let Err(ref e) = result {
        error!("Daemon error: {:?}", e);
    }

    info!("hotplug-dispatch exiting");
    result
}

async fn run_daemon_inner(options: DaemonOptions) -> Result<()> {
    // Without a config there is nothing to dispatch
    let store = open_store(options.config_dir)?;
    info!("Config: {}", store.path().display());

    let mut settings = load_settings(store.dir());
    if options.scan_existing {
        settings.monitor.scan_existing = true;
    }

    let notifier = select_notifier(options.no_notify).await;
    let config_dir = store.dir().to_path_buf();
    let mut engine = DispatchEngine::new(store, settings.clone(), notifier);

    spawn_signal_handler(engine.msg_sender());

    let control = match spawn_control_server(
        socket_path(&config_dir),
        engine.msg_sender(),
        engine.shutdown_receiver(),
    ) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Control socket disabled: {}", e);
            None
        }
    };

    let mut watcher = ConfigWatcher::new(
        &config_dir,
        WatcherConfig::new().with_debounce_ms(settings.watcher.debounce_ms),
    );
    if let Err(e) = watcher.start(engine.msg_sender()) {
        warn!("Config hot-reload disabled: {}", e);
    }

    let (monitor_tx, monitor_rx) = mpsc::channel(MONITOR_CHANNEL_CAPACITY);
    let monitor = spawn_usb_monitor(
        MonitorConfig::new().with_scan_existing(settings.monitor.scan_existing),
        monitor_tx,
        engine.shutdown_receiver(),
    );
    spawn_monitor_bridge(monitor_rx, engine.msg_sender());

    engine.run().await;

    watcher.stop();
    if tokio::time::timeout(TASK_STOP_TIMEOUT, monitor)
        .await
        .is_err()
    {
        warn!("USB monitor did not stop in time");
    }
    if let Some(control) = control {
        if tokio::time::timeout(TASK_STOP_TIMEOUT, control)
            .await
            .is_err()
        {
            warn!("Control socket did not close in time");
        }
    }

    Ok(())
}

/// Desktop notifications when available, the log otherwise
pub async fn select_notifier(no_notify: bool) -> Arc<dyn Notifier> {
    if no_notify {
        info!("Notifications go to the log (--no-notify)");
        return Arc::new(LogNotifier::new());
    }

    match DesktopNotifier::connect().await {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            warn!("{}; notifications go to the log", e);
            Arc::new(LogNotifier::new())
        }
    }
}

/// Turn monitor events into engine messages
pub fn spawn_monitor_bridge(
    mut monitor_rx: mpsc::Receiver<MonitorEvent>,
    msg_tx: mpsc::Sender<Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = monitor_rx.recv().await {
            let msg = match event {
                MonitorEvent::Attached(path) => Message::DeviceAttached { path },
                MonitorEvent::Error(message) => Message::MonitorError { message },
            };
            if msg_tx.send(msg).await.is_err() {
                break;
            }
        }
    })
}

/// Ask the running daemon to launch an image now
pub async fn request_launch(
    config_dir: Option<PathBuf>,
    device_id: DeviceId,
    image: String,
) -> Result<String> {
    let path = socket_path(&resolve_config_dir(config_dir)?);
    let reply = send_request(&path, &ControlRequest::Launch { device_id, image }).await?;
    into_outcome(reply)
}

/// Set a device's default image through the running daemon, or directly in
/// `devices.toml` when no daemon is listening.
pub async fn request_set_default(
    config_dir: Option<PathBuf>,
    device_id: DeviceId,
    image: Option<String>,
) -> Result<String> {
    let dir = resolve_config_dir(config_dir)?;
    let path = socket_path(&dir);

    if path.exists() {
        let request = ControlRequest::SetDefault {
            device_id: device_id.clone(),
            image: image.clone(),
        };
        match send_request(&path, &request).await {
            Ok(reply) => return into_outcome(reply),
            Err(e) => debug!("{}; editing {} directly", e, hpd_app::config::CONFIG_FILENAME),
        }
    }

    let mut store = ConfigStore::open(dir)?;
    store.set_default_image(&device_id, image.as_deref())?;
    Ok(match image {
        Some(name) => format!("{}: default image is now {}", device_id, name),
        None => format!("{}: auto-launch disabled", device_id),
    })
}

fn into_outcome(reply: ControlReply) -> Result<String> {
    if reply.ok {
        Ok(reply.message)
    } else {
        Err(Error::control(reply.message))
    }
}

/// Human-readable listing of the configured devices
pub fn format_device_list(config: &hpd_core::Config) -> String {
    use std::fmt::Write;

    if config.devices.is_empty() {
        return "No devices configured.\n".to_string();
    }

    let mut out = String::new();
    for device in &config.devices {
        let _ = writeln!(out, "{} [{}]", device.label(), device.id);
        for image in &device.images {
            let marker = if device.default_image.as_deref() == Some(image.name.as_str()) {
                '*'
            } else {
                ' '
            };
            let _ = writeln!(out, "  {} {:<16} {}", marker, image.name, image.command);
        }
        if let Some(name) = device.default_image.as_deref() {
            if device.find_image(name).is_none() {
                let _ = writeln!(out, "  ! default image {:?} does not exist", name);
            }
        }
    }
    out
}

/// Path of `devices.toml` under the given (or default) directory
pub fn config_file_path(config_dir: Option<PathBuf>) -> Result<PathBuf> {
    Ok(resolve_config_dir(config_dir)?.join(hpd_app::config::CONFIG_FILENAME))
}

/// Resolve a device path to its id, as the engine would on attach
pub fn resolve_device(path: &Path) -> Option<hpd_core::DeviceId> {
    hpd_core::resolve_device_id(path)
}
