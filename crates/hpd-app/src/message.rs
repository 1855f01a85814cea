//! Message types for the dispatch engine

use std::path::PathBuf;

use hpd_core::{DeviceId, ImageKey, ProcessEvent};
use tokio::sync::oneshot;

use crate::control::ControlReply;

use crate::session::SessionId;

/// Everything the engine reacts to, delivered one at a time
#[derive(Debug)]
pub enum Message {
    /// A device appeared at a sysfs path
    DeviceAttached { path: PathBuf },

    /// Output or exit of a session's process
    Process {
        session_id: SessionId,
        event: ProcessEvent,
    },

    /// `devices.toml` changed on disk
    ConfigChanged,

    /// Config watcher failed
    WatcherError { message: String },

    /// USB monitor failed
    MonitorError { message: String },

    /// Set or clear a device's default image (control socket)
    SetDefaultImage {
        device_id: DeviceId,
        image: Option<String>,
        reply: Option<oneshot::Sender<ControlReply>>,
    },

    /// Run an image by hand, under the same one-session-per-image rule
    LaunchImage {
        key: ImageKey,
        reply: Option<oneshot::Sender<ControlReply>>,
    },

    /// Shut down (signal handler)
    Quit,
}
