//! # hpd-app - Dispatch Orchestration
//!
//! Configuration, sessions and the event loop of hotplug-dispatch.
//!
//! ## Public API
//!
//! ### Engine
//! - [`DispatchEngine`] - Single-consumer event loop over [`Message`]s
//!
//! ### Configuration
//! - [`ConfigStore`] - Owner of `devices.toml` (load, save, reload, set default)
//! - [`Settings`] - Daemon settings from `settings.toml`
//! - [`ConfigWatcher`] - Reports `devices.toml` changes
//!
//! ### Sessions
//! - [`ProcessSession`], [`SessionManager`], [`SessionId`]
//!
//! ### Control
//! - [`spawn_control_server()`] / [`send_request()`] - Unix socket used by `hpd launch` and `hpd set-default`
//!
//! ### Notifications
//! - [`Notifier`] - Notification sink trait
//! - [`DesktopNotifier`] - `org.freedesktop.Notifications` over the session bus
//! - [`LogNotifier`] - Writes notifications to the log

pub mod config;
pub mod control;
pub mod engine;
pub mod message;
pub mod notify;
pub mod session;
pub mod session_manager;
pub mod signals;
pub mod watcher;

pub use config::{default_config_dir, load_settings, ConfigStore, Settings};
#[cfg(unix)]
pub use control::{send_request, spawn_control_server};
pub use control::{socket_path, ControlReply, ControlRequest};
pub use engine::DispatchEngine;
pub use message::Message;
pub use notify::{DesktopNotifier, LogNotifier, Notification, NotificationId, Notifier};
pub use session::{ProcessSession, SessionId};
pub use session_manager::SessionManager;
pub use signals::spawn_signal_handler;
pub use watcher::{ConfigWatcher, WatcherConfig};
