//! Daemon settings parser for `settings.toml`
//!
//! The file is optional. Missing sections, missing keys and an unparseable
//! file all fall back to defaults.

use std::fmt;
use std::path::Path;

use hpd_core::prelude::*;
use serde::{Deserialize, Serialize};

pub const SETTINGS_FILENAME: &str = "settings.toml";

/// Daemon settings (`settings.toml`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub notification: NotificationSettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub watcher: WatcherSettings,

    #[serde(default)]
    pub process: ProcessSettings,
}

/// Notification presentation
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NotificationSettings {
    /// Application name passed to the notification server
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Icon name or path; empty for none
    #[serde(default)]
    pub icon: String,

    #[serde(default)]
    pub urgency: Urgency,

    /// Expiry in milliseconds, -1 lets the server decide
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i32,

    /// Only the last N rendered lines are pushed (0 = unlimited)
    #[serde(default = "default_max_body_lines")]
    pub max_body_lines: usize,

    /// Push a final notification carrying the exit code
    #[serde(default = "default_true")]
    pub notify_on_exit: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            icon: String::new(),
            urgency: Urgency::default(),
            timeout_ms: default_timeout_ms(),
            max_body_lines: default_max_body_lines(),
            notify_on_exit: true,
        }
    }
}

/// USB attach monitor
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MonitorSettings {
    /// Treat devices present at start-up as attached
    #[serde(default)]
    pub scan_existing: bool,
}

/// Config directory watcher
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WatcherSettings {
    /// Coalescing window; 0 reloads on every change event
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Image command execution
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProcessSettings {
    /// Shell that runs each command as `<shell> -c <command>`
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Per-session output cap in bytes; 0 = unlimited
    #[serde(default)]
    pub max_output_bytes: usize,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            max_output_bytes: 0,
        }
    }
}

/// Notification urgency level (freedesktop hint values 0..=2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    Critical,
}

impl Urgency {
    pub fn as_byte(&self) -> u8 {
        match self {
            Urgency::Low => 0,
            Urgency::Normal => 1,
            Urgency::Critical => 2,
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Urgency::Low => write!(f, "low"),
            Urgency::Normal => write!(f, "normal"),
            Urgency::Critical => write!(f, "critical"),
        }
    }
}

fn default_app_name() -> String {
    "hpd".to_string()
}

fn default_timeout_ms() -> i32 {
    -1
}

fn default_max_body_lines() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_shell() -> String {
    hpd_daemon::DEFAULT_SHELL.to_string()
}

fn default_debounce_ms() -> u64 {
    crate::watcher::DEFAULT_DEBOUNCE_MS
}

/// Load settings from `<config_dir>/settings.toml`
pub fn load_settings(config_dir: &Path) -> Settings {
    let path = config_dir.join(SETTINGS_FILENAME);

    if !path.exists() {
        debug!("No settings file at {:?}, using defaults", path);
        return Settings::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            Settings::default()
        }
    }
}
