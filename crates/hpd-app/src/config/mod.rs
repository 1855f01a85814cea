//! Configuration for hotplug-dispatch
//!
//! Supports:
//! - `devices.toml` - Managed devices and their images (read/write)
//! - `settings.toml` - Daemon settings (read-only, optional)

pub mod settings;
pub mod store;

pub use settings::{
    load_settings, MonitorSettings, NotificationSettings, ProcessSettings, Settings, Urgency,
    WatcherSettings, SETTINGS_FILENAME,
};
pub use store::{default_config_dir, ConfigStore, CONFIG_FILENAME};
