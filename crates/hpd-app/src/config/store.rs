//! Persisted device configuration (`devices.toml`)
//!
//! [`ConfigStore`] owns the on-disk file and the current in-memory
//! [`Config`]. Readers get an `Arc<Config>` snapshot; every load or reload
//! builds a fresh `Config` and swaps the reference, so snapshots held
//! elsewhere never change underneath their owners.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use hpd_core::prelude::*;
use hpd_core::{Config, DeviceId};

pub const CONFIG_FILENAME: &str = "devices.toml";
const LOCK_FILENAME: &str = ".devices.lock";
const TEMP_FILENAME: &str = ".devices.toml.tmp";
const APP_DIR: &str = "hotplug-dispatch";

const FILE_HEADER: &str = "# hotplug-dispatch device configuration\n\
# Each device lists named images; `default_image` is launched on attach.\n\n";

/// Default configuration directory, `<config_dir>/hotplug-dispatch`
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR))
}

/// Owner of the device configuration
#[derive(Debug)]
pub struct ConfigStore {
    dir: PathBuf,
    path: PathBuf,
    config: Arc<Config>,
}

impl ConfigStore {
    /// Create the configuration directory if needed and load the config.
    ///
    /// An uncreatable directory is fatal; nothing else is.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::config_dir(&dir, e))?;

        let mut store = Self {
            path: dir.join(CONFIG_FILENAME),
            dir,
            config: Arc::new(Config::default()),
        };
        store.load()?;
        Ok(store)
    }

    /// Read the file, bootstrapping it when absent.
    ///
    /// An unparseable file yields an empty config and is left untouched.
    pub fn load(&mut self) -> Result<Arc<Config>> {
        let config = match self.read_file()? {
            Some(Ok(config)) => config,
            Some(Err(e)) => {
                warn!("Cannot parse {}: {}; starting with no devices", self.path.display(), e);
                Config::default()
            }
            None => self.bootstrap()?,
        };

        self.config = Arc::new(validate(config));
        Ok(self.snapshot())
    }

    /// Re-read the file after an external change and swap the config.
    ///
    /// A parse failure keeps the previous config.
    pub fn reload(&mut self) -> Result<Arc<Config>> {
        match self.read_file()? {
            Some(Ok(config)) => {
                self.config = Arc::new(validate(config));
                info!(
                    "Config updated: {} device(s) from {}",
                    self.config.devices.len(),
                    self.path.display()
                );
            }
            Some(Err(e)) => {
                warn!(
                    "Ignoring unparseable {}: {}; keeping previous config",
                    self.path.display(),
                    e
                );
            }
            None => {
                info!("{} removed, recreating it", self.path.display());
                let config = self.bootstrap()?;
                self.config = Arc::new(validate(config));
            }
        }
        Ok(self.snapshot())
    }

    /// Serialize the full config as a whole-file atomic rewrite
    pub fn save(&self, config: &Config) -> Result<()> {
        let body = toml::to_string_pretty(config)
            .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;

        let lock = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILENAME))
            .map_err(|e| Error::config(format!("Failed to open lock file: {}", e)))?;
        lock.lock_exclusive()
            .map_err(|e| Error::config(format!("Failed to lock config: {}", e)))?;

        let tmp = self.dir.join(TEMP_FILENAME);
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(FILE_HEADER.as_bytes())?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        let result = write();

        let _ = lock.unlock();

        result.map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::config(format!("Failed to write {}: {}", self.path.display(), e))
        })?;

        debug!("Saved config to {}", self.path.display());
        Ok(())
    }

    /// Set or clear a device's default image, then persist.
    pub fn set_default_image(
        &mut self,
        device_id: &DeviceId,
        image: Option<&str>,
    ) -> Result<Arc<Config>> {
        let mut config = (*self.config).clone();
        let device = config
            .find_device_mut(device_id)
            .ok_or_else(|| Error::unknown_device(device_id.as_str()))?;

        if let Some(name) = image {
            if device.find_image(name).is_none() {
                return Err(Error::unknown_image(device_id.as_str(), name));
            }
        }
        device.default_image = image.map(str::to_string);

        self.save(&config)?;
        info!(
            "Default image for {} set to {}",
            device_id,
            image.unwrap_or("<none>")
        );
        self.config = Arc::new(config);
        Ok(self.snapshot())
    }

    /// Current config
    pub fn snapshot(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Path of `devices.toml`
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the config files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `None` when the file does not exist; the inner result is the parse
    fn read_file(&self) -> Result<Option<std::result::Result<Config, toml::de::Error>>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(toml::from_str(&content))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::config(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn bootstrap(&self) -> Result<Config> {
        let config = Config::bootstrap();
        self.save(&config)?;
        info!("New config created at {}", self.path.display());
        Ok(config)
    }
}

/// Drop duplicate devices and images, keeping the first occurrence, and warn
/// about entries that can never match or launch.
fn validate(mut config: Config) -> Config {
    let mut seen_ids: HashSet<DeviceId> = HashSet::new();
    config.devices.retain(|device| {
        if seen_ids.insert(device.id.clone()) {
            true
        } else {
            warn!("Duplicate device id {} ignored", device.id);
            false
        }
    });

    for device in &mut config.devices {
        if !device.id.is_well_formed() {
            warn!(
                "Device {} has id {:?}, expected VVVV:PPPP",
                device.label(),
                device.id.as_str()
            );
        }

        let mut seen_names: HashSet<String> = HashSet::new();
        let id = device.id.clone();
        device.images.retain(|image| {
            if seen_names.insert(image.name.clone()) {
                true
            } else {
                warn!("Duplicate image {:?} on {} ignored", image.name, id);
                false
            }
        });

        if let Some(name) = &device.default_image {
            if device.find_image(name).is_none() {
                warn!(
                    "Default image {:?} of {} names no image; auto-launch disabled",
                    name,
                    device.label()
                );
            }
        }
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &Path, content: &str) {
        fs::write(dir.join(CONFIG_FILENAME), content).unwrap();
    }

    #[test]
    fn test_bootstrap_idempotence() {
        let dir = TempDir::new().unwrap();

        let mut store = ConfigStore::open(dir.path()).unwrap();
        let first = store.snapshot();
        assert_eq!(*first, Config::bootstrap());
        assert!(store.path().exists());

        let second = store.load().unwrap();
        assert_eq!(*second, *first);
        assert_eq!(second.devices.len(), 1);

        let reopened = ConfigStore::open(dir.path()).unwrap();
        assert_eq!(*reopened.snapshot(), Config::bootstrap());
    }

    #[test]
    fn test_open_creates_nested_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = ConfigStore::open(&nested).unwrap();
        assert!(store.path().starts_with(&nested));
        assert!(store.path().exists());
    }

    #[test]
    fn test_uncreatable_directory_is_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "not a dir").unwrap();

        let err = ConfigStore::open(blocker.join("sub")).unwrap_err();
        assert!(matches!(err, Error::ConfigDir { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_unparseable_file_on_first_load_is_empty_and_untouched() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), "this is [not toml");

        let store = ConfigStore::open(dir.path()).unwrap();
        assert!(store.snapshot().devices.is_empty());
        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "this is [not toml"
        );
    }

    #[test]
    fn test_reload_replaces_config() {
        let dir = TempDir::new().unwrap();
        let mut store = ConfigStore::open(dir.path()).unwrap();
        let before = store.snapshot();

        write_config(
            dir.path(),
            r#"
[[devices]]
name = "Board"
id = "0483:df11"
default_image = "flash"

[[devices.images]]
name = "flash"
command = "echo flashing"
"#,
        );

        let after = store.reload().unwrap();
        assert_eq!(after.devices.len(), 1);
        assert_eq!(after.devices[0].id, "0483:df11");
        // Earlier snapshots are unaffected
        assert_eq!(*before, Config::bootstrap());
    }

    #[test]
    fn test_reload_parse_failure_keeps_previous() {
        let dir = TempDir::new().unwrap();
        let mut store = ConfigStore::open(dir.path()).unwrap();

        write_config(dir.path(), "[[devices]\nbroken");
        let config = store.reload().unwrap();
        assert_eq!(*config, Config::bootstrap());
    }

    #[test]
    fn test_reload_after_delete_recreates_bootstrap() {
        let dir = TempDir::new().unwrap();
        let mut store = ConfigStore::open(dir.path()).unwrap();
        store
            .set_default_image(&DeviceId::new("1234:5678"), None)
            .unwrap();

        fs::remove_file(store.path()).unwrap();
        let config = store.reload().unwrap();
        assert_eq!(*config, Config::bootstrap());
        assert!(store.path().exists());
    }

    #[test]
    fn test_set_default_image_persists() {
        let dir = TempDir::new().unwrap();
        let mut store = ConfigStore::open(dir.path()).unwrap();
        let id = DeviceId::new("1234:5678");

        let config = store.set_default_image(&id, Some("target2")).unwrap();
        assert_eq!(
            config.find_device(&id).unwrap().default_image.as_deref(),
            Some("target2")
        );

        let reopened = ConfigStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened
                .snapshot()
                .find_device(&id)
                .unwrap()
                .default_image
                .as_deref(),
            Some("target2")
        );

        store.set_default_image(&id, None).unwrap();
        let content = fs::read_to_string(store.path()).unwrap();
        assert!(!content.contains("default_image"));
    }

    #[test]
    fn test_set_default_image_unknown_targets() {
        let dir = TempDir::new().unwrap();
        let mut store = ConfigStore::open(dir.path()).unwrap();

        let err = store
            .set_default_image(&DeviceId::new("ffff:ffff"), Some("target"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDevice { .. }));

        let err = store
            .set_default_image(&DeviceId::new("1234:5678"), Some("nope"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownImage { .. }));
        assert!(err.is_recoverable());

        assert_eq!(*store.snapshot(), Config::bootstrap());
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();
        store.save(&Config::bootstrap()).unwrap();

        assert!(!dir.path().join(TEMP_FILENAME).exists());
        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.starts_with("# hotplug-dispatch"));
        let parsed: Config = toml::from_str(&content).unwrap();
        assert_eq!(parsed, Config::bootstrap());
    }

    #[test]
    fn test_validate_drops_duplicates_keeps_first() {
        let dir = TempDir::new().unwrap();
        write_config(
            dir.path(),
            r#"
[[devices]]
name = "First"
id = "1111:2222"
default_image = "missing"

[[devices.images]]
name = "a"
command = "echo 1"

[[devices.images]]
name = "a"
command = "echo 2"

[[devices]]
name = "Second"
id = "1111:2222"

[[devices]]
name = "Odd"
id = "not-an-id"
"#,
        );

        let store = ConfigStore::open(dir.path()).unwrap();
        let config = store.snapshot();

        assert_eq!(config.devices.len(), 2);
        let first = &config.devices[0];
        assert_eq!(first.name, "First");
        assert_eq!(first.images.len(), 1);
        assert_eq!(first.images[0].command, "echo 1");
        // Stale default is kept but resolves to nothing
        assert_eq!(first.default_image.as_deref(), Some("missing"));
        assert!(first.default_image().is_none());
        assert_eq!(config.devices[1].id, "not-an-id");
    }
}
